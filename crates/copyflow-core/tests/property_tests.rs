//! Property tests over randomly generated control-flow graphs

use copyflow_core::dataflow::transfer::refine_along_edge;
use copyflow_core::dataflow::DataflowAnalysis;
use copyflow_core::prelude::*;
use proptest::prelude::*;

const ENTITIES: u32 = 5;

/// Extra equality fact on one outgoing edge: (use else edge, left, right, identity)
type EdgeFact = (bool, u32, u32, bool);

type BlockLayout = (Vec<Operation>, Shape, Vec<EdgeFact>);

#[derive(Debug, Clone)]
enum Shape {
    Return,
    Goto(usize),
    Branch(usize, usize, Option<(u32, u32, bool)>),
}

fn semantics(reference: bool) -> CopySemantics {
    if reference {
        CopySemantics::Reference
    } else {
        CopySemantics::Value
    }
}

fn operation() -> impl Strategy<Value = Operation> {
    let id = (0..ENTITIES).prop_map(EntityId);
    prop_oneof![
        3 => (id.clone(), any::<bool>()).prop_map(|(t, r)| Operation::define(t, semantics(r))),
        4 => (id.clone(), id.clone()).prop_map(|(t, s)| Operation::assign(t, s)),
        2 => prop::collection::vec(id, 1..3).prop_map(Operation::invalidate),
        1 => Just(Operation::InvalidateAll),
    ]
}

fn shape(blocks: usize) -> impl Strategy<Value = Shape> {
    let condition = prop::option::of((0..ENTITIES, 0..ENTITIES, any::<bool>()));
    prop_oneof![
        1 => Just(Shape::Return),
        2 => (0..blocks).prop_map(Shape::Goto),
        3 => (0..blocks, 0..blocks, condition).prop_map(|(t, e, c)| Shape::Branch(t, e, c)),
    ]
}

fn edge_facts() -> impl Strategy<Value = Vec<EdgeFact>> {
    let fact = (any::<bool>(), 0..ENTITIES, 0..ENTITIES, any::<bool>());
    prop::collection::vec(fact, 0..3)
}

fn graph() -> impl Strategy<Value = Vec<BlockLayout>> {
    (1usize..7).prop_flat_map(|blocks| {
        let block = (
            prop::collection::vec(operation(), 0..4),
            shape(blocks),
            edge_facts(),
        );
        prop::collection::vec(block, blocks)
    })
}

fn seeds() -> impl Strategy<Value = Vec<Option<bool>>> {
    prop::collection::vec(prop::option::of(any::<bool>()), ENTITIES as usize)
}

fn build_cfg(layout: &[BlockLayout]) -> Cfg {
    let mut cfg = Cfg::new();
    let mut ids = vec![cfg.entry];
    for _ in 1..layout.len() {
        ids.push(cfg.new_block());
    }
    for entity in 0..ENTITIES {
        cfg.declare_entity(EntityId(entity));
    }

    for (index, (ops, shape, facts)) in layout.iter().enumerate() {
        let block = ids[index];
        for op in ops {
            cfg.push_op(block, op.clone()).unwrap();
        }
        let (first, second) = match *shape {
            Shape::Return => (cfg.exit, cfg.exit),
            Shape::Goto(target) => (ids[target], ids[target]),
            Shape::Branch(then_index, else_index, _) => (ids[then_index], ids[else_index]),
        };
        match *shape {
            Shape::Return => cfg.ret(block).unwrap(),
            Shape::Goto(target) => cfg.goto(block, ids[target]).unwrap(),
            Shape::Branch(then_index, else_index, condition) => {
                let condition = condition.map(|(left, right, reference)| Condition::Equals {
                    left: EntityId(left),
                    right: EntityId(right),
                    semantics: semantics(reference),
                });
                cfg.branch(block, condition, ids[then_index], ids[else_index]).unwrap()
            }
        }
        for &(use_second, left, right, reference) in facts {
            let target = if use_second { second } else { first };
            let equal = EdgeAssertion::Equal {
                left: EntityId(left),
                right: EntityId(right),
                semantics: semantics(reference),
            };
            cfg.assert_on_edge(block, target, equal).unwrap();
        }
    }
    cfg
}

fn seeded_analysis(seeds: &[Option<bool>], policy: MergePolicy) -> CopyAnalysis {
    let config = CopyAnalysisConfig::default()
        .with_max_iterations(100_000)
        .with_merge_policy(policy)
        .with_invariant_checks(true);
    let mut analysis = CopyAnalysis::new().with_config(config);
    for (index, seed) in seeds.iter().enumerate() {
        let entity = EntityId(index as u32);
        analysis = match seed {
            Some(true) => analysis.seed_known(entity, CopySemantics::Reference),
            Some(false) => analysis.seed_unknown(entity),
            None => analysis,
        };
    }
    analysis
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_analysis_converges_with_consistent_states(layout in graph(), seeds in seeds()) {
        let cfg = build_cfg(&layout);
        for policy in [MergePolicy::Conservative, MergePolicy::Intersect] {
            let result = seeded_analysis(&seeds, policy).analyze(&cfg);
            prop_assert!(result.is_ok(), "{:?}", result.as_ref().err());
            let result = result.unwrap();

            for block in cfg.blocks() {
                for index in 0..=block.ops.len() {
                    if let Some(state) = result.state_at(ProgramPoint::new(block.id, index)) {
                        let checked = state.check_invariants();
                        prop_assert!(checked.is_ok(), "{:?}", checked);
                    }
                }
            }
        }
    }

    #[test]
    fn prop_entry_states_are_sound_for_their_predecessors(
        layout in graph(),
        seeds in seeds(),
    ) {
        let cfg = build_cfg(&layout);
        let analysis = seeded_analysis(&seeds, MergePolicy::Conservative);
        let result = analysis.analyze(&cfg).unwrap();

        for block in cfg.blocks() {
            let Some(entry_state) = result.entry_state(block.id) else {
                continue;
            };
            let mut incoming = Vec::new();
            if block.id == cfg.entry {
                incoming.push(analysis.initial_fact());
            }
            for edge in cfg.incoming_edges(block.id) {
                if let Some(out) = result.exit_state(edge.from) {
                    incoming.push(refine_along_edge(out, &edge.facts));
                }
            }
            // Nothing the predecessors deliver is stronger than the recorded entry
            let delivered = analysis.join(&incoming);
            prop_assert_eq!(&analysis.join(&[entry_state.clone(), delivered]), entry_state);
        }
    }

    #[test]
    fn prop_reached_blocks_match_graph_reachability(layout in graph(), seeds in seeds()) {
        let cfg = build_cfg(&layout);
        let result = seeded_analysis(&seeds, MergePolicy::Conservative).analyze(&cfg).unwrap();
        let reachable = cfg.reverse_postorder();

        for block in cfg.blocks() {
            let visited = result.entry_state(block.id).is_some();
            prop_assert_eq!(visited, reachable.contains(&block.id));
        }
    }

    #[test]
    fn prop_analysis_is_deterministic(layout in graph(), seeds in seeds()) {
        let cfg = build_cfg(&layout);
        let analysis = seeded_analysis(&seeds, MergePolicy::Conservative);
        let first = serde_json::to_value(analysis.analyze(&cfg).unwrap()).unwrap();
        let second = serde_json::to_value(analysis.analyze(&cfg).unwrap()).unwrap();
        prop_assert_eq!(first, second);
    }
}
