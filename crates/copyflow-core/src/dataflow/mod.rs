//! Copy/alias dataflow analysis
//!
//! This module implements the dataflow framework behind copy analysis:
//! - Control Flow Graph supplied by the host, with predicate facts on edges
//! - Copy lattice with the known-kind merge rule
//! - Arena-backed equivalence class store per program point
//! - Worklist-based fixpoint solver

mod cfg;
mod copy_analysis;
mod lattice;
mod solver;
mod state;
pub mod transfer;

pub use cfg::{
    BasicBlock, BlockId, Cfg, CfgEdge, Condition, EdgeAssertion, EdgeFacts, Operation, Terminator,
};
pub use copy_analysis::{CopyAnalysis, CopyAnalysisResult, ProgramPoint};
pub use lattice::{CopyAbstractValue, CopySemantics, CopyValueKind};
pub use solver::{BlockStatus, DataflowAnalysis, FixpointResult, FixpointSolver};
pub use state::CopyState;
