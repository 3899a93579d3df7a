//! # Copyflow Core
//!
//! Copy and alias equivalence analysis over control-flow graphs.
//!
//! At every program point the analysis knows which entities (variables,
//! fields, array slots) hold the same reference or an equal value. Other
//! analyses use it to propagate a fact about one entity to all of its
//! current copies.
//!
//! ## Quick Start
//!
//! ```rust
//! use copyflow_core::prelude::*;
//!
//! let mut entities = EntityTable::new();
//! let x = entities.intern("x");
//! let y = entities.intern("y");
//!
//! let mut cfg = Cfg::new();
//! cfg.push_op(cfg.entry, Operation::assign(y, x))?;
//! cfg.ret(cfg.entry)?;
//!
//! let result = CopyAnalysis::new()
//!     .seed_known(x, CopySemantics::Reference)
//!     .analyze(&cfg)?;
//!
//! let exit = ProgramPoint::block_entry(cfg.exit);
//! assert_eq!(result.copies_of(exit, x), vec![y]);
//! # Ok::<(), CopyAnalysisError>(())
//! ```

pub mod config;
pub mod dataflow;
pub mod entity;
pub mod error;

pub use config::{CopyAnalysisConfig, MergePolicy};
pub use entity::{EntityId, EntityTable};
pub use error::{CopyAnalysisError, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{CopyAnalysisConfig, MergePolicy};
    pub use crate::dataflow::{
        BlockId, Cfg, Condition, CopyAbstractValue, CopyAnalysis, CopyAnalysisResult,
        CopySemantics, CopyState, CopyValueKind, EdgeAssertion, Operation, ProgramPoint,
    };
    pub use crate::entity::{EntityId, EntityTable};
    pub use crate::error::CopyAnalysisError;
}
