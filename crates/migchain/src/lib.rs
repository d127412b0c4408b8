pub mod config;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod repair;
pub mod report;
pub mod store;
mod types;

pub use config::RepairConfig;
pub use descriptor::{Descriptor, DescriptorSet};
pub use error::{ChainError, ParseDiagnostic, ParseFailure, Result, SourceSpan};
pub use graph::{ChainHealth, MigrationGraph, MigrationNode, ParentEdit, analyze, linearize};
pub use repair::{RepairExecution, RepairStatus, RunMode, execute_repair, recover_repair};
pub use report::{RepairReport, RepairSummary};
pub use types::{OrderHint, RevisionId, SourceRef};
