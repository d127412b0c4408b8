pub mod journal;
pub mod rewrite;

pub use journal::{RecoveryReport, inspect_sidecars, reconcile_sidecars, recover};
pub use rewrite::{PlannedRewrite, RewriteMode, RewriteOutcome, Rewriter};
