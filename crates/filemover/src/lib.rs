pub mod config;
pub mod error;
pub mod exec;
pub mod plan;
pub mod rules;
pub mod scan;
pub mod session;
pub mod util;

pub use config::{Config, Profile};
pub use error::{FileMoverError, Result};
pub use exec::{
    ExecOptions, ExecResult, ExecStatus, Executor, Journal, JournalEntry, JournalReader,
    Progress, ProgressTracker, ResultKind, UndoEngine, UndoReport,
};
pub use plan::{
    Conflict, MovePlan, MovePlanner, NodeChange, NodeId, OpKind, PlanNode, PlanOptions,
    PlanSummary, SimReport, ValidationDelta,
};
pub use rules::{ConflictPolicy, NormalizationOptions, Normalizer, PatternKind, PatternSpec, Rule, RuleSet};
pub use scan::{FolderHit, FolderScanner, ScanOptions, Warning};
pub use util::CancelToken;
