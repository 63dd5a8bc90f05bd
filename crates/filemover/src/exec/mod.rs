//! Journaled plan execution, progress, and inverse replay.

pub mod executor;
pub mod fsops;
pub mod journal;
pub mod progress;
pub mod space;
pub mod undo;

pub use executor::{ExecOptions, ExecResult, ExecStatus, Executor, NodeFailure, PauseGate};
pub use journal::{Journal, JournalEntry, JournalReader, ResultKind};
pub use progress::{Progress, ProgressTracker};
pub use undo::{FailedRestore, RestoreFailure, UndoEngine, UndoReport};
