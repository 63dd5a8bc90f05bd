//! Inverse replay of an execution journal. Every `Ok` entry is attempted
//! once, in reverse order; failures are reported individually and never
//! stop the replay.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::exec::fsops;
use crate::exec::journal::{JournalEntry, JournalReader, ResultKind};
use crate::plan::OpKind;

/// Slack for the modification heuristic: directory timestamps written
/// within this window of the journal record are the move itself.
const MODIFIED_SLACK_SECS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreFailure {
    MissingDestination,
    ModifiedPostMove,
    InverseUnsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRestore {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub reason: RestoreFailure,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UndoReport {
    pub restored_count: u64,
    pub failed_restores: Vec<FailedRestore>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone)]
pub struct UndoEngine {
    /// Detect destinations modified after the move (size/mtime heuristic)
    /// and refuse to restore them.
    pub detect_modified: bool,
}

impl Default for UndoEngine {
    fn default() -> Self {
        Self {
            detect_modified: true,
        }
    }
}

impl UndoEngine {
    pub fn new(detect_modified: bool) -> Self {
        Self { detect_modified }
    }

    pub fn replay(&self, journal_path: &Path) -> Result<UndoReport> {
        let reader = JournalReader::open(journal_path)?;
        let tail = reader.ambiguous_tail();
        if !tail.is_empty() {
            warn!(
                "Journal has {} pending attempt(s) with no result; treating as not executed",
                tail.len()
            );
        }

        let mut report = UndoReport::default();
        let started = Instant::now();

        let completed: Vec<&JournalEntry> = reader
            .entries
            .iter()
            .filter(|e| e.result == ResultKind::Ok)
            .collect();
        info!("Undoing {} completed operation(s)", completed.len());

        for entry in completed.iter().rev() {
            match self.undo_entry(entry) {
                Ok(()) => {
                    report.restored_count += 1;
                    info!(
                        "Restored {} <- {}",
                        entry.source.display(),
                        entry.dest.display()
                    );
                }
                Err(failure) => {
                    warn!(
                        "Cannot restore {}: {}",
                        entry.source.display(),
                        failure.message
                    );
                    report.failed_restores.push(failure);
                }
            }
        }

        report.duration_secs = started.elapsed().as_secs_f64();
        Ok(report)
    }

    fn undo_entry(&self, entry: &JournalEntry) -> std::result::Result<(), FailedRestore> {
        let fail = |reason: RestoreFailure, message: String| FailedRestore {
            source: entry.source.clone(),
            dest: entry.dest.clone(),
            reason,
            message,
        };

        if !entry.dest.exists() {
            return Err(fail(
                RestoreFailure::MissingDestination,
                format!("destination no longer exists: {}", entry.dest.display()),
            ));
        }
        if entry.source.exists() {
            return Err(fail(
                RestoreFailure::InverseUnsupported,
                format!("source is occupied again: {}", entry.source.display()),
            ));
        }
        if self.detect_modified && modified_since(&entry.dest, entry.when_utc) {
            return Err(fail(
                RestoreFailure::ModifiedPostMove,
                format!("destination changed after the move: {}", entry.dest.display()),
            ));
        }

        match entry.op {
            OpKind::Move | OpKind::Rename => {
                fsops::rename_entry(&entry.dest, &entry.source)
                    .map_err(|e| fail(RestoreFailure::InverseUnsupported, e.to_string()))
            }
            OpKind::CopyDelete => {
                fsops::copy_tree(&entry.dest, &entry.source)
                    .map_err(|e| fail(RestoreFailure::InverseUnsupported, e.to_string()))?;
                fsops::remove_tree(&entry.dest)
                    .map_err(|e| fail(RestoreFailure::InverseUnsupported, e.to_string()))
            }
            OpKind::Skip | OpKind::None => Err(fail(
                RestoreFailure::InverseUnsupported,
                format!("no inverse for {:?}", entry.op),
            )),
        }
    }
}

/// Size+mtime heuristic: the destination counts as modified when its
/// directory entry changed later than the journal record (with slack for
/// the move's own timestamp writes).
fn modified_since(dest: &Path, recorded: DateTime<Utc>) -> bool {
    let Ok(metadata) = std::fs::symlink_metadata(dest) else {
        return false;
    };
    let Ok(modified) = metadata.modified() else {
        return false;
    };
    let modified: DateTime<Utc> = modified.into();
    modified > recorded + ChronoDuration::seconds(MODIFIED_SLACK_SECS)
}
