//! Engine-to-shell surface: pollable sessions over plain threads and
//! channels. `start_*` returns a handle, `get_*` returns a snapshot; no
//! callbacks cross the boundary.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::error::{FileMoverError, Result};
use crate::exec::{
    ExecOptions, ExecResult, Executor, JournalReader, PauseGate, Progress, ProgressTracker,
    ResultKind, UndoEngine, UndoReport,
};
use crate::plan::{
    planner::PlanOptions, revalidate, MovePlan, NodeChange, SimReport, ValidationDelta,
};
use crate::plan::planner::MovePlanner;
use crate::rules::Rule;
use crate::scan::{FolderHit, FolderScanner, ScanOptions, ScanStats};
use crate::util::CancelToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub running: bool,
    pub hits_found: usize,
    pub stats: Option<ScanStatsSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanStatsSnapshot {
    pub dirs_visited: u64,
    pub refused: u64,
    pub denied: u64,
    pub errors: u64,
    pub hits: u64,
}

impl From<ScanStats> for ScanStatsSnapshot {
    fn from(stats: ScanStats) -> Self {
        Self {
            dirs_visited: stats.dirs_visited,
            refused: stats.refused,
            denied: stats.denied,
            errors: stats.errors,
            hits: stats.hits,
        }
    }
}

/// A scan running on a background thread, streaming hits over a channel.
pub struct ScanSession {
    handle: Option<JoinHandle<Result<ScanStats>>>,
    receiver: Receiver<FolderHit>,
    collected: Vec<FolderHit>,
    cancel: CancelToken,
    final_stats: Option<ScanStats>,
}

impl ScanSession {
    pub fn start(rules: Vec<Rule>, options: ScanOptions, roots: Vec<PathBuf>) -> Result<Self> {
        let scanner = FolderScanner::new(rules, options)?;
        let cancel = CancelToken::new();
        let (tx, rx) = std::sync::mpsc::channel();

        let worker_cancel = cancel.clone();
        let handle = std::thread::spawn(move || {
            let sink: Mutex<Sender<FolderHit>> = Mutex::new(tx);
            scanner.scan_with(&roots, &worker_cancel, &|hit| {
                if let Ok(sender) = sink.lock() {
                    let _ = sender.send(hit);
                }
            })
        });

        Ok(Self {
            handle: Some(handle),
            receiver: rx,
            collected: Vec::new(),
            cancel,
            final_stats: None,
        })
    }

    /// Drain newly produced hits and report whether the scan is still
    /// running.
    pub fn poll(&mut self) -> ScanSnapshot {
        loop {
            match self.receiver.try_recv() {
                Ok(hit) => self.collected.push(hit),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let running = self
            .handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false);
        if !running && self.final_stats.is_none() {
            if let Some(handle) = self.handle.take() {
                if let Ok(Ok(stats)) = handle.join() {
                    self.final_stats = Some(stats);
                }
            }
            // Hits sent between the drain above and worker exit.
            while let Ok(hit) = self.receiver.try_recv() {
                self.collected.push(hit);
            }
        }

        ScanSnapshot {
            running,
            hits_found: self.collected.len(),
            stats: self.final_stats.clone().map(Into::into),
        }
    }

    pub fn hits(&self) -> &[FolderHit] {
        &self.collected
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the scan completes and hand back everything it found.
    pub fn finish(mut self) -> Result<(Vec<FolderHit>, ScanStats)> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| FileMoverError::Config("scan already finished".to_string()))?;
        let stats = handle
            .join()
            .map_err(|_| FileMoverError::Config("scan worker panicked".to_string()))??;
        while let Ok(hit) = self.receiver.try_recv() {
            self.collected.push(hit);
        }
        Ok((self.collected, stats))
    }
}

/// Build a plan synchronously on the caller's thread.
pub fn build_plan(hits: &[FolderHit], rules: &[Rule], options: PlanOptions) -> Result<MovePlan> {
    MovePlanner::new(options).build(hits, rules)
}

/// Apply a node edit and revalidate the affected region.
pub fn mutate_plan(
    plan: &mut MovePlan,
    change: NodeChange,
    options: &PlanOptions,
) -> Result<ValidationDelta> {
    revalidate::revalidate(plan, change, options)
}

pub fn simulate_plan(plan: &MovePlan) -> SimReport {
    MovePlanner::default().simulate(plan)
}

/// An execution running on a background thread, observable via progress
/// snapshots.
pub struct ExecSession {
    handle: Option<JoinHandle<Result<ExecResult>>>,
    tracker: Arc<ProgressTracker>,
    cancel: CancelToken,
    pause: PauseGate,
}

impl ExecSession {
    pub fn start(plan: MovePlan, journal_path: PathBuf, options: ExecOptions) -> Self {
        let total_ops = plan.executable_nodes().count() as u64;
        let total_bytes = plan
            .executable_nodes()
            .filter_map(|n| n.size_bytes)
            .fold(None::<u64>, |acc, size| Some(acc.unwrap_or(0) + size));
        let tracker = Arc::new(ProgressTracker::new(total_ops, total_bytes));
        let cancel = CancelToken::new();

        let executor = Executor::new(options);
        let pause = executor.pause_gate();
        let worker_tracker = tracker.clone();
        let worker_cancel = cancel.clone();
        let handle = std::thread::spawn(move || {
            executor.run(&plan, &journal_path, &worker_cancel, &worker_tracker)
        });

        Self {
            handle: Some(handle),
            tracker,
            cancel,
            pause,
        }
    }

    pub fn progress(&self) -> Progress {
        self.tracker.snapshot()
    }

    pub fn running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn resume(&self) {
        self.pause.resume();
    }

    pub fn join(mut self) -> Result<ExecResult> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| FileMoverError::Config("execution already joined".to_string()))?;
        handle
            .join()
            .map_err(|_| FileMoverError::Config("executor worker panicked".to_string()))?
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalSummary {
    pub entries: u64,
    pub ok: u64,
    pub skipped: u64,
    pub failed: u64,
    pub pending_tail: u64,
}

/// Inspect a journal without mutating anything. A non-zero `pending_tail`
/// marks an interrupted execution.
pub fn validate_journal(path: &Path) -> Result<JournalSummary> {
    let reader = JournalReader::open(path)?;
    Ok(JournalSummary {
        entries: reader.entries.len() as u64,
        ok: reader.count(ResultKind::Ok),
        skipped: reader.count(ResultKind::Skip),
        failed: reader.count(ResultKind::Failed),
        pending_tail: reader.ambiguous_tail().len() as u64,
    })
}

pub fn undo_journal(path: &Path, detect_modified: bool) -> Result<UndoReport> {
    UndoEngine::new(detect_modified).replay(path)
}

/// Copy a journal to another location (it is immutable once execution
/// ends).
pub fn export_journal(path: &Path, dest: &Path) -> Result<()> {
    JournalReader::open(path)?;
    std::fs::copy(path, dest).map_err(FileMoverError::Io)?;
    Ok(())
}
