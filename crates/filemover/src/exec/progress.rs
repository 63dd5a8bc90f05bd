//! Execution progress: atomic counters updated by workers, snapshots
//! published to observers at a bounded rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Snapshot delivered over the progress channel, at most ~10 per second.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub current_item: Option<String>,
    pub completed_ops: u64,
    pub total_ops: u64,
    pub bytes_processed: u64,
    pub total_bytes: Option<u64>,
    pub bytes_per_sec: Option<u64>,
    pub eta_secs: Option<u64>,
}

impl Progress {
    pub fn percentage(&self) -> f64 {
        if self.total_ops == 0 {
            100.0
        } else {
            (self.completed_ops as f64 / self.total_ops as f64) * 100.0
        }
    }
}

pub struct ProgressTracker {
    total_ops: u64,
    total_bytes: Option<u64>,
    completed_ops: AtomicU64,
    bytes_processed: AtomicU64,
    current_item: Mutex<Option<String>>,
    started: Instant,
    last_emit: Mutex<Instant>,
}

const MIN_EMIT_INTERVAL: Duration = Duration::from_millis(100);

impl ProgressTracker {
    pub fn new(total_ops: u64, total_bytes: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            total_ops,
            total_bytes,
            completed_ops: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
            current_item: Mutex::new(None),
            started: now,
            // Allow the first emit immediately.
            last_emit: Mutex::new(now.checked_sub(MIN_EMIT_INTERVAL).unwrap_or(now)),
        }
    }

    pub fn set_current(&self, item: &str) {
        if let Ok(mut current) = self.current_item.lock() {
            *current = Some(item.to_string());
        }
    }

    pub fn record_op(&self, bytes: u64) {
        self.completed_ops.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Progress {
        let completed_ops = self.completed_ops.load(Ordering::Relaxed);
        let bytes_processed = self.bytes_processed.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64();

        let bytes_per_sec = if elapsed > 0.5 && bytes_processed > 0 {
            Some((bytes_processed as f64 / elapsed) as u64)
        } else {
            None
        };

        let eta_secs = match (self.total_bytes, bytes_per_sec) {
            (Some(total), Some(speed)) if speed > 0 && total > bytes_processed => {
                Some((total - bytes_processed) / speed)
            }
            _ => {
                // Fall back to op-rate when byte totals are unknown.
                if completed_ops > 0 && elapsed > 0.5 && self.total_ops > completed_ops {
                    let per_op = elapsed / completed_ops as f64;
                    Some((per_op * (self.total_ops - completed_ops) as f64) as u64)
                } else {
                    None
                }
            }
        };

        Progress {
            current_item: self.current_item.lock().ok().and_then(|c| c.clone()),
            completed_ops,
            total_ops: self.total_ops,
            bytes_processed,
            total_bytes: self.total_bytes,
            bytes_per_sec,
            eta_secs,
        }
    }

    /// True when enough time has passed since the last published snapshot
    /// to emit another one (≤10 Hz).
    pub fn should_emit(&self) -> bool {
        let Ok(mut last) = self.last_emit.lock() else {
            return false;
        };
        if last.elapsed() >= MIN_EMIT_INTERVAL {
            *last = Instant::now();
            true
        } else {
            false
        }
    }
}
