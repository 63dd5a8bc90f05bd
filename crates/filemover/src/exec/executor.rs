//! Plan execution: dependency-ranked scheduling, bounded parallelism,
//! journal-before-mutation, retries and cancellation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{FileMoverError, Result};
use crate::exec::fsops;
use crate::exec::journal::{Journal, JournalEntry, ResultKind};
use crate::exec::progress::ProgressTracker;
use crate::plan::{MovePlan, NodeId, OpKind, PlanNode};
use crate::util::CancelToken;

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub parallel_threads: Option<usize>,
}

impl ExecOptions {
    fn thread_count(&self) -> usize {
        self.parallel_threads
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1)
    }
}

/// Pause drains the parallel slots; resume refills them. There is no
/// mid-operation suspension.
#[derive(Clone, Default)]
pub struct PauseGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn resume(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = false;
        cvar.notify_all();
    }

    fn wait_while_paused(&self) {
        let (lock, cvar) = &*self.inner;
        let mut paused = lock.lock().unwrap_or_else(|e| e.into_inner());
        while *paused {
            paused = cvar.wait(paused).unwrap_or_else(|e| e.into_inner());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecStatus {
    Ok,
    Partial,
    Cancelled,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node_id: NodeId,
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecResult {
    pub status: ExecStatus,
    pub success_count: u64,
    pub skip_count: u64,
    pub failed_count: u64,
    pub bytes_processed: u64,
    pub duration_secs: f64,
    pub journal_path: PathBuf,
    pub failures: Vec<NodeFailure>,
}

pub struct Executor {
    options: ExecOptions,
    pause: PauseGate,
}

impl Executor {
    pub fn new(options: ExecOptions) -> Self {
        Self {
            options,
            pause: PauseGate::new(),
        }
    }

    pub fn pause_gate(&self) -> PauseGate {
        self.pause.clone()
    }

    /// Apply every non-Skip node of the plan. The plan is read-only here;
    /// every attempted mutation hits the journal first.
    pub fn run(
        &self,
        plan: &MovePlan,
        journal_path: &Path,
        cancel: &CancelToken,
        tracker: &ProgressTracker,
    ) -> Result<ExecResult> {
        let started = Instant::now();
        let journal = Journal::create(journal_path)?;

        let mut skip_count = 0u64;
        for id in &plan.roots {
            let Some(node) = plan.node(*id) else { continue };
            if node.kind == OpKind::Skip {
                journal.append(
                    &JournalEntry::pending(
                        node.path_before.clone(),
                        node.path_after.clone(),
                        OpKind::Skip,
                    )
                    .skipped("skipped by plan"),
                )?;
                skip_count += 1;
            }
        }

        let executable: Vec<&PlanNode> = plan.executable_nodes().collect();
        let ranks = schedule_ranks(&executable);
        info!(
            "Executing {} operation(s) across {} rank(s)",
            executable.len(),
            ranks.len()
        );

        let success = AtomicU64::new(0);
        let failed = AtomicU64::new(0);
        let bytes_total = AtomicU64::new(0);
        let fatal = AtomicBool::new(false);
        let failures: Mutex<Vec<NodeFailure>> = Mutex::new(Vec::new());
        let mut cancelled = false;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.thread_count())
            .build()
            .map_err(|e| FileMoverError::Config(format!("executor pool: {}", e)))?;

        for rank in ranks {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if fatal.load(Ordering::SeqCst) {
                break;
            }

            // A rank's classes touch disjoint subtrees; each class is
            // internally ordered and runs on one worker.
            let classes = independence_classes(&rank);
            pool.scope(|scope| {
                for class in &classes {
                    let journal = &journal;
                    let success = &success;
                    let failed = &failed;
                    let bytes_total = &bytes_total;
                    let fatal = &fatal;
                    let failures = &failures;
                    let pause = &self.pause;
                    scope.spawn(move |_| {
                        for &node in class {
                            if cancel.is_cancelled() || fatal.load(Ordering::SeqCst) {
                                return;
                            }
                            pause.wait_while_paused();
                            tracker.set_current(&node.name_before);

                            match execute_node(journal, node) {
                                Ok(NodeOutcome::Done(bytes)) => {
                                    success.fetch_add(1, Ordering::SeqCst);
                                    bytes_total.fetch_add(bytes, Ordering::SeqCst);
                                    tracker.record_op(bytes);
                                }
                                Ok(NodeOutcome::Failed(message)) => {
                                    failed.fetch_add(1, Ordering::SeqCst);
                                    tracker.record_op(0);
                                    failures.lock().unwrap_or_else(|e| e.into_inner()).push(
                                        NodeFailure {
                                            node_id: node.id,
                                            path: node.path_before.clone(),
                                            message,
                                        },
                                    );
                                }
                                Err(e) => {
                                    // Only journal write failures land here.
                                    error!("Journal failure, aborting execution: {}", e);
                                    fatal.store(true, Ordering::SeqCst);
                                    return;
                                }
                            }
                        }
                    });
                }
            });
        }

        let duration = started.elapsed();
        let failed_count = failed.load(Ordering::SeqCst);
        let status = if fatal.load(Ordering::SeqCst) {
            ExecStatus::Fatal
        } else if cancelled {
            ExecStatus::Cancelled
        } else if failed_count > 0 {
            ExecStatus::Partial
        } else {
            ExecStatus::Ok
        };

        let result = ExecResult {
            status,
            success_count: success.load(Ordering::SeqCst),
            skip_count,
            failed_count,
            bytes_processed: bytes_total.load(Ordering::SeqCst),
            duration_secs: duration.as_secs_f64(),
            journal_path: journal_path.to_path_buf(),
            failures: failures.into_inner().unwrap_or_else(|e| e.into_inner()),
        };
        info!(
            "Execution finished: {:?}, {} ok / {} failed / {} skipped in {}",
            result.status,
            result.success_count,
            result.failed_count,
            result.skip_count,
            crate::util::format::format_duration(duration)
        );
        Ok(result)
    }
}

enum NodeOutcome {
    Done(u64),
    Failed(String),
}

/// Journal the attempt, run the operation, journal the outcome. An `Err`
/// from this function means the journal itself failed, which is fatal.
fn execute_node(journal: &Journal, node: &PlanNode) -> Result<NodeOutcome> {
    let attempt = JournalEntry::pending(
        node.path_before.clone(),
        node.path_after.clone(),
        node.kind,
    );
    journal.append(&attempt)?;

    let outcome = run_operation(node);

    match outcome {
        Ok(bytes) => {
            journal.append(&attempt.with_result(ResultKind::Ok))?;
            Ok(NodeOutcome::Done(bytes))
        }
        Err(e) => {
            let message = match &e {
                FileMoverError::Execution { message, .. } => message.clone(),
                FileMoverError::Transient { message, .. } => message.clone(),
                other => other.to_string(),
            };
            warn!(
                "Operation failed for {}: {}",
                node.path_before.display(),
                message
            );
            journal.append(&attempt.failed(message.clone()))?;
            Ok(NodeOutcome::Failed(message))
        }
    }
}

/// The filesystem side of one node. An Overwrite-resolved destination is
/// vacated first; a plain rename cannot land on a populated directory.
fn run_operation(node: &PlanNode) -> Result<u64> {
    if node.overwrites_existing() {
        fsops::clear_destination(&node.path_after)?;
    }
    match node.kind {
        OpKind::Move | OpKind::Rename => {
            fsops::rename_entry(&node.path_before, &node.path_after)
                .map(|_| node.size_bytes.unwrap_or(0))
        }
        OpKind::CopyDelete => fsops::copy_delete(&node.path_before, &node.path_after),
        OpKind::Skip | OpKind::None => unreachable!("non-executable node dispatched"),
    }
}

/// Topological ranks: a node whose destination lands inside another
/// pending node's source waits for it, and deeper sources move before the
/// ancestors that contain them. A fresh rank is dispatched only after the
/// previous rank fully completes.
fn schedule_ranks<'a>(nodes: &[&'a PlanNode]) -> Vec<Vec<&'a PlanNode>> {
    let n = nodes.len();
    let mut depends_on: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, a) in nodes.iter().enumerate() {
        for (j, b) in nodes.iter().enumerate() {
            if i == j {
                continue;
            }
            // a moves into a path b still occupies: b first.
            if a.path_after.starts_with(&b.path_before) {
                depends_on[i].push(j);
            }
            // a's source lives inside b's source: a first.
            if a.path_before != b.path_before && a.path_before.starts_with(&b.path_before) {
                depends_on[j].push(i);
            }
        }
    }

    let mut remaining: Vec<usize> = (0..n).collect();
    let mut placed = vec![false; n];
    let mut ranks = Vec::new();

    while !remaining.is_empty() {
        let mut this_rank: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| depends_on[i].iter().all(|&d| placed[d]))
            .collect();

        if this_rank.is_empty() {
            // Unorderable leftovers (the planner flags these as cycles);
            // run them last rather than dropping them.
            warn!("Scheduling stalled; dispatching remaining nodes in one rank");
            this_rank = remaining.clone();
        }

        for &i in &this_rank {
            placed[i] = true;
        }
        remaining.retain(|i| !placed[*i]);

        // Larger operations first to front-load long transfers.
        let mut rank_nodes: Vec<&PlanNode> = this_rank.into_iter().map(|i| nodes[i]).collect();
        rank_nodes.sort_by(|a, b| {
            b.size_bytes
                .unwrap_or(0)
                .cmp(&a.size_bytes.unwrap_or(0))
                .then_with(|| a.path_before.cmp(&b.path_before))
        });
        ranks.push(rank_nodes);
    }

    ranks
}

/// Partition a rank into classes whose source/destination subtrees overlap;
/// distinct classes are independent and may run concurrently.
fn independence_classes<'a>(rank: &[&'a PlanNode]) -> Vec<Vec<&'a PlanNode>> {
    let n = rank.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let root = find(parent, parent[i]);
            parent[i] = root;
        }
        parent[i]
    }

    fn related(a: &Path, b: &Path) -> bool {
        a.starts_with(b) || b.starts_with(a)
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let (a, b) = (rank[i], rank[j]);
            let overlapping = related(&a.path_before, &b.path_before)
                || related(&a.path_before, &b.path_after)
                || related(&a.path_after, &b.path_before)
                || related(&a.path_after, &b.path_after)
                || a.path_after.parent() == b.path_after.parent();
            if overlapping {
                let (ra, rb) = (find(&mut parent, i), find(&mut parent, j));
                if ra != rb {
                    parent[ra] = rb;
                }
            }
        }
    }

    let mut classes: std::collections::HashMap<usize, Vec<&PlanNode>> =
        std::collections::HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        classes.entry(root).or_default().push(rank[i]);
    }
    classes.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::journal::JournalReader;
    use tempfile::TempDir;

    fn node(id: u64, kind: OpKind, before: &Path, after: &Path) -> PlanNode {
        PlanNode {
            id: NodeId(id),
            is_dir: true,
            name_before: before
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path_before: before.to_path_buf(),
            name_after: after
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path_after: after.to_path_buf(),
            kind,
            size_bytes: None,
            warnings: Vec::new(),
            conflicts: Vec::new(),
            children: Vec::new(),
            rule_id: None,
        }
    }

    fn plan_of(nodes: Vec<PlanNode>) -> MovePlan {
        let roots = nodes.iter().map(|n| n.id).collect();
        let next_id = nodes.len() as u64;
        MovePlan {
            roots,
            nodes: nodes.into_iter().map(|n| (n.id, n)).collect(),
            summary: Default::default(),
            next_id,
            created_utc: chrono::Utc::now(),
        }
    }

    fn run_plan(plan: &MovePlan, journal: &Path) -> ExecResult {
        let executor = Executor::new(ExecOptions {
            parallel_threads: Some(2),
        });
        let tracker = ProgressTracker::new(plan.executable_nodes().count() as u64, None);
        executor
            .run(plan, journal, &CancelToken::new(), &tracker)
            .unwrap()
    }

    #[test]
    fn test_move_and_journal_lines() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("report_q1");
        std::fs::create_dir(&source).unwrap();
        std::fs::write(source.join("doc.txt"), b"hello").unwrap();
        let dest = temp.path().join("out/2024/report_q1");

        let plan = plan_of(vec![node(0, OpKind::Move, &source, &dest)]);
        let journal_path = temp.path().join("run.jsonl");
        let result = run_plan(&plan, &journal_path);

        assert_eq!(result.status, ExecStatus::Ok);
        assert_eq!(result.success_count, 1);
        assert!(!source.exists());
        assert_eq!(std::fs::read(dest.join("doc.txt")).unwrap(), b"hello");

        let reader = JournalReader::open(&journal_path).unwrap();
        assert_eq!(reader.entries.len(), 2);
        assert_eq!(reader.entries[0].result, ResultKind::Pending);
        assert_eq!(reader.entries[1].result, ResultKind::Ok);
        assert_eq!(reader.count(ResultKind::Ok), result.success_count);
    }

    #[test]
    fn test_skip_nodes_are_journaled() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("folder");
        std::fs::create_dir(&source).unwrap();

        let plan = plan_of(vec![node(
            0,
            OpKind::Skip,
            &source,
            &source.join("sub/folder"),
        )]);
        let journal_path = temp.path().join("run.jsonl");
        let result = run_plan(&plan, &journal_path);

        assert_eq!(result.status, ExecStatus::Ok);
        assert_eq!(result.skip_count, 1);
        assert!(source.exists());

        let reader = JournalReader::open(&journal_path).unwrap();
        assert_eq!(reader.count(ResultKind::Skip), 1);
    }

    #[test]
    fn test_missing_source_yields_partial() {
        let temp = TempDir::new().unwrap();
        let present = temp.path().join("present");
        std::fs::create_dir(&present).unwrap();

        let plan = plan_of(vec![
            node(
                0,
                OpKind::Move,
                &temp.path().join("absent"),
                &temp.path().join("out/absent"),
            ),
            node(1, OpKind::Move, &present, &temp.path().join("out/present")),
        ]);
        let journal_path = temp.path().join("run.jsonl");
        let result = run_plan(&plan, &journal_path);

        assert_eq!(result.status, ExecStatus::Partial);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.failures.len(), 1);
        assert!(temp.path().join("out/present").exists());

        let reader = JournalReader::open(&journal_path).unwrap();
        assert_eq!(reader.count(ResultKind::Ok), result.success_count);
        assert_eq!(reader.count(ResultKind::Failed), result.failed_count);
    }

    #[test]
    fn test_overwrite_node_replaces_destination() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("fresh");
        std::fs::create_dir(&source).unwrap();
        std::fs::write(source.join("new.txt"), b"new").unwrap();
        let dest = temp.path().join("occupied");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("old.txt"), b"old").unwrap();

        let mut overwrite = node(0, OpKind::Move, &source, &dest);
        overwrite.conflicts.push(crate::plan::Conflict::NameExists {
            existing_path: dest.clone(),
            dangerous: true,
        });
        let plan = plan_of(vec![overwrite]);
        let journal_path = temp.path().join("run.jsonl");
        let result = run_plan(&plan, &journal_path);

        assert_eq!(result.status, ExecStatus::Ok);
        assert_eq!(result.success_count, 1);
        // The occupying directory is gone; the source took its place.
        assert!(dest.join("new.txt").exists());
        assert!(!dest.join("old.txt").exists());
        assert!(!source.exists());
    }

    #[test]
    fn test_cancel_before_start_schedules_nothing() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("folder");
        std::fs::create_dir(&source).unwrap();

        let plan = plan_of(vec![node(
            0,
            OpKind::Move,
            &source,
            &temp.path().join("out/folder"),
        )]);
        let journal_path = temp.path().join("run.jsonl");

        let executor = Executor::new(ExecOptions::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let tracker = ProgressTracker::new(1, None);
        let result = executor
            .run(&plan, &journal_path, &cancel, &tracker)
            .unwrap();

        assert_eq!(result.status, ExecStatus::Cancelled);
        assert_eq!(result.success_count, 0);
        assert!(source.exists());
    }

    #[test]
    fn test_vacate_before_move_in() {
        let temp = TempDir::new().unwrap();
        // b moves away, then a moves into the spot b vacated.
        let a_src = temp.path().join("a");
        let b_src = temp.path().join("b");
        std::fs::create_dir(&a_src).unwrap();
        std::fs::create_dir(&b_src).unwrap();
        std::fs::write(b_src.join("marker.txt"), b"b").unwrap();

        let plan = plan_of(vec![
            node(0, OpKind::Move, &a_src, &temp.path().join("b/a")),
            node(1, OpKind::Move, &b_src, &temp.path().join("moved_b")),
        ]);
        let journal_path = temp.path().join("run.jsonl");
        let result = run_plan(&plan, &journal_path);

        assert_eq!(result.status, ExecStatus::Ok);
        // b's original content went with it; a landed in a fresh "b".
        assert!(temp.path().join("moved_b/marker.txt").exists());
        assert!(temp.path().join("b/a").exists());
        assert!(!temp.path().join("b/marker.txt").exists());
    }

    #[test]
    fn test_deeper_sources_move_first() {
        let temp = TempDir::new().unwrap();
        let outer = temp.path().join("outer");
        let inner = outer.join("inner");
        std::fs::create_dir_all(&inner).unwrap();
        std::fs::write(inner.join("deep.txt"), b"d").unwrap();

        let plan = plan_of(vec![
            node(0, OpKind::Move, &outer, &temp.path().join("moved_outer")),
            node(1, OpKind::Move, &inner, &temp.path().join("moved_inner")),
        ]);
        let journal_path = temp.path().join("run.jsonl");
        let result = run_plan(&plan, &journal_path);

        assert_eq!(result.status, ExecStatus::Ok);
        assert!(temp.path().join("moved_inner/deep.txt").exists());
        assert!(temp.path().join("moved_outer").exists());
        assert!(!temp.path().join("moved_outer/inner").exists());
    }

    #[test]
    fn test_schedule_ranks_orders_dependencies() {
        let a = node(0, OpKind::Move, Path::new("/r/a"), Path::new("/r/b/a"));
        let b = node(1, OpKind::Move, Path::new("/r/b"), Path::new("/r/c"));
        let nodes = vec![&a, &b];
        let ranks = schedule_ranks(&nodes);
        assert_eq!(ranks.len(), 2);
        assert_eq!(ranks[0][0].id, NodeId(1));
        assert_eq!(ranks[1][0].id, NodeId(0));
    }

    #[test]
    fn test_independence_classes_group_overlaps() {
        let a = node(0, OpKind::Move, Path::new("/r/a"), Path::new("/out1/a"));
        let b = node(1, OpKind::Move, Path::new("/r/a/b"), Path::new("/out2/b"));
        let c = node(2, OpKind::Move, Path::new("/q/c"), Path::new("/out3/c"));
        let rank = vec![&a, &b, &c];
        let classes = independence_classes(&rank);
        assert_eq!(classes.len(), 2);
        let sizes: Vec<usize> = {
            let mut v: Vec<usize> = classes.iter().map(|c| c.len()).collect();
            v.sort();
            v
        };
        assert_eq!(sizes, vec![1, 2]);
    }
}
