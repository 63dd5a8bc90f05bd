use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::scan::Warning;

/// Stable opaque node id, monotonic within one plan.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Move,
    CopyDelete,
    Rename,
    Skip,
    None,
}

impl OpKind {
    pub fn is_executable(self) -> bool {
        matches!(self, OpKind::Move | OpKind::CopyDelete | OpKind::Rename)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Move => "Move",
            OpKind::CopyDelete => "CopyDelete",
            OpKind::Rename => "Rename",
            OpKind::Skip => "Skip",
            OpKind::None => "None",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    Administrator,
    FileSystemWrite,
    NetworkAccess,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Conflict {
    /// The target path is occupied. `dangerous` is set only when the
    /// Overwrite policy kept the name: the occupying entry will be
    /// destroyed at execution time.
    NameExists {
        existing_path: PathBuf,
        #[serde(default)]
        dangerous: bool,
    },
    CycleDetected,
    DestInsideSource,
    NoSpace { required: u64, available: u64 },
    Permission { required: Permission },
}

impl Conflict {
    /// Conflicts that can never be resolved by a policy; the node must be
    /// skipped.
    pub fn is_unresolvable(&self) -> bool {
        matches!(self, Conflict::CycleDetected | Conflict::DestInsideSource)
    }

    /// An Overwrite resolution: executing the node destroys the entry that
    /// currently occupies the destination.
    pub fn is_dangerous(&self) -> bool {
        matches!(self, Conflict::NameExists { dangerous: true, .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub is_dir: bool,
    pub name_before: String,
    pub path_before: PathBuf,
    pub name_after: String,
    pub path_after: PathBuf,
    pub kind: OpKind,
    pub size_bytes: Option<u64>,
    pub warnings: Vec<Warning>,
    pub conflicts: Vec<Conflict>,
    pub children: Vec<NodeId>,
    pub rule_id: Option<String>,
}

impl PlanNode {
    /// True when executing this node destroys whatever currently occupies
    /// its destination (Overwrite policy kept the name).
    pub fn overwrites_existing(&self) -> bool {
        self.conflicts.iter().any(|c| c.is_dangerous())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub count_dirs: u64,
    pub count_files: u64,
    pub total_bytes: Option<u64>,
    pub cross_volume: u64,
    pub conflicts: u64,
    pub warnings: u64,
    /// Executable nodes that will destroy an existing destination.
    #[serde(default)]
    pub dangerous: u64,
}

/// The reviewable plan: a forest of nodes owned by the id map, children
/// referenced by id so lazy materialization never creates ownership cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovePlan {
    pub roots: Vec<NodeId>,
    pub nodes: HashMap<NodeId, PlanNode>,
    pub summary: PlanSummary,
    /// Id counter state, kept so lazily materialized children stay unique
    /// after a serialize/deserialize round trip.
    pub next_id: u64,
    /// Template-time captured at plan creation; lazy children reuse it so
    /// the plan stays wall-clock invariant.
    pub created_utc: chrono::DateTime<chrono::Utc>,
}

impl MovePlan {
    pub fn node(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.get(&id)
    }

    pub fn executable_nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.values().filter(|n| n.kind.is_executable())
    }

    /// Root nodes in their stored (deterministic) order.
    pub fn root_nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.roots.iter().filter_map(|id| self.nodes.get(id))
    }
}

/// A per-node user edit applied between review and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeChange {
    SetSkip(NodeId, bool),
    SetPolicy(NodeId, crate::rules::ConflictPolicy),
    RenameNode(NodeId, String),
    ExcludeNode(NodeId),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSummaryDiff {
    pub count_dirs_delta: i64,
    pub count_files_delta: i64,
    pub total_bytes_delta: Option<i64>,
    pub cross_volume_delta: i64,
    pub conflicts_delta: i64,
    pub warnings_delta: i64,
}

/// Result of incremental revalidation after a `NodeChange`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationDelta {
    pub affected_nodes: Vec<NodeId>,
    pub new_conflicts: Vec<Conflict>,
    pub resolved_conflicts: Vec<Conflict>,
    pub summary_diff: PlanSummaryDiff,
}

/// Dry-run estimate over a plan, without touching the filesystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimReport {
    pub success_estimate: u64,
    pub conflicts_remaining: u64,
    pub skipped: u64,
    pub cross_volume: u64,
    pub estimated_duration_secs: u64,
}
