//! Plan construction: template expansion, conflict detection, the
//! Before/After forest and incremental revalidation.

pub mod conflict;
pub mod node;
pub mod planner;
pub mod revalidate;
pub mod template;

pub use node::{
    Conflict, MovePlan, NodeChange, NodeId, OpKind, Permission, PlanNode, PlanSummary,
    PlanSummaryDiff, SimReport, ValidationDelta,
};
pub use planner::{MovePlanner, PlanOptions};
