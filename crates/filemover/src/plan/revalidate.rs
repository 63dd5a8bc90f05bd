//! Incremental plan revalidation: a node edit produces a `ValidationDelta`
//! covering only the affected subtree and destination-prefix neighbors.

use std::path::Path;

use log::debug;

use crate::error::{FileMoverError, Result};
use crate::plan::conflict::ConflictScanner;
use crate::plan::node::{
    Conflict, MovePlan, NodeChange, NodeId, OpKind, PlanSummary, PlanSummaryDiff,
    ValidationDelta,
};
use crate::plan::planner::{summarize, PlanOptions};
use crate::rules::ConflictPolicy;
use crate::scan::winpath::volume_of;

pub fn revalidate(
    plan: &mut MovePlan,
    change: NodeChange,
    options: &PlanOptions,
) -> Result<ValidationDelta> {
    debug!("Revalidating plan after {:?}", change);
    let before = plan.summary.clone();

    let mut delta = match change {
        NodeChange::SetSkip(id, skip) => set_skip(plan, id, skip, options)?,
        NodeChange::SetPolicy(id, policy) => set_policy(plan, id, policy, options)?,
        NodeChange::RenameNode(id, new_name) => rename_node(plan, id, &new_name)?,
        NodeChange::ExcludeNode(id) => exclude_node(plan, id)?,
    };

    plan.summary = summarize(&plan.nodes);
    delta.summary_diff = diff_summary(&before, &plan.summary);
    Ok(delta)
}

fn node_mut<'a>(plan: &'a mut MovePlan, id: NodeId) -> Result<&'a mut crate::plan::node::PlanNode> {
    plan.nodes
        .get_mut(&id)
        .ok_or(FileMoverError::InvalidNodeId(id.0))
}

fn set_skip(
    plan: &mut MovePlan,
    id: NodeId,
    skip: bool,
    options: &PlanOptions,
) -> Result<ValidationDelta> {
    let node = node_mut(plan, id)?;
    let mut delta = ValidationDelta {
        affected_nodes: vec![id],
        ..ValidationDelta::default()
    };

    if skip {
        node.kind = OpKind::Skip;
        delta.resolved_conflicts.append(&mut node.conflicts);
    } else {
        node.kind = reclassify(&node.path_before, &node.path_after, options);
        let source = node.path_before.clone();
        let dest = node.path_after.clone();
        // Un-skipping re-exposes whatever still blocks the destination.
        let mut scanner = seeded_scanner(plan, id);
        if let Some(conflict) = occupied_conflict(&mut scanner, &dest) {
            delta.new_conflicts.push(conflict.clone());
            node_mut(plan, id)?.conflicts.push(conflict);
        }
        if dest.starts_with(&source) {
            let conflict = Conflict::DestInsideSource;
            delta.new_conflicts.push(conflict.clone());
            let node = node_mut(plan, id)?;
            node.conflicts.push(conflict);
            node.kind = OpKind::Skip;
        }
    }

    Ok(delta)
}

fn set_policy(
    plan: &mut MovePlan,
    id: NodeId,
    policy: ConflictPolicy,
    options: &PlanOptions,
) -> Result<ValidationDelta> {
    let mut delta = ValidationDelta {
        affected_nodes: vec![id],
        ..ValidationDelta::default()
    };

    let had_name_conflict = {
        let node = node_mut(plan, id)?;
        node.conflicts
            .iter()
            .any(|c| matches!(c, Conflict::NameExists { .. }))
    };

    match policy {
        ConflictPolicy::AutoRename if had_name_conflict => {
            let (source, dest) = {
                let node = plan.nodes.get(&id).ok_or(FileMoverError::InvalidNodeId(id.0))?;
                (node.path_before.clone(), node.path_after.clone())
            };
            let mut scanner = seeded_scanner(plan, id);
            let resolved = scanner.resolve(&source, &dest, ConflictPolicy::AutoRename)?;
            let renamed = resolved.path.clone();
            rewrite_subtree(plan, id, &dest, &renamed);

            let node = node_mut(plan, id)?;
            node.path_after = renamed.clone();
            node.name_after = renamed
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&node.name_after)
                .to_string();
            let resolved_conflicts: Vec<Conflict> = node
                .conflicts
                .iter()
                .filter(|c| matches!(c, Conflict::NameExists { .. }))
                .cloned()
                .collect();
            node.conflicts
                .retain(|c| !matches!(c, Conflict::NameExists { .. }));
            node.kind = reclassify(&node.path_before, &node.path_after, options);
            delta.resolved_conflicts = resolved_conflicts;
        }
        ConflictPolicy::Skip if had_name_conflict => {
            let node = node_mut(plan, id)?;
            mark_name_conflicts(node, false);
            node.kind = OpKind::Skip;
        }
        ConflictPolicy::Overwrite if had_name_conflict => {
            let node = node_mut(plan, id)?;
            mark_name_conflicts(node, true);
            node.kind = reclassify(&node.path_before, &node.path_after, options);
        }
        _ => {}
    }

    Ok(delta)
}

fn rename_node(plan: &mut MovePlan, id: NodeId, new_name: &str) -> Result<ValidationDelta> {
    let (old_after, new_after) = {
        let node = node_mut(plan, id)?;
        let old = node.path_after.clone();
        let new = old.with_file_name(new_name);
        node.name_after = new_name.to_string();
        node.path_after = new.clone();
        (old, new)
    };

    let mut delta = ValidationDelta {
        affected_nodes: vec![id],
        ..ValidationDelta::default()
    };

    // A rename can resolve an existing occupation or create a new one.
    let resolved: Vec<Conflict> = {
        let node = node_mut(plan, id)?;
        let out = node
            .conflicts
            .iter()
            .filter(|c| matches!(c, Conflict::NameExists { .. }))
            .cloned()
            .collect();
        node.conflicts
            .retain(|c| !matches!(c, Conflict::NameExists { .. }));
        out
    };
    delta.resolved_conflicts = resolved;

    let mut scanner = seeded_scanner(plan, id);
    if let Some(conflict) = occupied_conflict(&mut scanner, &new_after) {
        delta.new_conflicts.push(conflict.clone());
        node_mut(plan, id)?.conflicts.push(conflict);
    }

    // Materialized children follow their parent's destination.
    rewrite_subtree(plan, id, &old_after, &new_after);
    let children = collect_subtree(plan, id);
    delta.affected_nodes.extend(children);

    // Destination-prefix neighbors may gain or lose duplicate-target
    // conflicts; recheck them.
    let neighbor_ids: Vec<NodeId> = plan
        .nodes
        .values()
        .filter(|n| n.id != id && n.kind.is_executable())
        .filter(|n| {
            shares_parent(&n.path_after, &old_after) || shares_parent(&n.path_after, &new_after)
        })
        .map(|n| n.id)
        .collect();
    for neighbor in neighbor_ids {
        delta.affected_nodes.push(neighbor);
        let dup = {
            let n = &plan.nodes[&neighbor];
            n.path_after == new_after
        };
        if dup {
            let conflict = Conflict::NameExists {
                existing_path: new_after.clone(),
                dangerous: false,
            };
            delta.new_conflicts.push(conflict.clone());
            node_mut(plan, neighbor)?.conflicts.push(conflict);
        }
    }

    Ok(delta)
}

fn exclude_node(plan: &mut MovePlan, id: NodeId) -> Result<ValidationDelta> {
    let mut delta = ValidationDelta {
        affected_nodes: vec![id],
        ..ValidationDelta::default()
    };

    let node = node_mut(plan, id)?;
    node.kind = OpKind::None;
    delta.resolved_conflicts.append(&mut node.conflicts);

    for child in collect_subtree(plan, id) {
        delta.affected_nodes.push(child);
        if let Some(child_node) = plan.nodes.get_mut(&child) {
            child_node.kind = OpKind::None;
            delta
                .resolved_conflicts
                .append(&mut child_node.conflicts);
        }
    }

    Ok(delta)
}

fn reclassify(source: &Path, dest: &Path, options: &PlanOptions) -> OpKind {
    if source == dest {
        OpKind::None
    } else if source.parent() == dest.parent() {
        OpKind::Rename
    } else if volume_of(source) == volume_of(dest) {
        OpKind::Move
    } else if options.enable_cross_volume {
        OpKind::CopyDelete
    } else {
        OpKind::Skip
    }
}

/// Conflict scanner seeded with every other executable node's destination,
/// so claim checks see the rest of the plan.
fn seeded_scanner(plan: &MovePlan, exclude: NodeId) -> ConflictScanner {
    let mut scanner = ConflictScanner::new();
    for node in plan.nodes.values() {
        if node.id != exclude && node.kind.is_executable() {
            scanner.claim(node.path_after.clone());
        }
    }
    scanner
}

fn occupied_conflict(scanner: &mut ConflictScanner, dest: &Path) -> Option<Conflict> {
    if scanner.is_occupied(dest) {
        Some(Conflict::NameExists {
            existing_path: dest.to_path_buf(),
            dangerous: false,
        })
    } else {
        None
    }
}

/// Flip the dangerous flag on a node's occupation conflicts when its
/// policy changes between Skip and Overwrite.
fn mark_name_conflicts(node: &mut crate::plan::node::PlanNode, dangerous_now: bool) {
    for conflict in node.conflicts.iter_mut() {
        if let Conflict::NameExists { dangerous, .. } = conflict {
            *dangerous = dangerous_now;
        }
    }
}

/// Rewrite `path_after` for every materialized descendant when an ancestor's
/// destination changes.
fn rewrite_subtree(plan: &mut MovePlan, id: NodeId, old_prefix: &Path, new_prefix: &Path) {
    for child in collect_subtree(plan, id) {
        if let Some(node) = plan.nodes.get_mut(&child) {
            if let Ok(relative) = node.path_after.strip_prefix(old_prefix) {
                node.path_after = new_prefix.join(relative);
            }
        }
    }
}

fn collect_subtree(plan: &MovePlan, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack: Vec<NodeId> = plan
        .nodes
        .get(&id)
        .map(|n| n.children.clone())
        .unwrap_or_default();
    while let Some(next) = stack.pop() {
        if let Some(node) = plan.nodes.get(&next) {
            stack.extend(node.children.iter().copied());
        }
        out.push(next);
    }
    out
}

fn shares_parent(a: &Path, b: &Path) -> bool {
    a.parent().is_some() && a.parent() == b.parent()
}

fn diff_summary(before: &PlanSummary, after: &PlanSummary) -> PlanSummaryDiff {
    PlanSummaryDiff {
        count_dirs_delta: after.count_dirs as i64 - before.count_dirs as i64,
        count_files_delta: after.count_files as i64 - before.count_files as i64,
        total_bytes_delta: match (after.total_bytes, before.total_bytes) {
            (Some(a), Some(b)) => Some(a as i64 - b as i64),
            (Some(a), None) => Some(a as i64),
            (None, Some(b)) => Some(-(b as i64)),
            (None, None) => None,
        },
        cross_volume_delta: after.cross_volume as i64 - before.cross_volume as i64,
        conflicts_delta: after.conflicts as i64 - before.conflicts as i64,
        warnings_delta: after.warnings as i64 - before.warnings as i64,
    }
}
