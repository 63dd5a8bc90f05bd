use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{FileMoverError, Result};
use crate::exec::space;
use crate::plan::conflict::ConflictScanner;
use crate::plan::node::{
    Conflict, MovePlan, NodeId, OpKind, PlanNode, PlanSummary, SimReport,
};
use crate::plan::template::{self, TemplateContext};
use crate::rules::{ConflictPolicy, Rule};
use crate::scan::winpath::volume_of;
use crate::scan::{scanner, FolderHit, Warning};
use crate::util::CancelToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanOptions {
    #[serde(default = "default_true")]
    pub enable_cross_volume: bool,
    #[serde(default = "default_true")]
    pub preserve_acl: bool,
    #[serde(default = "default_true")]
    pub preserve_timestamps: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            enable_cross_volume: true,
            preserve_acl: true,
            preserve_timestamps: true,
        }
    }
}

/// Builds a reviewable `MovePlan` from selected hits. Single-threaded and
/// deterministic: the same hits and rules produce byte-identical plans
/// modulo wall-clock tokens.
pub struct MovePlanner {
    options: PlanOptions,
}

impl MovePlanner {
    pub fn new(options: PlanOptions) -> Self {
        Self { options }
    }

    pub fn build(&self, hits: &[FolderHit], rules: &[Rule]) -> Result<MovePlan> {
        self.build_at(hits, rules, Utc::now())
    }

    /// Build with an explicit template timestamp; `build` passes the
    /// current instant.
    pub fn build_at(
        &self,
        hits: &[FolderHit],
        rules: &[Rule],
        now: DateTime<Utc>,
    ) -> Result<MovePlan> {
        let rule_map: HashMap<&str, &Rule> = rules.iter().map(|r| (r.id.as_str(), r)).collect();

        // Validate every referenced template before any node exists.
        for rule in rules {
            template::validate(&rule.template).map_err(|e| FileMoverError::Template {
                rule_id: rule.id.clone(),
                message: e.to_string(),
            })?;
        }

        let mut selected: Vec<(&FolderHit, &Rule)> = hits
            .iter()
            .filter_map(|hit| {
                let rule_id = hit.matched_rule.as_deref()?;
                match rule_map.get(rule_id) {
                    Some(rule) if rule.enabled => Some((hit, *rule)),
                    Some(_) => None,
                    None => {
                        warn!("Hit {} references unknown rule '{}'", hit.path.display(), rule_id);
                        None
                    }
                }
            })
            .collect();

        // Scanner output is unordered; sort for determinism.
        selected.sort_by(|(a, ra), (b, rb)| {
            ra.priority
                .cmp(&rb.priority)
                .then_with(|| a.path.cmp(&b.path))
        });

        info!("Building plan from {} selected hit(s)", selected.len());

        let mut next_id = 0u64;
        let mut nodes = HashMap::new();
        let mut roots = Vec::new();
        let mut conflicts = ConflictScanner::new();

        for (hit, rule) in selected {
            let id = NodeId(next_id);
            next_id += 1;
            let node = self.build_node(id, hit, rule, now, &mut conflicts)?;
            roots.push(id);
            nodes.insert(id, node);
        }

        detect_cycles(&mut nodes);
        check_volume_space(&mut nodes);

        let summary = summarize(&nodes);
        Ok(MovePlan {
            roots,
            nodes,
            summary,
            next_id,
            created_utc: now,
        })
    }

    fn build_node(
        &self,
        id: NodeId,
        hit: &FolderHit,
        rule: &Rule,
        now: DateTime<Utc>,
        conflicts: &mut ConflictScanner,
    ) -> Result<PlanNode> {
        let ctx = TemplateContext::for_source(&hit.name, &hit.path, rule.label.as_deref(), now);
        let relative = template::expand(&rule.template, &ctx).map_err(|e| {
            FileMoverError::Template {
                rule_id: rule.id.clone(),
                message: e.to_string(),
            }
        })?;
        let dest = rule.dest_root.join(relative);

        let mut kind = classify_op(&hit.path, &dest, self.options.enable_cross_volume);
        let mut node_conflicts = Vec::new();
        let mut warnings = hit.warnings.clone();
        let mut final_dest = dest.clone();

        if kind.is_executable() {
            let resolved = conflicts.resolve(&hit.path, &dest, rule.policy)?;
            final_dest = resolved.path;
            node_conflicts = resolved.conflicts;

            if node_conflicts.iter().any(|c| c.is_unresolvable()) {
                kind = OpKind::Skip;
            } else if rule.policy == ConflictPolicy::Skip
                && node_conflicts
                    .iter()
                    .any(|c| matches!(c, Conflict::NameExists { .. }))
            {
                kind = OpKind::Skip;
            }
        } else if kind == OpKind::Skip && !warnings.contains(&Warning::CrossVolume) {
            warnings.push(Warning::CrossVolume);
        }

        // CopyDelete consumes destination bytes, so its size feeds the
        // volume space check.
        let size_bytes = match (hit.size_bytes, kind) {
            (Some(size), _) => Some(size),
            (None, OpKind::CopyDelete) => scanner::aggregate_size(&hit.path, &CancelToken::new()),
            (None, _) => None,
        };

        let name_after = final_dest
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&hit.name)
            .to_string();

        debug!(
            "Node {}: {:?} {} -> {}",
            id,
            kind,
            hit.path.display(),
            final_dest.display()
        );

        Ok(PlanNode {
            id,
            is_dir: true,
            name_before: hit.name.clone(),
            path_before: hit.path.clone(),
            name_after,
            path_after: final_dest,
            kind,
            size_bytes,
            warnings,
            conflicts: node_conflicts,
            children: Vec::new(),
            rule_id: Some(rule.id.clone()),
        })
    }

    /// Dry-run estimates: no filesystem mutation, conservative throughput
    /// assumptions for CopyDelete.
    pub fn simulate(&self, plan: &MovePlan) -> SimReport {
        let mut report = SimReport::default();
        let mut copy_bytes = 0u64;

        for node in plan.nodes.values() {
            match node.kind {
                OpKind::Skip | OpKind::None => report.skipped += 1,
                kind => {
                    if node.conflicts.is_empty() {
                        report.success_estimate += 1;
                    } else {
                        report.conflicts_remaining += 1;
                    }
                    if kind == OpKind::CopyDelete {
                        report.cross_volume += 1;
                        copy_bytes += node.size_bytes.unwrap_or(0);
                    }
                }
            }
        }

        // Renames are cheap; copied bytes dominate at ~100 MB/s.
        let op_count = report.success_estimate + report.conflicts_remaining;
        report.estimated_duration_secs = op_count / 10 + copy_bytes / (100 * 1024 * 1024);
        report
    }

    /// Materialize the immediate children of a node for deep preview.
    /// Children inherit the parent's relocation and are preview-only
    /// (kind `None`); ids stay unique via the plan's counter.
    pub fn materialize_children(&self, plan: &mut MovePlan, parent: NodeId) -> Result<Vec<NodeId>> {
        let (parent_before, parent_after, already) = {
            let node = plan
                .nodes
                .get(&parent)
                .ok_or(FileMoverError::InvalidNodeId(parent.0))?;
            (
                node.path_before.clone(),
                node.path_after.clone(),
                !node.children.is_empty(),
            )
        };
        if already {
            return Ok(plan.nodes[&parent].children.clone());
        }

        let mut created = Vec::new();
        let mut entries: Vec<_> = std::fs::read_dir(&parent_before)
            .map_err(|e| FileMoverError::Scan {
                path: parent_before.clone(),
                message: e.to_string(),
            })?
            .flatten()
            .collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let size_bytes = if is_dir {
                None
            } else {
                entry.metadata().ok().map(|m| m.len())
            };
            let id = NodeId(plan.next_id);
            plan.next_id += 1;
            plan.nodes.insert(
                id,
                PlanNode {
                    id,
                    is_dir,
                    name_before: name.clone(),
                    path_before: parent_before.join(&name),
                    name_after: name.clone(),
                    path_after: parent_after.join(&name),
                    kind: OpKind::None,
                    size_bytes,
                    warnings: Vec::new(),
                    conflicts: Vec::new(),
                    children: Vec::new(),
                    rule_id: None,
                },
            );
            created.push(id);
        }

        if let Some(node) = plan.nodes.get_mut(&parent) {
            node.children = created.clone();
        }
        Ok(created)
    }
}

impl Default for MovePlanner {
    fn default() -> Self {
        Self::new(PlanOptions::default())
    }
}

fn classify_op(source: &Path, dest: &Path, enable_cross_volume: bool) -> OpKind {
    if source == dest {
        return OpKind::None;
    }
    if source.parent() == dest.parent() {
        return OpKind::Rename;
    }
    if volume_of(source) == volume_of(dest) {
        OpKind::Move
    } else if enable_cross_volume {
        OpKind::CopyDelete
    } else {
        OpKind::Skip
    }
}

/// A pair of nodes where each destination lands inside the other's source
/// can never be ordered; both sides are skipped.
fn detect_cycles(nodes: &mut HashMap<NodeId, PlanNode>) {
    let ids: Vec<NodeId> = nodes.keys().copied().collect();
    let mut cyclic = Vec::new();

    for (i, &a) in ids.iter().enumerate() {
        for &b in &ids[i + 1..] {
            let (na, nb) = (&nodes[&a], &nodes[&b]);
            if !na.kind.is_executable() || !nb.kind.is_executable() {
                continue;
            }
            if na.path_after.starts_with(&nb.path_before)
                && nb.path_after.starts_with(&na.path_before)
            {
                cyclic.push(a);
                cyclic.push(b);
            }
        }
    }

    for id in cyclic {
        if let Some(node) = nodes.get_mut(&id) {
            warn!("Cycle between plan nodes at {}", node.path_before.display());
            if !node.conflicts.contains(&Conflict::CycleDetected) {
                node.conflicts.push(Conflict::CycleDetected);
            }
            node.kind = OpKind::Skip;
        }
    }
}

/// CopyDelete operations consume bytes on the destination volume; intra-
/// volume moves do not. Flag every contributor when a volume overflows.
fn check_volume_space(nodes: &mut HashMap<NodeId, PlanNode>) {
    let mut per_volume: HashMap<std::path::PathBuf, (u64, Vec<NodeId>)> = HashMap::new();

    for (id, node) in nodes.iter() {
        if node.kind != OpKind::CopyDelete {
            continue;
        }
        let Some(anchor) = space::existing_ancestor(&node.path_after) else {
            continue;
        };
        let entry = per_volume.entry(anchor).or_default();
        entry.0 += node.size_bytes.unwrap_or(0);
        entry.1.push(*id);
    }

    for (anchor, (required, ids)) in per_volume {
        let available = match space::free_space(&anchor) {
            Ok(info) => info.available_bytes,
            Err(e) => {
                warn!("Space probe failed for {}: {}", anchor.display(), e);
                continue;
            }
        };
        if required > available {
            for id in ids {
                if let Some(node) = nodes.get_mut(&id) {
                    node.conflicts.push(Conflict::NoSpace {
                        required,
                        available,
                    });
                }
            }
        }
    }
}

pub(crate) fn summarize(nodes: &HashMap<NodeId, PlanNode>) -> PlanSummary {
    let mut summary = PlanSummary::default();

    for node in nodes.values() {
        summary.conflicts += node.conflicts.len() as u64;
        summary.warnings += node.warnings.len() as u64;
        if !node.kind.is_executable() {
            continue;
        }
        if node.is_dir {
            summary.count_dirs += 1;
        } else {
            summary.count_files += 1;
        }
        if let Some(size) = node.size_bytes {
            summary.total_bytes = Some(summary.total_bytes.unwrap_or(0) + size);
        }
        if node.kind == OpKind::CopyDelete {
            summary.cross_volume += 1;
        }
        if node.overwrites_existing() {
            summary.dangerous += 1;
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::PatternSpec;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn hit_for(path: &Path, rule_id: &str) -> FolderHit {
        FolderHit {
            path: path.to_path_buf(),
            name: path.file_name().unwrap().to_string_lossy().to_string(),
            matched_rule: Some(rule_id.to_string()),
            dest_preview: None,
            warnings: Vec::new(),
            size_bytes: None,
        }
    }

    fn rule_to(id: &str, dest: &Path, template: &str) -> Rule {
        Rule::new(id, PatternSpec::glob("*"), dest.to_path_buf(), template)
    }

    #[test]
    fn test_single_move_plan() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("report_q1");
        std::fs::create_dir(&source).unwrap();
        let dest_root = temp.path().join("out");

        let rule = rule_to("r", &dest_root, "{yyyy}/{name}");
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let plan = MovePlanner::default()
            .build_at(&[hit_for(&source, "r")], &[rule], now)
            .unwrap();

        assert_eq!(plan.roots.len(), 1);
        let node = plan.node(plan.roots[0]).unwrap();
        assert_eq!(node.kind, OpKind::Move);
        assert_eq!(node.path_after, dest_root.join("2024/report_q1"));
        assert_eq!(plan.summary.count_dirs, 1);
    }

    #[test]
    fn test_rename_in_place() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("old_name");
        std::fs::create_dir(&source).unwrap();

        let rule = Rule::new(
            "r",
            PatternSpec::glob("*"),
            temp.path().to_path_buf(),
            "renamed_{name}",
        );
        let plan = MovePlanner::default()
            .build(&[hit_for(&source, "r")], &[rule])
            .unwrap();

        let node = plan.node(plan.roots[0]).unwrap();
        assert_eq!(node.kind, OpKind::Rename);
        assert_eq!(node.name_after, "renamed_old_name");
    }

    #[test]
    fn test_dest_inside_source_becomes_skip() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("folder");
        std::fs::create_dir(&source).unwrap();

        let rule = rule_to("r", &source.join("sub"), "{name}");
        let plan = MovePlanner::default()
            .build(&[hit_for(&source, "r")], &[rule])
            .unwrap();

        let node = plan.node(plan.roots[0]).unwrap();
        assert_eq!(node.kind, OpKind::Skip);
        assert!(node
            .conflicts
            .iter()
            .any(|c| matches!(c, Conflict::DestInsideSource)));
    }

    #[test]
    fn test_name_collision_auto_renames() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src/report");
        std::fs::create_dir_all(&source).unwrap();
        let dest_root = temp.path().join("out");
        std::fs::create_dir_all(dest_root.join("report")).unwrap();

        let rule = rule_to("r", &dest_root, "{name}");
        let plan = MovePlanner::default()
            .build(&[hit_for(&source, "r")], &[rule])
            .unwrap();

        let node = plan.node(plan.roots[0]).unwrap();
        assert_eq!(node.path_after, dest_root.join("report (2)"));
        assert!(node.conflicts.is_empty());
    }

    #[test]
    fn test_skip_policy_on_collision() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src/report");
        std::fs::create_dir_all(&source).unwrap();
        let dest_root = temp.path().join("out");
        std::fs::create_dir_all(dest_root.join("report")).unwrap();

        let rule = rule_to("r", &dest_root, "{name}").with_policy(ConflictPolicy::Skip);
        let plan = MovePlanner::default()
            .build(&[hit_for(&source, "r")], &[rule])
            .unwrap();

        let node = plan.node(plan.roots[0]).unwrap();
        assert_eq!(node.kind, OpKind::Skip);
        assert_eq!(plan.summary.dangerous, 0);
    }

    #[test]
    fn test_overwrite_policy_stays_executable_and_counts_dangerous() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src/report");
        std::fs::create_dir_all(&source).unwrap();
        let dest_root = temp.path().join("out");
        std::fs::create_dir_all(dest_root.join("report")).unwrap();

        let rule = rule_to("r", &dest_root, "{name}").with_policy(ConflictPolicy::Overwrite);
        let plan = MovePlanner::default()
            .build(&[hit_for(&source, "r")], &[rule])
            .unwrap();

        let node = plan.node(plan.roots[0]).unwrap();
        assert_eq!(node.kind, OpKind::Move);
        assert_eq!(node.path_after, dest_root.join("report"));
        assert!(node.overwrites_existing());
        assert_eq!(plan.summary.dangerous, 1);
    }

    #[test]
    fn test_no_shared_destination() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a/report");
        let b = temp.path().join("b/report");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        let dest_root = temp.path().join("out");

        let rule = rule_to("r", &dest_root, "{name}");
        let plan = MovePlanner::default()
            .build(&[hit_for(&a, "r"), hit_for(&b, "r")], &[rule])
            .unwrap();

        let paths: Vec<_> = plan
            .nodes
            .values()
            .filter(|n| n.kind.is_executable())
            .map(|n| n.path_after.clone())
            .collect();
        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0], paths[1]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("alpha");
        let b = temp.path().join("beta");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();
        let dest = temp.path().join("out");

        let rule = rule_to("r", &dest, "{name}");
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let planner = MovePlanner::default();

        // Same inputs in a different order produce the same plan.
        let hits_fwd = [hit_for(&a, "r"), hit_for(&b, "r")];
        let hits_rev = [hit_for(&b, "r"), hit_for(&a, "r")];
        let plan1 = planner.build_at(&hits_fwd, &[rule.clone()], now).unwrap();
        let plan2 = planner.build_at(&hits_rev, &[rule], now).unwrap();
        assert_eq!(plan1, plan2);
    }

    #[test]
    fn test_unknown_template_token_fails_build() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("folder");
        std::fs::create_dir(&source).unwrap();

        let rule = rule_to("bad", temp.path(), "{bogus}");
        let err = MovePlanner::default()
            .build(&[hit_for(&source, "bad")], &[rule])
            .unwrap_err();
        match err {
            FileMoverError::Template { rule_id, .. } => assert_eq!(rule_id, "bad"),
            other => panic!("expected Template error, got {other:?}"),
        }
    }

    #[test]
    fn test_materialize_children() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("folder");
        std::fs::create_dir_all(source.join("sub")).unwrap();
        std::fs::write(source.join("file.txt"), b"data").unwrap();

        let rule = rule_to("r", &temp.path().join("out"), "{name}");
        let planner = MovePlanner::default();
        let mut plan = planner.build(&[hit_for(&source, "r")], &[rule]).unwrap();
        let root = plan.roots[0];

        let children = planner.materialize_children(&mut plan, root).unwrap();
        assert_eq!(children.len(), 2);

        let names: Vec<_> = children
            .iter()
            .map(|id| plan.node(*id).unwrap().name_before.clone())
            .collect();
        assert_eq!(names, vec!["file.txt", "sub"]);

        // Children follow the parent's relocation.
        let file_node = plan.node(children[0]).unwrap();
        assert!(file_node.path_after.starts_with(&plan.node(root).unwrap().path_after));
        assert!(!file_node.is_dir);
    }

    #[test]
    fn test_simulate_counts() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("one");
        std::fs::create_dir(&a).unwrap();

        let rule = rule_to("r", &temp.path().join("out"), "{name}");
        let planner = MovePlanner::default();
        let plan = planner.build(&[hit_for(&a, "r")], &[rule]).unwrap();
        let report = planner.simulate(&plan);
        assert_eq!(report.success_estimate, 1);
        assert_eq!(report.skipped, 0);
    }
}
