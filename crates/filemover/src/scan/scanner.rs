use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info};
use walkdir::WalkDir;

use crate::error::{FileMoverError, Result};
use crate::plan::template::{self, TemplateContext};
use crate::rules::{Rule, RuleSet, Verdict};
use crate::scan::walker::{self, DirRecord, WalkCounters};
use crate::scan::winpath;
use crate::scan::{FolderHit, ScanOptions, Warning};
use crate::util::CancelToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub dirs_visited: u64,
    pub refused: u64,
    pub denied: u64,
    pub errors: u64,
    pub hits: u64,
}

/// Walks root directories and emits a `FolderHit` for every directory the
/// rule set accepts. The compiled matcher and normalizer are pure and shared
/// across walk workers.
pub struct FolderScanner {
    rule_set: RuleSet,
    rules_by_id: HashMap<String, Rule>,
    options: ScanOptions,
}

impl FolderScanner {
    pub fn new(rules: Vec<Rule>, options: ScanOptions) -> Result<Self> {
        let rule_set = RuleSet::compile(&rules, options.normalization)?;
        let rules_by_id = rules.into_iter().map(|r| (r.id.clone(), r)).collect();
        Ok(Self {
            rule_set,
            rules_by_id,
            options,
        })
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Collect all hits from the given roots. Hit order is unspecified.
    pub fn scan_roots(&self, roots: &[PathBuf], cancel: &CancelToken) -> Result<Vec<FolderHit>> {
        let hits = Mutex::new(Vec::new());
        self.scan_with(roots, cancel, &|hit| {
            hits.lock().unwrap_or_else(|e| e.into_inner()).push(hit)
        })?;
        Ok(hits.into_inner().unwrap_or_else(|e| e.into_inner()))
    }

    /// Stream hits into `sink` as workers produce them.
    pub fn scan_with(
        &self,
        roots: &[PathBuf],
        cancel: &CancelToken,
        sink: &(dyn Fn(FolderHit) + Sync),
    ) -> Result<ScanStats> {
        for root in roots {
            if !root.exists() {
                return Err(FileMoverError::Scan {
                    path: root.clone(),
                    message: "root does not exist".to_string(),
                });
            }
        }

        info!("Scanning {} root(s)", roots.len());
        let counters = WalkCounters::default();
        let hit_count = std::sync::atomic::AtomicU64::new(0);
        let now = Utc::now();

        walker::walk_roots(roots, &self.options, cancel, &counters, &|record| {
            if let Some(hit) = self.process_record(&record, now) {
                hit_count.fetch_add(1, Ordering::Relaxed);
                sink(hit);
            }
        })?;

        let stats = ScanStats {
            dirs_visited: counters.dirs_visited.load(Ordering::Relaxed),
            refused: counters.refused.load(Ordering::Relaxed),
            denied: counters.denied.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
            hits: hit_count.load(Ordering::Relaxed),
        };
        info!(
            "Scan complete: {} dirs visited, {} hits, {} refused, {} denied",
            stats.dirs_visited, stats.hits, stats.refused, stats.denied
        );
        Ok(stats)
    }

    fn process_record(&self, record: &DirRecord, now: DateTime<Utc>) -> Option<FolderHit> {
        let name = record.path.file_name()?.to_str()?.to_string();

        if record.access_denied {
            return Some(FolderHit {
                path: record.path.clone(),
                name,
                matched_rule: None,
                dest_preview: None,
                warnings: vec![Warning::AccessDenied],
                size_bytes: None,
            });
        }

        match self.rule_set.evaluate(&name) {
            Verdict::Matched(rule_id) => {
                let rule = self.rules_by_id.get(&rule_id)?;
                let dest = self.expand_preview(rule, &record.path, &name, now);
                let warnings = self.analyze_warnings(record, dest.as_deref());
                debug!("Hit: {} (rule '{}')", record.path.display(), rule_id);
                Some(FolderHit {
                    path: record.path.clone(),
                    name,
                    matched_rule: Some(rule_id),
                    dest_preview: dest,
                    warnings,
                    size_bytes: None,
                })
            }
            Verdict::Excluded | Verdict::NoRule => None,
        }
    }

    fn expand_preview(
        &self,
        rule: &Rule,
        source: &Path,
        name: &str,
        now: DateTime<Utc>,
    ) -> Option<PathBuf> {
        let ctx = TemplateContext::for_source(name, source, rule.label.as_deref(), now);
        match template::expand(&rule.template, &ctx) {
            Ok(relative) => Some(rule.dest_root.join(relative)),
            Err(e) => {
                debug!("Preview expansion failed for {}: {}", source.display(), e);
                None
            }
        }
    }

    fn analyze_warnings(&self, record: &DirRecord, dest: Option<&Path>) -> Vec<Warning> {
        let mut warnings = Vec::new();

        if winpath::exceeds_long_path(&record.path) {
            warnings.push(Warning::LongPath);
        }
        if record.is_junction {
            warnings.push(Warning::Junction);
        }
        if winpath::is_network_path(&record.path) {
            warnings.push(Warning::Offline);
        }
        if std::fs::metadata(&record.path).is_err() {
            warnings.push(Warning::AclDiffers);
        }
        if let Some(dest) = dest {
            if winpath::volume_of(&record.path) != winpath::volume_of(dest) {
                warnings.push(Warning::CrossVolume);
            }
        }

        warnings
    }
}

/// Total size of a subtree, computed lazily for hits that need it. Returns
/// `None` when cancelled mid-aggregation.
pub fn aggregate_size(path: &Path, cancel: &CancelToken) -> Option<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(path).into_iter().flatten() {
        if cancel.is_cancelled() {
            return None;
        }
        if entry.file_type().is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    Some(total)
}
