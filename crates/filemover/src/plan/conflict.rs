//! Destination conflict detection and policy-driven resolution.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{FileMoverError, Result};
use crate::plan::node::{Conflict, Permission};
use crate::rules::ConflictPolicy;

const AUTO_RENAME_LIMIT: u32 = 9999;

/// Resolution of one destination against the filesystem and the
/// destinations already claimed by earlier nodes in the same plan.
#[derive(Debug, Clone)]
pub struct ResolvedDest {
    pub path: PathBuf,
    pub conflicts: Vec<Conflict>,
}

/// Tracks claimed destinations across a plan build and caches directory
/// listings and write probes so each parent is touched once.
pub struct ConflictScanner {
    claimed: HashSet<PathBuf>,
    sibling_cache: HashMap<PathBuf, HashSet<String>>,
    write_probe_cache: HashMap<PathBuf, bool>,
}

impl ConflictScanner {
    pub fn new() -> Self {
        Self {
            claimed: HashSet::new(),
            sibling_cache: HashMap::new(),
            write_probe_cache: HashMap::new(),
        }
    }

    /// Pre-claim a destination (used when revalidating an existing plan).
    pub fn claim(&mut self, path: PathBuf) {
        self.claimed.insert(path);
    }

    pub fn release(&mut self, path: &Path) {
        self.claimed.remove(path);
    }

    /// Resolve a node's destination under the given policy. The returned
    /// path is claimed; remaining conflicts stay attached to the node.
    pub fn resolve(
        &mut self,
        source: &Path,
        dest: &Path,
        policy: ConflictPolicy,
    ) -> Result<ResolvedDest> {
        let mut conflicts = Vec::new();
        let mut resolved = dest.to_path_buf();

        if self.is_occupied(&resolved) {
            match policy {
                ConflictPolicy::AutoRename => {
                    resolved = self.auto_rename(&resolved)?;
                    debug!(
                        "Auto-renamed {} -> {}",
                        dest.display(),
                        resolved.display()
                    );
                }
                ConflictPolicy::Skip => {
                    conflicts.push(Conflict::NameExists {
                        existing_path: resolved.clone(),
                        dangerous: false,
                    });
                }
                ConflictPolicy::Overwrite => {
                    // The name is kept; whatever occupies it is destroyed
                    // at execution time.
                    conflicts.push(Conflict::NameExists {
                        existing_path: resolved.clone(),
                        dangerous: true,
                    });
                }
            }
        }

        if resolved.starts_with(source) {
            conflicts.push(Conflict::DestInsideSource);
        }

        if let Some(conflict) = self.check_write_permission(&resolved) {
            conflicts.push(conflict);
        }

        self.claimed.insert(resolved.clone());
        Ok(ResolvedDest {
            path: resolved,
            conflicts,
        })
    }

    /// A destination is occupied when an entry with that name exists on
    /// disk or an earlier node already claimed it.
    pub fn is_occupied(&mut self, path: &Path) -> bool {
        if self.claimed.contains(path) {
            return true;
        }
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return false;
        };
        let name = name.to_string_lossy().to_string();
        let parent_key = parent.to_path_buf();
        let siblings = self
            .sibling_cache
            .entry(parent_key)
            .or_insert_with(|| list_names(parent));
        siblings.contains(&name)
    }

    /// Append " (2)", " (3)", ... until the name is free. With N identical
    /// siblings present the chosen suffix is N+1.
    fn auto_rename(&mut self, original: &Path) -> Result<PathBuf> {
        let parent = original.parent().unwrap_or_else(|| Path::new(""));
        let name = original
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                FileMoverError::PlanValidation(format!(
                    "invalid destination name: {}",
                    original.display()
                ))
            })?;

        for counter in 2..=AUTO_RENAME_LIMIT {
            let candidate = parent.join(format!("{} ({})", name, counter));
            if !self.is_occupied(&candidate) {
                return Ok(candidate);
            }
        }

        Err(FileMoverError::PlanValidation(format!(
            "could not find a free name for {} after {} attempts",
            original.display(),
            AUTO_RENAME_LIMIT
        )))
    }

    /// Heuristic ACL probe: try creating a file in the deepest existing
    /// ancestor of the destination. Surfaced as a non-fatal conflict.
    fn check_write_permission(&mut self, dest: &Path) -> Option<Conflict> {
        let mut probe = dest.parent()?;
        while !probe.exists() {
            probe = probe.parent()?;
        }
        let probe_key = probe.to_path_buf();
        let writable = *self
            .write_probe_cache
            .entry(probe_key.clone())
            .or_insert_with(|| {
                let marker = probe_key.join(format!(".fm_probe_{}", std::process::id()));
                match std::fs::File::create(&marker) {
                    Ok(_) => {
                        let _ = std::fs::remove_file(&marker);
                        true
                    }
                    Err(_) => false,
                }
            });
        if writable {
            None
        } else {
            Some(Conflict::Permission {
                required: Permission::FileSystemWrite,
            })
        }
    }
}

impl Default for ConflictScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn list_names(parent: &Path) -> HashSet<String> {
    let mut names = HashSet::new();
    if let Ok(entries) = std::fs::read_dir(parent) {
        for entry in entries.flatten() {
            names.insert(entry.file_name().to_string_lossy().to_string());
        }
    }
    names
}
