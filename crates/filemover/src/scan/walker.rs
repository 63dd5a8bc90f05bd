//! Work-stealing parallel directory walk. Each discovered directory is
//! handed to a callback; descent into separate subtrees proceeds on
//! whichever worker steals the task.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use rayon::Scope;

use crate::error::{FileMoverError, Result};
use crate::scan::ScanOptions;
use crate::util::CancelToken;

/// One directory observed by the walk. `is_junction` marks reparse points
/// and symlinks; `access_denied` marks directories that could not be
/// opened (and were not descended).
#[derive(Debug, Clone)]
pub struct DirRecord {
    pub path: PathBuf,
    pub depth: u32,
    pub is_junction: bool,
    pub access_denied: bool,
}

#[derive(Debug, Default)]
pub struct WalkCounters {
    pub dirs_visited: AtomicU64,
    pub refused: AtomicU64,
    pub denied: AtomicU64,
    pub errors: AtomicU64,
}

struct WalkContext<'a> {
    options: &'a ScanOptions,
    protected: Vec<PathBuf>,
    cancel: &'a CancelToken,
    counters: &'a WalkCounters,
    on_dir: &'a (dyn Fn(DirRecord) + Sync),
}

impl<'a> WalkContext<'a> {
    fn is_refused(&self, path: &Path) -> bool {
        if self.options.system_protections {
            let upper = path.to_string_lossy().to_uppercase();
            if upper.contains("$RECYCLE.BIN") || upper.contains("SYSTEM VOLUME INFORMATION") {
                return true;
            }
            if self.protected.iter().any(|p| path.starts_with(p)) {
                return true;
            }
        }
        self.options.excluded_paths.iter().any(|p| path.starts_with(p))
    }
}

/// Walk every root in parallel, invoking `on_dir` once per reachable
/// directory. The walk is complete when all reachable directories under all
/// roots have been visited exactly once or explicitly refused.
pub fn walk_roots(
    roots: &[PathBuf],
    options: &ScanOptions,
    cancel: &CancelToken,
    counters: &WalkCounters,
    on_dir: &(dyn Fn(DirRecord) + Sync),
) -> Result<()> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.thread_count())
        .build()
        .map_err(|e| FileMoverError::Config(format!("scan pool: {}", e)))?;

    let ctx = WalkContext {
        options,
        protected: ScanOptions::protected_prefixes(),
        cancel,
        counters,
        on_dir,
    };

    pool.scope(|scope| {
        for root in roots {
            if !root.is_dir() {
                warn!("Root is not a directory, skipping: {}", root.display());
                ctx.counters.errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let root = root.clone();
            let ctx = &ctx;
            scope.spawn(move |scope| {
                visit(scope, ctx, root, 0, false, false, Arc::new(Vec::new()));
            });
        }
    });

    Ok(())
}

fn visit<'s>(
    scope: &Scope<'s>,
    ctx: &'s WalkContext<'s>,
    dir: PathBuf,
    depth: u32,
    is_junction: bool,
    emit_self: bool,
    chain: Arc<Vec<PathBuf>>,
) {
    if ctx.cancel.is_cancelled() {
        return;
    }

    let listing = match list_subdirs(&dir) {
        Ok(listing) => listing,
        Err(e) => {
            if emit_self {
                ctx.counters.denied.fetch_add(1, Ordering::Relaxed);
                (ctx.on_dir)(DirRecord {
                    path: dir.clone(),
                    depth,
                    is_junction,
                    access_denied: true,
                });
            } else {
                ctx.counters.errors.fetch_add(1, Ordering::Relaxed);
            }
            debug!("Cannot open {}: {}", dir.display(), e);
            return;
        }
    };

    if emit_self {
        ctx.counters.dirs_visited.fetch_add(1, Ordering::Relaxed);
        (ctx.on_dir)(DirRecord {
            path: dir.clone(),
            depth,
            is_junction,
            access_denied: false,
        });
    }

    let child_depth = depth + 1;
    if let Some(max) = ctx.options.max_depth {
        if child_depth > max {
            ctx.counters
                .refused
                .fetch_add(listing.len() as u64, Ordering::Relaxed);
            return;
        }
    }

    // The walk chain (canonical ancestors) only matters for junction-cycle
    // detection, so it is maintained only when junctions are followed.
    let chain = if ctx.options.follow_junctions {
        let mut extended = (*chain).clone();
        extended.push(canonical_or_self(&dir));
        Arc::new(extended)
    } else {
        chain
    };

    for child in listing {
        if ctx.cancel.is_cancelled() {
            return;
        }
        if ctx.is_refused(&child.path) {
            ctx.counters.refused.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        if child.is_symlink {
            if !ctx.options.follow_junctions {
                // Visible and matchable, but never descended.
                ctx.counters.dirs_visited.fetch_add(1, Ordering::Relaxed);
                (ctx.on_dir)(DirRecord {
                    path: child.path,
                    depth: child_depth,
                    is_junction: true,
                    access_denied: false,
                });
                continue;
            }
            let target = canonical_or_self(&child.path);
            let is_cycle = chain
                .iter()
                .any(|on_stack| *on_stack == target || on_stack.starts_with(&target));
            if is_cycle {
                warn!(
                    "Junction cycle at {} -> {}, not descending",
                    child.path.display(),
                    target.display()
                );
                ctx.counters.dirs_visited.fetch_add(1, Ordering::Relaxed);
                (ctx.on_dir)(DirRecord {
                    path: child.path,
                    depth: child_depth,
                    is_junction: true,
                    access_denied: false,
                });
                continue;
            }
            let next_chain = chain.clone();
            scope.spawn(move |scope| {
                visit(scope, ctx, child.path, child_depth, true, true, next_chain);
            });
            continue;
        }

        let chain = chain.clone();
        scope.spawn(move |scope| {
            visit(scope, ctx, child.path, child_depth, false, true, chain);
        });
    }
}

struct SubDir {
    path: PathBuf,
    is_symlink: bool,
}

/// Enumerate child directories. On Windows every listing goes through the
/// `\\?\` extended-length form.
fn list_subdirs(dir: &Path) -> io::Result<Vec<SubDir>> {
    #[cfg(windows)]
    let read_target = crate::scan::winpath::to_extended(dir);
    #[cfg(not(windows))]
    let read_target = dir.to_path_buf();

    let mut out = Vec::new();
    for entry in std::fs::read_dir(read_target)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };

        let path = dir.join(entry.file_name());
        if file_type.is_dir() {
            out.push(SubDir {
                path,
                is_symlink: false,
            });
        } else if file_type.is_symlink() {
            // Only symlinks that resolve to directories behave as junctions.
            if std::fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false) {
                out.push(SubDir {
                    path,
                    is_symlink: true,
                });
            }
        }
    }
    Ok(out)
}

fn canonical_or_self(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn collect_walk(root: &Path, options: &ScanOptions) -> Vec<DirRecord> {
        let counters = WalkCounters::default();
        let records = Mutex::new(Vec::new());
        walk_roots(
            &[root.to_path_buf()],
            options,
            &CancelToken::new(),
            &counters,
            &|record| records.lock().unwrap().push(record),
        )
        .unwrap();
        records.into_inner().unwrap()
    }

    #[test]
    fn test_walk_visits_every_directory_once() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("a/a1")).unwrap();
        std::fs::create_dir_all(temp.path().join("a/a2")).unwrap();
        std::fs::create_dir_all(temp.path().join("b")).unwrap();
        std::fs::write(temp.path().join("a/file.txt"), b"x").unwrap();

        let mut names: Vec<String> = collect_walk(temp.path(), &ScanOptions::default())
            .into_iter()
            .map(|r| r.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "a1", "a2", "b"]);
    }

    #[test]
    fn test_max_depth_refuses_deeper_levels() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("l1/l2/l3")).unwrap();

        let options = ScanOptions {
            max_depth: Some(2),
            ..ScanOptions::default()
        };
        let mut names: Vec<String> = collect_walk(temp.path(), &options)
            .into_iter()
            .map(|r| r.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["l1", "l2"]);
    }

    #[test]
    fn test_excluded_prefix_is_refused_entirely() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("keep/sub")).unwrap();
        std::fs::create_dir_all(temp.path().join("skip/sub")).unwrap();

        let options = ScanOptions {
            excluded_paths: vec![temp.path().join("skip")],
            ..ScanOptions::default()
        };
        let names: Vec<String> = collect_walk(temp.path(), &options)
            .into_iter()
            .map(|r| r.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"keep".to_string()));
        assert!(!names.iter().any(|n| n == "skip"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_not_followed_by_default() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("real/inner")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("link")).unwrap();

        let records = collect_walk(temp.path(), &ScanOptions::default());
        let link = records
            .iter()
            .find(|r| r.path.file_name().unwrap() == "link")
            .expect("symlink should be recorded");
        assert!(link.is_junction);
        // Not descended: inner appears only once, under "real".
        let inner_count = records
            .iter()
            .filter(|r| r.path.file_name().unwrap() == "inner")
            .count();
        assert_eq!(inner_count, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_aborts_descent() {
        let temp = TempDir::new().unwrap();
        let nest = temp.path().join("outer/nest");
        std::fs::create_dir_all(&nest).unwrap();
        // Link back to an ancestor on the walk chain.
        std::os::unix::fs::symlink(temp.path().join("outer"), nest.join("loop")).unwrap();

        let options = ScanOptions {
            follow_junctions: true,
            ..ScanOptions::default()
        };
        let records = collect_walk(temp.path(), &options);
        // The loop link is recorded but never descended, so the walk
        // terminates and "nest" appears exactly once.
        assert!(records.iter().any(|r| r.path.file_name().unwrap() == "loop"));
        let nest_count = records
            .iter()
            .filter(|r| r.path.file_name().unwrap() == "nest")
            .count();
        assert_eq!(nest_count, 1);
    }
}
