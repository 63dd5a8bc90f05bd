//! Filesystem primitives for the executor: rename, recursive copy with
//! timestamp preservation, and retry classification.

use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use filetime::FileTime;
use log::{debug, warn};
use walkdir::WalkDir;

use crate::error::{FileMoverError, Result};
#[cfg(windows)]
use crate::scan::winpath;

pub const RETRY_BASE: Duration = Duration::from_millis(200);
pub const RETRY_MAX_ATTEMPTS: u32 = 5;
pub const RETRY_BUDGET: Duration = Duration::from_secs(15);

/// Sharing violations, interruptions and network hiccups are retried;
/// access denied, missing paths and full volumes are final.
pub fn is_transient(error: &io::Error) -> bool {
    #[cfg(windows)]
    {
        // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
        if matches!(error.raw_os_error(), Some(32) | Some(33)) {
            return true;
        }
    }
    matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Run `op` with exponential backoff on transient failures: base 200 ms,
/// factor 2, at most 5 attempts within a 15 s budget.
pub fn with_retries<T>(path: &Path, mut op: impl FnMut() -> io::Result<T>) -> Result<T> {
    let started = Instant::now();
    let mut delay = RETRY_BASE;

    for attempt in 1..=RETRY_MAX_ATTEMPTS {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) => {
                if attempt == RETRY_MAX_ATTEMPTS || started.elapsed() + delay > RETRY_BUDGET {
                    return Err(FileMoverError::Transient {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    });
                }
                warn!(
                    "Transient failure at {} (attempt {}): {}",
                    path.display(),
                    attempt,
                    e
                );
                std::thread::sleep(delay);
                delay *= 2;
            }
            Err(e) => {
                return Err(FileMoverError::Execution {
                    path: path.to_path_buf(),
                    message: describe_io_error(&e),
                });
            }
        }
    }

    unreachable!("retry loop always returns")
}

fn describe_io_error(error: &io::Error) -> String {
    match error.kind() {
        io::ErrorKind::PermissionDenied => "AccessDenied".to_string(),
        io::ErrorKind::NotFound => "PathNotFound".to_string(),
        _ => error.to_string(),
    }
}

fn op_path(path: &Path) -> std::path::PathBuf {
    #[cfg(windows)]
    {
        winpath::to_extended(path)
    }
    #[cfg(not(windows))]
    {
        path.to_path_buf()
    }
}

/// Atomic directory-entry rename; serves both Rename and same-volume Move.
pub fn rename_entry(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        with_retries(dest, || std::fs::create_dir_all(op_path(parent)))?;
    }
    with_retries(source, || {
        std::fs::rename(op_path(source), op_path(dest))
    })?;
    debug!("Renamed {} -> {}", source.display(), dest.display());
    Ok(())
}

/// Recursive copy preserving file modification times. Returns bytes copied.
pub fn copy_tree(source: &Path, dest: &Path) -> Result<u64> {
    let mut bytes = 0u64;

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| FileMoverError::Execution {
            path: source.to_path_buf(),
            message: e.to_string(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| FileMoverError::Execution {
                path: entry.path().to_path_buf(),
                message: e.to_string(),
            })?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            with_retries(&target, || std::fs::create_dir_all(op_path(&target)))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                with_retries(parent, || std::fs::create_dir_all(op_path(parent)))?;
            }
            let copied = with_retries(entry.path(), || {
                std::fs::copy(op_path(entry.path()), op_path(&target))
            })?;
            bytes += copied;

            if let Ok(metadata) = entry.metadata() {
                let mtime = FileTime::from_last_modification_time(&metadata);
                if let Err(e) = filetime::set_file_mtime(&target, mtime) {
                    debug!("Could not preserve mtime on {}: {}", target.display(), e);
                }
            }
        }
    }

    Ok(bytes)
}

/// Cross-volume fallback: full recursive copy, then source removal. The
/// source is only deleted after the copy completed in its entirety.
pub fn copy_delete(source: &Path, dest: &Path) -> Result<u64> {
    let bytes = copy_tree(source, dest)?;
    remove_tree(source)?;
    debug!(
        "Copy-deleted {} -> {} ({} bytes)",
        source.display(),
        dest.display(),
        bytes
    );
    Ok(bytes)
}

pub fn remove_tree(path: &Path) -> Result<()> {
    with_retries(path, || {
        if path.is_dir() {
            std::fs::remove_dir_all(op_path(path))
        } else {
            std::fs::remove_file(op_path(path))
        }
    })
}

/// Remove whatever occupies `dest` so an Overwrite-resolved operation can
/// land in its place. A plain rename onto a populated directory would
/// fail at the OS level instead of replacing it.
pub fn clear_destination(dest: &Path) -> Result<()> {
    if std::fs::symlink_metadata(dest).is_ok() {
        warn!("Overwriting existing destination {}", dest.display());
        remove_tree(dest)?;
    }
    Ok(())
}
