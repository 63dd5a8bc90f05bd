//! Free-space probing for cross-volume planning.

use std::path::{Path, PathBuf};

use crate::error::{FileMoverError, Result};

#[derive(Debug, Clone, Copy)]
pub struct SpaceInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
}

/// Free space on the volume holding `path`. The deepest existing ancestor
/// is probed so not-yet-created destinations resolve to their volume.
pub fn free_space(path: &Path) -> Result<SpaceInfo> {
    let mut probe = path;
    while !probe.exists() {
        probe = probe.parent().ok_or_else(|| FileMoverError::Execution {
            path: path.to_path_buf(),
            message: "no existing ancestor to probe for free space".to_string(),
        })?;
    }
    query_volume(probe)
}

/// Deepest existing ancestor of a path, used as the stable key for
/// per-volume aggregation.
pub fn existing_ancestor(path: &Path) -> Option<PathBuf> {
    let mut probe = path;
    loop {
        if probe.exists() {
            return Some(probe.to_path_buf());
        }
        probe = probe.parent()?;
    }
}

#[cfg(unix)]
fn query_volume(path: &Path) -> Result<SpaceInfo> {
    use std::ffi::CString;
    use std::mem;
    use std::os::unix::ffi::OsStrExt;

    let path_cstr =
        CString::new(path.as_os_str().as_bytes()).map_err(|_| FileMoverError::Execution {
            path: path.to_path_buf(),
            message: "path contains a null byte".to_string(),
        })?;

    let mut stat: libc::statvfs = unsafe { mem::zeroed() };
    let rc = unsafe { libc::statvfs(path_cstr.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(FileMoverError::Io(std::io::Error::last_os_error()));
    }

    let block = stat.f_frsize as u64;
    Ok(SpaceInfo {
        total_bytes: stat.f_blocks as u64 * block,
        free_bytes: stat.f_bfree as u64 * block,
        available_bytes: stat.f_bavail as u64 * block,
    })
}

#[cfg(windows)]
fn query_volume(path: &Path) -> Result<SpaceInfo> {
    use std::os::windows::ffi::OsStrExt;
    use winapi::um::fileapi::GetDiskFreeSpaceExW;
    use winapi::um::winnt::ULARGE_INTEGER;

    let wide: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let mut available: ULARGE_INTEGER = unsafe { std::mem::zeroed() };
    let mut total: ULARGE_INTEGER = unsafe { std::mem::zeroed() };
    let mut free: ULARGE_INTEGER = unsafe { std::mem::zeroed() };

    let rc = unsafe {
        GetDiskFreeSpaceExW(wide.as_ptr(), &mut available, &mut total, &mut free)
    };
    if rc == 0 {
        return Err(FileMoverError::Io(std::io::Error::last_os_error()));
    }

    unsafe {
        Ok(SpaceInfo {
            total_bytes: *total.QuadPart(),
            free_bytes: *free.QuadPart(),
            available_bytes: *available.QuadPart(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_free_space_on_existing_path() {
        let temp = TempDir::new().unwrap();
        let info = free_space(temp.path()).unwrap();
        assert!(info.total_bytes > 0);
        assert!(info.free_bytes <= info.total_bytes);
    }

    #[test]
    fn test_free_space_walks_to_existing_ancestor() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("not/yet/created");
        let info = free_space(&missing).unwrap();
        assert!(info.total_bytes > 0);
    }

    #[test]
    fn test_existing_ancestor() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("a/b/c");
        assert_eq!(existing_ancestor(&missing).unwrap(), temp.path());
    }
}
