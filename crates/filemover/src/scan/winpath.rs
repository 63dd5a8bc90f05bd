//! Path plumbing for long-path-safe Windows operation with portable
//! fallbacks. The `\\?\` form is used internally for every filesystem call
//! on Windows and never appears in emitted paths.

use std::path::{Path, PathBuf};

/// Paths longer than this get a LongPath warning in previews; execution
/// itself always goes through the extended-length form.
pub const LONG_PATH_THRESHOLD: usize = 247;

/// Convert a path to the `\\?\`-prefixed extended-length form.
pub fn to_extended(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if text.starts_with("\\\\?\\") {
        return path.to_path_buf();
    }
    if let Some(share) = text.strip_prefix("\\\\") {
        return PathBuf::from(format!("\\\\?\\UNC\\{}", share));
    }
    if is_drive_absolute(&text) {
        return PathBuf::from(format!("\\\\?\\{}", text));
    }
    path.to_path_buf()
}

/// Strip the extended-length prefix for display and stored records.
pub fn strip_extended(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("\\\\?\\UNC\\") {
        return PathBuf::from(format!("\\\\{}", rest));
    }
    if let Some(rest) = text.strip_prefix("\\\\?\\") {
        return PathBuf::from(rest);
    }
    path.to_path_buf()
}

fn is_drive_absolute(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}

pub fn exceeds_long_path(path: &Path) -> bool {
    strip_extended(path).as_os_str().len() > LONG_PATH_THRESHOLD
}

/// Opaque identity of the volume a path lives on. Two paths with equal
/// volume ids can be renamed into each other atomically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VolumeId {
    Drive(String),
    Device(u64),
    Unknown,
}

#[cfg(windows)]
pub fn volume_of(path: &Path) -> VolumeId {
    use std::path::Component;
    match path.components().next() {
        Some(Component::Prefix(prefix)) => {
            VolumeId::Drive(prefix.as_os_str().to_string_lossy().to_uppercase())
        }
        _ => VolumeId::Unknown,
    }
}

#[cfg(unix)]
pub fn volume_of(path: &Path) -> VolumeId {
    use std::os::unix::fs::MetadataExt;
    // Walk up to the nearest existing ancestor so not-yet-created
    // destinations still resolve to their volume.
    let mut probe = path;
    loop {
        if let Ok(meta) = std::fs::metadata(probe) {
            return VolumeId::Device(meta.dev());
        }
        match probe.parent() {
            Some(parent) => probe = parent,
            None => return VolumeId::Unknown,
        }
    }
}

/// Drive letter for template expansion ("C" for `C:\...`), empty when the
/// path has no drive prefix.
pub fn drive_letter(path: &Path) -> String {
    let text = path.to_string_lossy();
    let text = text.strip_prefix("\\\\?\\").unwrap_or(&text);
    let bytes = text.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        (bytes[0] as char).to_uppercase().to_string()
    } else {
        String::new()
    }
}

/// Heuristic for network/offline locations: UNC shares and cloud
/// placeholder folders.
pub fn is_network_path(path: &Path) -> bool {
    let text = path.to_string_lossy();
    if text.starts_with("\\\\") && !text.starts_with("\\\\?\\") {
        return true;
    }
    if text.starts_with("\\\\?\\UNC\\") {
        return true;
    }
    let lower = text.to_lowercase();
    lower.contains("onedrive") && (lower.contains("personal") || lower.contains("business"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_conversion() {
        assert_eq!(
            to_extended(Path::new("C:\\Users\\Test")).to_string_lossy(),
            "\\\\?\\C:\\Users\\Test"
        );
        assert_eq!(
            to_extended(Path::new("\\\\server\\share\\folder")).to_string_lossy(),
            "\\\\?\\UNC\\server\\share\\folder"
        );
        // Already extended: unchanged.
        assert_eq!(
            to_extended(Path::new("\\\\?\\C:\\x")).to_string_lossy(),
            "\\\\?\\C:\\x"
        );
    }

    #[test]
    fn test_strip_round_trips() {
        for raw in ["C:\\Users\\Test", "\\\\server\\share\\folder"] {
            let path = Path::new(raw);
            assert_eq!(strip_extended(&to_extended(path)), path);
        }
    }

    #[test]
    fn test_drive_letter() {
        assert_eq!(drive_letter(Path::new("C:\\Users")), "C");
        assert_eq!(drive_letter(Path::new("d:\\data")), "D");
        assert_eq!(drive_letter(Path::new("/home/user")), "");
    }

    #[test]
    fn test_long_path_threshold() {
        let short = PathBuf::from("C:\\short");
        assert!(!exceeds_long_path(&short));

        let mut long = PathBuf::from("C:\\");
        for _ in 0..30 {
            long.push("component");
        }
        assert!(exceeds_long_path(&long));
    }

    #[test]
    fn test_network_path_heuristic() {
        assert!(is_network_path(Path::new("\\\\server\\share")));
        assert!(!is_network_path(Path::new("C:\\Users\\Test")));
    }

    #[cfg(unix)]
    #[test]
    fn test_volume_of_same_directory() {
        let temp = tempfile::tempdir().unwrap();
        let a = volume_of(temp.path());
        let b = volume_of(&temp.path().join("does_not_exist_yet/child"));
        assert_eq!(a, b);
    }
}
