//! Parallel filesystem enumeration and rule-annotated folder hits.

pub mod scanner;
pub mod walker;
pub mod winpath;

pub use scanner::{FolderScanner, ScanStats};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::rules::NormalizationOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanOptions {
    #[serde(default)]
    pub normalization: NormalizationOptions,
    #[serde(default)]
    pub follow_junctions: bool,
    #[serde(default = "default_true")]
    pub system_protections: bool,
    #[serde(default)]
    pub max_depth: Option<u32>,
    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: Vec<PathBuf>,
    #[serde(default)]
    pub parallel_threads: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            normalization: NormalizationOptions::default(),
            follow_junctions: false,
            system_protections: true,
            max_depth: None,
            excluded_paths: default_excluded_paths(),
            parallel_threads: None,
        }
    }
}

fn default_excluded_paths() -> Vec<PathBuf> {
    Vec::new()
}

impl ScanOptions {
    /// Worker count for the scan pool.
    pub fn thread_count(&self) -> usize {
        self.parallel_threads
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1)
    }

    /// The always-excluded prefixes applied when `system_protections` is on.
    /// The user's temp directory is resolved from the environment.
    pub fn protected_prefixes() -> Vec<PathBuf> {
        #[allow(unused_mut)]
        let mut prefixes = vec![
            PathBuf::from("C:\\Windows"),
            PathBuf::from("C:\\Program Files"),
            PathBuf::from("C:\\Program Files (x86)"),
        ];
        #[cfg(windows)]
        if let Some(temp) = std::env::var_os("TEMP") {
            prefixes.push(PathBuf::from(temp));
        }
        prefixes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Warning {
    LongPath,
    AclDiffers,
    Offline,
    AccessDenied,
    Junction,
    CrossVolume,
}

/// A folder the matcher accepted (or a refusal record), produced by the
/// scanner and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderHit {
    pub path: PathBuf,
    pub name: String,
    pub matched_rule: Option<String>,
    pub dest_preview: Option<PathBuf>,
    pub warnings: Vec<Warning>,
    pub size_bytes: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_options_defaults() {
        let options = ScanOptions::default();
        assert!(options.system_protections);
        assert!(!options.follow_junctions);
        assert!(options.thread_count() >= 1);
        assert!(options.thread_count() <= 8);
    }

    #[test]
    fn test_scan_options_json_round_trip() {
        let options = ScanOptions {
            max_depth: Some(4),
            excluded_paths: vec![PathBuf::from("/tmp/skip")],
            parallel_threads: Some(2),
            ..ScanOptions::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        let parsed: ScanOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, options);
    }

    #[test]
    fn test_unknown_option_key_rejected() {
        let json = r#"{"follow_junctions": true, "max_deth": 3}"#;
        assert!(serde_json::from_str::<ScanOptions>(json).is_err());
    }
}
