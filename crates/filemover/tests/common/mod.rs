use std::path::{Path, PathBuf};

use filemover_lib::{
    CancelToken, FolderHit, FolderScanner, PatternSpec, Rule, ScanOptions,
};
use tempfile::TempDir;

/// A throwaway directory tree plus the relative-path helpers the
/// integration tests lean on.
pub struct TreeFixture {
    pub temp: TempDir,
}

#[allow(dead_code)]
impl TreeFixture {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().expect("create fixture tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.temp.path().join(rel)
    }

    pub fn mkdir(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        std::fs::create_dir_all(&path).expect("mkdir");
        path
    }

    pub fn write_file(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir parent");
        }
        std::fs::write(&path, contents).expect("write file");
        path
    }

    /// Sorted names of the entries directly under `rel`.
    pub fn top_level_names(&self, rel: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.path(rel))
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[allow(dead_code)]
pub fn glob_rule(id: &str, pattern: &str, dest_root: &Path, template: &str) -> Rule {
    Rule::new(id, PatternSpec::glob(pattern), dest_root.to_path_buf(), template)
}

#[allow(dead_code)]
pub fn contains_rule(id: &str, needle: &str, dest_root: &Path, template: &str) -> Rule {
    Rule::new(
        id,
        PatternSpec::contains(needle),
        dest_root.to_path_buf(),
        template,
    )
}

#[allow(dead_code)]
pub fn scan_hits(rules: Vec<Rule>, options: ScanOptions, roots: &[PathBuf]) -> Vec<FolderHit> {
    let scanner = FolderScanner::new(rules, options).expect("compile rules");
    let mut hits = scanner
        .scan_roots(roots, &CancelToken::new())
        .expect("scan roots");
    hits.sort_by(|a, b| a.path.cmp(&b.path));
    hits
}
