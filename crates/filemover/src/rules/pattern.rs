use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    Glob,
    Regex,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternSpec {
    pub kind: PatternKind,
    pub value: String,
    #[serde(default)]
    pub is_exclude: bool,
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
}

fn default_true() -> bool {
    true
}

impl PatternSpec {
    pub fn glob(pattern: &str) -> Self {
        Self {
            kind: PatternKind::Glob,
            value: pattern.to_string(),
            is_exclude: false,
            case_insensitive: true,
        }
    }

    pub fn regex(pattern: &str) -> Self {
        Self {
            kind: PatternKind::Regex,
            value: pattern.to_string(),
            is_exclude: false,
            case_insensitive: true,
        }
    }

    pub fn contains(pattern: &str) -> Self {
        Self {
            kind: PatternKind::Contains,
            value: pattern.to_string(),
            is_exclude: false,
            case_insensitive: true,
        }
    }

    pub fn exclude(mut self) -> Self {
        self.is_exclude = true;
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_insensitive = false;
        self
    }
}

/// What to do when a destination path is already occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    AutoRename,
    Skip,
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub pattern: PatternSpec,
    pub dest_root: PathBuf,
    pub template: String,
    #[serde(default = "default_policy")]
    pub policy: ConflictPolicy,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub priority: u32,
}

fn default_policy() -> ConflictPolicy {
    ConflictPolicy::AutoRename
}

impl Rule {
    pub fn new(id: &str, pattern: PatternSpec, dest_root: PathBuf, template: &str) -> Self {
        Self {
            id: id.to_string(),
            enabled: true,
            pattern,
            dest_root,
            template: template.to_string(),
            policy: ConflictPolicy::AutoRename,
            label: None,
            priority: 0,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
