//! JSON configuration: roots, rules, scan options and named profiles.
//! Unknown keys are rejected outright; a silently ignored typo in a rule
//! definition could send folders to the wrong place.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{FileMoverError, Result};
use crate::plan::template;
use crate::rules::{Rule, RuleSet};
use crate::scan::ScanOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub options: ScanOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub options: ScanOptions,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            rules: Vec::new(),
            options: ScanOptions::default(),
            profiles: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FileMoverError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&content).map_err(|e| {
            FileMoverError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        debug!(
            "Loaded config: {} root(s), {} rule(s), {} profile(s)",
            config.roots.len(),
            config.rules.len(),
            config.profiles.len()
        );
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            FileMoverError::Config(format!("cannot write {}: {}", path.display(), e))
        })
    }

    /// Fatal-at-load validation: duplicate ids, bad patterns, bad
    /// templates, nonexistent roots.
    pub fn validate(&self) -> Result<()> {
        validate_rules(&self.rules, &self.options)?;

        for root in &self.roots {
            if !root.exists() {
                return Err(FileMoverError::Config(format!(
                    "root does not exist: {}",
                    root.display()
                )));
            }
        }

        let mut profile_names = HashSet::new();
        for profile in &self.profiles {
            if !profile_names.insert(profile.name.as_str()) {
                return Err(FileMoverError::Config(format!(
                    "duplicate profile name '{}'",
                    profile.name
                )));
            }
            validate_rules(&profile.rules, &profile.options)?;
        }

        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

fn validate_rules(rules: &[Rule], options: &ScanOptions) -> Result<()> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.id.as_str()) {
            return Err(FileMoverError::Config(format!(
                "duplicate rule id '{}'",
                rule.id
            )));
        }
        template::validate(&rule.template).map_err(|e| FileMoverError::Template {
            rule_id: rule.id.clone(),
            message: e.to_string(),
        })?;
    }

    // Pattern compilation names the offending rule on failure.
    RuleSet::compile(rules, options.normalization)?;
    Ok(())
}

/// Rules can ship either as a bare array or inside a full config file.
pub fn load_rules(path: &Path) -> Result<Vec<Rule>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| FileMoverError::Config(format!("cannot read {}: {}", path.display(), e)))?;

    if let Ok(rules) = serde_json::from_str::<Vec<Rule>>(&content) {
        validate_rules(&rules, &ScanOptions::default())?;
        return Ok(rules);
    }

    let config: Config = serde_json::from_str(&content).map_err(|e| {
        FileMoverError::Config(format!("invalid rules file {}: {}", path.display(), e))
    })?;
    config.validate()?;
    Ok(config.rules)
}
