use std::collections::HashSet;

use aho_corasick::AhoCorasick;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::{Regex, RegexSet};

use crate::error::{FileMoverError, Result};
use crate::rules::normalize::{NormalizationOptions, Normalizer};
use crate::rules::pattern::{PatternKind, Rule};

/// Outcome of evaluating a folder name against a compiled rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// An exclusion pattern matched; the folder is never a hit.
    Excluded,
    /// The winning inclusive rule, by (priority, declaration order).
    Matched(String),
    /// No enabled rule matched.
    NoRule,
}

/// One pattern kind aggregated into a multi-pattern matcher, with the index
/// of the rule (into the bundle's rule table) each pattern belongs to.
#[derive(Debug)]
struct ContainsBundle {
    automaton: AhoCorasick,
    rule_indices: Vec<usize>,
    /// Needles pre-folded through the normalizer; probe the folded name.
    folded: bool,
}

#[derive(Debug)]
struct GlobBundle {
    set: GlobSet,
    rule_indices: Vec<usize>,
}

#[derive(Debug)]
struct RegexBundle {
    set: RegexSet,
    rule_indices: Vec<usize>,
}

/// An entry in the compiled rule table: enough of the rule to rank winners
/// without holding the full rule list.
#[derive(Debug)]
struct CompiledRule {
    id: String,
    priority: u32,
    decl_index: usize,
    kind: PatternKind,
}

/// The rule set compiled once per scan: an exclude bundle evaluated first,
/// then aggregated inclusive matchers probed in the order Contains, Glob,
/// Regex. Shareable across scan workers.
#[derive(Debug)]
pub struct RuleSet {
    normalizer: Normalizer,
    exclude: Bundles,
    include: Bundles,
    rules: Vec<CompiledRule>,
}

#[derive(Debug, Default)]
struct Bundles {
    contains: Option<ContainsBundle>,
    contains_sensitive: Option<ContainsBundle>,
    globs: Option<GlobBundle>,
    regexes: Option<RegexBundle>,
}

impl RuleSet {
    pub fn compile(rules: &[Rule], normalization: NormalizationOptions) -> Result<Self> {
        let mut seen_ids = HashSet::new();
        for rule in rules {
            if !seen_ids.insert(rule.id.as_str()) {
                return Err(FileMoverError::Config(format!(
                    "duplicate rule id '{}'",
                    rule.id
                )));
            }
        }

        let normalizer = Normalizer::new(normalization);
        let mut compiled = Vec::new();
        let mut exclude_members = Vec::new();
        let mut include_members = Vec::new();

        for (decl_index, rule) in rules.iter().enumerate() {
            if !rule.enabled {
                continue;
            }
            let table_index = compiled.len();
            compiled.push(CompiledRule {
                id: rule.id.clone(),
                priority: rule.priority,
                decl_index,
                kind: rule.pattern.kind,
            });
            if rule.pattern.is_exclude {
                exclude_members.push((table_index, rule));
            } else {
                include_members.push((table_index, rule));
            }
        }

        let exclude = build_bundles(&exclude_members, &normalizer)?;
        let include = build_bundles(&include_members, &normalizer)?;

        Ok(Self {
            normalizer,
            exclude,
            include,
            rules: compiled,
        })
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Evaluate a folder name. Matching itself is total: compile-time errors
    /// were already surfaced, so every probe here is infallible.
    pub fn evaluate(&self, folder_name: &str) -> Verdict {
        let normalized = self.normalizer.normalize(folder_name);

        if !probe_bundles(&self.exclude, folder_name, &normalized).is_empty() {
            return Verdict::Excluded;
        }

        let candidates = probe_bundles(&self.include, folder_name, &normalized);
        let winner = candidates.into_iter().min_by_key(|&idx| {
            let rule = &self.rules[idx];
            (rule.priority, rule.decl_index, kind_rank(rule.kind))
        });

        match winner {
            Some(idx) => Verdict::Matched(self.rules[idx].id.clone()),
            None => Verdict::NoRule,
        }
    }
}

fn kind_rank(kind: PatternKind) -> u8 {
    match kind {
        PatternKind::Contains => 0,
        PatternKind::Glob => 1,
        PatternKind::Regex => 2,
    }
}

fn build_bundles(members: &[(usize, &Rule)], normalizer: &Normalizer) -> Result<Bundles> {
    let mut folded_needles = Vec::new();
    let mut folded_indices = Vec::new();
    let mut raw_needles = Vec::new();
    let mut raw_indices = Vec::new();
    let mut globs = GlobSetBuilder::new();
    let mut glob_indices = Vec::new();
    let mut glob_count = 0usize;
    let mut regex_patterns = Vec::new();
    let mut regex_indices = Vec::new();

    for &(table_index, rule) in members {
        let spec = &rule.pattern;
        match spec.kind {
            PatternKind::Contains => {
                if spec.case_insensitive {
                    folded_needles.push(normalizer.normalize(&spec.value));
                    folded_indices.push(table_index);
                } else {
                    raw_needles.push(spec.value.clone());
                    raw_indices.push(table_index);
                }
            }
            PatternKind::Glob => {
                let glob = GlobBuilder::new(&spec.value)
                    .case_insensitive(spec.case_insensitive)
                    .build()
                    .map_err(|e| FileMoverError::Pattern {
                        rule_id: rule.id.clone(),
                        message: e.to_string(),
                    })?;
                globs.add(glob);
                glob_indices.push(table_index);
                glob_count += 1;
            }
            PatternKind::Regex => {
                let pattern = if spec.case_insensitive {
                    format!("(?i){}", spec.value)
                } else {
                    spec.value.clone()
                };
                // Compile individually first so the error names the rule.
                Regex::new(&pattern).map_err(|e| FileMoverError::Pattern {
                    rule_id: rule.id.clone(),
                    message: e.to_string(),
                })?;
                regex_patterns.push(pattern);
                regex_indices.push(table_index);
            }
        }
    }

    let contains = if folded_needles.is_empty() {
        None
    } else {
        Some(ContainsBundle {
            automaton: AhoCorasick::new(&folded_needles)
                .map_err(|e| FileMoverError::Config(format!("contains automaton: {}", e)))?,
            rule_indices: folded_indices,
            folded: true,
        })
    };

    let contains_sensitive = if raw_needles.is_empty() {
        None
    } else {
        Some(ContainsBundle {
            automaton: AhoCorasick::new(&raw_needles)
                .map_err(|e| FileMoverError::Config(format!("contains automaton: {}", e)))?,
            rule_indices: raw_indices,
            folded: false,
        })
    };

    let globs = if glob_count == 0 {
        None
    } else {
        Some(GlobBundle {
            set: globs
                .build()
                .map_err(|e| FileMoverError::Config(format!("glob set: {}", e)))?,
            rule_indices: glob_indices,
        })
    };

    let regexes = if regex_patterns.is_empty() {
        None
    } else {
        Some(RegexBundle {
            set: RegexSet::new(&regex_patterns)
                .map_err(|e| FileMoverError::Config(format!("regex set: {}", e)))?,
            rule_indices: regex_indices,
        })
    };

    Ok(Bundles {
        contains,
        contains_sensitive,
        globs,
        regexes,
    })
}

fn probe_bundles(bundles: &Bundles, raw: &str, normalized: &str) -> Vec<usize> {
    let mut hits = Vec::new();

    for bundle in [&bundles.contains, &bundles.contains_sensitive]
        .into_iter()
        .flatten()
    {
        let haystack = if bundle.folded { normalized } else { raw };
        let mut seen = HashSet::new();
        for mat in bundle.automaton.find_overlapping_iter(haystack) {
            let idx = bundle.rule_indices[mat.pattern().as_usize()];
            if seen.insert(idx) {
                hits.push(idx);
            }
        }
    }

    if let Some(bundle) = &bundles.globs {
        for pattern_idx in bundle.set.matches(normalized) {
            hits.push(bundle.rule_indices[pattern_idx]);
        }
    }

    if let Some(bundle) = &bundles.regexes {
        for pattern_idx in bundle.set.matches(normalized) {
            hits.push(bundle.rule_indices[pattern_idx]);
        }
    }

    hits
}
