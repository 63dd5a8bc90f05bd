//! Rule definitions, text normalization and the compiled matching pipeline.

pub mod matcher;
pub mod normalize;
pub mod pattern;

pub use matcher::{RuleSet, Verdict};
pub use normalize::{NormalizationOptions, Normalizer};
pub use pattern::{ConflictPolicy, PatternKind, PatternSpec, Rule};
