//! Destination template grammar: balanced `{token}` substitutions with
//! backslash-escaped literal braces. Unknown tokens are a load-time error.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{FileMoverError, Result};
use crate::scan::winpath;

const SUPPORTED_TOKENS: &[&str] = &[
    "name", "label", "yyyy", "yyyyMM", "yyyyMMdd", "drive", "parent",
];

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Token(String),
}

/// Substitution inputs for one source folder. Time tokens use the UTC
/// instant captured at plan creation.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub name: String,
    pub label: Option<String>,
    pub drive: String,
    pub parent: String,
    pub now: DateTime<Utc>,
}

impl TemplateContext {
    pub fn for_source(
        name: &str,
        source: &Path,
        label: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let parent = source
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        Self {
            name: name.to_string(),
            label: label.map(|s| s.to_string()),
            drive: winpath::drive_letter(source),
            parent,
            now,
        }
    }
}

fn parse(template: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(escaped @ ('{' | '}' | '\\')) => literal.push(escaped),
                Some(other) => {
                    // Backslash is also the path separator; only brace
                    // escapes consume it.
                    literal.push('\\');
                    literal.push(other);
                }
                None => literal.push('\\'),
            },
            '{' => {
                let mut token = String::new();
                let mut closed = false;
                for tc in chars.by_ref() {
                    if tc == '}' {
                        closed = true;
                        break;
                    }
                    token.push(tc);
                }
                if !closed {
                    return Err(FileMoverError::Config(format!(
                        "unclosed '{{' in template '{}'",
                        template
                    )));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Token(token));
            }
            '}' => {
                return Err(FileMoverError::Config(format!(
                    "unbalanced '}}' in template '{}'",
                    template
                )));
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Validate a template at rule-load time, returning the tokens it uses.
pub fn validate(template: &str) -> Result<Vec<String>> {
    let segments = parse(template)?;
    let mut tokens = Vec::new();
    for segment in segments {
        if let Segment::Token(token) = segment {
            if !SUPPORTED_TOKENS.contains(&token.as_str()) {
                return Err(FileMoverError::Config(format!(
                    "unknown template token '{{{}}}'",
                    token
                )));
            }
            tokens.push(token);
        }
    }
    Ok(tokens)
}

/// Expand a template against a context. The result is relative to the
/// rule's destination root.
pub fn expand(template: &str, ctx: &TemplateContext) -> Result<PathBuf> {
    let mut out = String::new();
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(&text),
            Segment::Token(token) => match token.as_str() {
                "name" => out.push_str(&ctx.name),
                "label" => out.push_str(ctx.label.as_deref().unwrap_or("")),
                "yyyy" => out.push_str(&ctx.now.format("%Y").to_string()),
                "yyyyMM" => out.push_str(&ctx.now.format("%Y%m").to_string()),
                "yyyyMMdd" => out.push_str(&ctx.now.format("%Y%m%d").to_string()),
                "drive" => out.push_str(&ctx.drive),
                "parent" => out.push_str(&ctx.parent),
                other => {
                    return Err(FileMoverError::Config(format!(
                        "unknown template token '{{{}}}'",
                        other
                    )));
                }
            },
        }
    }

    // An unlabeled {label} can leave empty components or a leading
    // separator behind; the result must stay relative to the dest root.
    let cleaned: PathBuf = PathBuf::from(out)
        .components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .collect();
    Ok(cleaned)
}
