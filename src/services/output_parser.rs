//! Strict parse-with-fallback for structured collaborator output.
//!
//! Collaborators are asked for JSON but often wrap it in prose or markdown
//! fences. Parsing strips fences, extracts the outermost JSON object and
//! validates it against the expected shape. Anything that fails becomes
//! [`Parsed::Raw`] so the caller keeps the text instead of dropping the work.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::models::CriticSignal;

/// Result of parsing collaborator output.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    Structured(T),
    Raw { text: String, reason: String },
}

impl<T> Parsed<T> {
    pub const fn is_raw(&self) -> bool {
        matches!(self, Self::Raw { .. })
    }
}

/// Strip a surrounding markdown code block, if any.
fn strip_markdown_code_blocks(output: &str) -> &str {
    let trimmed = output.trim();
    if !(trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() >= 6) {
        return trimmed;
    }
    let start = trimmed.find('\n').map_or(3, |pos| pos + 1);
    let end = trimmed.rfind("\n```").unwrap_or(trimmed.len() - 3);
    if start >= end {
        return "";
    }
    trimmed[start..end].trim()
}

/// The outermost `{ ... }` span of `text`.
fn json_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Parse `output` as `T`, falling back to the raw text.
pub fn parse_structured<T: DeserializeOwned>(origin: &str, output: &str) -> Parsed<T> {
    let body = strip_markdown_code_blocks(output);
    let Some(candidate) = json_object_span(body) else {
        warn!(origin, preview = %preview(output), "no JSON object in collaborator output");
        return Parsed::Raw {
            text: output.to_string(),
            reason: "no JSON object found".to_string(),
        };
    };
    match serde_json::from_str::<T>(candidate) {
        Ok(value) => Parsed::Structured(value),
        Err(err) => {
            warn!(origin, error = %err, preview = %preview(output), "collaborator output failed schema");
            Parsed::Raw {
                text: output.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

// ============================================================================
// Planner output
// ============================================================================

/// A proposed exploration angle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProposal {
    #[serde(alias = "label")]
    pub perspective: String,
    #[serde(default)]
    pub queries: Vec<String>,
}

/// Parse planner output. Raw fallback: the first non-empty line is the
/// label, every following non-empty line a query.
///
/// A structured plan with a blank perspective comes back with an empty
/// perspective, which callers treat as a rejected proposal.
pub fn parse_plan(output: &str) -> (PlanProposal, Option<String>) {
    match parse_structured::<PlanProposal>("planner", output) {
        Parsed::Structured(plan) => {
            let plan = PlanProposal {
                perspective: plan.perspective.trim().to_string(),
                queries: plan
                    .queries
                    .into_iter()
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect(),
            };
            let malformed = plan
                .perspective
                .is_empty()
                .then(|| "empty perspective".to_string());
            (plan, malformed)
        }
        Parsed::Raw { reason, .. } => (fallback_plan(output), Some(reason)),
    }
}

fn fallback_plan(output: &str) -> PlanProposal {
    let mut lines = strip_markdown_code_blocks(output)
        .lines()
        .map(clean_line)
        .filter(|l| !l.is_empty());
    let perspective = lines.next().unwrap_or_default();
    PlanProposal {
        perspective,
        queries: lines.collect(),
    }
}

/// Trim list markers (`-`, `*`, `1.`, `2)`) and whitespace.
fn clean_line(line: &str) -> String {
    let line = line.trim();
    let line = line.trim_start_matches(['-', '*', '#', '>']).trim_start();
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    let line = if digits > 0 {
        line[digits..]
            .strip_prefix(['.', ')'])
            .map_or(line, str::trim_start)
    } else {
        line
    };
    line.trim().to_string()
}

// ============================================================================
// Critic output
// ============================================================================

#[derive(Debug, Deserialize)]
struct CritiqueOutput {
    score: f64,
    #[serde(default)]
    issues: Vec<String>,
}

/// Parse critic output into a signal, rejecting scores outside `[0, scale]`.
pub fn parse_critique(output: &str, scale: f64) -> Parsed<CriticSignal> {
    match parse_structured::<CritiqueOutput>("critic", output) {
        Parsed::Structured(c) if c.score.is_finite() && (0.0..=scale).contains(&c.score) => {
            Parsed::Structured(CriticSignal {
                score: c.score,
                issues: c.issues,
            })
        }
        Parsed::Structured(c) => {
            warn!(score = c.score, scale, "critic score out of range");
            Parsed::Raw {
                text: output.to_string(),
                reason: format!("score {} outside [0, {scale}]", c.score),
            }
        }
        Parsed::Raw { text, reason } => Parsed::Raw { text, reason },
    }
}
