//! Safety checks for operator-supplied patterns
//!
//! Every pattern is checked here before it is persisted, so nothing that
//! fails these checks can reach a compiled set.

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::time::{Duration, Instant};

pub const MAX_PATTERN_LENGTH: usize = 1000;
pub const MAX_CAPTURE_GROUPS: usize = 10;
pub const PATTERN_MATCH_BUDGET: Duration = Duration::from_millis(100);

/// Upper bound on compiled program size for operator patterns
const COMPILED_SIZE_LIMIT: usize = 1 << 20;

/// Why a pattern was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern cannot be empty")]
    Empty,

    #[error("pattern exceeds maximum length of {max} characters (got {len})")]
    TooLong { len: usize, max: usize },

    #[error("invalid regex syntax: {0}")]
    InvalidSyntax(String),

    #[error("pattern has {found} capture groups, maximum is {max}")]
    TooManyGroups { found: usize, max: usize },

    #[error("pattern contains nested quantifiers that can cause catastrophic backtracking")]
    NestedQuantifier,

    #[error("pattern exceeded the {budget_ms}ms evaluation budget")]
    MatchTimeout { budget_ms: u64 },
}

/// Result of running a pattern against one sample input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternTestOutcome {
    pub input: String,
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<String>,
}

/// Detect a quantified group whose body already contains an unbounded
/// quantifier, e.g. `(a+)+`, `(.*)*` or `(\w+){2,}`.
fn has_nested_quantifier(pattern: &str) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    // One flag per open group: does its body repeat without bound?
    let mut groups: Vec<bool> = Vec::new();
    let mut escaped = false;
    let mut in_class = false;

    for (i, &c) in chars.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            _ if in_class => {}
            '(' => groups.push(false),
            '+' | '*' => {
                if let Some(top) = groups.last_mut() {
                    *top = true;
                }
            }
            ')' => {
                let repeats = groups.pop().unwrap_or(false);
                if repeats && matches!(chars.get(i + 1), Some('+' | '*' | '{')) {
                    return true;
                }
                if repeats {
                    if let Some(parent) = groups.last_mut() {
                        *parent = true;
                    }
                }
            }
            _ => {}
        }
    }
    false
}

/// Inputs every pattern must get through within the match budget
fn probe_inputs() -> Vec<String> {
    vec![
        "SELECT * FROM users WHERE id = 1".to_string(),
        "My SSN is 123-45-6789 and card 4532015112830366".to_string(),
        "a".repeat(10_000),
        format!("{}!", "a".repeat(5_000)),
        "1".repeat(10_000),
        "x y ".repeat(2_500),
    ]
}

/// Validate a pattern and return its compiled form.
///
/// Checks, in order: non-empty, length, syntax, capture-group count, nested
/// quantifiers, and a timed run over probe inputs.
pub fn validate_pattern(pattern: &str) -> Result<Regex, PatternError> {
    if pattern.trim().is_empty() {
        return Err(PatternError::Empty);
    }

    let len = pattern.chars().count();
    if len > MAX_PATTERN_LENGTH {
        return Err(PatternError::TooLong {
            len,
            max: MAX_PATTERN_LENGTH,
        });
    }

    let regex = RegexBuilder::new(pattern)
        .size_limit(COMPILED_SIZE_LIMIT)
        .build()
        .map_err(|e| PatternError::InvalidSyntax(e.to_string()))?;

    let groups = regex.captures_len().saturating_sub(1);
    if groups > MAX_CAPTURE_GROUPS {
        return Err(PatternError::TooManyGroups {
            found: groups,
            max: MAX_CAPTURE_GROUPS,
        });
    }

    if has_nested_quantifier(pattern) {
        return Err(PatternError::NestedQuantifier);
    }

    let start = Instant::now();
    for input in probe_inputs() {
        let _ = regex.is_match(&input);
        if start.elapsed() > PATTERN_MATCH_BUDGET {
            return Err(PatternError::MatchTimeout {
                budget_ms: PATTERN_MATCH_BUDGET.as_millis() as u64,
            });
        }
    }

    Ok(regex)
}

/// Validate a pattern, then report how it behaves on each sample input
pub fn test_pattern(pattern: &str, inputs: &[&str]) -> Result<Vec<PatternTestOutcome>, PatternError> {
    let regex = validate_pattern(pattern)?;
    Ok(inputs
        .iter()
        .map(|input| {
            let fragment = regex.find(input).map(|m| m.as_str().to_string());
            PatternTestOutcome {
                input: (*input).to_string(),
                matched: fragment.is_some(),
                fragment,
            }
        })
        .collect())
}
