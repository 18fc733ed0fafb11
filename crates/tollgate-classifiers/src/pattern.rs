//! Compiled policy patterns and precedence-ordered pattern lists

use crate::validators::FormatValidator;
use regex::{Match, Regex, RegexBuilder};
use tollgate_core::{Error, OverrideAction, Result, Severity};

/// A compiled detection rule.
///
/// Patterns are immutable once built. Pattern sets are replaced wholesale,
/// never edited in place.
#[derive(Debug, Clone)]
pub struct PolicyPattern {
    id: String,
    name: String,
    group: String,
    source: String,
    matcher: Regex,
    severity: Severity,
    description: String,
    action: OverrideAction,
    enabled: bool,
    precedence: i32,
    validator: Option<FormatValidator>,
}

impl PolicyPattern {
    /// Start building a pattern with the given id and regex source
    pub fn builder(id: impl Into<String>, source: impl Into<String>) -> PatternBuilder {
        PatternBuilder::new(id, source)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Catalog grouping, e.g. `union_based` or `pii-india`
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn action(&self) -> OverrideAction {
        self.action
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn precedence(&self) -> i32 {
        self.precedence
    }

    pub fn validator(&self) -> Option<FormatValidator> {
        self.validator
    }

    /// Find the first accepted match in `text`
    pub fn find<'t>(&self, text: &'t str) -> Option<Match<'t>> {
        self.matcher
            .find_iter(text)
            .find(|m| self.accepts(text, m))
    }

    fn accepts(&self, text: &str, m: &Match<'_>) -> bool {
        match self.validator {
            None => true,
            Some(validator) => {
                validator.validate(m.as_str())
                    && !(validator.is_numeric() && extends_digit_run(text, m.start(), m.end()))
            }
        }
    }
}

/// True when the match continues into an adjacent separated digit group,
/// e.g. the first twelve digits of a spaced sixteen-digit card.
fn extends_digit_run(text: &str, start: usize, end: usize) -> bool {
    let bytes = text.as_bytes();
    let is_sep = |b: u8| b == b'-' || b == b' ';

    let before = start >= 2 && is_sep(bytes[start - 1]) && bytes[start - 2].is_ascii_digit();
    let after = end + 1 < bytes.len() && is_sep(bytes[end]) && bytes[end + 1].is_ascii_digit();
    before || after
}

/// Builder for [`PolicyPattern`]
#[derive(Debug, Clone)]
pub struct PatternBuilder {
    id: String,
    name: Option<String>,
    group: String,
    source: String,
    severity: Severity,
    description: String,
    action: OverrideAction,
    enabled: bool,
    precedence: Option<i32>,
    validator: Option<FormatValidator>,
    case_insensitive: bool,
}

impl PatternBuilder {
    fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            group: String::new(),
            source: source.into(),
            severity: Severity::Medium,
            description: String::new(),
            action: OverrideAction::Block,
            enabled: true,
            precedence: None,
            validator: None,
            case_insensitive: false,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn action(mut self, action: OverrideAction) -> Self {
        self.action = action;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Higher precedence is checked first. Defaults to the severity's priority.
    pub fn precedence(mut self, precedence: i32) -> Self {
        self.precedence = Some(precedence);
        self
    }

    pub fn validator(mut self, validator: Option<FormatValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn case_insensitive(mut self, yes: bool) -> Self {
        self.case_insensitive = yes;
        self
    }

    /// Compile the regex and produce the immutable pattern
    pub fn build(self) -> Result<PolicyPattern> {
        let matcher = RegexBuilder::new(&self.source)
            .case_insensitive(self.case_insensitive)
            .build()
            .map_err(|e| Error::pattern(format!("failed to compile pattern {}: {}", self.id, e)))?;

        Ok(PolicyPattern {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            precedence: self
                .precedence
                .unwrap_or_else(|| self.severity.default_priority()),
            id: self.id,
            group: self.group,
            source: self.source,
            matcher,
            severity: self.severity,
            description: self.description,
            action: self.action,
            enabled: self.enabled,
            validator: self.validator,
        })
    }
}

/// A pattern hit inside a piece of text
#[derive(Debug, Clone, Copy)]
pub struct PatternMatch<'a, 't> {
    pub pattern: &'a PolicyPattern,
    pub fragment: &'t str,
    pub start: usize,
    pub end: usize,
}

/// Ordered list of patterns evaluated first-match-wins.
///
/// Entries are kept sorted by descending precedence; entries with equal
/// precedence keep their insertion order. Detection correctness depends on
/// this order (region-specific identifiers must be tried before the generic
/// digit patterns that would also match them), so it is carried by the
/// precedence value rather than by where a caller happened to push.
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    entries: Vec<PolicyPattern>,
}

impl PatternList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pattern at the position its precedence dictates
    pub fn insert(&mut self, pattern: PolicyPattern) {
        let pos = self
            .entries
            .partition_point(|p| p.precedence >= pattern.precedence);
        self.entries.insert(pos, pattern);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolicyPattern> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.entries.iter().filter(|p| p.enabled).count()
    }

    /// Return the first enabled pattern, in list order, that matches `text`
    pub fn first_match<'a, 't>(&'a self, text: &'t str) -> Option<PatternMatch<'a, 't>> {
        self.entries
            .iter()
            .filter(|p| p.enabled)
            .find_map(|pattern| {
                pattern.find(text).map(|m| PatternMatch {
                    pattern,
                    fragment: m.as_str(),
                    start: m.start(),
                    end: m.end(),
                })
            })
    }
}

impl FromIterator<PolicyPattern> for PatternList {
    fn from_iter<I: IntoIterator<Item = PolicyPattern>>(iter: I) -> Self {
        let mut list = PatternList::new();
        for pattern in iter {
            list.insert(pattern);
        }
        list
    }
}

/// Linear, order-sensitive scan of `list` for the first enabled match
pub fn check_patterns<'a, 't>(text: &'t str, list: &'a PatternList) -> Option<PatternMatch<'a, 't>> {
    list.first_match(text)
}
