//! Tollgate Classifiers
//!
//! Pattern-based detectors for the evaluation pipeline.
//!
//! Provides:
//! - Format validators (SSN, Luhn credit card, PAN, Aadhaar)
//! - Compiled patterns and precedence-ordered, first-match-wins lists
//! - Built-in SQL injection, admin-access and PII catalogs
//! - Safety validation for operator-supplied patterns

pub mod admin;
pub mod catalog;
pub mod pattern;
pub mod pii;
pub mod safety;
pub mod sqli;
pub mod validators;

pub use catalog::{PatternSets, PolicyStats};
pub use pattern::{check_patterns, PatternBuilder, PatternList, PatternMatch, PolicyPattern};
pub use safety::{test_pattern, validate_pattern, PatternError, PatternTestOutcome};
pub use sqli::InjectionCategory;
pub use validators::{
    card_network, validate_aadhaar, validate_credit_card, validate_pan, validate_ssn, CardNetwork,
    FormatValidator,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::catalog::PatternSets;
    pub use crate::pattern::{check_patterns, PatternList, PolicyPattern};
    pub use crate::validators::FormatValidator;
}
