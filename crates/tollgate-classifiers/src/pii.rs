//! PII detection catalog
//!
//! Region-bound identifiers come first: a PAN or Aadhaar number would also be
//! matched by the passport or phone patterns further down, so the list order
//! (carried by each rule's precedence) is part of what makes detection right.

use crate::pattern::{PatternList, PolicyPattern};
use crate::validators::FormatValidator;
use tollgate_core::{OverrideAction, Result, Severity};

/// A built-in PII rule before compilation
#[derive(Debug, Clone, Copy)]
pub struct PiiRule {
    pub id: &'static str,
    pub name: &'static str,
    /// Region grouping, e.g. `pii-india`
    pub region: &'static str,
    pub pattern: &'static str,
    pub severity: Severity,
    pub action: OverrideAction,
    pub precedence: i32,
    pub validator: Option<FormatValidator>,
    pub description: &'static str,
}

/// Built-in PII rules, most specific first
pub const PII_RULES: &[PiiRule] = &[
    PiiRule {
        id: "pan_detection",
        name: "India PAN detection",
        region: "pii-india",
        pattern: r"\b[A-Z]{3}[PCHABGJLFT][A-Z][0-9]{4}[A-Z]\b",
        severity: Severity::Critical,
        action: OverrideAction::Block,
        precedence: 100,
        validator: Some(FormatValidator::Pan),
        description: "Indian Permanent Account Number detected",
    },
    PiiRule {
        id: "aadhaar_detection",
        name: "India Aadhaar detection",
        region: "pii-india",
        pattern: r"\b[2-9][0-9]{3}[ -]?[0-9]{4}[ -]?[0-9]{4}\b",
        severity: Severity::Critical,
        action: OverrideAction::Block,
        precedence: 99,
        validator: Some(FormatValidator::Aadhaar),
        description: "Indian Aadhaar number detected",
    },
    PiiRule {
        id: "ssn_detection",
        name: "US SSN detection",
        region: "pii-us",
        pattern: r"\b[0-9]{3}[- ][0-9]{2}[- ][0-9]{4}\b",
        severity: Severity::Critical,
        action: OverrideAction::Block,
        precedence: 98,
        validator: Some(FormatValidator::Ssn),
        description: "US Social Security Number detected",
    },
    PiiRule {
        id: "credit_card_detection",
        name: "Credit card detection",
        region: "pii-global",
        pattern: concat!(
            // Continuous digits, by network prefix and length
            r"\b(?:4[0-9]{12}(?:[0-9]{3}){0,2}|5[1-5][0-9]{14}|2[2-7][0-9]{14}",
            r"|6(?:011|5[0-9]{2})[0-9]{12}|3[47][0-9]{13}|3(?:0[0-5]|[68][0-9])[0-9]{11}",
            r"|35(?:2[89]|[3-8][0-9])[0-9]{12})\b",
            // 16-digit networks, 4-4-4-4
            r"|\b[0-9]{4}[- ][0-9]{4}[- ][0-9]{4}[- ][0-9]{4}\b",
            // Amex, 4-4-4-3
            r"|\b3[47][0-9]{2}[- ][0-9]{4}[- ][0-9]{4}[- ][0-9]{3}\b",
            // Diners, 4-4-4-2
            r"|\b3(?:0[0-5]|[68][0-9])[0-9][- ][0-9]{4}[- ][0-9]{4}[- ][0-9]{2}\b",
        ),
        severity: Severity::Critical,
        action: OverrideAction::Block,
        precedence: 97,
        validator: Some(FormatValidator::CreditCard),
        description: "Payment card number detected",
    },
    PiiRule {
        id: "iban_detection",
        name: "IBAN detection",
        region: "pii-eu",
        pattern: r"\b[A-Z]{2}[0-9]{2}[A-Z0-9]{4}[0-9]{7}[A-Z0-9]{0,16}\b",
        severity: Severity::Critical,
        action: OverrideAction::Block,
        precedence: 96,
        validator: None,
        description: "International Bank Account Number detected",
    },
    PiiRule {
        id: "bank_account_detection",
        name: "US bank account detection",
        region: "pii-us",
        pattern: r"\b[0-9]{9}[- ]?[0-9]{8,17}\b",
        severity: Severity::Critical,
        action: OverrideAction::Block,
        precedence: 95,
        validator: None,
        description: "Routing and bank account number detected",
    },
    PiiRule {
        id: "passport_detection",
        name: "Passport number detection",
        region: "pii-global",
        pattern: r"\b[A-Z]{1,2}[0-9]{6,9}\b",
        severity: Severity::High,
        action: OverrideAction::Redact,
        precedence: 80,
        validator: None,
        description: "Passport number detected",
    },
    PiiRule {
        id: "dob_detection",
        name: "Date of birth detection",
        region: "pii-global",
        pattern: r"\b(?:0[1-9]|1[0-2])/(?:0[1-9]|[12][0-9]|3[01])/(?:19|20)[0-9]{2}\b",
        severity: Severity::High,
        action: OverrideAction::Log,
        precedence: 75,
        validator: None,
        description: "Date of birth detected",
    },
    PiiRule {
        id: "email_detection",
        name: "Email address detection",
        region: "pii-global",
        pattern: r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        severity: Severity::Medium,
        action: OverrideAction::Log,
        precedence: 70,
        validator: None,
        description: "Email address detected",
    },
    PiiRule {
        id: "ip_address_detection",
        name: "IP address detection",
        region: "pii-global",
        pattern: r"\b(?:(?:25[0-5]|2[0-4][0-9]|1?[0-9]?[0-9])\.){3}(?:25[0-5]|2[0-4][0-9]|1?[0-9]?[0-9])\b",
        severity: Severity::Medium,
        action: OverrideAction::Log,
        precedence: 65,
        validator: None,
        description: "IP address detected",
    },
    PiiRule {
        id: "phone_detection",
        name: "Phone number detection",
        region: "pii-global",
        pattern: r"(?:\+[0-9]{1,3}[-. ]?)?\(?\b[0-9]{3}\)?[-. ][0-9]{3}[-. ][0-9]{4}\b",
        severity: Severity::Medium,
        action: OverrideAction::Redact,
        precedence: 60,
        validator: None,
        description: "Phone number detected",
    },
];

/// Compile a PII rule into a pattern
pub fn compile_rule(rule: &PiiRule) -> Result<PolicyPattern> {
    PolicyPattern::builder(rule.id, rule.pattern)
        .name(rule.name)
        .group(rule.region)
        .severity(rule.severity)
        .action(rule.action)
        .precedence(rule.precedence)
        .validator(rule.validator)
        .description(rule.description)
        .build()
}

/// Built-in ordered PII list
pub fn pii_patterns() -> Result<PatternList> {
    PII_RULES.iter().map(compile_rule).collect()
}
