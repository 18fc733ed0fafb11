//! Administrative table and schema access catalog
//!
//! Matched against the lower-cased query, so sources are written in lower case.

use crate::pattern::{PatternList, PolicyPattern};
use tollgate_core::{Result, Severity};

/// A built-in admin-access rule before compilation
#[derive(Debug, Clone, Copy)]
pub struct AdminRule {
    pub id: &'static str,
    pub name: &'static str,
    pub pattern: &'static str,
    pub severity: Severity,
    pub description: &'static str,
}

pub const ADMIN_RULES: &[AdminRule] = &[
    AdminRule {
        id: "admin_users_table",
        name: "Users table access",
        pattern: r"\busers\b",
        severity: Severity::High,
        description: "access to the users table",
    },
    AdminRule {
        id: "admin_audit_log",
        name: "Audit log access",
        pattern: r"\baudit_logs?\b",
        severity: Severity::High,
        description: "access to the audit log",
    },
    AdminRule {
        id: "admin_config_tables",
        name: "Configuration table access",
        pattern: r"\b(?:config|admin|system)_\w+",
        severity: Severity::High,
        description: "access to configuration, admin or system tables",
    },
    AdminRule {
        id: "admin_system_schemas",
        name: "System schema access",
        pattern: r"\b(?:information_schema|pg_catalog|mysql\.user)\b",
        severity: Severity::Medium,
        description: "access to database system schemas",
    },
];

/// Compile an admin rule into a pattern
pub fn compile_rule(rule: &AdminRule) -> Result<PolicyPattern> {
    PolicyPattern::builder(rule.id, rule.pattern)
        .name(rule.name)
        .group("admin_access")
        .severity(rule.severity)
        .description(rule.description)
        .build()
}

/// Built-in admin-access list
pub fn admin_patterns() -> Result<PatternList> {
    ADMIN_RULES.iter().map(compile_rule).collect()
}
