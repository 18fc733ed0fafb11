//! SQL injection and dangerous-query catalog

use crate::pattern::{PatternList, PolicyPattern};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tollgate_core::{ParseEnumError, Result, Severity};

/// Family of SQL injection technique a pattern detects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionCategory {
    UnionBased,
    BooleanBlind,
    TimeBased,
    ErrorBased,
    StackedQueries,
    CommentInjection,
    Generic,
    DangerousQuery,
}

impl InjectionCategory {
    pub const ALL: [InjectionCategory; 8] = [
        Self::UnionBased,
        Self::BooleanBlind,
        Self::TimeBased,
        Self::ErrorBased,
        Self::StackedQueries,
        Self::CommentInjection,
        Self::Generic,
        Self::DangerousQuery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnionBased => "union_based",
            Self::BooleanBlind => "boolean_blind",
            Self::TimeBased => "time_based",
            Self::ErrorBased => "error_based",
            Self::StackedQueries => "stacked_queries",
            Self::CommentInjection => "comment_injection",
            Self::Generic => "generic",
            Self::DangerousQuery => "dangerous_query",
        }
    }

    /// Severity assigned to patterns of this category unless overridden
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::BooleanBlind => Severity::Medium,
            Self::TimeBased | Self::ErrorBased | Self::CommentInjection | Self::Generic => {
                Severity::High
            }
            Self::UnionBased | Self::StackedQueries | Self::DangerousQuery => Severity::Critical,
        }
    }
}

impl fmt::Display for InjectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InjectionCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("injection category", s))
    }
}

/// A built-in threat rule before compilation
#[derive(Debug, Clone, Copy)]
pub struct ThreatRule {
    pub id: &'static str,
    pub name: &'static str,
    pub category: InjectionCategory,
    pub pattern: &'static str,
    pub description: &'static str,
}

const fn rule(
    category: InjectionCategory,
    id: &'static str,
    name: &'static str,
    pattern: &'static str,
    description: &'static str,
) -> ThreatRule {
    ThreatRule {
        id,
        name,
        category,
        pattern,
        description,
    }
}

use InjectionCategory::*;

/// Built-in SQL injection and dangerous-query rules
pub const THREAT_RULES: &[ThreatRule] = &[
    // Union based
    rule(UnionBased, "sqli_union_select", "SQL injection: UNION SELECT",
        r"(?i)\bUNION\s+(?:ALL\s+)?SELECT\b",
        "UNION-based injection appending a second result set"),
    rule(UnionBased, "sqli_union_after_quote", "SQL injection: quote-terminated UNION",
        r#"(?i)['")]\s*UNION\s+(?:ALL\s+)?SELECT"#,
        "UNION SELECT following a closed string or expression"),
    // Boolean blind
    rule(BooleanBlind, "sqli_or_numeric_tautology", "SQL injection: OR numeric tautology",
        r#"(?i)\bOR\s+['"]?\d+['"]?\s*=\s*['"]?\d+['"]?"#,
        "Always-true OR condition such as OR 1=1"),
    rule(BooleanBlind, "sqli_or_string_tautology", "SQL injection: OR string tautology",
        r#"(?i)\bOR\s+['"][^'"]*['"]\s*=\s*['"][^'"]*['"]"#,
        "Always-true OR condition such as OR 'a'='a'"),
    rule(BooleanBlind, "sqli_and_numeric_tautology", "SQL injection: AND numeric probe",
        r#"(?i)\bAND\s+['"]?\d+['"]?\s*=\s*['"]?\d+['"]?"#,
        "AND n=n probe used for blind extraction"),
    // Time based
    rule(TimeBased, "sqli_sleep", "SQL injection: SLEEP",
        r"(?i)\bSLEEP\s*\(\s*\d+\s*\)",
        "MySQL SLEEP() delay"),
    rule(TimeBased, "sqli_waitfor_delay", "SQL injection: WAITFOR DELAY",
        r"(?i)\bWAITFOR\s+DELAY\s+'",
        "SQL Server WAITFOR DELAY"),
    rule(TimeBased, "sqli_pg_sleep", "SQL injection: PG_SLEEP",
        r"(?i)\bPG_SLEEP\s*\(",
        "PostgreSQL pg_sleep() delay"),
    rule(TimeBased, "sqli_benchmark", "SQL injection: BENCHMARK",
        r"(?i)\bBENCHMARK\s*\(\s*\d+\s*,",
        "MySQL BENCHMARK() busy loop"),
    // Error based
    rule(ErrorBased, "sqli_extractvalue", "SQL injection: EXTRACTVALUE",
        r"(?i)\bEXTRACTVALUE\s*\(",
        "XML function abused to leak data through errors"),
    rule(ErrorBased, "sqli_updatexml", "SQL injection: UPDATEXML",
        r"(?i)\bUPDATEXML\s*\(",
        "XML function abused to leak data through errors"),
    rule(ErrorBased, "sqli_convert_int", "SQL injection: CONVERT to INT",
        r"(?i)\bCONVERT\s*\(\s*INT\s*,",
        "Type conversion error used to leak data"),
    // Stacked queries
    rule(StackedQueries, "sqli_stacked_drop", "SQL injection: stacked DROP",
        r"(?i);\s*DROP\s+(?:TABLE|DATABASE)\b",
        "Second statement dropping a table or database"),
    rule(StackedQueries, "sqli_stacked_delete", "SQL injection: stacked DELETE",
        r"(?i);\s*DELETE\s+FROM\b",
        "Second statement deleting rows"),
    rule(StackedQueries, "sqli_stacked_update", "SQL injection: stacked UPDATE",
        r"(?i);\s*UPDATE\s+\w+\s+SET\b",
        "Second statement updating rows"),
    rule(StackedQueries, "sqli_stacked_insert", "SQL injection: stacked INSERT",
        r"(?i);\s*INSERT\s+INTO\b",
        "Second statement inserting rows"),
    rule(StackedQueries, "sqli_stacked_exec", "SQL injection: stacked EXEC",
        r"(?i);\s*EXEC(?:UTE)?\s*\(",
        "Second statement executing dynamic SQL"),
    // Comment injection
    rule(CommentInjection, "sqli_block_comment", "SQL injection: block comment evasion",
        r"(?i)/\*.*?\*/\s*(?:UNION|SELECT|INSERT|UPDATE|DELETE|DROP)\b",
        "Inline comment hiding a following statement"),
    rule(CommentInjection, "sqli_hash_comment", "SQL injection: hash comment evasion",
        r"(?i)#\s*(?:UNION|SELECT|INSERT|UPDATE|DELETE|DROP)\b",
        "Hash comment followed by a statement keyword"),
    rule(CommentInjection, "sqli_dash_comment", "SQL injection: dash comment evasion",
        r"(?i)--\s*(?:UNION|SELECT|INSERT|UPDATE|DELETE|DROP)\b",
        "Line comment followed by a statement keyword"),
    // Generic
    rule(Generic, "sqli_auth_bypass", "SQL injection: authentication bypass",
        r#"(?i)['"]\s*OR\s+['"]?[^'"]*['"]?\s*=\s*['"]?[^'"]*['"]?\s*--"#,
        "Quote, tautology and trailing comment"),
    rule(Generic, "sqli_hex_payload", "SQL injection: hex-encoded payload",
        r"(?i)\b0x[0-9a-f]{8,}\b",
        "Long hex literal used to smuggle strings"),
    rule(Generic, "sqli_char_function", "SQL injection: CHAR() encoding",
        r"(?i)\bCHAR\s*\(\s*\d+(?:\s*,\s*\d+)+\s*\)",
        "CHAR() sequence used to build strings"),
    rule(Generic, "sqli_concat_select", "SQL injection: CONCAT subquery",
        r"(?i)\bCONCAT\s*\(.*\bSELECT\b",
        "Subquery inside CONCAT()"),
    rule(Generic, "sqli_load_file", "SQL injection: LOAD_FILE",
        r"(?i)\bLOAD_FILE\s*\(",
        "Reads files from the database host"),
    rule(Generic, "sqli_into_outfile", "SQL injection: INTO OUTFILE",
        r"(?i)\bINTO\s+(?:OUT|DUMP)FILE\b",
        "Writes query results to the database host"),
    // Dangerous queries
    rule(DangerousQuery, "dangerous_drop_table", "Dangerous query: DROP TABLE",
        r"(?i)\bDROP\s+TABLE\b",
        "Drops a table"),
    rule(DangerousQuery, "dangerous_drop_database", "Dangerous query: DROP DATABASE",
        r"(?i)\bDROP\s+DATABASE\b",
        "Drops a database"),
    rule(DangerousQuery, "dangerous_truncate", "Dangerous query: TRUNCATE",
        r"(?i)\bTRUNCATE\s+(?:TABLE\s+)?\w+",
        "Removes every row of a table"),
    rule(DangerousQuery, "dangerous_alter_table", "Dangerous query: ALTER TABLE",
        r"(?i)\bALTER\s+TABLE\b",
        "Changes a table definition"),
    rule(DangerousQuery, "dangerous_delete_without_where", "Dangerous query: DELETE without WHERE",
        r"(?i)\bDELETE\s+FROM\s+[\w.]+\s*(?:;|$)",
        "Deletes every row of a table"),
    rule(DangerousQuery, "dangerous_create_user", "Dangerous query: CREATE USER",
        r"(?i)\bCREATE\s+USER\b",
        "Creates a database account"),
    rule(DangerousQuery, "dangerous_grant", "Dangerous query: GRANT",
        r"(?i)\bGRANT\s+",
        "Grants database privileges"),
    rule(DangerousQuery, "dangerous_revoke", "Dangerous query: REVOKE",
        r"(?i)\bREVOKE\s+",
        "Revokes database privileges"),
];

/// Compile a threat rule into a pattern
pub fn compile_rule(rule: &ThreatRule) -> Result<PolicyPattern> {
    let severity = rule.category.default_severity();
    PolicyPattern::builder(rule.id, rule.pattern)
        .name(rule.name)
        .group(rule.category.as_str())
        .severity(severity)
        .description(rule.description)
        .build()
}

/// Built-in unified threat list
pub fn threat_patterns() -> Result<PatternList> {
    THREAT_RULES.iter().map(compile_rule).collect()
}
