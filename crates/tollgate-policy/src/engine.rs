//! Static evaluation pipeline
//!
//! One query runs through five ordered stages and stops at the first one
//! that blocks:
//!
//! 1. `threat_scan`: SQL injection and dangerous-query patterns
//! 2. `admin_access`: sensitive tables and schemas, skipped for admins
//! 3. `request_type`: the request-type allow-list
//! 4. `basic_validation`: empty or blank queries
//! 5. `pii_detection`: PII patterns, blocking only critical matches when enabled
//!
//! Every stage that ran is listed in `checks_performed`; stages after a block
//! are not.
//!
//! Pattern stages scan a stack of layers (system, organization, tenant).
//! Within a layer the first match wins. A non-blocking match does not stop
//! the scan of later layers, so a lower tier can add restrictions but never
//! shadow a blocking system pattern.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tollgate_classifiers::{
    card_network, FormatValidator, PatternMatch, PatternSets, PolicyPattern, PolicyStats,
};
use tollgate_core::{is_valid_request_type, OverrideAction, Severity, User};
use tracing::debug;

pub const STAGE_THREAT_SCAN: &str = "threat_scan";
pub const STAGE_ADMIN_ACCESS: &str = "admin_access";
pub const STAGE_REQUEST_TYPE: &str = "request_type";
pub const STAGE_BASIC_VALIDATION: &str = "basic_validation";
pub const STAGE_PII_DETECTION: &str = "pii_detection";

/// Deployment-wide pipeline switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Block critical PII (SSN, card, PAN, Aadhaar, IBAN, bank account).
    /// When off, those matches are only recorded.
    pub block_critical_pii: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            block_critical_pii: true,
        }
    }
}

/// A policy that matched during one evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredPolicy {
    pub id: String,
    pub name: String,
    /// Catalog group, e.g. `union_based` or `pii-us`
    pub group: String,
    pub severity: Severity,
    pub action: OverrideAction,
}

impl TriggeredPolicy {
    fn from_pattern(pattern: &PolicyPattern) -> Self {
        Self {
            id: pattern.id().to_string(),
            name: pattern.name().to_string(),
            group: pattern.group().to_string(),
            severity: pattern.severity(),
            action: pattern.action(),
        }
    }
}

/// Decision for one query
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StaticPolicyResult {
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub triggered_policies: Vec<TriggeredPolicy>,
    pub checks_performed: Vec<String>,
    pub processing_time_us: u64,
    /// Severity of the deciding match, or the most severe recorded one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Action of the deciding match, or the most restrictive recorded one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<OverrideAction>,
}

impl StaticPolicyResult {
    /// Policy that decided a block, if one did
    pub fn blocking_policy(&self) -> Option<&TriggeredPolicy> {
        if !self.blocked {
            return None;
        }
        self.triggered_policies
            .iter()
            .rev()
            .find(|p| p.action.is_blocking())
    }

    pub fn triggered(&self) -> bool {
        !self.triggered_policies.is_empty()
    }
}

/// Accumulates one evaluation
struct Evaluation {
    started: Instant,
    result: StaticPolicyResult,
}

impl Evaluation {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            result: StaticPolicyResult::default(),
        }
    }

    fn check(&mut self, stage: &str) {
        self.result.checks_performed.push(stage.to_string());
    }

    /// Record a match. Returns true if it blocks.
    fn record(&mut self, hit: &PatternMatch<'_, '_>, blocks: bool) -> bool {
        self.result
            .triggered_policies
            .push(TriggeredPolicy::from_pattern(hit.pattern));
        blocks
    }

    fn block(mut self, stage: &str, reason: String, severity: Severity, action: OverrideAction) -> StaticPolicyResult {
        debug!(stage, reason = %reason, severity = %severity, "Query blocked");
        self.result.blocked = true;
        self.result.reason = Some(reason);
        self.result.severity = Some(severity);
        self.result.action = Some(action);
        self.finish()
    }

    fn finish(mut self) -> StaticPolicyResult {
        if !self.result.blocked {
            let triggered = &self.result.triggered_policies;
            self.result.severity = triggered.iter().map(|p| p.severity).max();
            self.result.action = triggered.iter().map(|p| p.action).max();
        }
        self.result.processing_time_us = self.started.elapsed().as_micros() as u64;
        self.result
    }
}

fn threat_reason(hit: &PatternMatch<'_, '_>) -> String {
    let group = hit.pattern.group();
    if group == tollgate_classifiers::InjectionCategory::DangerousQuery.as_str() {
        format!("Dangerous query detected: {}", hit.fragment)
    } else {
        format!("SQL injection attempt detected ({}): {}", group, hit.fragment)
    }
}

/// PII reasons name the kind of data, never the data itself
fn pii_reason(hit: &PatternMatch<'_, '_>) -> String {
    let description = hit.pattern.description();
    match hit.pattern.validator() {
        Some(FormatValidator::CreditCard) => {
            format!("{} ({})", description, card_network(hit.fragment).as_str())
        }
        _ => description.to_string(),
    }
}

/// Run the pipeline over one query. `layers` are scanned in order and must
/// start with the system sets.
pub fn evaluate_query(
    layers: &[&PatternSets],
    options: &PipelineOptions,
    user: &User,
    query: &str,
    request_type: &str,
) -> StaticPolicyResult {
    let mut eval = Evaluation::new();

    eval.check(STAGE_THREAT_SCAN);
    for hit in layers.iter().filter_map(|sets| sets.threats.first_match(query)) {
        let action = hit.pattern.action();
        if eval.record(&hit, action.is_blocking()) {
            return eval.block(STAGE_THREAT_SCAN, threat_reason(&hit), hit.pattern.severity(), action);
        }
    }

    // Admins pass this stage without a scan
    eval.check(STAGE_ADMIN_ACCESS);
    if !user.is_admin() {
        let lowered = query.to_lowercase();
        for hit in layers.iter().filter_map(|sets| sets.admin.first_match(&lowered)) {
            let action = hit.pattern.action();
            if eval.record(&hit, action.is_blocking()) {
                let reason = format!("Administrative access required: {}", hit.pattern.description());
                return eval.block(STAGE_ADMIN_ACCESS, reason, hit.pattern.severity(), action);
            }
        }
    }

    eval.check(STAGE_REQUEST_TYPE);
    if !is_valid_request_type(request_type) {
        return eval.block(
            STAGE_REQUEST_TYPE,
            format!("Invalid request type: {request_type}"),
            Severity::Medium,
            OverrideAction::Block,
        );
    }

    eval.check(STAGE_BASIC_VALIDATION);
    if query.trim().is_empty() {
        return eval.block(
            STAGE_BASIC_VALIDATION,
            "Empty query not allowed".to_string(),
            Severity::Low,
            OverrideAction::Block,
        );
    }

    eval.check(STAGE_PII_DETECTION);
    for hit in layers.iter().filter_map(|sets| sets.pii.first_match(query)) {
        let pattern = hit.pattern;
        let blocks = options.block_critical_pii
            && pattern.severity() == Severity::Critical
            && pattern.action().is_blocking();
        if eval.record(&hit, blocks) {
            return eval.block(STAGE_PII_DETECTION, pii_reason(&hit), pattern.severity(), pattern.action());
        }
    }

    eval.finish()
}

/// The pipeline over one fixed set of patterns
#[derive(Debug, Clone)]
pub struct StaticPolicyEngine {
    sets: PatternSets,
    options: PipelineOptions,
}

impl StaticPolicyEngine {
    pub fn new(sets: PatternSets, options: PipelineOptions) -> Self {
        Self { sets, options }
    }

    /// Engine over the built-in catalog
    pub fn builtin(options: PipelineOptions) -> tollgate_core::Result<Self> {
        Ok(Self::new(PatternSets::builtin()?, options))
    }

    pub fn evaluate(&self, user: &User, query: &str, request_type: &str) -> StaticPolicyResult {
        evaluate_query(&[&self.sets], &self.options, user, query, request_type)
    }

    pub fn policy_stats(&self) -> PolicyStats {
        self.sets.stats()
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(block_critical_pii: bool) -> StaticPolicyEngine {
        StaticPolicyEngine::builtin(PipelineOptions { block_critical_pii }).unwrap()
    }

    fn analyst() -> User {
        User::new("u-1", "analyst")
    }

    #[test]
    fn test_union_select_blocks_at_threat_scan() {
        let result = engine(true).evaluate(
            &analyst(),
            "SELECT * FROM users UNION SELECT * FROM admin",
            "sql",
        );

        assert!(result.blocked);
        assert_eq!(result.checks_performed, vec![STAGE_THREAT_SCAN]);
        assert!(result.severity.unwrap() >= Severity::High);
        assert!(result
            .triggered_policies
            .iter()
            .any(|p| p.name.to_lowercase().contains("union")));
        assert!(result.reason.unwrap().contains("union_based"));
    }

    #[test]
    fn test_dangerous_query_reason() {
        let result = engine(true).evaluate(&analyst(), "DROP TABLE orders", "sql");
        assert!(result.blocked);
        assert_eq!(result.severity, Some(Severity::Critical));
        assert!(result.reason.unwrap().starts_with("Dangerous query detected"));
    }

    #[test]
    fn test_admin_access_blocks_non_admin_only() {
        let query = "SELECT name FROM Users WHERE id = 7";
        let blocked = engine(true).evaluate(&analyst(), query, "sql");
        assert!(blocked.blocked);
        assert_eq!(blocked.checks_performed, vec![STAGE_THREAT_SCAN, STAGE_ADMIN_ACCESS]);
        assert!(blocked.reason.unwrap().starts_with("Administrative access required"));

        let admin = User::new("root", "dba").with_permission("admin");
        let allowed = engine(true).evaluate(&admin, query, "sql");
        assert!(!allowed.blocked);
        assert!(allowed.triggered_policies.is_empty());
        assert_eq!(allowed.checks_performed.len(), 5);
        assert_eq!(allowed.checks_performed[1], STAGE_ADMIN_ACCESS);
    }

    #[test]
    fn test_invalid_request_type() {
        let result = engine(true).evaluate(&analyst(), "hello", "shell");
        assert!(result.blocked);
        assert_eq!(result.severity, Some(Severity::Medium));
        assert_eq!(result.reason.as_deref(), Some("Invalid request type: shell"));
        assert_eq!(result.checks_performed.last().map(String::as_str), Some(STAGE_REQUEST_TYPE));
    }

    #[test]
    fn test_blank_query() {
        let result = engine(true).evaluate(&analyst(), "   \n", "chat");
        assert!(result.blocked);
        assert_eq!(result.severity, Some(Severity::Low));
        assert_eq!(result.reason.as_deref(), Some("Empty query not allowed"));
    }

    #[test]
    fn test_ssn_respects_critical_pii_flag() {
        let blocked = engine(true).evaluate(&analyst(), "My SSN is 123-45-6789", "llm_chat");
        assert!(blocked.blocked);
        assert_eq!(blocked.triggered_policies[0].id, "ssn_detection");
        assert!(!blocked.reason.as_deref().unwrap_or_default().contains("6789"));

        let logged = engine(false).evaluate(&analyst(), "My SSN is 123-45-6789", "llm_chat");
        assert!(!logged.blocked);
        assert_eq!(logged.triggered_policies[0].id, "ssn_detection");
        assert_eq!(logged.severity, Some(Severity::Critical));
        assert_eq!(logged.checks_performed.len(), 5);
    }

    #[test]
    fn test_non_critical_pii_is_recorded_not_blocked() {
        let result = engine(true).evaluate(&analyst(), "mail me at jane@example.com", "chat");
        assert!(!result.blocked);
        assert_eq!(result.triggered_policies[0].id, "email_detection");
        assert_eq!(result.action, Some(OverrideAction::Log));
    }

    #[test]
    fn test_card_reason_names_network() {
        let result = engine(true).evaluate(&analyst(), "card 4532-0151-1283-0366", "chat");
        assert!(result.blocked);
        assert_eq!(result.reason.as_deref(), Some("Payment card number detected (visa)"));
        assert_eq!(result.blocking_policy().unwrap().id, "credit_card_detection");
    }

    #[test]
    fn test_clean_query() {
        let result = engine(true).evaluate(&analyst(), "summarise last quarter's revenue", "llm_chat");
        assert!(!result.blocked);
        assert!(!result.triggered());
        assert_eq!(result.severity, None);
        assert_eq!(
            result.checks_performed,
            vec![
                STAGE_THREAT_SCAN,
                STAGE_ADMIN_ACCESS,
                STAGE_REQUEST_TYPE,
                STAGE_BASIC_VALIDATION,
                STAGE_PII_DETECTION
            ]
        );
    }

    #[test]
    fn test_non_blocking_threat_pattern_continues() {
        let mut sets = PatternSets::empty();
        sets.threats.insert(
            PolicyPattern::builder("warn_select", r"(?i)\bselect\b")
                .group("generic")
                .action(OverrideAction::Warn)
                .build()
                .unwrap(),
        );
        let engine = StaticPolicyEngine::new(sets, PipelineOptions::default());
        let result = engine.evaluate(&analyst(), "select 1", "sql");

        assert!(!result.blocked);
        assert_eq!(result.triggered_policies.len(), 1);
        assert_eq!(result.action, Some(OverrideAction::Warn));
        assert_eq!(result.checks_performed.len(), 5);
    }

    fn tenant_layer(id: &str, source: &str, action: OverrideAction, precedence: i32) -> PatternSets {
        let mut sets = PatternSets::empty();
        sets.threats.insert(
            PolicyPattern::builder(id, source)
                .group("generic")
                .action(action)
                .precedence(precedence)
                .build()
                .unwrap(),
        );
        sets
    }

    #[test]
    fn test_lower_tier_log_pattern_cannot_shadow_system_block() {
        let system = PatternSets::builtin().unwrap();
        let tenant = tenant_layer("custom_log_select", r"(?i)select", OverrideAction::Log, 1000);
        let query = "SELECT * FROM products UNION SELECT password FROM accounts";

        let result = evaluate_query(&[&system, &tenant], &PipelineOptions::default(), &analyst(), query, "sql");
        assert!(result.blocked);
        assert_eq!(result.checks_performed, vec![STAGE_THREAT_SCAN]);
        assert!(result.blocking_policy().unwrap().id.starts_with("sqli_"));
        assert!(!result.triggered_policies.iter().any(|p| p.id == "custom_log_select"));
    }

    #[test]
    fn test_lower_tier_block_applies_after_system_pass() {
        let system = PatternSets::builtin().unwrap();
        let tenant = tenant_layer("custom_block_export", r"(?i)\bexport_all\b", OverrideAction::Block, 10);

        let result = evaluate_query(
            &[&system, &tenant],
            &PipelineOptions::default(),
            &analyst(),
            "CALL export_all()",
            "sql",
        );
        assert!(result.blocked);
        assert_eq!(result.blocking_policy().unwrap().id, "custom_block_export");
    }

    #[test]
    fn test_stats_cover_builtin_catalog() {
        let stats = engine(true).policy_stats();
        assert!(stats["total_patterns"] > 0);
        assert_eq!(
            stats["total_patterns"],
            stats["sql_injection_patterns"]
                + stats["dangerous_query_patterns"]
                + stats["admin_access_patterns"]
                + stats["pii_patterns"]
        );
    }
}
