//! System policies seeded from the built-in catalog

use crate::compile::{META_INJECTION_CATEGORY, META_VALIDATOR};
use crate::model::{PolicyCategory, PolicyTier, StaticPolicy};
use crate::store::{insert_policy_if_absent, SqliteStore, StoreResult};
use chrono::Utc;
use std::collections::BTreeMap;
use tollgate_classifiers::admin::ADMIN_RULES;
use tollgate_classifiers::pii::PII_RULES;
use tollgate_classifiers::sqli::THREAT_RULES;
use tollgate_core::{OverrideAction, Severity};
use tracing::info;

const SYSTEM_ACTOR: &str = "system";

#[allow(clippy::too_many_arguments)]
fn system_policy(
    code: &str,
    name: &str,
    category: PolicyCategory,
    pattern: &str,
    severity: Severity,
    description: &str,
    action: OverrideAction,
    priority: i32,
    metadata: BTreeMap<String, String>,
) -> StaticPolicy {
    let now = Utc::now();
    StaticPolicy {
        id: format!("sys_{code}"),
        policy_id: code.to_string(),
        name: name.to_string(),
        category,
        pattern: pattern.to_string(),
        severity,
        description: description.to_string(),
        action,
        tier: PolicyTier::System,
        priority,
        enabled: true,
        organization_id: None,
        tenant_id: None,
        tags: vec!["builtin".to_string()],
        metadata,
        version: 1,
        created_at: now,
        created_by: SYSTEM_ACTOR.to_string(),
        updated_at: now,
        updated_by: None,
        deleted_at: None,
        deleted_by: None,
    }
}

/// Every built-in rule as a system-tier policy, in catalog order
pub fn system_policies() -> Vec<StaticPolicy> {
    let mut policies = Vec::with_capacity(THREAT_RULES.len() + ADMIN_RULES.len() + PII_RULES.len());

    for rule in THREAT_RULES {
        let severity = rule.category.default_severity();
        policies.push(system_policy(
            rule.id,
            rule.name,
            PolicyCategory::SecuritySqli,
            rule.pattern,
            severity,
            rule.description,
            OverrideAction::Block,
            severity.default_priority(),
            BTreeMap::from([(
                META_INJECTION_CATEGORY.to_string(),
                rule.category.as_str().to_string(),
            )]),
        ));
    }

    for rule in ADMIN_RULES {
        policies.push(system_policy(
            rule.id,
            rule.name,
            PolicyCategory::SecurityAdmin,
            rule.pattern,
            rule.severity,
            rule.description,
            OverrideAction::Block,
            rule.severity.default_priority(),
            BTreeMap::new(),
        ));
    }

    for rule in PII_RULES {
        let category = rule.region.parse().unwrap_or(PolicyCategory::PiiGlobal);
        let metadata = rule
            .validator
            .map(|v| BTreeMap::from([(META_VALIDATOR.to_string(), v.as_str().to_string())]))
            .unwrap_or_default();
        policies.push(system_policy(
            rule.id,
            rule.name,
            category,
            rule.pattern,
            rule.severity,
            rule.description,
            rule.action,
            rule.precedence,
            metadata,
        ));
    }

    policies
}

/// Insert any built-in policy missing from the store. Existing rows are left
/// alone. Returns how many were inserted.
pub fn seed_system_policies(store: &SqliteStore) -> StoreResult<usize> {
    let mut conn = store.lock_conn();
    let tx = conn.transaction()?;
    let mut inserted = 0;
    for policy in system_policies() {
        if insert_policy_if_absent(&tx, &policy)? {
            inserted += 1;
        }
    }
    tx.commit()?;

    if inserted > 0 {
        info!(inserted, "Seeded system policies");
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::CompiledPolicies;
    use crate::store::load_enabled_policies;
    use tollgate_classifiers::PatternSets;

    #[test]
    fn test_seeding_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let first = seed_system_policies(&store).unwrap();
        assert_eq!(first, THREAT_RULES.len() + ADMIN_RULES.len() + PII_RULES.len());
        assert_eq!(seed_system_policies(&store).unwrap(), 0);
    }

    #[test]
    fn test_seeded_store_compiles_to_builtin_catalog() {
        let store = SqliteStore::in_memory().unwrap();
        seed_system_policies(&store).unwrap();
        let policies = load_enabled_policies(&store.lock_conn()).unwrap();
        let compiled = CompiledPolicies::compile(&policies);
        let builtin = PatternSets::builtin().unwrap();

        assert_eq!(compiled.skipped, 0);
        assert_eq!(compiled.base().stats(), builtin.stats());

        let ids = |list: &tollgate_classifiers::PatternList| -> Vec<String> {
            list.iter().map(|p| p.id().to_string()).collect()
        };
        assert_eq!(ids(&compiled.base().threats), ids(&builtin.threats));
        assert_eq!(ids(&compiled.base().admin), ids(&builtin.admin));
        assert_eq!(ids(&compiled.base().pii), ids(&builtin.pii));
    }

    #[test]
    fn test_pii_rows_keep_region_and_validator() {
        let ssn = system_policies()
            .into_iter()
            .find(|p| p.policy_id == "ssn_detection")
            .unwrap();
        assert_eq!(ssn.category, PolicyCategory::PiiUs);
        assert_eq!(ssn.metadata.get(META_VALIDATOR).map(String::as_str), Some("ssn"));
        assert!(ssn.is_system());
    }
}
