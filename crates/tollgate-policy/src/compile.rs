//! Turning stored policies into immutable pattern sets

use crate::model::{PolicyStage, PolicyTier, StaticPolicy};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tollgate_classifiers::{FormatValidator, InjectionCategory, PatternSets, PolicyPattern};
use tollgate_core::{Error, Result, User};
use tracing::warn;

/// Metadata key naming a threat pattern's injection category
pub const META_INJECTION_CATEGORY: &str = "injection_category";

/// Metadata key naming a PII pattern's format validator
pub const META_VALIDATOR: &str = "validator";

/// Group used for every admin-access pattern
pub const ADMIN_GROUP: &str = "admin_access";

/// One refresh worth of compiled patterns.
///
/// System policies form the base sets. Organization and tenant policies are
/// kept in separate layers holding only their own patterns, and an evaluation
/// scans the layers in tier order: system, organization, tenant.
#[derive(Debug, Clone, Default)]
pub struct CompiledPolicies {
    base: PatternSets,
    tenants: HashMap<String, PatternSets>,
    organizations: HashMap<String, PatternSets>,
    /// Organization a tenant's own policies were created under. Used when
    /// the caller does not name one.
    tenant_orgs: HashMap<String, String>,
    /// Policies that made it into a set
    pub compiled: usize,
    /// Stored policies left out: unsupported category or bad pattern
    pub skipped: usize,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl CompiledPolicies {
    /// The built-in catalog alone
    pub fn builtin() -> Result<Self> {
        let base = PatternSets::builtin()?;
        Ok(Self {
            compiled: base.total(),
            base,
            loaded_at: Some(Utc::now()),
            ..Default::default()
        })
    }

    /// Compile the enabled, live policies loaded from storage
    pub fn compile(policies: &[StaticPolicy]) -> Self {
        let mut compiled = Self {
            loaded_at: Some(Utc::now()),
            ..Default::default()
        };

        for policy in policies {
            let (stage, pattern) = match compile_policy(policy) {
                Ok(Some(compiled_pattern)) => compiled_pattern,
                Ok(None) => {
                    compiled.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(policy_id = %policy.policy_id, error = %e, "Skipping policy with invalid pattern");
                    compiled.skipped += 1;
                    continue;
                }
            };
            let layer = match (policy.tier, policy.tenant_id.as_deref(), policy.organization_id.as_deref()) {
                (PolicyTier::System, _, _) => &mut compiled.base,
                (PolicyTier::Organization, _, Some(org)) => {
                    compiled.organizations.entry(org.to_string()).or_default()
                }
                (PolicyTier::Tenant, Some(tenant), org) => {
                    if let Some(org) = org {
                        compiled
                            .tenant_orgs
                            .entry(tenant.to_string())
                            .or_insert_with(|| org.to_string());
                    }
                    compiled.tenants.entry(tenant.to_string()).or_default()
                }
                _ => {
                    warn!(policy_id = %policy.policy_id, tier = %policy.tier, "Skipping policy without an owner");
                    compiled.skipped += 1;
                    continue;
                }
            };
            insert(layer, stage, pattern);
            compiled.compiled += 1;
        }

        compiled
    }

    /// Layers that apply to a caller, in scan order: the system sets, then
    /// its organization's, then its tenant's.
    pub fn layers_for(&self, user: &User) -> Vec<&PatternSets> {
        let tenant = user.tenant_id.as_deref();
        let org = user
            .organization_id
            .as_deref()
            .or_else(|| tenant.and_then(|t| self.tenant_orgs.get(t)).map(String::as_str));

        let mut layers = Vec::with_capacity(3);
        layers.push(&self.base);
        layers.extend(org.and_then(|o| self.organizations.get(o)));
        layers.extend(tenant.and_then(|t| self.tenants.get(t)));
        layers
    }

    pub fn base(&self) -> &PatternSets {
        &self.base
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    pub fn organization_count(&self) -> usize {
        self.organizations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.tenants.is_empty() && self.organizations.is_empty()
    }
}

fn insert(sets: &mut PatternSets, stage: PolicyStage, pattern: PolicyPattern) {
    match stage {
        PolicyStage::Threat => sets.threats.insert(pattern),
        PolicyStage::Admin => sets.admin.insert(pattern),
        PolicyStage::Pii => sets.pii.insert(pattern),
    }
}

/// Compile one stored policy. `Ok(None)` when its category is not evaluated
/// by the static pipeline.
pub fn compile_policy(policy: &StaticPolicy) -> Result<Option<(PolicyStage, PolicyPattern)>> {
    let Some(stage) = policy.category.stage() else {
        return Ok(None);
    };

    let group = match stage {
        PolicyStage::Threat => policy
            .metadata
            .get(META_INJECTION_CATEGORY)
            .and_then(|c| c.parse::<InjectionCategory>().ok())
            .unwrap_or(InjectionCategory::Generic)
            .as_str(),
        PolicyStage::Admin => ADMIN_GROUP,
        PolicyStage::Pii => policy.category.as_str(),
    };

    let validator = policy
        .metadata
        .get(META_VALIDATOR)
        .map(|v| v.parse::<FormatValidator>())
        .transpose()
        .map_err(|e| Error::pattern(e.to_string()))?;

    let pattern = PolicyPattern::builder(&policy.policy_id, &policy.pattern)
        .name(&policy.name)
        .group(group)
        .severity(policy.severity)
        .description(&policy.description)
        .action(policy.action)
        .enabled(policy.enabled)
        .precedence(policy.priority)
        .validator(validator)
        .case_insensitive(stage != PolicyStage::Pii)
        .build()?;

    Ok(Some((stage, pattern)))
}
