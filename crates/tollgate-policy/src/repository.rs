//! Tiered policy repository
//!
//! All tier, license and quota checks happen before anything is written.
//! Every accepted change bumps the policy version and, in the same
//! transaction, appends a full snapshot and a generic audit event.

use crate::error::{PolicyError, PolicyResult};
use crate::license::{is_enterprise, LicenseLookup};
use crate::model::{
    ChangeType, CreateOverrideRequest, CreatePolicyRequest, EffectiveStaticPolicy,
    ListPoliciesParams, OverrideScope, PolicyOverride, PolicyPage, PolicyTier, PolicyVersion,
    StaticPolicy, TenantContext, UpdatePolicyRequest, DEFAULT_PRIORITY,
};
use crate::store::{self, SqliteStore};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tollgate_classifiers::{validate_pattern, PatternTestOutcome};
use tollgate_core::{OverrideAction, Severity};
use tollgate_telemetry::{ActorKind, AuditEvent};
use tracing::{debug, info};

/// Quotas applied to tenants without an enterprise license
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryLimits {
    /// Live tenant-tier policies per tenant
    pub tenant_policy_limit: usize,
    /// Versions returned by `get_versions`
    pub version_history_limit: usize,
}

impl Default for RepositoryLimits {
    fn default() -> Self {
        Self {
            tenant_policy_limit: 30,
            version_history_limit: 5,
        }
    }
}

/// CRUD over tiered static policies
#[derive(Clone)]
pub struct PolicyRepository {
    store: SqliteStore,
    licenses: Arc<dyn LicenseLookup>,
    limits: RepositoryLimits,
}

impl std::fmt::Debug for PolicyRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRepository")
            .field("store", &self.store)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

fn new_policy_code() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("custom_{}", &hex[..12])
}

fn parse_action(action: &str) -> PolicyResult<OverrideAction> {
    action
        .parse()
        .map_err(|_| PolicyError::InvalidAction(action.to_string()))
}

fn is_visible(policy: &StaticPolicy, ctx: &TenantContext) -> bool {
    match policy.tier {
        PolicyTier::System => true,
        PolicyTier::Tenant => policy.tenant_id.as_deref() == Some(ctx.tenant_id.as_str()),
        PolicyTier::Organization => {
            policy.organization_id.is_some()
                && policy.organization_id.as_deref() == ctx.organization_id.as_deref()
        }
    }
}

/// Look up a policy the caller may see
fn find_visible(
    conn: &Connection,
    ctx: &TenantContext,
    id: &str,
    include_deleted: bool,
) -> PolicyResult<StaticPolicy> {
    match store::find_policy(conn, id)? {
        Some(policy) if is_visible(&policy, ctx) && (include_deleted || !policy.is_deleted()) => {
            Ok(policy)
        }
        _ => Err(PolicyError::not_found(id)),
    }
}

/// Append the version snapshot and audit event for a change
fn record_change(
    conn: &Connection,
    ctx: &TenantContext,
    policy: &StaticPolicy,
    change_type: ChangeType,
    summary: String,
    at: DateTime<Utc>,
) -> PolicyResult<()> {
    store::insert_version(
        conn,
        &PolicyVersion {
            policy_id: policy.id.clone(),
            version: policy.version,
            snapshot: policy.clone(),
            change_type,
            change_summary: summary.clone(),
            changed_by: ctx.user_id.clone(),
            changed_at: at,
        },
    )?;

    let event = AuditEvent::new(
        ActorKind::User,
        &ctx.user_id,
        format!("policy.{}", change_type.as_str()),
        format!("policy/{}", policy.policy_id),
    )
    .with_details(serde_json::json!({
        "tenant_id": ctx.tenant_id,
        "tier": policy.tier,
        "version": policy.version,
        "summary": summary,
    }));
    store::insert_audit_event(conn, &format!("evt_{}", uuid::Uuid::new_v4()), &event, at)?;
    Ok(())
}

impl PolicyRepository {
    /// Repository whose license tiers come from the same store
    pub fn new(store: SqliteStore) -> Self {
        Self {
            licenses: Arc::new(store.clone()),
            store,
            limits: RepositoryLimits::default(),
        }
    }

    pub fn with_license_lookup(mut self, licenses: Arc<dyn LicenseLookup>) -> Self {
        self.licenses = licenses;
        self
    }

    pub fn with_limits(mut self, limits: RepositoryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn limits(&self) -> RepositoryLimits {
        self.limits
    }

    fn is_enterprise(&self, tenant_id: &str) -> bool {
        is_enterprise(self.licenses.as_ref(), tenant_id)
    }

    fn require_org_license(&self, policy: &StaticPolicy, enterprise: bool) -> PolicyResult<()> {
        if policy.tier == PolicyTier::Organization && !enterprise {
            return Err(PolicyError::OrgTierRequiresEnterprise);
        }
        Ok(())
    }

    /// Create an organization- or tenant-tier policy
    pub fn create(&self, ctx: &TenantContext, req: CreatePolicyRequest) -> PolicyResult<StaticPolicy> {
        let tier: PolicyTier = req
            .tier
            .parse()
            .map_err(|_| PolicyError::InvalidTier(req.tier.clone()))?;
        if tier == PolicyTier::System {
            return Err(PolicyError::SystemTierCreation);
        }

        let category = match req.category.parse::<crate::model::PolicyCategory>() {
            Ok(category) if !category.is_dynamic() => category,
            _ => return Err(PolicyError::InvalidCategory(req.category.clone())),
        };
        let action = parse_action(&req.action)?;

        let name = req.name.trim();
        if name.is_empty() {
            return Err(PolicyError::EmptyName);
        }
        validate_pattern(&req.pattern)?;

        if ctx.tenant_id.trim().is_empty() {
            return Err(PolicyError::MissingTenantId);
        }
        let enterprise = self.is_enterprise(&ctx.tenant_id);

        let (tenant_id, organization_id) = match tier {
            PolicyTier::Tenant => (
                Some(ctx.tenant_id.clone()),
                ctx.organization_id.clone(),
            ),
            PolicyTier::Organization => {
                if !enterprise {
                    return Err(PolicyError::OrgTierRequiresEnterprise);
                }
                let org = req
                    .organization_id
                    .clone()
                    .or_else(|| ctx.organization_id.clone())
                    .filter(|o| !o.trim().is_empty())
                    .ok_or(PolicyError::MissingOrganizationId)?;
                (None, Some(org))
            }
            PolicyTier::System => return Err(PolicyError::SystemTierCreation),
        };

        let now = Utc::now();
        let policy = StaticPolicy {
            id: uuid::Uuid::new_v4().to_string(),
            policy_id: new_policy_code(),
            name: name.to_string(),
            category,
            pattern: req.pattern,
            severity: req.severity.unwrap_or(Severity::Medium),
            description: req.description,
            action,
            tier,
            priority: req.priority.unwrap_or(DEFAULT_PRIORITY),
            enabled: req.enabled.unwrap_or(true),
            organization_id,
            tenant_id,
            tags: req.tags,
            metadata: req.metadata,
            version: 1,
            created_at: now,
            created_by: ctx.user_id.clone(),
            updated_at: now,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
        };

        let mut conn = self.store.lock_conn();
        let tx = conn.transaction()?;

        if tier == PolicyTier::Tenant && !enterprise {
            let count = store::count_tenant_policies(&tx, &ctx.tenant_id)?;
            if count >= self.limits.tenant_policy_limit {
                return Err(PolicyError::TenantPolicyLimitReached {
                    limit: self.limits.tenant_policy_limit,
                });
            }
        }

        store::insert_policy(&tx, &policy)?;
        record_change(
            &tx,
            ctx,
            &policy,
            ChangeType::Create,
            format!("Created policy {}", policy.name),
            now,
        )?;
        tx.commit()?;

        info!(
            policy_id = %policy.policy_id,
            tier = %policy.tier,
            category = %policy.category,
            tenant_id = %ctx.tenant_id,
            "Created policy"
        );
        Ok(policy)
    }

    /// Apply the supplied fields to a policy
    pub fn update(
        &self,
        ctx: &TenantContext,
        id: &str,
        req: UpdatePolicyRequest,
    ) -> PolicyResult<StaticPolicy> {
        let existing = find_visible(&self.store.lock_conn(), ctx, id, false)?;
        if existing.is_system() {
            return Err(PolicyError::SystemPolicyModification);
        }
        self.require_org_license(&existing, self.is_enterprise(&ctx.tenant_id))?;

        let fields = req.updated_fields();
        if fields.is_empty() {
            return Ok(existing);
        }

        let action = req.action.as_deref().map(parse_action).transpose()?;
        if let Some(name) = &req.name {
            if name.trim().is_empty() {
                return Err(PolicyError::EmptyName);
            }
        }
        // Validated outside the connection lock; probing may take a while
        if let Some(pattern) = &req.pattern {
            validate_pattern(pattern)?;
        }

        let mut conn = self.store.lock_conn();
        let tx = conn.transaction()?;
        let mut policy = find_visible(&tx, ctx, &existing.id, false)?;

        if let Some(name) = req.name {
            policy.name = name.trim().to_string();
        }
        if let Some(pattern) = req.pattern {
            policy.pattern = pattern;
        }
        if let Some(severity) = req.severity {
            policy.severity = severity;
        }
        if let Some(description) = req.description {
            policy.description = description;
        }
        if let Some(action) = action {
            policy.action = action;
        }
        if let Some(priority) = req.priority {
            policy.priority = priority;
        }
        if let Some(enabled) = req.enabled {
            policy.enabled = enabled;
        }
        if let Some(tags) = req.tags {
            policy.tags = tags;
        }
        if let Some(metadata) = req.metadata {
            policy.metadata = metadata;
        }

        let now = Utc::now();
        policy.version += 1;
        policy.updated_at = now;
        policy.updated_by = Some(ctx.user_id.clone());

        store::update_policy(&tx, &policy)?;
        record_change(
            &tx,
            ctx,
            &policy,
            ChangeType::Update,
            format!("Updated {}", fields.join(", ")),
            now,
        )?;
        tx.commit()?;

        info!(policy_id = %policy.policy_id, version = policy.version, fields = ?fields, "Updated policy");
        Ok(policy)
    }

    /// Soft-delete a policy
    pub fn delete(&self, ctx: &TenantContext, id: &str) -> PolicyResult<()> {
        let enterprise = self.is_enterprise(&ctx.tenant_id);

        let mut conn = self.store.lock_conn();
        let tx = conn.transaction()?;
        let mut policy = find_visible(&tx, ctx, id, false)?;
        if policy.is_system() {
            return Err(PolicyError::SystemPolicyDeletion);
        }
        self.require_org_license(&policy, enterprise)?;

        let now = Utc::now();
        policy.version += 1;
        policy.updated_at = now;
        policy.updated_by = Some(ctx.user_id.clone());
        policy.deleted_at = Some(now);
        policy.deleted_by = Some(ctx.user_id.clone());

        store::update_policy(&tx, &policy)?;
        record_change(
            &tx,
            ctx,
            &policy,
            ChangeType::Delete,
            format!("Deleted policy {}", policy.name),
            now,
        )?;
        tx.commit()?;

        info!(policy_id = %policy.policy_id, "Deleted policy");
        Ok(())
    }

    /// Enable or disable a policy
    pub fn toggle_enabled(
        &self,
        ctx: &TenantContext,
        id: &str,
        enabled: bool,
    ) -> PolicyResult<StaticPolicy> {
        let enterprise = self.is_enterprise(&ctx.tenant_id);

        let mut conn = self.store.lock_conn();
        let tx = conn.transaction()?;
        let mut policy = find_visible(&tx, ctx, id, false)?;
        if policy.is_system() {
            return Err(PolicyError::SystemPolicyModification);
        }
        self.require_org_license(&policy, enterprise)?;

        let now = Utc::now();
        policy.enabled = enabled;
        policy.version += 1;
        policy.updated_at = now;
        policy.updated_by = Some(ctx.user_id.clone());

        let (change_type, verb) = if enabled {
            (ChangeType::Enable, "Enabled")
        } else {
            (ChangeType::Disable, "Disabled")
        };
        store::update_policy(&tx, &policy)?;
        record_change(&tx, ctx, &policy, change_type, format!("{verb} policy {}", policy.name), now)?;
        tx.commit()?;

        info!(policy_id = %policy.policy_id, enabled, "Toggled policy");
        Ok(policy)
    }

    /// Fetch by internal id or policy code. Deleted policies are not found.
    pub fn get_by_id(&self, ctx: &TenantContext, id: &str) -> PolicyResult<StaticPolicy> {
        find_visible(&self.store.lock_conn(), ctx, id, false)
    }

    /// One page of the policies visible to the caller
    pub fn list(&self, ctx: &TenantContext, params: ListPoliciesParams) -> PolicyResult<PolicyPage> {
        let params = params.normalized();
        let (policies, total) = store::list_policies(
            &self.store.lock_conn(),
            &ctx.tenant_id,
            ctx.organization_id.as_deref(),
            &params,
        )?;
        Ok(PolicyPage {
            policies,
            total,
            page: params.page,
            page_size: params.page_size,
        })
    }

    /// Every live policy that applies to a tenant, annotated with its active
    /// override. A tenant override wins over an organization-wide one.
    pub fn get_effective(
        &self,
        tenant_id: &str,
        organization_id: Option<&str>,
    ) -> PolicyResult<Vec<EffectiveStaticPolicy>> {
        let (policies, overrides) = {
            let conn = self.store.lock_conn();
            (
                store::visible_policies(&conn, tenant_id, organization_id)?,
                store::overrides_for(&conn, tenant_id, organization_id)?,
            )
        };

        let now = Utc::now();
        let mut active: HashMap<&str, &PolicyOverride> = HashMap::new();
        for o in overrides.iter().filter(|o| o.is_active_at(now)) {
            let replace = match active.get(o.policy_id.as_str()) {
                None => true,
                Some(current) => {
                    o.scope() == OverrideScope::Tenant && current.scope() == OverrideScope::Organization
                }
            };
            if replace {
                active.insert(o.policy_id.as_str(), o);
            }
        }

        Ok(policies
            .into_iter()
            .map(|policy| {
                let o = active.get(policy.id.as_str()).copied();
                EffectiveStaticPolicy::new(policy, o)
            })
            .collect())
    }

    /// Version history, newest first. Non-enterprise tenants only see the
    /// most recent versions.
    pub fn get_versions(&self, ctx: &TenantContext, id: &str) -> PolicyResult<Vec<PolicyVersion>> {
        let limit = if self.is_enterprise(&ctx.tenant_id) {
            None
        } else {
            Some(self.limits.version_history_limit)
        };

        let conn = self.store.lock_conn();
        let policy = find_visible(&conn, ctx, id, true)?;
        let versions = store::list_versions(&conn, &policy.id, limit)?;
        debug!(policy_id = %policy.policy_id, returned = versions.len(), ?limit, "Listed versions");
        Ok(versions)
    }

    /// Override a policy's action or enabled flag for the caller's tenant or
    /// organization. Replaces any override for the same target.
    pub fn create_override(
        &self,
        ctx: &TenantContext,
        req: CreateOverrideRequest,
    ) -> PolicyResult<PolicyOverride> {
        if ctx.tenant_id.trim().is_empty() {
            return Err(PolicyError::MissingTenantId);
        }
        if !self.is_enterprise(&ctx.tenant_id) {
            return Err(PolicyError::OverrideRequiresEnterprise);
        }
        if req.reason.trim().is_empty() {
            return Err(PolicyError::MissingOverrideReason);
        }
        let action = req.action.as_deref().map(parse_action).transpose()?;

        let tenant_id = match req.scope {
            OverrideScope::Tenant => Some(ctx.tenant_id.clone()),
            OverrideScope::Organization => {
                if ctx.organization_id.as_deref().map_or(true, |o| o.trim().is_empty()) {
                    return Err(PolicyError::MissingOrganizationId);
                }
                None
            }
        };

        let mut conn = self.store.lock_conn();
        let tx = conn.transaction()?;
        let policy = find_visible(&tx, ctx, &req.policy_id, false)?;

        let now = Utc::now();
        let o = PolicyOverride {
            id: format!("ovr_{}", uuid::Uuid::new_v4().simple()),
            policy_id: policy.id.clone(),
            organization_id: ctx.organization_id.clone(),
            tenant_id,
            action,
            enabled: req.enabled,
            reason: req.reason.trim().to_string(),
            expires_at: req.expires_at,
            created_by: ctx.user_id.clone(),
            created_at: now,
        };
        store::upsert_override(&tx, &o)?;

        let event = AuditEvent::new(
            ActorKind::User,
            &ctx.user_id,
            "policy.override.create",
            format!("policy/{}", policy.policy_id),
        )
        .with_details(serde_json::json!({
            "override_id": o.id,
            "scope": o.scope(),
            "action": o.action,
            "enabled": o.enabled,
            "reason": o.reason,
        }));
        store::insert_audit_event(&tx, &format!("evt_{}", uuid::Uuid::new_v4()), &event, now)?;
        tx.commit()?;

        info!(policy_id = %policy.policy_id, override_id = %o.id, scope = ?o.scope(), "Created policy override");
        Ok(o)
    }

    /// Remove one of the caller's overrides
    pub fn delete_override(&self, ctx: &TenantContext, override_id: &str) -> PolicyResult<()> {
        let mut conn = self.store.lock_conn();
        let tx = conn.transaction()?;

        let owned = match store::find_override(&tx, override_id)? {
            Some(o) => match &o.tenant_id {
                Some(tenant) => tenant == &ctx.tenant_id,
                None => o.organization_id.is_some() && o.organization_id == ctx.organization_id,
            },
            None => false,
        };
        if !owned || !store::delete_override(&tx, override_id)? {
            return Err(PolicyError::OverrideNotFound(override_id.to_string()));
        }

        let event = AuditEvent::new(
            ActorKind::User,
            &ctx.user_id,
            "policy.override.delete",
            format!("override/{override_id}"),
        );
        store::insert_audit_event(&tx, &format!("evt_{}", uuid::Uuid::new_v4()), &event, Utc::now())?;
        tx.commit()?;

        info!(override_id, "Deleted policy override");
        Ok(())
    }

    /// Dry-run a candidate pattern against sample inputs
    pub fn test_pattern(&self, pattern: &str, inputs: &[&str]) -> PolicyResult<Vec<PatternTestOutcome>> {
        Ok(tollgate_classifiers::test_pattern(pattern, inputs)?)
    }

    /// Every enabled, live policy, for compiling
    pub fn load_enabled(&self) -> PolicyResult<Vec<StaticPolicy>> {
        Ok(store::load_enabled_policies(&self.store.lock_conn())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::seed_system_policies;
    use tollgate_core::LicenseTier;

    fn repo() -> PolicyRepository {
        let store = SqliteStore::in_memory().unwrap();
        seed_system_policies(&store).unwrap();
        PolicyRepository::new(store)
    }

    fn request(tier: &str) -> CreatePolicyRequest {
        CreatePolicyRequest {
            name: "Employee ids".to_string(),
            category: "pii-us".to_string(),
            pattern: r"\bEMP-\d{6}\b".to_string(),
            severity: Some(Severity::High),
            description: "Internal employee identifier".to_string(),
            action: "redact".to_string(),
            tier: tier.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_assigns_code_and_first_version() {
        let repo = repo();
        let ctx = TenantContext::new("t1", "alice");
        let policy = repo.create(&ctx, request("tenant")).unwrap();

        assert!(policy.policy_id.starts_with("custom_"));
        assert_eq!(policy.policy_id.len(), "custom_".len() + 12);
        assert_eq!(policy.version, 1);
        assert_eq!(policy.priority, DEFAULT_PRIORITY);
        assert!(policy.enabled);
        assert_eq!(policy.tenant_id.as_deref(), Some("t1"));

        let versions = repo.get_versions(&ctx, &policy.id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].change_type, ChangeType::Create);
        assert_eq!(versions[0].changed_by, "alice");
    }

    #[test]
    fn test_create_rejections() {
        let repo = repo();
        let ctx = TenantContext::new("t1", "alice");

        assert!(matches!(repo.create(&ctx, request("system")), Err(PolicyError::SystemTierCreation)));
        assert!(matches!(repo.create(&ctx, request("global")), Err(PolicyError::InvalidTier(_))));

        let mut dynamic = request("tenant");
        dynamic.category = "dynamic-cost".to_string();
        assert!(matches!(repo.create(&ctx, dynamic), Err(PolicyError::InvalidCategory(_))));

        let mut action = request("tenant");
        action.action = "quarantine".to_string();
        assert!(matches!(repo.create(&ctx, action), Err(PolicyError::InvalidAction(_))));

        let mut nested = request("tenant");
        nested.pattern = "(a+)+$".to_string();
        assert!(matches!(repo.create(&ctx, nested), Err(PolicyError::InvalidPattern(_))));

        let mut unnamed = request("tenant");
        unnamed.name = "  ".to_string();
        assert!(matches!(repo.create(&ctx, unnamed), Err(PolicyError::EmptyName)));

        let anonymous = TenantContext::new("", "alice");
        assert!(matches!(repo.create(&anonymous, request("tenant")), Err(PolicyError::MissingTenantId)));
    }

    #[test]
    fn test_org_tier_needs_enterprise_and_org() {
        let repo = repo();
        let ctx = TenantContext::new("t1", "alice");
        assert!(matches!(
            repo.create(&ctx, request("organization")),
            Err(PolicyError::OrgTierRequiresEnterprise)
        ));

        repo.store().set_license("t1", LicenseTier::Enterprise).unwrap();
        assert!(matches!(
            repo.create(&ctx, request("organization")),
            Err(PolicyError::MissingOrganizationId)
        ));

        let ctx = ctx.with_organization("o1");
        let policy = repo.create(&ctx, request("organization")).unwrap();
        assert_eq!(policy.organization_id.as_deref(), Some("o1"));
        assert_eq!(policy.tenant_id, None);
    }

    #[test]
    fn test_system_policies_are_read_only() {
        let repo = repo();
        repo.store().set_license("t1", LicenseTier::EnterprisePlus).unwrap();
        let ctx = TenantContext::new("t1", "alice");

        let ssn = repo.get_by_id(&ctx, "ssn_detection").unwrap();
        assert!(ssn.is_system());

        let req = UpdatePolicyRequest {
            action: Some("log".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            repo.update(&ctx, &ssn.id, req),
            Err(PolicyError::SystemPolicyModification)
        ));
        assert!(matches!(repo.delete(&ctx, "ssn_detection"), Err(PolicyError::SystemPolicyDeletion)));
        assert!(matches!(
            repo.toggle_enabled(&ctx, "ssn_detection", false),
            Err(PolicyError::SystemPolicyModification)
        ));
    }

    #[test]
    fn test_update_is_partial_and_versioned() {
        let repo = repo();
        let ctx = TenantContext::new("t1", "alice");
        let created = repo.create(&ctx, request("tenant")).unwrap();

        let updated = repo
            .update(
                &ctx,
                &created.policy_id,
                UpdatePolicyRequest {
                    severity: Some(Severity::Critical),
                    action: Some("block".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.severity, Severity::Critical);
        assert_eq!(updated.action, OverrideAction::Block);
        assert_eq!(updated.pattern, created.pattern);
        assert_eq!(updated.updated_by.as_deref(), Some("alice"));

        let versions = repo.get_versions(&ctx, &created.id).unwrap();
        assert_eq!(versions[0].change_summary, "Updated severity, action");
        assert_eq!(versions[0].snapshot.severity, Severity::Critical);
    }

    #[test]
    fn test_delete_is_soft() {
        let repo = repo();
        let ctx = TenantContext::new("t1", "alice");
        let created = repo.create(&ctx, request("tenant")).unwrap();

        repo.delete(&ctx, &created.id).unwrap();
        assert!(matches!(repo.get_by_id(&ctx, &created.id), Err(PolicyError::NotFound(_))));

        let page = repo
            .list(
                &ctx,
                ListPoliciesParams {
                    tier: Some(PolicyTier::Tenant),
                    include_deleted: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(page.policies[0].is_deleted());
        assert_eq!(page.policies[0].version, 2);

        let versions = repo.get_versions(&ctx, &created.id).unwrap();
        assert_eq!(versions[0].change_type, ChangeType::Delete);
    }

    #[test]
    fn test_other_tenants_cannot_see_policy() {
        let repo = repo();
        let owner = TenantContext::new("t1", "alice");
        let created = repo.create(&owner, request("tenant")).unwrap();

        let stranger = TenantContext::new("t2", "mallory");
        assert!(matches!(repo.get_by_id(&stranger, &created.id), Err(PolicyError::NotFound(_))));
        assert!(matches!(repo.delete(&stranger, &created.id), Err(PolicyError::NotFound(_))));
    }

    #[test]
    fn test_toggle_records_enable_and_disable() {
        let repo = repo();
        let ctx = TenantContext::new("t1", "alice");
        let created = repo.create(&ctx, request("tenant")).unwrap();

        let off = repo.toggle_enabled(&ctx, &created.id, false).unwrap();
        assert!(!off.enabled);
        let on = repo.toggle_enabled(&ctx, &created.id, true).unwrap();
        assert_eq!(on.version, 3);

        let kinds: Vec<ChangeType> = repo
            .get_versions(&ctx, &created.id)
            .unwrap()
            .into_iter()
            .map(|v| v.change_type)
            .collect();
        assert_eq!(kinds, vec![ChangeType::Enable, ChangeType::Disable, ChangeType::Create]);

        let actions = repo
            .store()
            .audit_actions(&format!("policy/{}", created.policy_id))
            .unwrap();
        assert_eq!(actions, vec!["policy.create", "policy.disable", "policy.enable"]);
    }

    #[test]
    fn test_list_search_and_paging() {
        let repo = repo();
        let ctx = TenantContext::new("t1", "alice");
        repo.create(&ctx, request("tenant")).unwrap();

        let page = repo
            .list(
                &ctx,
                ListPoliciesParams {
                    search: Some("EMPLOYEE".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page.total, 1);

        let page = repo
            .list(
                &ctx,
                ListPoliciesParams {
                    page: 2,
                    page_size: 10,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page.page, 2);
        assert_eq!(page.policies.len(), 10);
        assert!(page.total > 20);
    }

    #[test]
    fn test_overrides_require_enterprise_and_reason() {
        let repo = repo();
        let ctx = TenantContext::new("t1", "alice");
        let req = CreateOverrideRequest {
            policy_id: "email_detection".to_string(),
            action: Some("block".to_string()),
            reason: "strict mail handling".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            repo.create_override(&ctx, req.clone()),
            Err(PolicyError::OverrideRequiresEnterprise)
        ));

        repo.store().set_license("t1", LicenseTier::Enterprise).unwrap();
        let no_reason = CreateOverrideRequest {
            reason: " ".to_string(),
            ..req.clone()
        };
        assert!(matches!(
            repo.create_override(&ctx, no_reason),
            Err(PolicyError::MissingOverrideReason)
        ));

        let o = repo.create_override(&ctx, req).unwrap();
        assert_eq!(o.scope(), OverrideScope::Tenant);
        assert_eq!(o.policy_id, "sys_email_detection");
    }

    #[test]
    fn test_effective_prefers_tenant_override_and_ignores_expired() {
        let repo = repo();
        repo.store().set_license("t1", LicenseTier::Enterprise).unwrap();
        let ctx = TenantContext::new("t1", "alice").with_organization("o1");

        repo.create_override(
            &ctx,
            CreateOverrideRequest {
                policy_id: "email_detection".to_string(),
                scope: OverrideScope::Organization,
                action: Some("warn".to_string()),
                reason: "org default".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        repo.create_override(
            &ctx,
            CreateOverrideRequest {
                policy_id: "email_detection".to_string(),
                action: Some("require_approval".to_string()),
                reason: "tenant is stricter".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        repo.create_override(
            &ctx,
            CreateOverrideRequest {
                policy_id: "phone_detection".to_string(),
                enabled: Some(false),
                reason: "expired".to_string(),
                expires_at: Some(Utc::now() - chrono::Duration::minutes(5)),
                ..Default::default()
            },
        )
        .unwrap();

        let effective = repo.get_effective("t1", Some("o1")).unwrap();
        let email = effective.iter().find(|p| p.policy.policy_id == "email_detection").unwrap();
        assert!(email.has_override);
        assert_eq!(email.override_reason.as_deref(), Some("tenant is stricter"));
        assert_eq!(email.effective_action(), OverrideAction::RequireApproval);

        let phone = effective.iter().find(|p| p.policy.policy_id == "phone_detection").unwrap();
        assert!(!phone.has_override);
        assert!(phone.effective_enabled());
    }

    #[test]
    fn test_delete_override_checks_owner() {
        let repo = repo();
        repo.store().set_license("t1", LicenseTier::Enterprise).unwrap();
        let ctx = TenantContext::new("t1", "alice");
        let o = repo
            .create_override(
                &ctx,
                CreateOverrideRequest {
                    policy_id: "ssn_detection".to_string(),
                    action: Some("block".to_string()),
                    reason: "keep blocking".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();

        let other = TenantContext::new("t2", "bob");
        assert!(matches!(repo.delete_override(&other, &o.id), Err(PolicyError::OverrideNotFound(_))));
        repo.delete_override(&ctx, &o.id).unwrap();
        assert!(matches!(repo.delete_override(&ctx, &o.id), Err(PolicyError::OverrideNotFound(_))));
    }

    #[test]
    fn test_pattern_dry_run() {
        let repo = repo();
        let outcomes = repo.test_pattern(r"EMP-\d+", &["id EMP-42", "nothing"]).unwrap();
        assert!(outcomes[0].matched);
        assert_eq!(outcomes[0].fragment.as_deref(), Some("EMP-42"));
        assert!(!outcomes[1].matched);
        assert!(repo.test_pattern("(x*)*", &["xx"]).is_err());
    }
}
