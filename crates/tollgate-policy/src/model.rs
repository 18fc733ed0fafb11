//! Persisted policy model
//!
//! Policies live in three tiers. `system` policies come from the built-in
//! catalog and are read-only through the repository; `organization` and
//! `tenant` policies are created by customers within their license.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tollgate_core::{OverrideAction, ParseEnumError, Severity};

/// Default page size for policy listings
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: u32 = 100;

/// Priority given to policies created without one
pub const DEFAULT_PRIORITY: i32 = 50;

/// Who owns a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyTier {
    System,
    Organization,
    Tenant,
}

impl PolicyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Organization => "organization",
            Self::Tenant => "tenant",
        }
    }
}

impl fmt::Display for PolicyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyTier {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "organization" => Ok(Self::Organization),
            "tenant" => Ok(Self::Tenant),
            _ => Err(ParseEnumError::new("tier", s)),
        }
    }
}

/// Pipeline stage a category is evaluated in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyStage {
    Threat,
    Admin,
    Pii,
}

/// What a policy detects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyCategory {
    #[serde(rename = "security-sqli")]
    SecuritySqli,
    #[serde(rename = "security-admin")]
    SecurityAdmin,
    #[serde(rename = "pii-global")]
    PiiGlobal,
    #[serde(rename = "pii-us")]
    PiiUs,
    #[serde(rename = "pii-eu")]
    PiiEu,
    #[serde(rename = "pii-india")]
    PiiIndia,
    #[serde(rename = "code-secrets")]
    CodeSecrets,
    #[serde(rename = "code-unsafe")]
    CodeUnsafe,
    #[serde(rename = "code-compliance")]
    CodeCompliance,
    #[serde(rename = "dynamic-risk")]
    DynamicRisk,
    #[serde(rename = "dynamic-compliance")]
    DynamicCompliance,
    #[serde(rename = "dynamic-security")]
    DynamicSecurity,
    #[serde(rename = "dynamic-cost")]
    DynamicCost,
    #[serde(rename = "dynamic-access")]
    DynamicAccess,
}

impl PolicyCategory {
    pub const ALL: [PolicyCategory; 14] = [
        Self::SecuritySqli,
        Self::SecurityAdmin,
        Self::PiiGlobal,
        Self::PiiUs,
        Self::PiiEu,
        Self::PiiIndia,
        Self::CodeSecrets,
        Self::CodeUnsafe,
        Self::CodeCompliance,
        Self::DynamicRisk,
        Self::DynamicCompliance,
        Self::DynamicSecurity,
        Self::DynamicCost,
        Self::DynamicAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecuritySqli => "security-sqli",
            Self::SecurityAdmin => "security-admin",
            Self::PiiGlobal => "pii-global",
            Self::PiiUs => "pii-us",
            Self::PiiEu => "pii-eu",
            Self::PiiIndia => "pii-india",
            Self::CodeSecrets => "code-secrets",
            Self::CodeUnsafe => "code-unsafe",
            Self::CodeCompliance => "code-compliance",
            Self::DynamicRisk => "dynamic-risk",
            Self::DynamicCompliance => "dynamic-compliance",
            Self::DynamicSecurity => "dynamic-security",
            Self::DynamicCost => "dynamic-cost",
            Self::DynamicAccess => "dynamic-access",
        }
    }

    /// Dynamic categories belong to the dynamic policy engine, not this one
    pub fn is_dynamic(&self) -> bool {
        self.as_str().starts_with("dynamic-")
    }

    /// The pipeline stage that evaluates this category, if any
    pub fn stage(&self) -> Option<PolicyStage> {
        match self {
            Self::SecuritySqli => Some(PolicyStage::Threat),
            Self::SecurityAdmin => Some(PolicyStage::Admin),
            Self::PiiGlobal | Self::PiiUs | Self::PiiEu | Self::PiiIndia => Some(PolicyStage::Pii),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("category", s))
    }
}

/// A persisted static policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticPolicy {
    /// Internal identifier
    pub id: String,
    /// Human-readable policy code, e.g. `custom_3f2a9c1b0d4e`
    pub policy_id: String,
    pub name: String,
    pub category: PolicyCategory,
    pub pattern: String,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    pub action: OverrideAction,
    pub tier: PolicyTier,
    pub priority: i32,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
}

impl StaticPolicy {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_system(&self) -> bool {
        self.tier == PolicyTier::System
    }
}

/// Kind of change recorded in a version snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    Enable,
    Disable,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }
}

impl FromStr for ChangeType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            _ => Err(ParseEnumError::new("change type", s)),
        }
    }
}

/// Full snapshot of a policy after one change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub policy_id: String,
    pub version: i64,
    pub snapshot: StaticPolicy,
    pub change_type: ChangeType,
    pub change_summary: String,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

/// Who an override applies to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideScope {
    #[default]
    Tenant,
    Organization,
}

/// Tenant- or organization-specific adjustment of a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyOverride {
    pub id: String,
    /// Internal id of the overridden policy
    pub policy_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Set for tenant overrides, empty for organization-wide ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<OverrideAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl PolicyOverride {
    pub fn scope(&self) -> OverrideScope {
        if self.tenant_id.is_some() {
            OverrideScope::Tenant
        } else {
            OverrideScope::Organization
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// A policy as it applies to one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveStaticPolicy {
    #[serde(flatten)]
    pub policy: StaticPolicy,
    pub has_override: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_action: Option<OverrideAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_expires_at: Option<DateTime<Utc>>,
}

impl EffectiveStaticPolicy {
    pub fn new(policy: StaticPolicy, active_override: Option<&PolicyOverride>) -> Self {
        match active_override {
            Some(o) => Self {
                policy,
                has_override: true,
                override_action: o.action,
                override_enabled: o.enabled,
                override_reason: Some(o.reason.clone()),
                override_expires_at: o.expires_at,
            },
            None => Self {
                policy,
                has_override: false,
                override_action: None,
                override_enabled: None,
                override_reason: None,
                override_expires_at: None,
            },
        }
    }

    /// The more restrictive of the policy's action and the override's
    pub fn effective_action(&self) -> OverrideAction {
        match self.override_action {
            Some(action) => self.policy.action.most_restrictive(action),
            None => self.policy.action,
        }
    }

    pub fn effective_enabled(&self) -> bool {
        self.override_enabled.unwrap_or(self.policy.enabled)
    }
}

/// Body of a create call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePolicyRequest {
    pub name: String,
    pub category: String,
    pub pattern: String,
    pub severity: Option<Severity>,
    #[serde(default)]
    pub description: String,
    pub action: String,
    pub tier: String,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Body of an update call. Only supplied fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePolicyRequest {
    pub name: Option<String>,
    pub pattern: Option<String>,
    pub severity: Option<Severity>,
    pub description: Option<String>,
    pub action: Option<String>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<BTreeMap<String, String>>,
}

impl UpdatePolicyRequest {
    /// Names of the fields this request sets
    pub fn updated_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name");
        }
        if self.pattern.is_some() {
            fields.push("pattern");
        }
        if self.severity.is_some() {
            fields.push("severity");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.action.is_some() {
            fields.push("action");
        }
        if self.priority.is_some() {
            fields.push("priority");
        }
        if self.enabled.is_some() {
            fields.push("enabled");
        }
        if self.tags.is_some() {
            fields.push("tags");
        }
        if self.metadata.is_some() {
            fields.push("metadata");
        }
        fields
    }
}

/// Filters and paging for list calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListPoliciesParams {
    pub tier: Option<PolicyTier>,
    pub category: Option<PolicyCategory>,
    pub enabled: Option<bool>,
    /// Case-insensitive match on name, description or code
    pub search: Option<String>,
    pub include_deleted: bool,
    /// 1-based
    pub page: u32,
    pub page_size: u32,
}

impl Default for ListPoliciesParams {
    fn default() -> Self {
        Self {
            tier: None,
            category: None,
            enabled: None,
            search: None,
            include_deleted: false,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ListPoliciesParams {
    /// Clamp paging into range
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.page_size = match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        self
    }

    pub fn offset(&self) -> u32 {
        (self.page.saturating_sub(1)).saturating_mul(self.page_size)
    }
}

/// One page of a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyPage {
    pub policies: Vec<StaticPolicy>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

/// Body of an override call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOverrideRequest {
    /// Internal id or code of the policy
    pub policy_id: String,
    #[serde(default)]
    pub scope: OverrideScope,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    pub reason: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// The tenant and user a repository call acts for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: String,
    pub organization_id: Option<String>,
    /// Acting user, recorded on every change
    pub user_id: String,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            organization_id: None,
            user_id: user_id.into(),
        }
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }
}
