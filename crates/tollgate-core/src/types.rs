//! Core types for Tollgate

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Request types accepted by the evaluation pipeline
pub const ALLOWED_REQUEST_TYPES: [&str; 8] = [
    "sql",
    "llm_chat",
    "rag_search",
    "test",
    "multi-agent-plan",
    "chat",
    "completion",
    "embedding",
];

/// Check a request type against the allow-list
pub fn is_valid_request_type(request_type: &str) -> bool {
    ALLOWED_REQUEST_TYPES.contains(&request_type)
}

/// Permission that bypasses admin-access checks
pub const ADMIN_PERMISSION: &str = "admin";

/// Error returned when a string does not name a known enum value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// Severity of a policy match
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Default priority for policies of this severity
    pub fn default_priority(&self) -> i32 {
        match self {
            Self::Critical => 100,
            Self::High => 90,
            Self::Medium => 70,
            Self::Low => 50,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ParseEnumError::new("severity", s)),
        }
    }
}

/// Effect a triggered policy has on a request.
///
/// Variants are declared from least to most restrictive, so the derived
/// ordering is the restrictiveness order:
/// `block > require_approval > redact > warn > log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    Log,
    Warn,
    Redact,
    RequireApproval,
    Block,
}

impl OverrideAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Warn => "warn",
            Self::Redact => "redact",
            Self::RequireApproval => "require_approval",
            Self::Block => "block",
        }
    }

    /// Whether `self` is strictly more restrictive than `other`
    pub fn is_more_restrictive_than(&self, other: OverrideAction) -> bool {
        *self > other
    }

    /// Resolve two applicable actions to the more restrictive one
    pub fn most_restrictive(self, other: OverrideAction) -> OverrideAction {
        self.max(other)
    }

    /// Whether a request stops here until something else lets it through
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Block | Self::RequireApproval)
    }
}

impl fmt::Display for OverrideAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverrideAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(Self::Log),
            "warn" => Ok(Self::Warn),
            "redact" => Ok(Self::Redact),
            "require_approval" => Ok(Self::RequireApproval),
            "block" => Ok(Self::Block),
            _ => Err(ParseEnumError::new("action", s)),
        }
    }
}

/// License tier of a tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LicenseTier {
    #[serde(rename = "Community")]
    Community,
    #[serde(rename = "PRO")]
    Professional,
    #[serde(rename = "ENT")]
    Enterprise,
    #[serde(rename = "PLUS")]
    EnterprisePlus,
}

impl LicenseTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Community => "Community",
            Self::Professional => "PRO",
            Self::Enterprise => "ENT",
            Self::EnterprisePlus => "PLUS",
        }
    }

    /// Enterprise-grade tiers lift policy and history quotas
    pub fn is_enterprise(&self) -> bool {
        matches!(self, Self::Enterprise | Self::EnterprisePlus)
    }
}

impl fmt::Display for LicenseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseTier {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COMMUNITY" => Ok(Self::Community),
            "PRO" => Ok(Self::Professional),
            "ENT" => Ok(Self::Enterprise),
            "PLUS" => Ok(Self::EnterprisePlus),
            _ => Err(ParseEnumError::new("license tier", s)),
        }
    }
}

/// Identity of the caller submitting a query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    #[serde(default)]
    pub role: String,

    #[serde(default)]
    pub permissions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            ..Default::default()
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn is_admin(&self) -> bool {
        self.has_permission(ADMIN_PERMISSION)
    }
}
