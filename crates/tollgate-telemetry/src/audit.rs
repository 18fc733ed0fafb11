//! Audit records and sealed audit entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tollgate_core::Severity;

/// Who performed the audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    User,
    Client,
    System,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Client => "client",
            Self::System => "system",
        }
    }
}

/// A query that triggered one or more policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub violation_type: String,
    pub policy_id: String,
    pub policy_name: String,
    pub severity: Severity,
    pub actor_kind: ActorKind,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// One increment of a policy's daily hit counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyHit {
    pub policy_id: String,
    pub policy_type: String,
    pub blocked: bool,
}

/// A generic administrative event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor_kind: ActorKind,
    pub actor_id: String,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        actor_kind: ActorKind,
        actor_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            actor_kind,
            actor_id: actor_id.into(),
            action: action.into(),
            resource: resource.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Anything the audit sink persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditRecord {
    Violation(Violation),
    PolicyHit(PolicyHit),
    Event(AuditEvent),
}

impl AuditRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Violation(_) => "violation",
            Self::PolicyHit(_) => "policy_hit",
            Self::Event(_) => "event",
        }
    }
}

/// An audit record with identity, time and a content checksum.
///
/// The checksum lets recovery detect lines in the fallback file that were
/// truncated or edited while the entry waited for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub record: AuditRecord,
    pub checksum: String,
}

impl AuditEntry {
    /// Wrap and seal a record
    pub fn new(record: AuditRecord) -> Self {
        let mut entry = Self {
            id: format!("aud_{}", uuid::Uuid::new_v4()),
            timestamp: Utc::now(),
            record,
            checksum: String::new(),
        };
        entry.checksum = entry.compute_checksum();
        entry
    }

    /// Whether the stored checksum matches the content
    pub fn verify(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        match serde_json::to_vec(&self.record) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(format!("{:?}", self.record).as_bytes()),
        }
        format!("{:x}", hasher.finalize())
    }
}
