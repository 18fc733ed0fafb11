//! Human approval hand-off
//!
//! A `require_approval` decision is not resolved here. The engine's result
//! is turned into an [`ApprovalTrigger`] and handed to whatever
//! [`ApprovalService`] the deployment provides.

use crate::engine::{StaticPolicyResult, TriggeredPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tollgate_core::{OverrideAction, Result, Severity, User};
use uuid::Uuid;

pub const DEFAULT_COMPLIANCE_FRAMEWORK: &str = "EU AI Act";
pub const DEFAULT_COMPLIANCE_ARTICLE: &str = "Article 14";

/// How long a reviewer has before a request expires
pub fn default_approval_expiry() -> Duration {
    Duration::hours(24)
}

/// Risk class reported alongside an approval request
pub fn risk_classification(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "high-risk",
        Severity::Medium => "limited-risk",
        Severity::Low => "minimal-risk",
    }
}

/// Everything a reviewer needs to decide on a paused request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTrigger {
    pub tenant_id: Option<String>,
    pub organization_id: Option<String>,
    pub user_id: String,
    pub request_type: String,
    pub query: String,
    pub policy_id: String,
    pub policy_name: String,
    pub reason: String,
    pub severity: Severity,
    pub compliance_framework: String,
    pub compliance_article: String,
    pub risk_classification: String,
    pub expires_in_secs: i64,
}

impl ApprovalTrigger {
    /// Trigger metadata for a result whose deciding action is
    /// `require_approval`, `None` otherwise
    pub fn from_result(
        result: &StaticPolicyResult,
        user: &User,
        query: &str,
        request_type: &str,
    ) -> Option<Self> {
        if result.action != Some(OverrideAction::RequireApproval) {
            return None;
        }
        let policy: &TriggeredPolicy = result
            .triggered_policies
            .iter()
            .rev()
            .find(|p| p.action == OverrideAction::RequireApproval)?;
        let severity = result.severity.unwrap_or(policy.severity);

        Some(Self {
            tenant_id: user.tenant_id.clone(),
            organization_id: user.organization_id.clone(),
            user_id: user.id.clone(),
            request_type: request_type.to_string(),
            query: query.to_string(),
            policy_id: policy.id.clone(),
            policy_name: policy.name.clone(),
            reason: result
                .reason
                .clone()
                .unwrap_or_else(|| format!("Policy {} requires approval", policy.name)),
            severity,
            compliance_framework: DEFAULT_COMPLIANCE_FRAMEWORK.to_string(),
            compliance_article: DEFAULT_COMPLIANCE_ARTICLE.to_string(),
            risk_classification: risk_classification(severity).to_string(),
            expires_in_secs: default_approval_expiry().num_seconds(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Overridden,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Overridden => "overridden",
        }
    }

    /// The request may proceed
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved | Self::Overridden)
    }

    /// The request must not proceed
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected | Self::Expired)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: Uuid,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// External approval queue
#[async_trait]
pub trait ApprovalService: Send + Sync {
    async fn create_approval_request(&self, trigger: &ApprovalTrigger) -> Result<ApprovalRequest>;

    async fn get_approval_request(&self, request_id: Uuid) -> Result<ApprovalRequest>;
}

/// Approves everything immediately. For deployments without a review queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalService for AutoApprove {
    async fn create_approval_request(&self, trigger: &ApprovalTrigger) -> Result<ApprovalRequest> {
        let now = Utc::now();
        Ok(ApprovalRequest {
            request_id: Uuid::new_v4(),
            status: ApprovalStatus::Approved,
            created_at: now,
            expires_at: now + Duration::seconds(trigger.expires_in_secs),
        })
    }

    async fn get_approval_request(&self, request_id: Uuid) -> Result<ApprovalRequest> {
        let now = Utc::now();
        Ok(ApprovalRequest {
            request_id,
            status: ApprovalStatus::Approved,
            created_at: now,
            expires_at: now + default_approval_expiry(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggered(action: OverrideAction, severity: Severity) -> TriggeredPolicy {
        TriggeredPolicy {
            id: "custom_0a1b2c3d4e5f".to_string(),
            name: "Payroll export".to_string(),
            group: "pii-us".to_string(),
            severity,
            action,
        }
    }

    fn approval_result(severity: Severity) -> StaticPolicyResult {
        StaticPolicyResult {
            blocked: true,
            reason: Some("Payroll data requested".to_string()),
            triggered_policies: vec![triggered(OverrideAction::RequireApproval, severity)],
            checks_performed: vec!["threat_scan".to_string()],
            processing_time_us: 12,
            severity: Some(severity),
            action: Some(OverrideAction::RequireApproval),
        }
    }

    #[test]
    fn test_trigger_only_for_require_approval() {
        let user = User::new("u-1", "analyst").with_tenant("t1").with_organization("o1");
        let trigger = ApprovalTrigger::from_result(&approval_result(Severity::High), &user, "select salary", "sql")
            .unwrap();
        assert_eq!(trigger.policy_id, "custom_0a1b2c3d4e5f");
        assert_eq!(trigger.tenant_id.as_deref(), Some("t1"));
        assert_eq!(trigger.organization_id.as_deref(), Some("o1"));
        assert_eq!(trigger.compliance_framework, "EU AI Act");
        assert_eq!(trigger.compliance_article, "Article 14");
        assert_eq!(trigger.risk_classification, "high-risk");
        assert_eq!(trigger.expires_in_secs, 86_400);

        let mut blocked = approval_result(Severity::Critical);
        blocked.action = Some(OverrideAction::Block);
        blocked.triggered_policies = vec![triggered(OverrideAction::Block, Severity::Critical)];
        assert!(ApprovalTrigger::from_result(&blocked, &user, "q", "sql").is_none());

        assert!(ApprovalTrigger::from_result(&StaticPolicyResult::default(), &user, "q", "sql").is_none());
    }

    #[test]
    fn test_risk_classification() {
        assert_eq!(risk_classification(Severity::Critical), "high-risk");
        assert_eq!(risk_classification(Severity::High), "high-risk");
        assert_eq!(risk_classification(Severity::Medium), "limited-risk");
        assert_eq!(risk_classification(Severity::Low), "minimal-risk");
    }

    #[test]
    fn test_status_helpers() {
        assert!(ApprovalStatus::Overridden.is_approved());
        assert!(ApprovalStatus::Expired.is_rejected());
        assert!(ApprovalStatus::Pending.is_pending());
        assert!(!ApprovalStatus::Pending.is_approved());
        assert_eq!(ApprovalStatus::Rejected.to_string(), "rejected");
    }

    #[tokio::test]
    async fn test_auto_approve() {
        let user = User::new("u-1", "analyst");
        let trigger = ApprovalTrigger::from_result(&approval_result(Severity::Low), &user, "q", "chat").unwrap();
        let request = AutoApprove.create_approval_request(&trigger).await.unwrap();
        assert!(request.status.is_approved());
        assert!(request.expires_at > request.created_at);

        let fetched = AutoApprove.get_approval_request(request.request_id).await.unwrap();
        assert_eq!(fetched.request_id, request.request_id);
    }
}
