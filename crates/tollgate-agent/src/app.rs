//! Wiring of store, repository, audit sink and engine

use crate::config::AgentConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tollgate_core::User;
use tollgate_policy::{
    seed_system_policies, ApprovalRequest, ApprovalService, ApprovalTrigger, AutoApprove,
    ManagedPolicyEngine, PolicyRepository, SqliteStore, StaticPolicyResult,
};
use tollgate_telemetry::AuditSink;
use tracing::{info, warn};

/// One line of input to `run`, or the arguments of `evaluate`
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationRequest {
    pub user: User,
    pub query: String,
    #[serde(default = "default_request_type")]
    pub request_type: String,
}

fn default_request_type() -> String {
    "sql".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResponse {
    #[serde(flatten)]
    pub result: StaticPolicyResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,
}

/// Everything a subcommand needs, built from one config
pub struct Agent {
    pub config: AgentConfig,
    pub store: SqliteStore,
    pub engine: Arc<ManagedPolicyEngine>,
    approvals: Arc<dyn ApprovalService>,
}

impl Agent {
    /// Open storage, seed system policies, start the audit sink, replay any
    /// spooled audit entries, and load policies.
    pub async fn start(config: AgentConfig) -> Result<Self> {
        let store = SqliteStore::open(&config.database_path).with_context(|| {
            format!("failed to open database {}", config.database_path.display())
        })?;
        let seeded = seed_system_policies(&store)?;
        info!(seeded, "System policies ready");

        let repository = PolicyRepository::new(store.clone()).with_limits(config.limits());
        let audit = AuditSink::new(Arc::new(store.clone()), config.audit.clone())?;
        let engine = ManagedPolicyEngine::new(Arc::new(repository), config.engine()).with_audit(audit);

        match engine.recover_audit_entries().await {
            Ok(Some(report)) if report.recovered + report.failed + report.corrupt > 0 => info!(
                recovered = report.recovered,
                failed = report.failed,
                corrupt = report.corrupt,
                "Replayed spooled audit entries"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Audit recovery failed, entries stay spooled"),
        }

        engine.initialize().await?;

        Ok(Self {
            config,
            store,
            engine: Arc::new(engine),
            approvals: Arc::new(AutoApprove),
        })
    }

    pub async fn evaluate(&self, request: &EvaluationRequest) -> EvaluationResponse {
        let result = self
            .engine
            .evaluate(&request.user, &request.query, &request.request_type);

        let approval = match ApprovalTrigger::from_result(
            &result,
            &request.user,
            &request.query,
            &request.request_type,
        ) {
            Some(trigger) => match self.approvals.create_approval_request(&trigger).await {
                Ok(approval) => {
                    info!(
                        request_id = %approval.request_id,
                        policy_id = %trigger.policy_id,
                        status = %approval.status,
                        "Approval requested"
                    );
                    Some(approval)
                }
                Err(e) => {
                    warn!(policy_id = %trigger.policy_id, error = %e, "Failed to create approval request");
                    None
                }
            },
            None => None,
        };

        EvaluationResponse { result, approval }
    }

    /// Stop the refresh loop and drain the audit sink
    pub async fn stop(&self) -> bool {
        let drained = self.engine.shutdown(self.config.audit.shutdown_timeout()).await;
        if !drained {
            warn!("Shutdown timed out, undelivered audit entries were spooled");
        }
        drained
    }
}
