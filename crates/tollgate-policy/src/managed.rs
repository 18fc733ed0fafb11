//! Managed policy engine
//!
//! Keeps the compiled pattern sets in memory, reloads them from a
//! [`PolicySource`] on a timer, and reports violations to the audit sink.
//!
//! Readers clone an `Arc` of the current snapshot under a read lock and
//! evaluate without holding it. A refresh loads and compiles with no lock
//! held and takes the write lock only to swap the pointer, so an evaluation
//! sees either the old snapshot or the new one. A failed refresh keeps the
//! last good snapshot.

use crate::compile::CompiledPolicies;
use crate::engine::{evaluate_query, PipelineOptions, StaticPolicyResult};
use crate::model::StaticPolicy;
use crate::repository::PolicyRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tollgate_classifiers::PolicyStats;
use tollgate_core::{Error, Result, Severity, User};
use tollgate_telemetry::{
    ActorKind, AuditRecord, AuditSink, AuditStats, MetricsCollector, MetricsSnapshot, PolicyHit,
    RecoveryReport, Violation,
};
use tracing::{debug, error, info, warn};

/// Where the engine reads enabled policies from
#[async_trait]
pub trait PolicySource: Send + Sync + 'static {
    /// Every enabled, live policy across all tiers
    async fn load_policies(&self) -> Result<Vec<StaticPolicy>>;
}

#[async_trait]
impl PolicySource for PolicyRepository {
    async fn load_policies(&self) -> Result<Vec<StaticPolicy>> {
        let repository = self.clone();
        tokio::task::spawn_blocking(move || repository.load_enabled())
            .await
            .map_err(|e| Error::storage(format!("policy load task failed: {e}")))?
            .map_err(|e| Error::storage(e.to_string()))
    }
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub refresh_interval_secs: u64,
    pub pipeline: PipelineOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
            pipeline: PipelineOptions::default(),
        }
    }
}

impl EngineConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

/// What one successful refresh installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub compiled: usize,
    pub skipped: usize,
    pub tenants: usize,
    pub organizations: usize,
}

/// Operator view of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub policies: PolicyStats,
    pub compiled: usize,
    pub skipped: usize,
    pub tenant_sets: usize,
    pub organization_sets: usize,
    pub loaded_at: Option<DateTime<Utc>>,
    pub block_critical_pii: bool,
    pub metrics: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditStats>,
}

/// Cached, periodically refreshed policy evaluation
pub struct ManagedPolicyEngine {
    source: Arc<dyn PolicySource>,
    config: EngineConfig,
    policies: RwLock<Arc<CompiledPolicies>>,
    audit: Option<AuditSink>,
    metrics: MetricsCollector,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl std::fmt::Debug for ManagedPolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedPolicyEngine")
            .field("config", &self.config)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

impl ManagedPolicyEngine {
    /// Engine with no policies loaded yet. Call [`initialize`](Self::initialize)
    /// before serving.
    pub fn new(source: Arc<dyn PolicySource>, config: EngineConfig) -> Self {
        Self {
            source,
            config,
            policies: RwLock::new(Arc::new(CompiledPolicies::default())),
            audit: None,
            metrics: MetricsCollector::new(),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_audit(mut self, audit: AuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn audit(&self) -> Option<&AuditSink> {
        self.audit.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<CompiledPolicies> {
        self.policies.read().clone()
    }

    /// Load once from storage, falling back to the built-in catalog
    pub async fn initialize(&self) -> Result<()> {
        match self.refresh().await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Initial policy load failed, using built-in policies");
                self.load_default_policies()?;
                Ok(())
            }
        }
    }

    /// Reload and swap the compiled sets. On failure the current sets stay.
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        let started = Instant::now();
        let loaded = self.source.load_policies().await.and_then(|policies| {
            let compiled = CompiledPolicies::compile(&policies);
            if compiled.base().is_empty() {
                return Err(Error::storage("storage returned no enabled system policies"));
            }
            Ok(compiled)
        });

        let compiled = match loaded {
            Ok(compiled) => compiled,
            Err(e) => {
                self.metrics.record_refresh(false);
                warn!(error = %e, "Policy refresh failed, keeping last known good policies");
                return Err(e);
            }
        };

        let summary = RefreshSummary {
            compiled: compiled.compiled,
            skipped: compiled.skipped,
            tenants: compiled.tenant_count(),
            organizations: compiled.organization_count(),
        };
        *self.policies.write() = Arc::new(compiled);
        self.metrics.record_refresh(true);

        info!(
            compiled = summary.compiled,
            skipped = summary.skipped,
            tenants = summary.tenants,
            organizations = summary.organizations,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Policies refreshed"
        );
        Ok(summary)
    }

    /// Install the built-in catalog unless something has already loaded.
    ///
    /// Safe to call concurrently: the check and the swap happen under the
    /// write lock. Returns whether the defaults were installed.
    pub fn load_default_policies(&self) -> Result<bool> {
        let mut current = self.policies.write();
        if current.loaded_at.is_some() {
            debug!("Policies already loaded, skipping defaults");
            return Ok(false);
        }
        *current = Arc::new(CompiledPolicies::builtin()?);
        info!(patterns = current.compiled, "Loaded built-in default policies");
        Ok(true)
    }

    /// Evaluate one query. Never fails and never waits on audit storage.
    pub fn evaluate(&self, user: &User, query: &str, request_type: &str) -> StaticPolicyResult {
        let snapshot = self.snapshot();
        let result = evaluate_query(
            &snapshot.layers_for(user),
            &self.config.pipeline,
            user,
            query,
            request_type,
        );

        self.metrics.record_evaluation(
            result.blocked,
            result.triggered_policies.len(),
            result.processing_time_us,
        );
        if result.blocked || result.triggered() {
            self.report(user, request_type, &result);
        }
        result
    }

    fn report(&self, user: &User, request_type: &str, result: &StaticPolicyResult) {
        let severity = result.severity.unwrap_or(Severity::Low);
        let deciding = result
            .blocking_policy()
            .or_else(|| result.triggered_policies.first());
        let stage = result
            .checks_performed
            .last()
            .map(String::as_str)
            .unwrap_or_default();
        let (policy_id, policy_name) = match deciding {
            Some(p) => (p.id.clone(), p.name.clone()),
            None => (stage.to_string(), stage.to_string()),
        };
        let description = result.reason.clone().unwrap_or_else(|| {
            let names: Vec<&str> = result.triggered_policies.iter().map(|p| p.name.as_str()).collect();
            format!("Policies triggered: {}", names.join(", "))
        });

        match severity {
            Severity::Critical => error!(user_id = %user.id, policy_id = %policy_id, blocked = result.blocked, "{description}"),
            Severity::High => warn!(user_id = %user.id, policy_id = %policy_id, blocked = result.blocked, "{description}"),
            _ => info!(user_id = %user.id, policy_id = %policy_id, blocked = result.blocked, "{description}"),
        }

        let Some(audit) = &self.audit else {
            return;
        };

        let violation_type = if result.blocked { stage } else { "policy_triggered" };
        audit.submit(AuditRecord::Violation(Violation {
            violation_type: violation_type.to_string(),
            policy_id,
            policy_name,
            severity,
            actor_kind: ActorKind::User,
            actor_id: user.id.clone(),
            client_id: None,
            description,
            details: serde_json::json!({
                "blocked": result.blocked,
                "request_type": request_type,
                "tenant_id": user.tenant_id,
                "triggered": result.triggered_policies.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
                "checks": result.checks_performed,
                "processing_time_us": result.processing_time_us,
            }),
        }));

        let blocking_id = result.blocking_policy().map(|p| p.id.as_str());
        for policy in &result.triggered_policies {
            audit.submit(AuditRecord::PolicyHit(PolicyHit {
                policy_id: policy.id.clone(),
                policy_type: "static".to_string(),
                blocked: blocking_id == Some(policy.id.as_str()),
            }));
        }
    }

    /// Pattern counts of the system sets
    pub fn policy_stats(&self) -> PolicyStats {
        self.snapshot().base().stats()
    }

    pub fn stats(&self) -> EngineStats {
        let snapshot = self.snapshot();
        EngineStats {
            policies: snapshot.base().stats(),
            compiled: snapshot.compiled,
            skipped: snapshot.skipped,
            tenant_sets: snapshot.tenant_count(),
            organization_sets: snapshot.organization_count(),
            loaded_at: snapshot.loaded_at,
            block_critical_pii: self.config.pipeline.block_critical_pii,
            metrics: self.metrics.snapshot(),
            audit: self.audit.as_ref().map(AuditSink::stats),
        }
    }

    /// Replay audit entries spooled while storage was unavailable
    pub async fn recover_audit_entries(&self) -> Result<Option<RecoveryReport>> {
        match &self.audit {
            Some(audit) => audit.recover().await.map(Some),
            None => Ok(None),
        }
    }

    /// Spawn the refresh loop
    pub fn start(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let cancel = self.cancel.clone();
        let period = self.config.refresh_interval();

        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = period.as_secs(), "Policy refresh loop started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // Failures are logged and counted inside refresh
                        let _ = engine.refresh().await;
                    }
                }
            }
            info!("Policy refresh loop stopped");
        });
    }

    /// Stop the refresh loop and drain the audit sink.
    ///
    /// Returns `true` if everything stopped within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.cancel.cancel();
        self.tasks.close();
        let stopped = tokio::time::timeout(timeout, self.tasks.wait()).await.is_ok();
        if !stopped {
            warn!("Policy refresh loop did not stop in time");
        }

        let drained = match &self.audit {
            Some(audit) => audit.shutdown(timeout).await,
            None => true,
        };
        stopped && drained
    }
}
