//! Managed engine lifecycle: loading, refresh failures, and auditing

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tollgate_core::{Error, LicenseTier, Severity, User};
use tollgate_policy::seed::system_policies;
use tollgate_policy::{
    seed_system_policies, CreatePolicyRequest, EngineConfig, ManagedPolicyEngine, PolicyRepository,
    PolicySource, SqliteStore, StaticPolicy, TenantContext,
};
use tollgate_telemetry::{AuditConfig, AuditSink};

/// Serves the system catalog until told to fail
struct FlakySource {
    down: AtomicBool,
}

impl FlakySource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            down: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl PolicySource for FlakySource {
    async fn load_policies(&self) -> tollgate_core::Result<Vec<StaticPolicy>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::storage("database is locked"));
        }
        Ok(system_policies())
    }
}

fn analyst() -> User {
    User::new("u-1", "analyst")
}

#[tokio::test]
async fn failed_refresh_keeps_last_known_good() {
    let source = FlakySource::new();
    let engine = ManagedPolicyEngine::new(source.clone(), EngineConfig::default());
    engine.initialize().await.unwrap();
    let loaded_at = engine.snapshot().loaded_at;

    source.down.store(true, Ordering::SeqCst);
    assert!(engine.refresh().await.is_err());

    assert_eq!(engine.snapshot().loaded_at, loaded_at);
    let result = engine.evaluate(&analyst(), "SELECT * FROM a UNION SELECT * FROM b", "sql");
    assert!(result.blocked);

    let stats = engine.stats();
    assert_eq!(stats.metrics.refreshes, 1);
    assert_eq!(stats.metrics.refresh_failures, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_default_loads_install_once() {
    let source = FlakySource::new();
    source.down.store(true, Ordering::SeqCst);
    let engine = Arc::new(ManagedPolicyEngine::new(source, EngineConfig::default()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.load_default_policies().unwrap() })
        })
        .collect();

    let mut installed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            installed += 1;
        }
    }
    assert_eq!(installed, 1);
    assert_eq!(engine.policy_stats().get("total_patterns"), Some(&engine.snapshot().compiled));
}

#[tokio::test]
async fn tenant_policies_apply_only_to_their_tenant() {
    let store = SqliteStore::in_memory().unwrap();
    seed_system_policies(&store).unwrap();
    let repo = PolicyRepository::new(store);
    repo.create(
        &TenantContext::new("acme", "alice"),
        CreatePolicyRequest {
            name: "Employee ids".to_string(),
            category: "pii-us".to_string(),
            pattern: r"\bEMP-\d{6}\b".to_string(),
            severity: Some(Severity::Critical),
            description: "Employee identifier detected".to_string(),
            action: "block".to_string(),
            tier: "tenant".to_string(),
            ..Default::default()
        },
    )
    .unwrap();

    let engine = ManagedPolicyEngine::new(Arc::new(repo), EngineConfig::default());
    let summary = engine.refresh().await.unwrap();
    assert_eq!(summary.tenants, 1);

    let query = "show the badge log for EMP-123456";
    let acme = engine.evaluate(&analyst().with_tenant("acme"), query, "chat");
    assert!(acme.blocked);
    assert_eq!(acme.reason.as_deref(), Some("Employee identifier detected"));

    let globex = engine.evaluate(&analyst().with_tenant("globex"), query, "chat");
    assert!(!globex.blocked);
}

#[tokio::test]
async fn tenant_log_policy_cannot_disable_system_rules() {
    let store = SqliteStore::in_memory().unwrap();
    seed_system_policies(&store).unwrap();
    let repo = PolicyRepository::new(store);
    let acme = TenantContext::new("acme", "alice");
    for (category, pattern) in [("security-sqli", "select"), ("pii-us", "ssn")] {
        repo.create(
            &acme,
            CreatePolicyRequest {
                name: format!("Catch-all {category}"),
                category: category.to_string(),
                pattern: pattern.to_string(),
                severity: Some(Severity::Low),
                action: "log".to_string(),
                tier: "tenant".to_string(),
                priority: Some(1000),
                ..Default::default()
            },
        )
        .unwrap();
    }

    let engine = ManagedPolicyEngine::new(Arc::new(repo), EngineConfig::default());
    engine.refresh().await.unwrap();
    let user = analyst().with_tenant("acme");

    let union = engine.evaluate(&user, "SELECT * FROM products UNION SELECT password FROM accounts", "sql");
    assert!(union.blocked);
    assert_eq!(union.blocking_policy().unwrap().id, "sqli_union_select");

    let ssn = engine.evaluate(&user, "my ssn is 123-45-6789", "chat");
    assert!(ssn.blocked);
    assert_eq!(ssn.blocking_policy().unwrap().id, "ssn_detection");
}

#[tokio::test]
async fn org_policies_reach_tenants_with_their_own_policies() {
    let store = SqliteStore::in_memory().unwrap();
    seed_system_policies(&store).unwrap();
    store.set_license("acme", LicenseTier::Enterprise).unwrap();
    let repo = PolicyRepository::new(store);

    repo.create(
        &TenantContext::new("acme", "alice").with_organization("o1"),
        CreatePolicyRequest {
            name: "Payroll data".to_string(),
            category: "security-admin".to_string(),
            pattern: r"\bpayroll\b".to_string(),
            severity: Some(Severity::High),
            description: "Payroll tables".to_string(),
            action: "block".to_string(),
            tier: "organization".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    // Created without an organization context
    repo.create(
        &TenantContext::new("acme", "alice"),
        CreatePolicyRequest {
            name: "Employee ids".to_string(),
            category: "pii-us".to_string(),
            pattern: r"\bEMP-\d{6}\b".to_string(),
            severity: Some(Severity::Medium),
            action: "log".to_string(),
            tier: "tenant".to_string(),
            ..Default::default()
        },
    )
    .unwrap();

    let engine = ManagedPolicyEngine::new(Arc::new(repo), EngineConfig::default());
    engine.refresh().await.unwrap();

    let query = "show payroll totals by department";
    let acme = engine.evaluate(&analyst().with_tenant("acme").with_organization("o1"), query, "chat");
    assert!(acme.blocked);
    assert_eq!(acme.reason.as_deref(), Some("Administrative access required: Payroll tables"));

    let sibling = engine.evaluate(&analyst().with_tenant("t9").with_organization("o1"), query, "chat");
    assert!(sibling.blocked);

    let outsider = engine.evaluate(&analyst().with_tenant("t9"), query, "chat");
    assert!(!outsider.blocked);
}

#[tokio::test]
async fn violations_reach_the_store() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("tollgate.db")).unwrap();
    seed_system_policies(&store).unwrap();

    let audit = AuditSink::new(
        Arc::new(store.clone()),
        AuditConfig {
            fallback_path: dir.path().join("audit_fallback.jsonl"),
            ..Default::default()
        },
    )
    .unwrap();
    let engine = ManagedPolicyEngine::new(Arc::new(PolicyRepository::new(store.clone())), EngineConfig::default())
        .with_audit(audit);
    engine.initialize().await.unwrap();

    let result = engine.evaluate(&analyst(), "1; DROP TABLE invoices", "sql");
    assert!(result.blocked);
    let policy_id = result.blocking_policy().unwrap().id.clone();

    let clean = engine.evaluate(&analyst(), "SELECT total FROM invoices WHERE id = 9", "sql");
    assert!(!clean.blocked);
    assert!(!clean.triggered());

    assert!(engine.shutdown(Duration::from_secs(5)).await);

    assert_eq!(store.violation_count(&policy_id).unwrap(), 1);
    assert_eq!(store.policy_hits(&policy_id).unwrap(), (1, 1));

    let stats = engine.stats();
    assert_eq!(stats.metrics.evaluations, 2);
    assert_eq!(stats.metrics.blocked, 1);
    let audit = stats.audit.unwrap();
    assert_eq!(audit.pending, 0);
    assert_eq!(audit.failed, 0);
}

#[tokio::test(start_paused = true)]
async fn refresh_loop_picks_up_changes_and_stops() {
    let source = FlakySource::new();
    source.down.store(true, Ordering::SeqCst);
    let engine = Arc::new(ManagedPolicyEngine::new(
        source.clone(),
        EngineConfig {
            refresh_interval_secs: 1,
            ..Default::default()
        },
    ));
    engine.start();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(engine.snapshot().is_empty());

    source.down.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!engine.snapshot().is_empty());

    assert!(engine.shutdown(Duration::from_secs(1)).await);
}
