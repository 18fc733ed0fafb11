//! SQLite schema for policy state and the audit trail.

pub const CREATE_TABLES: &str = r#"
-- Static policies (all tiers)
CREATE TABLE IF NOT EXISTS policies (
    id TEXT PRIMARY KEY,
    policy_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    pattern TEXT NOT NULL,
    severity TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    action TEXT NOT NULL,
    tier TEXT NOT NULL,
    priority INTEGER NOT NULL,
    enabled INTEGER NOT NULL,
    organization_id TEXT,
    tenant_id TEXT,
    tags_json TEXT NOT NULL DEFAULT '[]',
    metadata_json TEXT NOT NULL DEFAULT '{}',
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    updated_by TEXT,
    deleted_at TEXT,
    deleted_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_policies_tier ON policies(tier);
CREATE INDEX IF NOT EXISTS idx_policies_tenant ON policies(tenant_id);
CREATE INDEX IF NOT EXISTS idx_policies_org ON policies(organization_id);

-- Full snapshot per version
CREATE TABLE IF NOT EXISTS policy_versions (
    policy_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    snapshot_json TEXT NOT NULL,
    change_type TEXT NOT NULL,
    change_summary TEXT NOT NULL,
    changed_by TEXT NOT NULL,
    changed_at TEXT NOT NULL,
    PRIMARY KEY (policy_id, version)
);

-- Tenant / organization overrides
CREATE TABLE IF NOT EXISTS policy_overrides (
    id TEXT PRIMARY KEY,
    policy_id TEXT NOT NULL,
    organization_id TEXT,
    tenant_id TEXT,
    action TEXT,
    enabled INTEGER,
    reason TEXT NOT NULL,
    expires_at TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_overrides_policy ON policy_overrides(policy_id);
CREATE INDEX IF NOT EXISTS idx_overrides_tenant ON policy_overrides(tenant_id);
CREATE INDEX IF NOT EXISTS idx_overrides_org ON policy_overrides(organization_id);

-- License tier per tenant
CREATE TABLE IF NOT EXISTS tenant_licenses (
    tenant_id TEXT PRIMARY KEY,
    tier TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Applied audit entries, so a replayed entry is only applied once
CREATE TABLE IF NOT EXISTS audit_ledger (
    entry_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    checksum TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS policy_violations (
    id TEXT PRIMARY KEY,
    violation_type TEXT NOT NULL,
    policy_id TEXT NOT NULL,
    policy_name TEXT NOT NULL,
    severity TEXT NOT NULL,
    actor_kind TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    client_id TEXT,
    description TEXT NOT NULL,
    details_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_violations_policy ON policy_violations(policy_id);
CREATE INDEX IF NOT EXISTS idx_violations_created ON policy_violations(created_at);

-- Daily hit counters
CREATE TABLE IF NOT EXISTS policy_metrics (
    policy_id TEXT NOT NULL,
    policy_type TEXT NOT NULL,
    date TEXT NOT NULL,
    hit_count INTEGER NOT NULL DEFAULT 0,
    block_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (policy_id, date)
);

CREATE TABLE IF NOT EXISTS audit_events (
    id TEXT PRIMARY KEY,
    actor_kind TEXT NOT NULL,
    actor_id TEXT NOT NULL,
    action TEXT NOT NULL,
    resource TEXT NOT NULL,
    details_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_events_resource ON audit_events(resource);
"#;
