//! Policy, version and override rows.

use super::StoreResult;
use crate::error::StoreError;
use crate::model::{ChangeType, ListPoliciesParams, PolicyOverride, PolicyVersion, StaticPolicy};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row};
use tollgate_telemetry::AuditEvent;

const POLICY_COLUMNS: &str = "id, policy_id, name, category, pattern, severity, description, action, tier, \
     priority, enabled, organization_id, tenant_id, tags_json, metadata_json, version, \
     created_at, created_by, updated_at, updated_by, deleted_at, deleted_by";

/// Raw column values, converted outside the row callback so enum parse
/// failures surface as `StoreError::Corrupt`.
struct PolicyRow {
    id: String,
    policy_id: String,
    name: String,
    category: String,
    pattern: String,
    severity: String,
    description: String,
    action: String,
    tier: String,
    priority: i32,
    enabled: i64,
    organization_id: Option<String>,
    tenant_id: Option<String>,
    tags_json: String,
    metadata_json: String,
    version: i64,
    created_at: DateTime<Utc>,
    created_by: String,
    updated_at: DateTime<Utc>,
    updated_by: Option<String>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<String>,
}

impl PolicyRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            policy_id: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            pattern: row.get(4)?,
            severity: row.get(5)?,
            description: row.get(6)?,
            action: row.get(7)?,
            tier: row.get(8)?,
            priority: row.get(9)?,
            enabled: row.get(10)?,
            organization_id: row.get(11)?,
            tenant_id: row.get(12)?,
            tags_json: row.get(13)?,
            metadata_json: row.get(14)?,
            version: row.get(15)?,
            created_at: row.get(16)?,
            created_by: row.get(17)?,
            updated_at: row.get(18)?,
            updated_by: row.get(19)?,
            deleted_at: row.get(20)?,
            deleted_by: row.get(21)?,
        })
    }

    fn into_policy(self) -> StoreResult<StaticPolicy> {
        let corrupt = |e: tollgate_core::ParseEnumError| {
            StoreError::corrupt(format!("policy {}: {}", self.id, e))
        };
        Ok(StaticPolicy {
            category: self.category.parse().map_err(corrupt)?,
            severity: self.severity.parse().map_err(corrupt)?,
            action: self.action.parse().map_err(corrupt)?,
            tier: self.tier.parse().map_err(corrupt)?,
            tags: serde_json::from_str(&self.tags_json)?,
            metadata: serde_json::from_str(&self.metadata_json)?,
            enabled: self.enabled != 0,
            id: self.id,
            policy_id: self.policy_id,
            name: self.name,
            pattern: self.pattern,
            description: self.description,
            priority: self.priority,
            organization_id: self.organization_id,
            tenant_id: self.tenant_id,
            version: self.version,
            created_at: self.created_at,
            created_by: self.created_by,
            updated_at: self.updated_at,
            updated_by: self.updated_by,
            deleted_at: self.deleted_at,
            deleted_by: self.deleted_by,
        })
    }
}

fn collect_policies(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<StaticPolicy>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, PolicyRow::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_policy()?);
    }
    Ok(out)
}

pub(crate) fn insert_policy(conn: &Connection, policy: &StaticPolicy) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO policies ({POLICY_COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"
        ),
        rusqlite::params![
            policy.id,
            policy.policy_id,
            policy.name,
            policy.category.as_str(),
            policy.pattern,
            policy.severity.as_str(),
            policy.description,
            policy.action.as_str(),
            policy.tier.as_str(),
            policy.priority,
            policy.enabled as i64,
            policy.organization_id,
            policy.tenant_id,
            serde_json::to_string(&policy.tags)?,
            serde_json::to_string(&policy.metadata)?,
            policy.version,
            policy.created_at,
            policy.created_by,
            policy.updated_at,
            policy.updated_by,
            policy.deleted_at,
            policy.deleted_by,
        ],
    )?;
    Ok(())
}

/// Insert a system policy unless one with the same code exists
pub(crate) fn insert_policy_if_absent(conn: &Connection, policy: &StaticPolicy) -> StoreResult<bool> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM policies WHERE policy_id = ?1",
            rusqlite::params![policy.policy_id],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_some() {
        return Ok(false);
    }
    insert_policy(conn, policy)?;
    Ok(true)
}

/// Write every mutable column of an existing row
pub(crate) fn update_policy(conn: &Connection, policy: &StaticPolicy) -> StoreResult<()> {
    conn.execute(
        r#"
UPDATE policies
SET name = ?2,
    pattern = ?3,
    severity = ?4,
    description = ?5,
    action = ?6,
    priority = ?7,
    enabled = ?8,
    tags_json = ?9,
    metadata_json = ?10,
    version = ?11,
    updated_at = ?12,
    updated_by = ?13,
    deleted_at = ?14,
    deleted_by = ?15
WHERE id = ?1
        "#,
        rusqlite::params![
            policy.id,
            policy.name,
            policy.pattern,
            policy.severity.as_str(),
            policy.description,
            policy.action.as_str(),
            policy.priority,
            policy.enabled as i64,
            serde_json::to_string(&policy.tags)?,
            serde_json::to_string(&policy.metadata)?,
            policy.version,
            policy.updated_at,
            policy.updated_by,
            policy.deleted_at,
            policy.deleted_by,
        ],
    )?;
    Ok(())
}

/// Look a policy up by internal id or code, deleted rows included
pub(crate) fn find_policy(conn: &Connection, id_or_code: &str) -> StoreResult<Option<StaticPolicy>> {
    let mut found = collect_policies(
        conn,
        &format!("SELECT {POLICY_COLUMNS} FROM policies WHERE id = ?1 OR policy_id = ?1 LIMIT 1"),
        rusqlite::params![id_or_code],
    )?;
    Ok(found.pop())
}

/// Live tenant-tier policies owned by a tenant
pub(crate) fn count_tenant_policies(conn: &Connection, tenant_id: &str) -> StoreResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM policies WHERE tier = 'tenant' AND tenant_id = ?1 AND deleted_at IS NULL",
        rusqlite::params![tenant_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Every enabled, live policy across all tiers, in insertion order within a
/// priority so equal-priority patterns keep their catalog order
pub(crate) fn load_enabled_policies(conn: &Connection) -> StoreResult<Vec<StaticPolicy>> {
    collect_policies(
        conn,
        &format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE enabled = 1 AND deleted_at IS NULL \
             ORDER BY priority DESC, rowid ASC"
        ),
        [],
    )
}

/// Live policies visible to a tenant: system, its organization's, and its own
pub(crate) fn visible_policies(
    conn: &Connection,
    tenant_id: &str,
    organization_id: Option<&str>,
) -> StoreResult<Vec<StaticPolicy>> {
    collect_policies(
        conn,
        &format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE deleted_at IS NULL AND ( \
               tier = 'system' \
               OR (tier = 'tenant' AND tenant_id = ?1) \
               OR (tier = 'organization' AND organization_id IS NOT NULL AND organization_id = ?2)) \
             ORDER BY priority DESC, name ASC"
        ),
        rusqlite::params![tenant_id, organization_id],
    )
}

/// One filtered page of the policies visible to a tenant, plus the total
pub(crate) fn list_policies(
    conn: &Connection,
    tenant_id: &str,
    organization_id: Option<&str>,
    params: &ListPoliciesParams,
) -> StoreResult<(Vec<StaticPolicy>, usize)> {
    let mut clauses = vec![
        "(tier = 'system' OR (tier = 'tenant' AND tenant_id = ?) \
          OR (tier = 'organization' AND organization_id IS NOT NULL AND organization_id = ?))"
            .to_string(),
    ];
    let mut values: Vec<Value> = vec![
        Value::Text(tenant_id.to_string()),
        organization_id.map_or(Value::Null, |o| Value::Text(o.to_string())),
    ];

    if !params.include_deleted {
        clauses.push("deleted_at IS NULL".to_string());
    }
    if let Some(tier) = params.tier {
        clauses.push("tier = ?".to_string());
        values.push(Value::Text(tier.as_str().to_string()));
    }
    if let Some(category) = params.category {
        clauses.push("category = ?".to_string());
        values.push(Value::Text(category.as_str().to_string()));
    }
    if let Some(enabled) = params.enabled {
        clauses.push("enabled = ?".to_string());
        values.push(Value::Integer(enabled as i64));
    }
    if let Some(search) = params.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push(
            "(LOWER(name) LIKE ? OR LOWER(description) LIKE ? OR LOWER(policy_id) LIKE ?)".to_string(),
        );
        let like = format!("%{}%", search.to_lowercase());
        for _ in 0..3 {
            values.push(Value::Text(like.clone()));
        }
    }

    let where_clause = clauses.join(" AND ");

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM policies WHERE {where_clause}"),
        rusqlite::params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    values.push(Value::Integer(params.page_size as i64));
    values.push(Value::Integer(params.offset() as i64));
    let policies = collect_policies(
        conn,
        &format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE {where_clause} \
             ORDER BY priority DESC, name ASC LIMIT ? OFFSET ?"
        ),
        rusqlite::params_from_iter(values.iter()),
    )?;

    Ok((policies, total as usize))
}

pub(crate) fn insert_version(conn: &Connection, version: &PolicyVersion) -> StoreResult<()> {
    conn.execute(
        r#"
INSERT INTO policy_versions (policy_id, version, snapshot_json, change_type, change_summary, changed_by, changed_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        rusqlite::params![
            version.policy_id,
            version.version,
            serde_json::to_string(&version.snapshot)?,
            version.change_type.as_str(),
            version.change_summary,
            version.changed_by,
            version.changed_at,
        ],
    )?;
    Ok(())
}

/// Version history, newest first
pub(crate) fn list_versions(
    conn: &Connection,
    policy_id: &str,
    limit: Option<usize>,
) -> StoreResult<Vec<PolicyVersion>> {
    let limit = limit.map_or(-1, |l| l as i64);
    let mut stmt = conn.prepare(
        r#"
SELECT policy_id, version, snapshot_json, change_type, change_summary, changed_by, changed_at
FROM policy_versions
WHERE policy_id = ?1
ORDER BY version DESC
LIMIT ?2
        "#,
    )?;
    let rows = stmt.query_map(rusqlite::params![policy_id, limit], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, DateTime<Utc>>(6)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (policy_id, version, snapshot_json, change_type, change_summary, changed_by, changed_at) =
            row?;
        out.push(PolicyVersion {
            change_type: change_type
                .parse::<ChangeType>()
                .map_err(|e| StoreError::corrupt(format!("version {policy_id}@{version}: {e}")))?,
            snapshot: serde_json::from_str(&snapshot_json)?,
            policy_id,
            version,
            change_summary,
            changed_by,
            changed_at,
        });
    }
    Ok(out)
}

fn override_from_row(row: &Row<'_>) -> rusqlite::Result<(PolicyOverride, Option<String>)> {
    let enabled: Option<i64> = row.get(5)?;
    Ok((
        PolicyOverride {
            id: row.get(0)?,
            policy_id: row.get(1)?,
            organization_id: row.get(2)?,
            tenant_id: row.get(3)?,
            action: None,
            enabled: enabled.map(|e| e != 0),
            reason: row.get(6)?,
            expires_at: row.get(7)?,
            created_by: row.get(8)?,
            created_at: row.get(9)?,
        },
        row.get(4)?,
    ))
}

const OVERRIDE_COLUMNS: &str =
    "id, policy_id, organization_id, tenant_id, action, enabled, reason, expires_at, created_by, created_at";

fn collect_overrides(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<PolicyOverride>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, override_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        let (mut o, action) = row?;
        o.action = action
            .map(|a| a.parse())
            .transpose()
            .map_err(|e| StoreError::corrupt(format!("override {}: {}", o.id, e)))?;
        out.push(o);
    }
    Ok(out)
}

/// Replace any override for the same policy and target, then insert
pub(crate) fn upsert_override(conn: &Connection, o: &PolicyOverride) -> StoreResult<()> {
    match &o.tenant_id {
        Some(tenant_id) => conn.execute(
            "DELETE FROM policy_overrides WHERE policy_id = ?1 AND tenant_id = ?2",
            rusqlite::params![o.policy_id, tenant_id],
        )?,
        None => conn.execute(
            "DELETE FROM policy_overrides WHERE policy_id = ?1 AND tenant_id IS NULL AND organization_id = ?2",
            rusqlite::params![o.policy_id, o.organization_id],
        )?,
    };

    conn.execute(
        &format!("INSERT INTO policy_overrides ({OVERRIDE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        rusqlite::params![
            o.id,
            o.policy_id,
            o.organization_id,
            o.tenant_id,
            o.action.map(|a| a.as_str()),
            o.enabled.map(|e| e as i64),
            o.reason,
            o.expires_at,
            o.created_by,
            o.created_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn find_override(conn: &Connection, id: &str) -> StoreResult<Option<PolicyOverride>> {
    let mut found = collect_overrides(
        conn,
        &format!("SELECT {OVERRIDE_COLUMNS} FROM policy_overrides WHERE id = ?1"),
        rusqlite::params![id],
    )?;
    Ok(found.pop())
}

pub(crate) fn delete_override(conn: &Connection, id: &str) -> StoreResult<bool> {
    let changed = conn.execute(
        "DELETE FROM policy_overrides WHERE id = ?1",
        rusqlite::params![id],
    )?;
    Ok(changed > 0)
}

/// Overrides targeting a tenant or its organization, expired ones included
pub(crate) fn overrides_for(
    conn: &Connection,
    tenant_id: &str,
    organization_id: Option<&str>,
) -> StoreResult<Vec<PolicyOverride>> {
    collect_overrides(
        conn,
        &format!(
            "SELECT {OVERRIDE_COLUMNS} FROM policy_overrides \
             WHERE tenant_id = ?1 OR (tenant_id IS NULL AND organization_id IS NOT NULL AND organization_id = ?2)"
        ),
        rusqlite::params![tenant_id, organization_id],
    )
}

pub(crate) fn insert_audit_event(
    conn: &Connection,
    id: &str,
    event: &AuditEvent,
    at: DateTime<Utc>,
) -> StoreResult<()> {
    conn.execute(
        r#"
INSERT OR IGNORE INTO audit_events (id, actor_kind, actor_id, action, resource, details_json, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        rusqlite::params![
            id,
            event.actor_kind.as_str(),
            event.actor_id,
            event.action,
            event.resource,
            serde_json::to_string(&event.details)?,
            at,
        ],
    )?;
    Ok(())
}

