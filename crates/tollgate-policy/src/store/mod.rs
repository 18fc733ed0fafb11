//! SQLite-backed policy and audit state.

mod audit;
mod policies;
mod schema;

pub(crate) use policies::*;

use crate::error::StoreError;
use crate::license::LicenseLookup;
use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tollgate_core::LicenseTier;
use tracing::{info, warn};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Shared handle to the policy database. Cloning is cheap.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(schema::CREATE_TABLES)?;

        info!(path = %path.display(), "Opened policy database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::CREATE_TABLES)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Set a tenant's license tier
    pub fn set_license(&self, tenant_id: &str, tier: LicenseTier) -> StoreResult<()> {
        let conn = self.lock_conn();
        conn.execute(
            r#"
INSERT INTO tenant_licenses (tenant_id, tier, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(tenant_id) DO UPDATE SET tier = excluded.tier, updated_at = excluded.updated_at
            "#,
            rusqlite::params![tenant_id, tier.as_str(), Utc::now()],
        )?;
        Ok(())
    }

    /// Stored license tier, `None` when the tenant has none or it is unknown
    pub fn license_tier(&self, tenant_id: &str) -> StoreResult<Option<LicenseTier>> {
        let conn = self.lock_conn();
        let tier: Option<String> = conn
            .query_row(
                "SELECT tier FROM tenant_licenses WHERE tenant_id = ?1",
                rusqlite::params![tenant_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(tier.and_then(|t| match t.parse::<LicenseTier>() {
            Ok(tier) => Some(tier),
            Err(e) => {
                warn!(tenant_id, error = %e, "Ignoring unknown license tier");
                None
            }
        }))
    }

    /// Number of recorded violations for a policy code
    pub fn violation_count(&self, policy_id: &str) -> StoreResult<usize> {
        let conn = self.lock_conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM policy_violations WHERE policy_id = ?1",
            rusqlite::params![policy_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Total (hits, blocks) recorded for a policy across all days
    pub fn policy_hits(&self, policy_id: &str) -> StoreResult<(u64, u64)> {
        let conn = self.lock_conn();
        let (hits, blocks): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(hit_count), 0), COALESCE(SUM(block_count), 0) FROM policy_metrics WHERE policy_id = ?1",
            rusqlite::params![policy_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((hits as u64, blocks as u64))
    }

    /// Actions of the audit events recorded against a resource, oldest first
    pub fn audit_actions(&self, resource: &str) -> StoreResult<Vec<String>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT action FROM audit_events WHERE resource = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![resource], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl LicenseLookup for SqliteStore {
    fn license_tier(&self, tenant_id: &str) -> StoreResult<Option<LicenseTier>> {
        SqliteStore::license_tier(self, tenant_id)
    }
}
