//! Durable side of the audit sink.

use super::{insert_audit_event, SqliteStore, StoreResult};
use async_trait::async_trait;
use tollgate_telemetry::{AuditEntry, AuditRecord, AuditStore};

impl SqliteStore {
    /// Apply one audit entry. Entries already in the ledger are skipped, so
    /// replaying the fallback file never double-counts a hit.
    pub fn apply_audit_entry(&self, entry: &AuditEntry) -> StoreResult<()> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;

        let fresh = tx.execute(
            "INSERT OR IGNORE INTO audit_ledger (entry_id, kind, checksum, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![entry.id, entry.record.kind(), entry.checksum, entry.timestamp],
        )?;
        if fresh == 0 {
            return Ok(());
        }

        match &entry.record {
            AuditRecord::Violation(v) => {
                tx.execute(
                    r#"
INSERT INTO policy_violations
    (id, violation_type, policy_id, policy_name, severity, actor_kind, actor_id, client_id, description, details_json, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    "#,
                    rusqlite::params![
                        entry.id,
                        v.violation_type,
                        v.policy_id,
                        v.policy_name,
                        v.severity.as_str(),
                        v.actor_kind.as_str(),
                        v.actor_id,
                        v.client_id,
                        v.description,
                        serde_json::to_string(&v.details)?,
                        entry.timestamp,
                    ],
                )?;
            }
            AuditRecord::PolicyHit(hit) => {
                let date = entry.timestamp.format("%Y-%m-%d").to_string();
                tx.execute(
                    r#"
INSERT INTO policy_metrics (policy_id, policy_type, date, hit_count, block_count)
VALUES (?1, ?2, ?3, 1, ?4)
ON CONFLICT(policy_id, date) DO UPDATE SET
    hit_count = hit_count + 1,
    block_count = block_count + excluded.block_count
                    "#,
                    rusqlite::params![hit.policy_id, hit.policy_type, date, hit.blocked as i64],
                )?;
            }
            AuditRecord::Event(event) => {
                insert_audit_event(&tx, &entry.id, event, entry.timestamp)?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn persist(&self, entry: &AuditEntry) -> tollgate_core::Result<()> {
        let store = self.clone();
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || store.apply_audit_entry(&entry))
            .await
            .map_err(|e| tollgate_core::Error::storage(format!("audit write task failed: {e}")))?
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::Severity;
    use tollgate_telemetry::{ActorKind, AuditEvent, PolicyHit, Violation};

    fn hit(blocked: bool) -> AuditEntry {
        AuditEntry::new(AuditRecord::PolicyHit(PolicyHit {
            policy_id: "ssn_detection".to_string(),
            policy_type: "static".to_string(),
            blocked,
        }))
    }

    #[test]
    fn test_hits_accumulate_per_day() {
        let store = SqliteStore::in_memory().unwrap();
        store.apply_audit_entry(&hit(true)).unwrap();
        store.apply_audit_entry(&hit(false)).unwrap();
        store.apply_audit_entry(&hit(true)).unwrap();

        assert_eq!(store.policy_hits("ssn_detection").unwrap(), (3, 2));
    }

    #[test]
    fn test_replayed_entry_is_applied_once() {
        let store = SqliteStore::in_memory().unwrap();
        let entry = hit(true);
        store.apply_audit_entry(&entry).unwrap();
        store.apply_audit_entry(&entry).unwrap();

        assert_eq!(store.policy_hits("ssn_detection").unwrap(), (1, 1));
    }

    #[test]
    fn test_violation_and_event_rows() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .apply_audit_entry(&AuditEntry::new(AuditRecord::Violation(Violation {
                violation_type: "threat_scan".to_string(),
                policy_id: "sqli_union_select".to_string(),
                policy_name: "SQL injection: UNION SELECT".to_string(),
                severity: Severity::Critical,
                actor_kind: ActorKind::User,
                actor_id: "u1".to_string(),
                client_id: None,
                description: "blocked".to_string(),
                details: serde_json::Value::Null,
            })))
            .unwrap();
        store
            .apply_audit_entry(&AuditEntry::new(AuditRecord::Event(AuditEvent::new(
                ActorKind::System,
                "tollgate",
                "policy.refresh",
                "policies",
            ))))
            .unwrap();

        assert_eq!(store.violation_count("sqli_union_select").unwrap(), 1);
        assert_eq!(store.audit_actions("policies").unwrap(), vec!["policy.refresh"]);
    }

    #[tokio::test]
    async fn test_persist_through_trait() {
        let store = SqliteStore::in_memory().unwrap();
        let sink_store: &dyn AuditStore = &store;
        sink_store.persist(&hit(false)).await.unwrap();
        assert_eq!(store.policy_hits("ssn_detection").unwrap(), (1, 0));
    }
}
