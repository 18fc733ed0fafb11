//! Agent configuration
//!
//! Loaded from YAML, then overlaid by environment variables and finally by
//! command-line flags.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tollgate_policy::{EngineConfig, PipelineOptions, RepositoryLimits};
use tollgate_telemetry::{AuditConfig, AuditMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// SQLite database holding policies, licenses and audit tables
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Block critical PII instead of only recording it
    #[serde(default = "default_true")]
    pub pii_block_critical: bool,

    #[serde(default = "default_tenant_policy_limit")]
    pub tenant_policy_limit: usize,

    #[serde(default = "default_version_history_limit")]
    pub version_history_limit: usize,

    /// Address for the Prometheus scrape endpoint. Disabled when unset.
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,

    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            refresh_interval_secs: default_refresh_interval(),
            pii_block_critical: true,
            tenant_policy_limit: default_tenant_policy_limit(),
            version_history_limit: default_version_history_limit(),
            metrics_listen: None,
            audit: AuditConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load from file (defaults if it does not exist) and apply the process
    /// environment
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay environment variables read through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("TOLLGATE_DATABASE_PATH").filter(|p| !p.is_empty()) {
            self.database_path = PathBuf::from(path);
        }

        if let Some(secs) = var("TOLLGATE_REFRESH_INTERVAL_SECS").and_then(|s| s.trim().parse().ok()) {
            self.refresh_interval_secs = secs;
        }

        if let Some(flag) = var("PII_BLOCK_CRITICAL") {
            self.pii_block_critical = !matches!(flag.trim(), "false" | "0");
        }

        if var("AGENT_PERFORMANCE_MODE").is_some_and(|v| v.trim() == "true") {
            self.audit.mode = AuditMode::Performance;
        }

        if let Some(path) = var("AUDIT_FALLBACK_PATH").filter(|p| !p.is_empty()) {
            self.audit.fallback_path = PathBuf::from(path);
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            refresh_interval_secs: self.refresh_interval_secs,
            pipeline: PipelineOptions {
                block_critical_pii: self.pii_block_critical,
            },
        }
    }

    pub fn limits(&self) -> RepositoryLimits {
        RepositoryLimits {
            tenant_policy_limit: self.tenant_policy_limit,
            version_history_limit: self.version_history_limit,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/tollgate.db")
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_tenant_policy_limit() -> usize {
    30
}

fn default_version_history_limit() -> usize {
    5
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.database_path, PathBuf::from("./data/tollgate.db"));
        assert_eq!(config.refresh_interval_secs, 60);
        assert!(config.pii_block_critical);
        assert_eq!(config.limits().tenant_policy_limit, 30);
        assert_eq!(config.limits().version_history_limit, 5);
        assert_eq!(config.audit.mode, AuditMode::Compliance);
        assert_eq!(config.audit.queue_capacity, 10_000);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: AgentConfig = serde_yaml::from_str(
            "refresh_interval_secs: 15\naudit:\n  mode: performance\n  workers: 8\n",
        )
        .unwrap();
        assert_eq!(config.refresh_interval_secs, 15);
        assert_eq!(config.audit.mode, AuditMode::Performance);
        assert_eq!(config.audit.workers, 8);
        assert_eq!(config.audit.max_attempts, AuditConfig::default().max_attempts);
        assert!(config.pii_block_critical);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AgentConfig::default();
        config.apply_env(env(&[
            ("TOLLGATE_DATABASE_PATH", "/srv/tollgate/policies.db"),
            ("TOLLGATE_REFRESH_INTERVAL_SECS", "5"),
            ("PII_BLOCK_CRITICAL", "0"),
            ("AGENT_PERFORMANCE_MODE", "true"),
            ("AUDIT_FALLBACK_PATH", "/tmp/audit.jsonl"),
        ]));

        assert_eq!(config.database_path, PathBuf::from("/srv/tollgate/policies.db"));
        assert_eq!(config.refresh_interval_secs, 5);
        assert!(!config.engine().pipeline.block_critical_pii);
        assert_eq!(config.audit.mode, AuditMode::Performance);
        assert_eq!(config.audit.fallback_path, PathBuf::from("/tmp/audit.jsonl"));
    }

    #[test]
    fn test_pii_flag_parsing() {
        for (value, expected) in [("false", false), ("0", false), ("true", true), ("yes", true), ("", true)] {
            let mut config = AgentConfig::default();
            config.apply_env(env(&[("PII_BLOCK_CRITICAL", value)]));
            assert_eq!(config.pii_block_critical, expected, "value: {value:?}");
        }
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = AgentConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.tenant_policy_limit, 30);
    }
}
