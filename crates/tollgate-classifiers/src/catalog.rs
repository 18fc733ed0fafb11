//! The compiled pattern sets consulted by the evaluation pipeline

use crate::admin::admin_patterns;
use crate::pattern::PatternList;
use crate::pii::pii_patterns;
use crate::sqli::{threat_patterns, InjectionCategory};
use std::collections::BTreeMap;
use tollgate_core::Result;

/// Operator-facing pattern counts keyed by category, plus `total_patterns`
pub type PolicyStats = BTreeMap<String, usize>;

/// One immutable snapshot of every list the pipeline scans
#[derive(Debug, Clone, Default)]
pub struct PatternSets {
    /// SQL injection and dangerous-query patterns, scanned as one list
    pub threats: PatternList,
    /// Sensitive table/schema patterns, matched against the lower-cased query
    pub admin: PatternList,
    /// PII patterns, most specific first
    pub pii: PatternList,
}

impl PatternSets {
    /// Sets with no patterns at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in catalog
    pub fn builtin() -> Result<Self> {
        Ok(Self {
            threats: threat_patterns()?,
            admin: admin_patterns()?,
            pii: pii_patterns()?,
        })
    }

    pub fn total(&self) -> usize {
        self.threats.len() + self.admin.len() + self.pii.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn stats(&self) -> PolicyStats {
        let dangerous = self
            .threats
            .iter()
            .filter(|p| p.group() == InjectionCategory::DangerousQuery.as_str())
            .count();

        let mut stats = PolicyStats::new();
        stats.insert("sql_injection_patterns".to_string(), self.threats.len() - dangerous);
        stats.insert("dangerous_query_patterns".to_string(), dangerous);
        stats.insert("admin_access_patterns".to_string(), self.admin.len());
        stats.insert("pii_patterns".to_string(), self.pii.len());
        stats.insert("total_patterns".to_string(), self.total());
        stats
    }
}
