//! Tollgate Telemetry
//!
//! Audit trail and metrics for the Tollgate policy gateway.
//!
//! Provides:
//! - Checksummed audit entries for violations, policy hits and admin events
//! - A store-and-forward audit sink that never blocks evaluation
//! - A local fallback spool with replay on recovery
//! - Evaluation and refresh metrics

pub mod audit;
pub mod fallback;
pub mod metrics;
pub mod service;

pub use audit::{ActorKind, AuditEntry, AuditEvent, AuditRecord, PolicyHit, Violation};
pub use fallback::{FallbackContents, FallbackLog};
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use service::{
    AuditConfig, AuditMode, AuditSink, AuditStats, AuditStore, DeliveryState, RecoveryReport,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::audit::{ActorKind, AuditEvent, AuditRecord, PolicyHit, Violation};
    pub use crate::metrics::MetricsCollector;
    pub use crate::service::{AuditConfig, AuditMode, AuditSink, AuditStore};
}
