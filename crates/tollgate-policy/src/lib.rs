//! Tollgate Policy Engine
//!
//! Tiered policy storage and the static evaluation pipeline that enforces it.
//!
//! Policies live in three tiers:
//! - `system`: the built-in catalog, seeded at startup and read-only
//! - `organization`: shared by an enterprise organization's tenants
//! - `tenant`: a single tenant's own patterns, subject to a quota
//!
//! The [`ManagedPolicyEngine`] compiles the enabled policies into immutable
//! pattern sets, swaps them in atomically on refresh, and reports
//! violations to the audit sink without ever blocking an evaluation.

pub mod compile;
pub mod engine;
pub mod error;
pub mod hitl;
pub mod license;
pub mod managed;
pub mod model;
pub mod repository;
pub mod seed;
pub mod store;

pub use compile::CompiledPolicies;
pub use engine::{
    evaluate_query, PipelineOptions, StaticPolicyEngine, StaticPolicyResult, TriggeredPolicy,
};
pub use error::{PolicyError, PolicyResult, StoreError};
pub use hitl::{ApprovalRequest, ApprovalService, ApprovalStatus, ApprovalTrigger, AutoApprove};
pub use license::{is_enterprise, LicenseLookup};
pub use managed::{EngineConfig, EngineStats, ManagedPolicyEngine, PolicySource, RefreshSummary};
pub use model::{
    ChangeType, CreateOverrideRequest, CreatePolicyRequest, EffectiveStaticPolicy,
    ListPoliciesParams, OverrideScope, PolicyCategory, PolicyOverride, PolicyPage, PolicyTier,
    PolicyVersion, StaticPolicy, TenantContext, UpdatePolicyRequest,
};
pub use repository::{PolicyRepository, RepositoryLimits};
pub use seed::seed_system_policies;
pub use store::SqliteStore;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::engine::{PipelineOptions, StaticPolicyEngine, StaticPolicyResult};
    pub use crate::managed::{EngineConfig, ManagedPolicyEngine, PolicySource};
    pub use crate::model::{CreatePolicyRequest, PolicyCategory, PolicyTier, TenantContext};
    pub use crate::repository::PolicyRepository;
    pub use crate::store::SqliteStore;
}
