//! License tier lookup

use crate::store::StoreResult;
use tollgate_core::LicenseTier;
use tracing::warn;

/// Resolves a tenant's current license tier
pub trait LicenseLookup: Send + Sync {
    /// `Ok(None)` when the tenant has no license on record
    fn license_tier(&self, tenant_id: &str) -> StoreResult<Option<LicenseTier>>;
}

/// Whether the tenant holds an enterprise-grade license.
///
/// Resolved on every call. A missing tier or a failed lookup counts as
/// non-enterprise.
pub fn is_enterprise(lookup: &dyn LicenseLookup, tenant_id: &str) -> bool {
    match lookup.license_tier(tenant_id) {
        Ok(Some(tier)) => tier.is_enterprise(),
        Ok(None) => false,
        Err(e) => {
            warn!(tenant_id, error = %e, "License lookup failed, treating tenant as non-enterprise");
            false
        }
    }
}
