//! Tollgate Core
//!
//! Core types and utilities shared across Tollgate components.
//!
//! This crate provides:
//! - Error types and result handling
//! - Severity and override-action enumerations with their ordering
//! - Caller identity and license tiers
//! - The request-type allow-list

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    is_valid_request_type, LicenseTier, OverrideAction, ParseEnumError, Severity, User,
    ADMIN_PERMISSION, ALLOWED_REQUEST_TYPES,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{LicenseTier, OverrideAction, Severity, User};
}
