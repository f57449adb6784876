//! Error taxonomy for the orchestration engine (§7 of the design).
//!
//! Config-acquisition failures are the only errors the engine surfaces as a
//! typed `Result`; everything a handler encounters is captured into a
//! `HandlerResult` instead (see [`crate::model::HandlerResult`]) and never
//! propagated as a Rust error.

use thiserror::Error;

/// Failure while acquiring or validating a named configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The named parameter does not exist in the parameter store.
    #[error("parameter '{name}' not found")]
    ParameterNotFound { name: String },

    /// The parameter exists but the fetch failed, the value was empty, or
    /// the value could not be parsed as a structured document.
    #[error("failed to load config '{name}': {reason}")]
    LoadFailed { name: String, reason: String },

    /// The document parsed but failed schema validation.
    #[error("config '{name}' failed validation: field '{field}': {reason}")]
    ConfigValidationError {
        name: String,
        field: String,
        reason: String,
    },
}

/// Sentinel strings carried in [`crate::model::HandlerResult::error`] for the
/// two per-resource failure modes that never reach a handler at all.
pub mod sentinel {
    pub const HANDLER_NOT_FOUND: &str = "HANDLER_NOT_FOUND";
    pub const INVALID_ACTION: &str = "INVALID_ACTION";
}
