//! Typed failures surfaced by the entity engine.
//!
//! Every failure crossing the engine boundary is one of these kinds; nothing
//! is thrown past the caller as an opaque error. Each kind carries a stable
//! code string for the transport layer plus a human-readable message via
//! Display.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("actor '{actor}' lacks permission '{permission}'")]
    PermissionDenied { actor: String, permission: String },

    #[error("validation failed on field '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("missing required field '{0}'")]
    MissingRequiredField(String),

    #[error("no updatable fields in payload")]
    NoUpdatableFields,

    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::UnknownEntity(_) => "unknown_entity",
            EngineError::PermissionDenied { .. } => "permission_denied",
            EngineError::Validation { .. } => "validation_error",
            EngineError::NotFound { .. } => "not_found",
            EngineError::MissingRequiredField(_) => "missing_required_field",
            EngineError::NoUpdatableFields => "no_updatable_fields",
            EngineError::Storage(_) => "storage_failure",
        }
    }

    /// Wrap a connector-level error. Not retried by the engine; the caller
    /// decides whether to resubmit.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        EngineError::Storage(err.to_string())
    }

    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        EngineError::Validation { field: field.to_string(), reason: reason.into() }
    }
}
