//! Domain error conditions callers need to tell apart.
//!
//! Library operations return `anyhow::Result`; these variants travel inside
//! the `anyhow::Error` and can be recovered with `downcast_ref::<MemoryError>()`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Use --confirm to apply mutation {0}")]
    ConfirmationRequired(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl MemoryError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }
}

/// True when `err` carries a `MemoryError::NotFound`.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<MemoryError>(), Some(MemoryError::NotFound { .. }))
}
