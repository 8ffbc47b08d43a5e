use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the result store and session registry.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named row does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A write named a scope target other than the one that owns the row.
    #[error("session {session_id} belongs to scope target {expected}, not {got}")]
    ScopeMismatch { session_id: Uuid, expected: Uuid, got: Uuid },

    /// The request is well-formed but not acceptable in the row's current state.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// True for failures caused by the caller rather than by storage.
    pub fn is_client_error(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::ScopeMismatch { .. } | StoreError::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
