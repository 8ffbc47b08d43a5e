use results_sqlite::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The target already has a pending or running session.
    #[error("scope target {0} already has an active auto-scan session")]
    Busy(Uuid),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl OrchestratorError {
    pub fn is_client_error(&self) -> bool {
        match self {
            OrchestratorError::Store(e) => e.is_client_error(),
            OrchestratorError::Busy(_) => true,
            OrchestratorError::Task(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
