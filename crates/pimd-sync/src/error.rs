use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("sync canceled by caller")]
    UserCanceled,
}
