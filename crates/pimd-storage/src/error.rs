use pimd_core::{ErrorCategory, IntoPimError, PimError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Query(#[from] pimd_query::QueryError),

    #[error(transparent)]
    Model(#[from] pimd_model::ModelError),

    #[error("row decode error: {0}")]
    Row(#[from] sqlx::Error),

    #[error("entity {kind} {id} was not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("unique constraint violated inserting {kind}")]
    Conflict { kind: &'static str },

    #[error("moving collection {id} under {new_parent} would create a cycle")]
    CyclicMove { id: i64, new_parent: i64 },

    #[error("external payload io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoPimError for StorageError {
    fn into_pim_error(self) -> PimError {
        match self {
            StorageError::Query(err) => err.into_pim_error(),
            StorageError::Model(err) => err.into_pim_error(),
            StorageError::Row(source) => {
                PimError::new("storage.row_decode", ErrorCategory::Storage, source.to_string())
            }
            StorageError::NotFound { .. } => {
                PimError::new("storage.not_found", ErrorCategory::Storage, self.to_string())
            }
            StorageError::Conflict { .. } => {
                PimError::new("storage.conflict", ErrorCategory::Integrity, self.to_string())
            }
            StorageError::CyclicMove { .. } => {
                PimError::new("storage.cyclic_move", ErrorCategory::Integrity, self.to_string())
            }
            StorageError::Io(source) => {
                PimError::new("storage.io", ErrorCategory::Io, self.to_string()).with_cause(source)
            }
        }
    }
}
