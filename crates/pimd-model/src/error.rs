use pimd_core::{ErrorCategory, IntoPimError, PimError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("row is missing column {0}")]
    MissingColumn(&'static str),

    #[error("column {column} has unexpected type: {detail}")]
    UnexpectedType { column: &'static str, detail: String },
}

impl IntoPimError for ModelError {
    fn into_pim_error(self) -> PimError {
        PimError::new("model.row", ErrorCategory::Internal, self.to_string())
    }
}
