use pimd_core::{ErrorCategory, IntoPimError, PimError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("sql driver error: {0}")]
    Driver(#[from] sqlx::Error),

    #[error("rollback was requested at nesting depth {depth}, outermost transaction aborted")]
    RolledBack { depth: u32 },

    #[error("commit called with no transaction open")]
    NoActiveTransaction,
}

impl IntoPimError for QueryError {
    fn into_pim_error(self) -> PimError {
        match self {
            QueryError::Driver(source) => {
                PimError::new("query.driver", ErrorCategory::Storage, self.to_string())
                    .with_cause(source)
            }
            other => PimError::new("query.transaction", ErrorCategory::Storage, other.to_string()),
        }
    }
}
