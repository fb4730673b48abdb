use pimd_core::{ErrorCategory, IntoPimError, PimError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("connection closed before a full command was read")]
    Eof,

    #[error("malformed command line: {0}")]
    Malformed(String),

    #[error("unknown command verb {0:?}")]
    UnknownVerb(String),

    #[error("literal of {declared} bytes truncated after {read} bytes")]
    TruncatedLiteral { declared: u64, read: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoPimError for WireError {
    fn into_pim_error(self) -> PimError {
        let message = self.to_string();
        match self {
            WireError::Io(source) => {
                PimError::new("wire.io", ErrorCategory::Io, message).with_cause(source)
            }
            _ => PimError::new("wire.protocol", ErrorCategory::Protocol, message),
        }
    }
}
