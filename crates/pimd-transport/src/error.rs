use pimd_core::{ErrorCategory, IntoPimError, PimError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind unix socket at {path}: {source}")]
    Bind {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("connect to {path} failed: {source}")]
    Connect {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IntoPimError for TransportError {
    fn into_pim_error(self) -> PimError {
        match &self {
            TransportError::Bind { source, .. } => {
                PimError::new("transport.bind", ErrorCategory::Io, self.to_string())
                    .with_cause(clone_io_error(source))
            }
            TransportError::Accept(source) => {
                PimError::new("transport.accept", ErrorCategory::Io, self.to_string())
                    .with_cause(clone_io_error(source))
            }
            TransportError::Connect { source, .. } => {
                PimError::new("transport.connect", ErrorCategory::Io, self.to_string())
                    .with_cause(clone_io_error(source))
            }
        }
    }
}

fn clone_io_error(source: &std::io::Error) -> std::io::Error {
    std::io::Error::new(source.kind(), source.to_string())
}
