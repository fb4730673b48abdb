use pimd_core::{ErrorCategory, IntoPimError, PimError};
use thiserror::Error;

/// Errors a connection handler can raise while processing one command.
///
/// Every variant maps to the §6.4 wire taxonomy via [`ServerError::wire_status`]:
/// protocol errors close the connection, everything else becomes a tagged
/// `NO` and leaves the connection open for the next command.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Wire(#[from] pimd_wire::WireError),

    #[error(transparent)]
    Storage(#[from] pimd_storage::StorageError),

    #[error("command {verb} is not valid in state {state}")]
    WrongState { verb: &'static str, state: &'static str },

    #[error("no transaction is open")]
    NoTransaction,

    #[error("a transaction is already open")]
    TransactionAlreadyOpen,

    #[error("no collection is selected")]
    NoCollectionSelected,

    #[error("external payload size mismatch: advertised {advertised}, actual {actual}")]
    PayloadSizeMismatch { advertised: u64, actual: u64 },
}

/// Disposition a connection takes for one failed command: whether the
/// whole socket is torn down (protocol errors, §4.6 "fatal connection
/// errors") or just this command fails with a tagged `NO` (§4.6 "fatal
/// per-command errors").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    CloseConnection,
    TaggedNo,
}

impl ServerError {
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            ServerError::Wire(_) => ErrorDisposition::CloseConnection,
            _ => ErrorDisposition::TaggedNo,
        }
    }
}

impl IntoPimError for ServerError {
    fn into_pim_error(self) -> PimError {
        match self {
            ServerError::Wire(err) => err.into_pim_error(),
            ServerError::Storage(err) => err.into_pim_error(),
            ServerError::WrongState { .. } => {
                PimError::new("server.wrong_state", ErrorCategory::Protocol, self.to_string())
            }
            ServerError::NoTransaction | ServerError::TransactionAlreadyOpen => {
                PimError::new("server.transaction", ErrorCategory::Integrity, self.to_string())
            }
            ServerError::NoCollectionSelected => {
                PimError::new("server.no_collection_selected", ErrorCategory::Protocol, self.to_string())
            }
            ServerError::PayloadSizeMismatch { .. } => {
                PimError::new("server.payload_size_mismatch", ErrorCategory::Io, self.to_string())
            }
        }
    }
}
