//! Client-side error taxonomy (§6.4). Distinct from
//! [`pimd_server::ServerError`](../pimd_server/enum.ServerError.html): the
//! client never sees the server's internal storage/wire error types, only
//! the small set of kinds a job can fail with.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("connection to the broker failed or could not be established")]
    ConnectionFailed,

    #[error("negotiated protocol version does not match the version this client was built against")]
    ProtocolVersionMismatch,

    #[error("the operation was canceled")]
    UserCanceled,

    #[error("{0}")]
    Unknown(String),
}

impl ClientError {
    /// Classifies a tagged `NO`/`BAD` response text that didn't match a
    /// recognized server-side reason (§6.4 "fallback").
    pub fn from_server_text(text: impl Into<String>) -> Self {
        ClientError::Unknown(text.into())
    }
}
