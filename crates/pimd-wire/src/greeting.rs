use serde::{Deserialize, Serialize};

/// Bumped whenever a wire-incompatible change lands. A mismatch against the
/// peer's advertised version is fatal for the whole session (§4.1, §6.4).
pub const PROTOCOL_VERSION: u32 = 1;

/// The first message on every connection, server to client (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    pub server_name: String,
    pub message: String,
    pub protocol_version: u32,
    /// Monotonically non-decreasing; bumped only when the database is
    /// recreated, letting clients invalidate persisted collection ids.
    pub generation: u64,
}

impl Hello {
    pub fn new(server_name: impl Into<String>, generation: u64) -> Self {
        Self {
            server_name: server_name.into(),
            message: "ready".to_string(),
            protocol_version: PROTOCOL_VERSION,
            generation,
        }
    }
}
