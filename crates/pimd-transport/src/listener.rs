use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

use crate::error::TransportError;

/// One accepted client connection plus whatever peer metadata is worth
/// logging (a Unix socket carries no address, only an optional peer pid).
pub struct BrokerStream {
    pub stream: UnixStream,
    pub peer_pid: Option<u32>,
}

/// Binds the broker's listening socket, removing a stale socket file left
/// behind by a previous process that did not shut down cleanly.
pub struct BrokerListener {
    inner: UnixListener,
    path: PathBuf,
}

impl BrokerListener {
    pub fn bind(path: &Path) -> Result<Self, TransportError> {
        if path.exists() {
            warn!(path = %path.display(), "removing stale socket file from a previous run");
            let _ = std::fs::remove_file(path);
        }
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let inner = UnixListener::bind(path).map_err(|source| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "listening for broker connections");
        Ok(Self {
            inner,
            path: path.to_path_buf(),
        })
    }

    pub async fn accept(&self) -> Result<BrokerStream, TransportError> {
        let (stream, _addr) = self.inner.accept().await.map_err(TransportError::Accept)?;
        let peer_pid = stream
            .peer_cred()
            .ok()
            .and_then(|cred| cred.pid().map(|pid| pid as u32));
        Ok(BrokerStream { stream, peer_pid })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BrokerListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Connects to an already-running broker; used by `pimd-client`.
pub async fn connect(path: &Path) -> Result<UnixStream, TransportError> {
    UnixStream::connect(path)
        .await
        .map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_accept_connect_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.sock");
        let listener = BrokerListener::bind(&path).unwrap();

        let accept_path = path.clone();
        let accepted = tokio::spawn(async move {
            let listener = listener;
            listener.accept().await.unwrap()
        });

        let _client = connect(&accept_path).await.unwrap();
        let server_side = accepted.await.unwrap();
        assert!(server_side.stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.sock");
        std::fs::write(&path, b"not a socket").unwrap();
        let listener = BrokerListener::bind(&path);
        assert!(listener.is_ok());
    }
}
