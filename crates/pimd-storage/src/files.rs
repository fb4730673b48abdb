use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::StorageError;

/// Builds the on-disk filename for an externalized part payload (§4.7):
/// `<partId>_r<revision>`, so a stale reader mid-fetch always sees a
/// consistent revision even if a newer write lands concurrently.
pub(crate) fn external_filename(part_id: i64, revision: u32) -> String {
    format!("{part_id}_r{revision}")
}

/// Rejects any filename that isn't a single plain path component, the
/// guard against a corrupted or hostile `filename` column escaping
/// `data_root` (§6.4 `storage.io`).
fn resolve_under_root(data_root: &Path, filename: &str) -> Result<PathBuf, StorageError> {
    if filename.is_empty() || filename.contains('/') || filename.contains("..") {
        return Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("refusing to resolve unsafe external payload filename: {filename}"),
        )));
    }
    Ok(data_root.join(filename))
}

/// Writes `bytes` to a fresh revisioned file under `data_root`, fsyncing
/// before returning so the row update that follows never points at a
/// payload that could still vanish on crash.
pub(crate) async fn write_external(data_root: &Path, part_id: i64, revision: u32, bytes: &[u8]) -> Result<String, StorageError> {
    fs::create_dir_all(data_root).await?;
    let filename = external_filename(part_id, revision);
    let path = resolve_under_root(data_root, &filename)?;
    let tmp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp_path, &path).await?;

    Ok(filename)
}

pub(crate) async fn read_external(data_root: &Path, filename: &str) -> Result<Vec<u8>, StorageError> {
    let path = resolve_under_root(data_root, filename)?;
    Ok(fs::read(path).await?)
}

/// Best-effort cleanup of a superseded revision's file; a failure here is
/// logged, not propagated, since the row update it follows has already
/// committed and is the source of truth.
pub(crate) async fn remove_external(data_root: &Path, filename: &str) {
    let path = match resolve_under_root(data_root, filename) {
        Ok(path) => path,
        Err(err) => {
            warn!(filename, error = %err, "skipping removal of unsafe external payload filename");
            return;
        }
    };
    if let Err(err) = fs::remove_file(&path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(?path, error = %err, "failed to remove superseded external payload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let filename = write_external(dir.path(), 7, 1, b"hello").await.unwrap();
        assert_eq!(filename, "7_r1");
        let bytes = read_external(dir.path(), &filename).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn path_escape_attempt_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_external(dir.path(), "../etc/passwd").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn remove_missing_file_does_not_error() {
        let dir = tempfile::tempdir().unwrap();
        remove_external(dir.path(), "7_r0").await;
    }
}
