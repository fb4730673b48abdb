use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::WireError;

/// Streams a single literal of known length directly off the connection,
/// one chunk at a time, so the part streamer (C7) never has to buffer a
/// whole payload in memory before deciding whether to externalize it.
pub struct LiteralReader<'a, R> {
    reader: &'a mut R,
    remaining: u64,
}

impl<'a, R: AsyncRead + Unpin> LiteralReader<'a, R> {
    pub fn new(reader: &'a mut R, declared_size: u64) -> Self {
        Self {
            reader,
            remaining: declared_size,
        }
    }

    pub fn remaining_literal_size(&self) -> u64 {
        self.remaining
    }

    pub fn at_literal_end(&self) -> bool {
        self.remaining == 0
    }

    /// Reads up to `buf.len()` bytes of the literal, never crossing the
    /// declared boundary. Returns `0` once [`Self::at_literal_end`] is true.
    pub async fn read_literal_part(&mut self, buf: &mut [u8]) -> Result<usize, WireError> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = buf.len().min(self.remaining as usize);
        let read = self.reader.read(&mut buf[..want]).await?;
        if read == 0 {
            return Err(WireError::TruncatedLiteral {
                declared: self.remaining,
                read: 0,
            });
        }
        self.remaining -= read as u64;
        Ok(read)
    }

    /// Drains the literal fully into memory. Convenient for small inline
    /// parts; the streamer falls back to [`Self::read_literal_part`] once
    /// the declared size exceeds the externalization threshold.
    pub async fn read_to_vec(mut self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(self.remaining as usize);
        let mut chunk = [0u8; 8192];
        while !self.at_literal_end() {
            let n = self.read_literal_part(&mut chunk).await?;
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_full_literal_in_chunks() {
        let data = b"hello world".to_vec();
        let mut cursor = std::io::Cursor::new(data.clone());
        let mut lit = LiteralReader::new(&mut cursor, data.len() as u64);
        let mut buf = [0u8; 4];
        let mut out = Vec::new();
        while !lit.at_literal_end() {
            let n = lit.read_literal_part(&mut buf).await.unwrap();
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn truncated_stream_errors() {
        let mut cursor = std::io::Cursor::new(b"abc".to_vec());
        let mut lit = LiteralReader::new(&mut cursor, 10);
        let mut buf = [0u8; 16];
        // first read drains the 3 available bytes
        lit.read_literal_part(&mut buf).await.unwrap();
        let err = lit.read_literal_part(&mut buf).await.unwrap_err();
        assert!(matches!(err, WireError::TruncatedLiteral { .. }));
    }
}
