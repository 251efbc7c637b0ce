//! Re-openable byte-range bodies
//!
//! Upload bodies are never reused across attempts. A [`BodySource`] is a
//! factory: every attempt (including one reissued after a redirect) opens a
//! fresh stream positioned at the start of its byte range, so no stream is
//! ever expected to rewind itself.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::traits::{ByteRange, ByteStream};

/// Produces a fresh readable view of a byte range on demand
#[async_trait]
pub trait BodySource: Send + Sync {
    async fn open(&self, range: ByteRange) -> Result<ByteStream>;
}

/// Local file body source
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }
}

#[async_trait]
impl BodySource for FileSource {
    async fn open(&self, range: ByteRange) -> Result<ByteStream> {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| Error::from_io(self.display(), e))?;
        file.seek(SeekFrom::Start(range.start))
            .await
            .map_err(|e| Error::from_io(self.display(), e))?;

        let len = usize::try_from(range.len())
            .map_err(|_| Error::Config(format!("part too large: {} bytes", range.len())))?;
        let mut buf = Vec::with_capacity(len);
        let read = (&mut file)
            .take(range.len())
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::from_io(self.display(), e))?;

        // A file that shrank since planning cannot produce the declared length
        if read as u64 != range.len() {
            return Err(Error::Integrity(format!(
                "{}: expected {} bytes at offset {}, read {read}",
                self.display(),
                range.len(),
                range.start
            )));
        }

        Ok(futures::stream::once(async move { Ok(Bytes::from(buf)) }).boxed())
    }
}

/// Drain a body into memory, checking it carries exactly `expected` bytes
pub async fn collect_body(mut body: ByteStream, expected: u64) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(usize::try_from(expected).unwrap_or(0));
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    if buf.len() as u64 != expected {
        return Err(Error::Integrity(format!(
            "content length mismatch: declared {expected}, received {}",
            buf.len()
        )));
    }
    Ok(Bytes::from(buf))
}

/// Write a body into `path` at `offset`, returning the bytes written.
///
/// The file must already exist. Fails with an integrity error when the body
/// length differs from `expected`.
pub async fn write_body_at(
    path: &Path,
    offset: u64,
    mut body: ByteStream,
    expected: u64,
) -> Result<u64> {
    let display = path.display().to_string();
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| Error::from_io(&display, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| Error::from_io(&display, e))?;

    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        if written > expected {
            break;
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::from_io(&display, e))?;
    }
    file.flush().await.map_err(|e| Error::from_io(&display, e))?;

    if written != expected {
        return Err(Error::Integrity(format!(
            "{display}: content length mismatch: declared {expected}, received {written}"
        )));
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_source_reads_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let source = FileSource::new(&path);
        let body = source.open(ByteRange::new(2, 6)).await.unwrap();
        let bytes = collect_body(body, 4).await.unwrap();
        assert_eq!(&bytes[..], b"2345");
    }

    #[tokio::test]
    async fn test_file_source_reopens_from_range_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"abcdefgh").unwrap();

        let source = FileSource::new(&path);
        let range = ByteRange::new(4, 8);
        let first = collect_body(source.open(range).await.unwrap(), 4).await.unwrap();
        let second = collect_body(source.open(range).await.unwrap(), 4).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(&second[..], b"efgh");
    }

    #[tokio::test]
    async fn test_file_source_short_file_is_integrity_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, b"abc").unwrap();

        let result = FileSource::new(&path).open(ByteRange::new(0, 10)).await;
        assert!(matches!(result, Err(Error::Integrity(_))));
    }

    #[tokio::test]
    async fn test_file_source_missing_file_is_access_error() {
        let dir = TempDir::new().unwrap();
        let result = FileSource::new(dir.path().join("gone"))
            .open(ByteRange::new(0, 1))
            .await;
        assert!(matches!(result, Err(Error::Access { .. })));
    }

    #[tokio::test]
    async fn test_write_body_at_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, vec![0u8; 6]).unwrap();

        let body = futures::stream::iter(vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"c"))]).boxed();
        let written = write_body_at(&path, 3, body, 3).await.unwrap();
        assert_eq!(written, 3);
        assert_eq!(std::fs::read(&path).unwrap(), b"\0\0\0abc");
    }

    #[tokio::test]
    async fn test_write_body_length_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"").unwrap();

        let body = futures::stream::iter(vec![Ok(Bytes::from_static(b"ab"))]).boxed();
        let result = write_body_at(&path, 0, body, 5).await;
        assert!(matches!(result, Err(Error::Integrity(_))));
    }
}
