//! Storage client contract
//!
//! The engine drives an S3-compatible backend only through [`StorageClient`].
//! Implementations map their native failures onto [`crate::Error`] variants;
//! the engine decides what is transient, permanent or fatal.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use jiff::Timestamp;
use serde::Serialize;

use crate::attributes::ObjectAttributes;
use crate::error::Result;
use crate::path::RemotePath;

/// A stream of body chunks
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// HTTP `Range` header value (inclusive end)
    pub fn to_http_range(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// Metadata about a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Metadata headers, filled by `head_object`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
}

impl ObjectInfo {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
            etag: None,
            content_type: None,
            cache_control: None,
            content_disposition: None,
            content_encoding: None,
            content_language: None,
        }
    }
}

/// Options for listing objects
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Maximum keys per page
    pub max_keys: Option<i32>,
    /// Continuation token from a previous page
    pub continuation_token: Option<String>,
}

/// One page of a recursive listing, in ascending key order
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub items: Vec<ObjectInfo>,
    pub truncated: bool,
    pub continuation_token: Option<String>,
}

/// A completed multipart part, as passed to `complete_multipart`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Object storage operations consumed by the engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// List every object under `path.key` (recursively), one page at a time
    async fn list_objects(&self, path: &RemotePath, options: ListOptions) -> Result<ListResult>;

    async fn head_object(&self, path: &RemotePath) -> Result<ObjectInfo>;

    /// Download an object, or a byte range of it
    async fn get_object(&self, path: &RemotePath, range: Option<ByteRange>) -> Result<ByteStream>;

    async fn put_object(
        &self,
        path: &RemotePath,
        body: ByteStream,
        size: u64,
        attributes: &ObjectAttributes,
    ) -> Result<()>;

    /// Server-side copy of a whole object.
    ///
    /// The source's metadata is kept unless `attributes` replaces it.
    async fn copy_object(
        &self,
        src: &RemotePath,
        dst: &RemotePath,
        attributes: &ObjectAttributes,
    ) -> Result<()>;

    async fn delete_object(&self, path: &RemotePath) -> Result<()>;

    /// Start a multipart upload and return its upload id
    async fn create_multipart(
        &self,
        path: &RemotePath,
        attributes: &ObjectAttributes,
    ) -> Result<String>;

    /// Upload one part and return the backend part id (ETag)
    async fn upload_part(
        &self,
        path: &RemotePath,
        upload_id: &str,
        part_number: u32,
        body: ByteStream,
        size: u64,
    ) -> Result<String>;

    /// Copy a byte range of `src` into a part of the upload at `dst`
    async fn upload_part_copy(
        &self,
        src: &RemotePath,
        dst: &RemotePath,
        upload_id: &str,
        part_number: u32,
        range: ByteRange,
    ) -> Result<String>;

    /// Assemble the object from parts listed in ascending part order
    async fn complete_multipart(
        &self,
        path: &RemotePath,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()>;

    async fn abort_multipart(&self, path: &RemotePath, upload_id: &str) -> Result<()>;
}
