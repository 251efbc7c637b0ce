//! objsync-s3: S3 SDK adapter for objsync
//!
//! Implements [`objsync_core::StorageClient`] on top of `aws-sdk-s3` and
//! maps SDK failures onto the engine's error taxonomy.

pub mod client;
pub mod error;

pub use client::{ClientConfig, S3Client, StaticCredentials};
pub use error::classify_status;
