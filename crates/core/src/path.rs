//! Location parsing
//!
//! A transfer endpoint is either a local filesystem path or a remote
//! `s3://bucket/key` location.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};

const REMOTE_SCHEME: &str = "s3://";

/// A bucket plus key (or key prefix)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RemotePath {
    pub bucket: String,
    pub key: String,
}

impl RemotePath {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Append a relative path, inserting a separator when needed
    pub fn join(&self, relative: &str) -> Self {
        let key = if self.key.is_empty() || self.key.ends_with('/') {
            format!("{}{relative}", self.key)
        } else {
            format!("{}/{relative}", self.key)
        };
        Self::new(&self.bucket, key)
    }

    /// The key treated as a directory-like prefix (empty or ending in `/`)
    pub fn as_prefix(&self) -> Self {
        if self.key.is_empty() || self.key.ends_with('/') {
            self.clone()
        } else {
            Self::new(&self.bucket, format!("{}/", self.key))
        }
    }

    /// Last key segment, if any
    pub fn file_name(&self) -> Option<&str> {
        self.key
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{REMOTE_SCHEME}{}/{}", self.bucket, self.key)
    }
}

/// A transfer source or destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "path", rename_all = "lowercase")]
pub enum Location {
    Local(PathBuf),
    Remote(RemotePath),
}

impl Location {
    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote(_))
    }

    /// Append a `/`-separated relative path
    pub fn join(&self, relative: &str) -> Self {
        match self {
            Location::Local(root) => {
                if relative.is_empty() {
                    return Location::Local(root.clone());
                }
                let mut path = root.clone();
                for segment in relative.split('/').filter(|s| !s.is_empty()) {
                    path.push(segment);
                }
                Location::Local(path)
            }
            Location::Remote(remote) => {
                if relative.is_empty() {
                    Location::Remote(remote.clone())
                } else {
                    Location::Remote(remote.join(relative))
                }
            }
        }
    }

    /// Whether the location names a container rather than a single entry
    /// (trailing separator, empty key, or an existing local directory)
    pub fn is_directory_like(&self) -> bool {
        match self {
            Location::Local(path) => {
                path.as_os_str().to_string_lossy().ends_with(['/', '\\']) || path.is_dir()
            }
            Location::Remote(remote) => remote.key.is_empty() || remote.key.ends_with('/'),
        }
    }

    /// Final path segment
    pub fn file_name(&self) -> Option<String> {
        match self {
            Location::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            Location::Remote(remote) => remote.file_name().map(str::to_string),
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Location::Local(path) => Some(path),
            Location::Remote(_) => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Remote(remote) => remote.fmt(f),
        }
    }
}

/// Parse a command-line location: `s3://bucket[/key]` or a local path
pub fn parse_location(input: &str) -> Result<Location> {
    if input.is_empty() {
        return Err(Error::InvalidPath("Path cannot be empty".to_string()));
    }

    let Some(rest) = input.strip_prefix(REMOTE_SCHEME) else {
        return Ok(Location::Local(PathBuf::from(input)));
    };

    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(Error::InvalidPath(format!(
            "Bucket name is required: '{input}'"
        )));
    }

    Ok(Location::Remote(RemotePath::new(bucket, key)))
}
