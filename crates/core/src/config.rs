//! Transfer configuration
//!
//! Thresholds, part sizing, concurrency and retry settings live in one
//! immutable [`TransferConfig`] that is handed to every component at
//! construction time. Values can be deserialized from the `[transfer]` table
//! of a TOML config file; sizes accept plain byte counts or strings such as
//! `"8MB"`.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

const MIB: u64 = 1024 * 1024;

/// Default size above which objects are transferred in parts
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 8 * MIB;
/// Default target part size
pub const DEFAULT_PART_SIZE: u64 = 8 * MIB;
/// Smallest part size an S3-compatible backend accepts (except the last part)
pub const MIN_REMOTE_PART_SIZE: u64 = 5 * MIB;
/// Part-count ceiling of S3-compatible backends
pub const DEFAULT_MAX_PARTS: u32 = 10_000;
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_CLOCK_SKEW_TOLERANCE_SECS: i64 = 2;

/// Retry configuration for transient failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
        }
    }
}

/// Engine-wide transfer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Objects strictly larger than this use multipart transfers
    #[serde(deserialize_with = "deserialize_size")]
    pub multipart_threshold: u64,

    /// Target part size; scaled up when `max_parts` would be exceeded
    #[serde(deserialize_with = "deserialize_size")]
    pub part_size: u64,

    pub max_parts: u32,

    /// Parallel instruction slots
    pub concurrency: usize,

    /// Parallel part slots shared by all multipart transfers
    /// (defaults to `concurrency` when unset)
    pub max_concurrent_parts: Option<usize>,

    /// Mtime difference tolerated by the default comparison mode
    pub clock_skew_tolerance_secs: i64,

    pub retry: RetryConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
            max_parts: DEFAULT_MAX_PARTS,
            concurrency: DEFAULT_CONCURRENCY,
            max_concurrent_parts: None,
            clock_skew_tolerance_secs: DEFAULT_CLOCK_SKEW_TOLERANCE_SECS,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    transfer: TransferConfig,
}

impl TransferConfig {
    /// Parse the `[transfer]` table of a TOML document.
    ///
    /// A document without the table yields the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        file.transfer.validate()?;
        Ok(file.transfer)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }
        if self.max_concurrent_parts == Some(0) {
            return Err(Error::Config(
                "max_concurrent_parts must be at least 1".into(),
            ));
        }
        if self.part_size == 0 {
            return Err(Error::Config("part_size must be greater than 0".into()));
        }
        if self.max_parts == 0 {
            return Err(Error::Config("max_parts must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.clock_skew_tolerance_secs < 0 {
            return Err(Error::Config(
                "clock_skew_tolerance_secs cannot be negative".into(),
            ));
        }
        Ok(())
    }

    /// Effective size of the part-slot pool
    pub fn part_slots(&self) -> usize {
        self.max_concurrent_parts.unwrap_or(self.concurrency).max(1)
    }

    /// Whether an object of `size` bytes needs a multipart transfer
    pub fn requires_multipart(&self, size: u64) -> bool {
        size > 0 && size > self.multipart_threshold
    }
}

/// Parse size string (e.g., "1024", "5MB", "8MiB", "1G")
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Config("Size cannot be empty".to_string()));
    }

    let suffix_start = s.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(s.len());

    let num_str = s[..suffix_start].trim();
    let suffix = &s[suffix_start..];

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::Config(format!("Invalid size number: {num_str}")))?;

    let multiplier: u64 = match suffix.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => MIB,
        "G" | "GB" | "GIB" => 1024 * MIB,
        "T" | "TB" | "TIB" => 1024 * 1024 * MIB,
        _ => return Err(Error::Config(format!("Unknown size suffix: {suffix}"))),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| Error::Config(format!("Size too large: {s}")))
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SizeValue {
        Bytes(u64),
        Text(String),
    }

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Bytes(n) => Ok(n),
        SizeValue::Text(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}
