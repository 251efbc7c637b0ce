//! Configuration file loading
//!
//! `config.toml` lives in `$OBJSYNC_CONFIG_DIR`, or `objsync/` under the
//! platform config directory. A missing file means defaults. Command-line
//! flags override anything read here.

use std::path::{Path, PathBuf};

use anyhow::Context;
use objsync_core::TransferConfig;
use objsync_s3::{ClientConfig, StaticCredentials};
use serde::Deserialize;

const CONFIG_DIR_ENV: &str = "OBJSYNC_CONFIG_DIR";
const CONFIG_FILE: &str = "config.toml";

/// Backend connection settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    pub path_style: bool,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl S3Settings {
    pub fn client_config(&self) -> ClientConfig {
        let credentials = match (&self.access_key, &self.secret_key) {
            (Some(access_key), Some(secret_key)) => Some(StaticCredentials {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
                session_token: None,
            }),
            _ => None,
        };
        ClientConfig {
            endpoint_url: self.endpoint_url.clone(),
            region: self.region.clone(),
            force_path_style: self.path_style,
            credentials,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub transfer: TransferConfig,
    pub s3: S3Settings,
}

/// Directory holding `config.toml`
pub fn config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) => Some(PathBuf::from(dir)),
        None => dirs::config_dir().map(|dir| dir.join("objsync")),
    }
}

/// Load settings from the default location
pub fn load() -> anyhow::Result<Settings> {
    match config_dir() {
        Some(dir) => load_from(&dir),
        None => Ok(Settings::default()),
    }
}

/// Load settings from `dir/config.toml`, or defaults when the file is absent
pub fn load_from(dir: &Path) -> anyhow::Result<Settings> {
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file; using defaults");
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

pub fn parse(content: &str) -> anyhow::Result<Settings> {
    let settings: Settings = toml::from_str(content)?;
    settings.transfer.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = load_from(dir.path()).unwrap();
        assert_eq!(settings.transfer, TransferConfig::default());
        assert!(settings.s3.endpoint_url.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
[transfer]
concurrency = 4
part_size = "16MiB"

[s3]
endpoint_url = "http://localhost:9000"
path_style = true
access_key = "key"
secret_key = "secret"
"#,
        )
        .unwrap();

        let settings = load_from(dir.path()).unwrap();
        assert_eq!(settings.transfer.concurrency, 4);
        assert_eq!(settings.transfer.part_size, 16 * 1024 * 1024);

        let client = settings.s3.client_config();
        assert_eq!(client.endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert!(client.force_path_style);
        assert_eq!(client.credentials.unwrap().access_key, "key");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = parse("[transfer]\nconcurrency = 0\n").unwrap_err();
        assert!(err.to_string().contains("concurrency"), "{err}");
        assert!(parse("[transfer\n").is_err());
    }

    #[test]
    fn test_partial_credentials_are_ignored() {
        let settings = parse("[s3]\naccess_key = \"key\"\n").unwrap();
        assert!(settings.s3.client_config().credentials.is_none());
    }
}
