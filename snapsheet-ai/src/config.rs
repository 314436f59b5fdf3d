//! Configuration resolution for snapsheet-ai
//!
//! Precedence is CLI → ENV → TOML → compiled default for every setting that
//! has a CLI flag, ENV → TOML for the rest.

use crate::services::upstage_client::DEFAULT_BASE_URL;
use snapsheet_common::config::{prepare_root_folder, resolve_root_folder, TomlConfig};
use snapsheet_common::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable holding the Upstage API key
pub const API_KEY_ENV: &str = "SNAPSHEET_UPSTAGE_API_KEY";

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5790";
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 2;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// A key is usable when it is not empty or whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve the Upstage API key
///
/// **Priority:** ENV → TOML
pub fn resolve_upstage_api_key(toml_config: &TomlConfig) -> Result<String> {
    let env_key = std::env::var(API_KEY_ENV).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .upstage_api_key
        .clone()
        .filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!("Upstage API key found in environment and TOML. Using environment (highest priority).");
    }

    if let Some(key) = env_key {
        info!("Upstage API key loaded from environment variable");
        return Ok(key);
    }

    if let Some(key) = toml_key {
        info!("Upstage API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "Upstage API key not configured. Set {} or upstage_api_key in snapsheet-ai.toml",
        API_KEY_ENV
    )))
}

/// Fully resolved service settings
#[derive(Debug, Clone)]
pub struct AiSettings {
    pub root_folder: PathBuf,
    pub db_path: PathBuf,
    /// Directory served under `/images`; holds `project-images/`
    pub blob_root: PathBuf,
    pub upstage_api_key: String,
    pub upstage_base_url: String,
    pub requests_per_second: u32,
    pub request_timeout: Duration,
    pub public_base_url: String,
    pub max_lock_wait_ms: u64,
    pub bind_address: String,
    pub log_level: String,
}

impl AiSettings {
    /// Resolve settings and create the root folder
    pub fn resolve(
        cli_root_folder: Option<&str>,
        cli_bind_address: Option<&str>,
        toml_config: &TomlConfig,
    ) -> Result<Self> {
        let root_folder = resolve_root_folder(cli_root_folder, toml_config);
        let db_path = prepare_root_folder(&root_folder)?;

        let bind_address = cli_bind_address
            .map(str::to_string)
            .or_else(|| toml_config.bind_address.clone())
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let public_base_url = toml_config
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}/images", bind_address));

        Ok(Self {
            blob_root: root_folder.clone(),
            db_path,
            root_folder,
            upstage_api_key: resolve_upstage_api_key(toml_config)?,
            upstage_base_url: toml_config
                .upstage_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            requests_per_second: toml_config
                .requests_per_second
                .unwrap_or(DEFAULT_REQUESTS_PER_SECOND),
            request_timeout: Duration::from_secs(
                toml_config
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            public_base_url,
            max_lock_wait_ms: toml_config
                .db_max_lock_wait_ms
                .unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS),
            bind_address,
            log_level: toml_config.logging.level.clone(),
        })
    }
}
