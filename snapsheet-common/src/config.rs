//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the TOML config file location
pub const CONFIG_PATH_ENV: &str = "SNAPSHEET_CONFIG";

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "SNAPSHEET_ROOT";

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing level when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Contents of `snapsheet-ai.toml`
///
/// Every key is optional; absent keys fall back to compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<String>,
    pub logging: LoggingConfig,
    pub upstage_api_key: Option<String>,
    pub upstage_base_url: Option<String>,
    pub requests_per_second: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub public_base_url: Option<String>,
    pub db_max_lock_wait_ms: Option<u64>,
    pub bind_address: Option<String>,
}

/// Load a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the TOML config from its default location, or defaults when there is none
///
/// A file that exists but does not parse is an error; a missing file is not.
pub fn load_default_toml_config(module_name: &str) -> Result<TomlConfig> {
    match default_config_path(module_name) {
        Some(path) if path.exists() => {
            tracing::info!("Loading config from {}", path.display());
            load_toml_config(&path)
        }
        Some(path) => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Ok(TomlConfig::default())
        }
        None => Ok(TomlConfig::default()),
    }
}

/// Config file path: `$SNAPSHEET_CONFIG`, else `<config dir>/snapsheet/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("snapsheet").join(format!("{}.toml", module_name)))
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. `SNAPSHEET_ROOT` environment variable
/// 3. TOML `root_folder`
/// 4. OS-dependent default
pub fn resolve_root_folder(cli_arg: Option<&str>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_config.root_folder.as_deref() {
        return PathBuf::from(path);
    }

    default_root_folder()
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("snapsheet"))
        .unwrap_or_else(|| PathBuf::from("./snapsheet_data"))
}

/// Create the root folder if missing and return the database path inside it
pub fn prepare_root_folder(root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    Ok(root.join("snapsheet.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            upstage_api_key = "up-123"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.upstage_api_key.as_deref(), Some("up-123"));
        assert_eq!(config.logging.level, "debug");
        assert!(config.root_folder.is_none());
        assert!(config.requests_per_second.is_none());
    }

    #[test]
    fn test_load_toml_config_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "upstage_api_key = [unterminated").unwrap();

        let err = load_toml_config(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    #[serial]
    fn test_root_folder_priority() {
        let toml_config = TomlConfig {
            root_folder: Some("/from/toml".to_string()),
            ..Default::default()
        };

        std::env::set_var(ROOT_FOLDER_ENV, "/from/env");
        assert_eq!(
            resolve_root_folder(Some("/from/cli"), &toml_config),
            PathBuf::from("/from/cli")
        );
        assert_eq!(
            resolve_root_folder(None, &toml_config),
            PathBuf::from("/from/env")
        );

        std::env::remove_var(ROOT_FOLDER_ENV);
        assert_eq!(
            resolve_root_folder(None, &toml_config),
            PathBuf::from("/from/toml")
        );
        assert!(resolve_root_folder(None, &TomlConfig::default()).ends_with("snapsheet")
            || resolve_root_folder(None, &TomlConfig::default()).ends_with("snapsheet_data"));
    }

    #[test]
    fn test_prepare_root_folder_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("root");

        let db_path = prepare_root_folder(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(db_path, root.join("snapsheet.db"));
    }
}
