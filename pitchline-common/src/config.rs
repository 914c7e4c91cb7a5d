//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// TOML configuration file contents (`~/.config/pitchline/config.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root data folder (holds pitchline.db)
    pub root_folder: Option<String>,
    /// Base URL of the remote phase evaluator service
    pub evaluator_base_url: Option<String>,
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config) = load_toml_config() {
        if let Some(root_folder) = config.root_folder {
            return PathBuf::from(root_folder);
        }
    }

    // Priority 4: OS-dependent compiled default
    let fallback = default_root_folder();
    tracing::debug!("Root folder not configured, using default: {}", fallback.display());
    fallback
}

/// Default configuration file path for the platform
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("pitchline").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Load the TOML configuration file, if present
pub fn load_toml_config() -> Result<TomlConfig> {
    let path = default_config_path()?;
    read_toml_config(&path)
}

/// Read a TOML configuration file from an explicit path
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write a TOML configuration file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/pitchline (or /var/lib/pitchline for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("pitchline"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/pitchline"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("pitchline"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/pitchline"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("pitchline"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\pitchline"))
    } else {
        PathBuf::from("./pitchline_data")
    }
}

/// Ensure the root folder exists and return the database path inside it
pub fn ensure_root_folder(root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    Ok(root.join("pitchline.db"))
}
