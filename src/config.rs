use anyhow::{Context, Result};
use directories::ProjectDirs;
use facegate_verify::VerifyOptions;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "facegate")
}

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACEGATE_CONFIG_PATH") {
    Some(p) => PathBuf::from(p),
    None => project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("facegate.toml")),
});

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACEGATE_DATA_DIR") {
    Some(p) => PathBuf::from(p),
    None => project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".")),
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Roster file.
    pub database: PathBuf,
    /// One reference image per registered identity.
    pub faces_dir: PathBuf,
    /// Submitted images, kept only while a request runs.
    pub scratch_dir: PathBuf,
    pub verifier: VerifyOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DATA_DIR.join("database").join("users.json"),
            faces_dir: DATA_DIR.join("stored_faces"),
            scratch_dir: DATA_DIR.join("scratch"),
            verifier: VerifyOptions::default(),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
