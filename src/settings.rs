use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RulebookError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_rules_path")]
    pub rules_path: String,
    /// Show existing categories and columns while authoring rules.
    #[serde(default = "default_hints")]
    pub hints: bool,
}

fn default_rules_path() -> String {
    config_dir().join("rules.json").to_string_lossy().to_string()
}

fn default_hints() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rules_path: default_rules_path(),
            hints: default_hints(),
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("rulebook")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

fn load_settings_from(path: &Path) -> Settings {
    if path.exists() {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    save_settings_to(&settings_path(), settings)
}

fn save_settings_to(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| RulebookError::Settings(e.to_string()))?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}

/// The ruleset to operate on: `--rules` when given, else the configured path.
pub fn resolve_rules_path(cli_override: Option<&Path>) -> PathBuf {
    match cli_override {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(shellexpand_path(&load_settings().rules_path)),
    }
}

pub fn shellexpand_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}
