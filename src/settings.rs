use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::connection::ConnectionConfig;

pub const SETTINGS_ENV: &str = "BARCUBE_SETTINGS";
pub const DEBUG_ENV: &str = "BARCUBE_DEBUG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartSettings {
    /// Width of the longest bar, in characters.
    pub width: usize,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self { width: 40 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: ConnectionConfig,
    pub chart: ChartSettings,
}

impl Settings {
    pub fn connection_config(&self) -> ConnectionConfig {
        self.engine.clone()
    }
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    data: Settings,
}

impl SettingsStore {
    /// Loads `path`, or defaults when the file does not exist.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            read_settings(&path)?
        } else {
            Settings::default()
        };

        Ok(Self {
            path: Some(path),
            data,
        })
    }

    /// Uses the file named by `BARCUBE_SETTINGS`, or in-memory defaults.
    pub fn from_env() -> Result<Self> {
        match env::var_os(SETTINGS_ENV) {
            Some(path) => Self::new(PathBuf::from(path)),
            None => Ok(Self {
                path: None,
                data: Settings::default(),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn settings(&self) -> &Settings {
        &self.data
    }
}

fn read_settings(path: &Path) -> Result<Settings> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse settings in {}", path.display()))
}

/// True when `BARCUBE_DEBUG` asks for debug-level logging.
pub fn debug_logging() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true"))
        .unwrap_or(false)
}
