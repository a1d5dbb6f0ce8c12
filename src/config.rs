//! Engine configuration
//!
//! Loaded from a small TOML file. Every field has a default, so an empty
//! file (or no file at all) yields the standard puzzle setup.

use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Login name of the player
    pub user: String,
    pub hostname: String,
    /// Home directory; also the initial working directory
    pub home: String,
    /// How long a background job stays in the job table
    pub job_lifetime_ms: u64,
    /// Save both state blobs after every command
    pub autosave: bool,
    /// Print the motd when an interactive front end starts
    pub banner: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user: "ghost".to_string(),
            hostname: "nexus".to_string(),
            home: "/home/ghost".to_string(),
            job_lifetime_ms: 5000,
            autosave: true,
            banner: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: EngineConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `path`. A missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("[config] {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.user.is_empty() || self.user.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!("bad user name '{}'", self.user)));
        }
        if !self.home.starts_with('/') {
            return Err(ConfigError::Invalid(format!("home must be absolute: '{}'", self.home)));
        }
        Ok(())
    }
}
