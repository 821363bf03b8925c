//! Host configuration.
//!
//! Loaded from TOML. Unknown keys are reported, not rejected, so an older
//! binary keeps working with a newer config file.

pub mod schema;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub use schema::{
    AppConfig, Config, HttpConfig, PluginsConfig, ProviderPluginConfig, SandboxConfig,
};

impl Config {
    /// Default config file location (`<config_dir>/tunehost/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "tunehost")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse configuration text, logging keys that are not understood.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(text).context("Failed to parse config TOML")?;
        let mut unknown = Vec::new();
        let config: Config = serde_ignored::deserialize(value, |path| {
            unknown.push(path.to_string());
        })
        .context("Invalid config structure")?;

        for key in unknown {
            tracing::warn!(key = %key, "Ignoring unknown config key");
        }
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Load from an explicit path, or the default location when `None`.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// JSON schema of the configuration file.
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(Config);
        serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
    }
}

impl PluginsConfig {
    /// Plugin directory with `~` expanded and relative paths anchored at `base`.
    pub fn resolve_dir(&self, base: &Path) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(&self.dir).as_ref());
        if expanded.is_absolute() {
            expanded
        } else {
            base.join(expanded)
        }
    }
}
