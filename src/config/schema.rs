use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level host configuration (`config.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// Application identity reported to providers
    pub app: AppConfig,
    /// HTTP client behind the `axios` module
    pub http: HttpConfig,
    /// Engine limits for provider scripts
    pub sandbox: SandboxConfig,
    /// Provider catalog
    pub plugins: PluginsConfig,
    /// Values returned by `env.getUserVariables()`
    pub user_variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AppConfig {
    /// Reported as `env.appVersion` and `process.version`
    pub version: String,
    /// Reported as `env.lang`
    pub lang: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".into(),
            lang: "zh-CN".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct HttpConfig {
    /// Default request timeout in milliseconds
    pub timeout_ms: u64,
    /// User-Agent sent when a provider does not set one
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            user_agent: concat!("tunehost/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SandboxConfig {
    /// Engine heap limit per provider instance, in MiB
    pub memory_limit_mb: usize,
    /// Engine stack limit, in KiB
    pub max_stack_kb: usize,
    /// Deadline for the synchronous top-level body, in milliseconds
    pub eval_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 64,
            max_stack_kb: 1024,
            eval_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PluginsConfig {
    /// Whether configured providers are loaded at all
    pub enabled: bool,
    /// Directory holding provider scripts (relative to the config file)
    pub dir: String,
    /// Explicitly configured providers keyed by id
    pub providers: BTreeMap<String, ProviderPluginConfig>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "plugins".into(),
            providers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProviderPluginConfig {
    /// Script file, relative to `plugins.dir` unless absolute
    pub script: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}
