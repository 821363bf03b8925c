//! Host runtime for scripted music source providers.
//!
//! Provider scripts are executed in a scoped QuickJS engine with a closed set
//! of injected libraries, normalized into one capability interface, and
//! replaced by a fallback provider whenever loading fails.

pub mod config;
pub mod deps;
pub mod error;
pub mod js;
pub mod plugins;

pub use config::Config;
pub use error::{CapabilityError, NormalizationFailure, ScopeConstructionError};
pub use plugins::{PluginHost, Provider, ProviderSource, ScriptLoader};
