//! Provider plugin runtime.
//!
//! Loads music source providers written as scripts, runs each inside its own
//! QuickJS engine with a fixed set of injected bindings, and exposes the
//! result as a [`Provider`] whose interface never depends on whether the
//! load succeeded.
//!
//! # Isolation model
//!
//! Provider code runs as the body of a function receiving exactly seven
//! bindings (`require`, `__musicfree_require`, `module`, `exports`,
//! `console`, `env`, `process`). Only engine built-ins are global. This is
//! scope control, not a hardened sandbox; engine memory, stack and
//! load-time deadlines bound the damage a misbehaving provider can do.
//!
//! # Configuration
//!
//! ```toml
//! [plugins]
//! enabled = true
//! dir = "~/.config/tunehost/plugins"
//!
//! [plugins.providers.qq]
//! script = "qq.js"
//! ```

pub mod factory;
pub mod fallback;
pub mod host;
pub mod loader;
pub mod native;
pub mod normalize;
pub mod proxy;
pub mod registry;
pub mod traits;

pub use factory::load_configured_provider;
pub use host::{PluginHost, ProviderSource};
pub use loader::{HostEnvironment, SandboxLimits, ScriptLoader, ScriptModule};
pub use native::NativeProvider;
pub use normalize::{Candidate, ProviderShape, RawExport, DEFAULT_PLATFORM};
pub use proxy::Provider;
pub use registry::{ProviderCatalog, ProviderEntry};
pub use traits::{
    Capability, CapabilityBackend, MediaQuality, MediaSource, Payload, ProviderIdentity,
    SearchKind, SearchResult,
};
