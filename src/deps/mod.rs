//! Dependency registry: the closed set of libraries provider scripts may
//! `require`.
//!
//! Each entry maps a logical module name (as provider code spells it) to a
//! host implementation that is instantiated into a provider's engine on
//! first use. The set is fixed at startup; providers cannot add names.

pub mod bigint;
pub mod crypto;
pub mod date;
pub mod entities;
pub mod html;
pub mod http;
pub mod qs;

use anyhow::Result;
use rquickjs::{Ctx, Function, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{HttpConfig, SandboxConfig};

/// A library that can be materialized inside a provider's engine.
pub trait HostModule: Send + Sync {
    /// Logical name used with `require`.
    fn name(&self) -> &'static str;

    /// Build a fresh JS value exposing the library.
    fn instantiate<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>>;
}

/// Process-wide, read-only mapping from module names to implementations.
pub struct DependencyRegistry {
    modules: BTreeMap<&'static str, Arc<dyn HostModule>>,
}

impl DependencyRegistry {
    /// Registry with the standard provider library set and default engine
    /// limits.
    pub fn standard(http: &HttpConfig) -> Result<Self> {
        Self::configured(http, &SandboxConfig::default())
    }

    /// Standard library set sized for `sandbox`.
    pub fn configured(http: &HttpConfig, sandbox: &SandboxConfig) -> Result<Self> {
        let memory_limit = sandbox.memory_limit_mb.saturating_mul(1024 * 1024);
        let modules: Vec<Arc<dyn HostModule>> = vec![
            Arc::new(http::AxiosModule::new(http)?),
            Arc::new(crypto::CryptoJsModule),
            Arc::new(date::DayjsModule),
            Arc::new(bigint::BigIntegerModule::new(memory_limit)),
            Arc::new(qs::QsModule),
            Arc::new(html::CheerioModule),
            Arc::new(entities::HeModule),
        ];
        Ok(Self::from_modules(modules))
    }

    /// Registry with an explicit module set.
    pub fn from_modules(modules: impl IntoIterator<Item = Arc<dyn HostModule>>) -> Self {
        let modules = modules
            .into_iter()
            .map(|module| (module.name(), module))
            .collect();
        Self { modules }
    }

    /// Registry with no modules; every `require` yields `null`.
    pub fn empty() -> Self {
        Self {
            modules: BTreeMap::new(),
        }
    }

    /// Look up a module. `None` is the "not found" signal; callers decide
    /// whether that is fatal.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn HostModule>> {
        self.modules.get(name).cloned()
    }

    /// Registered module names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.modules.keys().copied().collect()
    }
}

impl std::fmt::Debug for DependencyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

/// Caches per scope and aliases `default` onto each module so that both
/// `require('x')` and `require('x').default` styles resolve identically.
const REQUIRE_GLUE: &str = r#"
(function (resolve) {
    const cache = Object.create(null);
    return function require(name) {
        const key = String(name);
        if (key in cache) {
            return cache[key];
        }
        const module = resolve(key);
        if (module === null || module === undefined) {
            return null;
        }
        if (module.default === undefined) {
            module.default = module;
        }
        cache[key] = module;
        return module;
    };
})
"#;

/// Build the module-resolution function injected into one execution scope.
pub fn require_function<'js>(
    ctx: &Ctx<'js>,
    registry: Arc<DependencyRegistry>,
    plugin_path: &str,
) -> rquickjs::Result<Function<'js>> {
    let plugin_path = plugin_path.to_string();
    let resolve = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, name: String| -> rquickjs::Result<Value<'js>> {
            match registry.resolve(&name) {
                Some(module) => {
                    tracing::debug!(plugin_path = %plugin_path, module = %name, "Provider required module");
                    module.instantiate(&ctx)
                }
                None => {
                    tracing::warn!(plugin_path = %plugin_path, module = %name, "Provider required unknown module");
                    Ok(Value::new_null(ctx))
                }
            }
        },
    )?;
    let factory: Function = ctx.eval(REQUIRE_GLUE)?;
    factory.call((resolve,))
}
