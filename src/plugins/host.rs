//! Plugin host: orchestrates scope construction and normalization and
//! absorbs every load-time failure into the fallback provider.

use std::rc::Rc;
use std::sync::Arc;

use super::loader::ScriptLoader;
use super::native::NativeProvider;
use super::normalize::{normalize, Candidate, RawExport};
use super::proxy::Provider;

type Factory = Rc<dyn Fn() -> anyhow::Result<NativeProvider>>;

/// What a provider is loaded from.
#[derive(Clone)]
pub enum ProviderSource {
    /// Script text run through the execution scope builder
    Script(Arc<str>),
    /// In-process factory whose result skips script execution
    Factory(Factory),
    /// Input that cannot be loaded; always yields the fallback
    Invalid(String),
}

impl ProviderSource {
    pub fn script(text: impl Into<Arc<str>>) -> Self {
        Self::Script(text.into())
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<NativeProvider> + 'static,
    {
        Self::Factory(Rc::new(factory))
    }

    /// Script source from raw file contents. Non-UTF-8 input is `Invalid`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Self::Script(text.into()),
            Err(err) => Self::Invalid(format!("source is not a string: {err}")),
        }
    }
}

impl std::fmt::Debug for ProviderSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Script(text) => f.debug_tuple("Script").field(&text.len()).finish(),
            Self::Factory(_) => f.write_str("Factory"),
            Self::Invalid(reason) => f.debug_tuple("Invalid").field(reason).finish(),
        }
    }
}

/// Owns one long-lived provider and can mint independent ones from the
/// same source.
///
/// Loading never fails from the caller's point of view: diagnostics go to
/// the log and the fallback provider takes the failed provider's place.
pub struct PluginHost {
    loader: Arc<ScriptLoader>,
    source: ProviderSource,
    path: String,
    provider: Provider,
}

impl PluginHost {
    pub async fn load(
        loader: Arc<ScriptLoader>,
        source: ProviderSource,
        path: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let provider = instantiate(&loader, &source, &path).await;
        Self {
            loader,
            source,
            path,
            provider,
        }
    }

    /// Host for a provider that could not be located. Failure has already
    /// been reported by the caller.
    pub(crate) fn unavailable(loader: Arc<ScriptLoader>, path: impl Into<String>, reason: String) -> Self {
        let path = path.into();
        Self {
            provider: Provider::fallback(path.clone()),
            loader,
            source: ProviderSource::Invalid(reason),
            path,
        }
    }

    /// The long-lived provider for this host.
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn source(&self) -> &ProviderSource {
        &self.source
    }

    /// Repeat the full load on the same source. The new provider has its own
    /// module record, initialization future and top-level state.
    pub async fn create_independent_instance(&self) -> Provider {
        instantiate(&self.loader, &self.source, &self.path).await
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("path", &self.path)
            .field("source", &self.source)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

async fn instantiate(loader: &ScriptLoader, source: &ProviderSource, path: &str) -> Provider {
    let raw = match source {
        ProviderSource::Script(text) => match loader.build(text, path).await {
            Ok(module) => RawExport::Script(module),
            Err(err) => {
                tracing::error!(
                    plugin_path = %path,
                    stage = "scope",
                    error = %err,
                    "Provider failed to load, using fallback"
                );
                return Provider::fallback(path);
            }
        },
        ProviderSource::Factory(factory) => match factory() {
            Ok(native) => RawExport::Native(native),
            Err(err) => {
                tracing::error!(
                    plugin_path = %path,
                    stage = "factory",
                    error = %format!("{err:#}"),
                    "Provider factory failed, using fallback"
                );
                return Provider::fallback(path);
            }
        },
        ProviderSource::Invalid(reason) => {
            tracing::error!(
                plugin_path = %path,
                stage = "source",
                error = %reason,
                "Provider source unusable, using fallback"
            );
            return Provider::fallback(path);
        }
    };

    match normalize(raw, path).await {
        Candidate::Valid(shape) => {
            let provider = Provider::from_shape(shape, path);
            tracing::info!(
                plugin_path = %path,
                platform = %provider.platform(),
                version = provider.identity().version.as_deref().unwrap_or("unknown"),
                capabilities = provider.capabilities().len(),
                "Provider loaded"
            );
            provider
        }
        Candidate::Unusable(failure) => {
            tracing::error!(
                plugin_path = %path,
                stage = "normalize",
                error = %failure,
                "Provider export unusable, using fallback"
            );
            Provider::fallback(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::DependencyRegistry;
    use crate::plugins::loader::HostEnvironment;
    use crate::plugins::traits::Capability;

    fn loader() -> Arc<ScriptLoader> {
        Arc::new(ScriptLoader::new(
            Arc::new(DependencyRegistry::empty()),
            HostEnvironment::default(),
        ))
    }

    #[test]
    fn non_utf8_bytes_are_invalid() {
        assert!(matches!(
            ProviderSource::from_bytes(vec![0xff, 0xfe]),
            ProviderSource::Invalid(_)
        ));
        assert!(matches!(
            ProviderSource::from_bytes(b"module.exports = {}".to_vec()),
            ProviderSource::Script(_)
        ));
    }

    #[tokio::test]
    async fn invalid_source_loads_fallback() {
        let host = PluginHost::load(loader(), ProviderSource::Invalid("nope".into()), "x.js").await;
        assert!(host.provider().is_fallback());
        assert_eq!(host.path(), "x.js");
    }

    #[tokio::test]
    async fn failing_factory_loads_fallback() {
        let source = ProviderSource::factory(|| Err(anyhow::anyhow!("not today")));
        let host = PluginHost::load(loader(), source, "factory").await;
        assert!(host.provider().is_fallback());
    }

    #[tokio::test]
    async fn factory_is_invoked_per_instance() {
        let calls = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&calls);
        let source = ProviderSource::factory(move || {
            counter.set(counter.get() + 1);
            Ok(NativeProvider::new().platform("native"))
        });
        let host = PluginHost::load(loader(), source, "factory").await;
        let second = host.create_independent_instance().await;
        assert_eq!(calls.get(), 2);
        assert_eq!(second.platform(), "native");
        assert!(!second.supports(Capability::Search));
    }
}
