//! In-process providers.
//!
//! Built with [`NativeProvider`] and handed to the host through a factory
//! closure; they skip script execution entirely and go straight to
//! normalization.

use async_trait::async_trait;
use futures_util::future::LocalBoxFuture;
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;

use super::normalize::{platform_or_default, ProviderShape};
use super::traits::{Capability, CapabilityBackend, Payload, ProviderIdentity, SearchKind};
use crate::error::CapabilityError;

type Handler = Rc<dyn Fn(Vec<Payload>) -> LocalBoxFuture<'static, anyhow::Result<Payload>>>;

/// Builder for an in-process provider.
///
/// ```
/// use tunehost::plugins::{Capability, NativeProvider};
///
/// let provider = NativeProvider::new()
///     .platform("local")
///     .capability(Capability::TopLists, |_args| async { Ok(serde_json::json!([])) });
/// assert!(provider.has(Capability::TopLists));
/// ```
#[derive(Clone, Default)]
pub struct NativeProvider {
    platform: Option<String>,
    author: Option<String>,
    version: Option<String>,
    supported_search_types: Option<Vec<SearchKind>>,
    handlers: BTreeMap<Capability, Handler>,
}

impl NativeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn supported_search_types(mut self, kinds: impl IntoIterator<Item = SearchKind>) -> Self {
        self.supported_search_types = Some(kinds.into_iter().collect());
        self
    }

    /// Bind an operation. Arguments arrive in the order the typed
    /// [`Provider`](super::Provider) method documents; returning `Null`
    /// means "no data".
    pub fn capability<F, Fut>(mut self, capability: Capability, handler: F) -> Self
    where
        F: Fn(Vec<Payload>) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<Payload>> + 'static,
    {
        let handler: Handler = Rc::new(move |args| -> LocalBoxFuture<'static, anyhow::Result<Payload>> {
            Box::pin(handler(args))
        });
        self.handlers.insert(capability, handler);
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.handlers.contains_key(&capability)
    }

    pub(crate) fn into_shape(self) -> ProviderShape {
        let mut identity = ProviderIdentity::new(platform_or_default(self.platform));
        identity.author = self.author;
        identity.version = self.version;
        identity.supported_search_types = self.supported_search_types;
        ProviderShape {
            identity,
            backend: Rc::new(NativeBackend {
                handlers: self.handlers,
            }),
        }
    }
}

impl std::fmt::Debug for NativeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeProvider")
            .field("platform", &self.platform)
            .field("capabilities", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

struct NativeBackend {
    handlers: BTreeMap<Capability, Handler>,
}

#[async_trait(?Send)]
impl CapabilityBackend for NativeBackend {
    fn supports(&self, capability: Capability) -> bool {
        self.handlers.contains_key(&capability)
    }

    async fn invoke(
        &self,
        capability: Capability,
        args: Vec<Payload>,
    ) -> Result<Payload, CapabilityError> {
        let Some(handler) = self.handlers.get(&capability) else {
            return Ok(Payload::Null);
        };
        handler(args)
            .await
            .map_err(|err| CapabilityError::Rejected {
                capability,
                message: format!("{err:#}"),
            })
    }
}
