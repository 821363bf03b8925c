//! Fallback provider.
//!
//! Substituted whenever a load fails at any stage. It has no capabilities,
//! so every typed call on the resulting [`Provider`] resolves to its "no
//! data" sentinel and nothing ever rejects.

use async_trait::async_trait;
use std::rc::Rc;

use super::normalize::{ProviderShape, DEFAULT_PLATFORM};
use super::proxy::Provider;
use super::traits::{Capability, CapabilityBackend, Payload, ProviderIdentity};
use crate::error::CapabilityError;

pub struct FallbackBackend;

#[async_trait(?Send)]
impl CapabilityBackend for FallbackBackend {
    fn supports(&self, _capability: Capability) -> bool {
        false
    }

    async fn invoke(
        &self,
        _capability: Capability,
        _args: Vec<Payload>,
    ) -> Result<Payload, CapabilityError> {
        Ok(Payload::Null)
    }
}

impl Provider {
    /// The always-valid provider used in place of one that failed to load.
    pub fn fallback(path: impl Into<String>) -> Self {
        let shape = ProviderShape {
            identity: ProviderIdentity::new(DEFAULT_PLATFORM),
            backend: Rc::new(FallbackBackend),
        };
        Self::with_origin(shape, path.into(), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::traits::{MediaQuality, SearchKind};
    use serde_json::json;

    #[tokio::test]
    async fn every_operation_resolves_to_its_sentinel() {
        let provider = Provider::fallback("./missing.js");
        assert!(provider.is_fallback());
        assert_eq!(provider.platform(), DEFAULT_PLATFORM);
        assert_eq!(provider.path(), "./missing.js");
        let item = json!({"id": "1"});

        assert!(provider.search("q", 1, SearchKind::Music).await.unwrap().is_empty());
        assert!(provider
            .get_media_source(&item, MediaQuality::High)
            .await
            .unwrap()
            .is_none());
        assert!(provider.get_lyric(&item).await.unwrap().is_none());
        assert!(provider.get_album_info(&item).await.unwrap().is_none());
        assert!(provider.get_music_sheet_info(&item, 1).await.unwrap().is_none());
        assert!(provider.get_top_lists().await.unwrap().is_empty());
        assert!(provider.get_top_list_detail(&item).await.unwrap().is_none());
        assert!(provider
            .get_artist_works(&item, 1, SearchKind::Album)
            .await
            .unwrap()
            .is_empty());
        assert!(provider.import_music_sheet("https://x").await.unwrap().is_empty());
    }

    #[test]
    fn supports_nothing() {
        let provider = Provider::fallback("x");
        assert!(Capability::ALL.iter().all(|&cap| !provider.supports(cap)));
        assert!(provider.capabilities().is_empty());
    }
}
