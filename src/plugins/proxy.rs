//! Provider handle exposed to callers.
//!
//! Wraps a normalized shape behind typed methods. Every method exists on
//! every provider: an absent operation, or one that resolves `null` /
//! `undefined`, yields the documented "no data" sentinel instead of an
//! error.

use serde::de::DeserializeOwned;
use serde_json::json;
use std::rc::Rc;

use super::normalize::ProviderShape;
use super::traits::{
    Capability, CapabilityBackend, MediaQuality, MediaSource, Payload, ProviderIdentity,
    SearchKind, SearchResult,
};
use crate::error::CapabilityError;

/// A loaded (or fallback) provider.
///
/// Cheap to clone; clones share one immutable instance. Not `Send`: script
/// providers are bound to the engine that loaded them.
#[derive(Clone)]
pub struct Provider {
    inner: Rc<ProviderInner>,
}

struct ProviderInner {
    identity: ProviderIdentity,
    path: String,
    backend: Rc<dyn CapabilityBackend>,
    fallback: bool,
}

impl Provider {
    pub(crate) fn from_shape(shape: ProviderShape, path: impl Into<String>) -> Self {
        Self::with_origin(shape, path.into(), false)
    }

    pub(crate) fn with_origin(shape: ProviderShape, path: String, fallback: bool) -> Self {
        Self {
            inner: Rc::new(ProviderInner {
                identity: shape.identity,
                path,
                backend: shape.backend,
                fallback,
            }),
        }
    }

    pub fn identity(&self) -> &ProviderIdentity {
        &self.inner.identity
    }

    pub fn platform(&self) -> &str {
        &self.inner.identity.platform
    }

    /// Diagnostic path the provider was loaded from.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Whether this is the fallback substituted for a failed load.
    pub fn is_fallback(&self) -> bool {
        self.inner.fallback
    }

    /// Whether the provider implements `capability`.
    pub fn supports(&self, capability: Capability) -> bool {
        self.inner.backend.supports(capability)
    }

    /// Implemented capabilities, in canonical order.
    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|&capability| self.supports(capability))
            .collect()
    }

    /// Paginated search. `page` starts at 1.
    pub async fn search(
        &self,
        keyword: &str,
        page: u32,
        kind: SearchKind,
    ) -> Result<SearchResult, CapabilityError> {
        self.call(
            Capability::Search,
            vec![json!(keyword), json!(page), json!(kind)],
        )
        .await
    }

    /// Playable stream for a track, or `None`.
    pub async fn get_media_source(
        &self,
        track: &Payload,
        quality: MediaQuality,
    ) -> Result<Option<MediaSource>, CapabilityError> {
        self.call(
            Capability::MediaSource,
            vec![track.clone(), json!(quality)],
        )
        .await
    }

    pub async fn get_lyric(&self, track: &Payload) -> Result<Option<Payload>, CapabilityError> {
        self.call(Capability::Lyric, vec![track.clone()]).await
    }

    pub async fn get_album_info(&self, album: &Payload) -> Result<Option<Payload>, CapabilityError> {
        self.call(Capability::AlbumInfo, vec![album.clone()]).await
    }

    /// Sheet (playlist) details; dispatched to `getPlaylistDetail` on
    /// providers that only implement the legacy name.
    pub async fn get_music_sheet_info(
        &self,
        sheet: &Payload,
        page: u32,
    ) -> Result<Option<Payload>, CapabilityError> {
        self.call(Capability::MusicSheetInfo, vec![sheet.clone(), json!(page)])
            .await
    }

    /// Chart groups, in provider order.
    pub async fn get_top_lists(&self) -> Result<Vec<Payload>, CapabilityError> {
        self.call(Capability::TopLists, Vec::new()).await
    }

    pub async fn get_top_list_detail(
        &self,
        chart: &Payload,
    ) -> Result<Option<Payload>, CapabilityError> {
        self.call(Capability::TopListDetail, vec![chart.clone()]).await
    }

    pub async fn get_artist_works(
        &self,
        artist: &Payload,
        page: u32,
        kind: SearchKind,
    ) -> Result<SearchResult, CapabilityError> {
        self.call(
            Capability::ArtistWorks,
            vec![artist.clone(), json!(page), json!(kind)],
        )
        .await
    }

    /// Tracks of an external sheet given its URL or id.
    pub async fn import_music_sheet(&self, url_or_id: &str) -> Result<Vec<Payload>, CapabilityError> {
        self.call(Capability::ImportMusicSheet, vec![json!(url_or_id)])
            .await
    }

    /// Invoke `capability` and decode its result, mapping "nothing" onto the
    /// sentinel (`T::default()`).
    async fn call<T>(&self, capability: Capability, args: Vec<Payload>) -> Result<T, CapabilityError>
    where
        T: DeserializeOwned + Default,
    {
        if !self.supports(capability) {
            tracing::trace!(
                platform = %self.platform(),
                capability = %capability,
                "Capability not implemented, returning empty result"
            );
            return Ok(T::default());
        }

        tracing::debug!(
            platform = %self.platform(),
            capability = %capability,
            "Invoking provider capability"
        );
        let payload = match self.inner.backend.invoke(capability, args).await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(
                    plugin_path = %self.path(),
                    platform = %self.platform(),
                    capability = %capability,
                    error = %err,
                    "Provider capability failed"
                );
                return Err(err);
            }
        };
        decode(capability, payload)
    }
}

fn decode<T>(capability: Capability, payload: Payload) -> Result<T, CapabilityError>
where
    T: DeserializeOwned + Default,
{
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload)
        .map_err(|source| CapabilityError::MalformedPayload { capability, source })
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("identity", &self.inner.identity)
            .field("path", &self.inner.path)
            .field("fallback", &self.inner.fallback)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::native::NativeProvider;

    fn provider(native: NativeProvider) -> Provider {
        Provider::from_shape(native.into_shape(), "native")
    }

    #[tokio::test]
    async fn null_results_map_to_sentinels() {
        let provider = provider(
            NativeProvider::new()
                .capability(Capability::Search, |_| async { Ok(Payload::Null) })
                .capability(Capability::Lyric, |_| async { Ok(Payload::Null) })
                .capability(Capability::TopLists, |_| async { Ok(Payload::Null) }),
        );
        assert_eq!(
            provider.search("q", 1, SearchKind::Music).await.unwrap(),
            SearchResult::default()
        );
        assert!(provider.get_lyric(&json!({})).await.unwrap().is_none());
        assert!(provider.get_top_lists().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn arguments_follow_the_documented_order() {
        let provider = provider(NativeProvider::new().capability(
            Capability::ArtistWorks,
            |args| async move { Ok(json!({"isEnd": true, "data": args})) },
        ));
        let works = provider
            .get_artist_works(&json!({"id": "ar"}), 3, SearchKind::Album)
            .await
            .unwrap();
        assert_eq!(works.is_end, Some(true));
        assert_eq!(works.data, vec![json!({"id": "ar"}), json!(3), json!("album")]);
    }

    #[tokio::test]
    async fn malformed_payloads_are_reported() {
        let provider = provider(
            NativeProvider::new()
                .capability(Capability::MediaSource, |_| async { Ok(json!({"headers": {}})) })
                .capability(Capability::TopLists, |_| async { Ok(json!("charts")) }),
        );
        let err = provider
            .get_media_source(&json!({}), MediaQuality::Standard)
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::MalformedPayload { capability: Capability::MediaSource, .. }));
        assert!(provider.get_top_lists().await.is_err());
    }

    #[test]
    fn clones_share_one_instance() {
        let provider = provider(NativeProvider::new().platform("p"));
        let clone = provider.clone();
        assert!(Rc::ptr_eq(&provider.inner, &clone.inner));
        assert!(!clone.is_fallback());
    }
}
