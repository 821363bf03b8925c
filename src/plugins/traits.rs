//! Provider interface types.
//!
//! These types describe the canonical capability contract every provider is
//! normalized into, and the payloads exchanged with provider code.

use async_trait::async_trait;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::CapabilityError;

/// Opaque provider payload (track, album, sheet, chart, lyric).
pub type Payload = serde_json::Value;

/// Named, optional, asynchronous operations of the provider interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Search,
    MediaSource,
    Lyric,
    AlbumInfo,
    MusicSheetInfo,
    TopLists,
    TopListDetail,
    ArtistWorks,
    ImportMusicSheet,
}

impl Capability {
    pub const ALL: [Capability; 9] = [
        Capability::Search,
        Capability::MediaSource,
        Capability::Lyric,
        Capability::AlbumInfo,
        Capability::MusicSheetInfo,
        Capability::TopLists,
        Capability::TopListDetail,
        Capability::ArtistWorks,
        Capability::ImportMusicSheet,
    ];

    /// Property names a provider may use for this capability, in lookup order.
    pub fn method_names(self) -> &'static [&'static str] {
        match self {
            Self::Search => &["search"],
            Self::MediaSource => &["getMediaSource"],
            Self::Lyric => &["getLyric"],
            Self::AlbumInfo => &["getAlbumInfo"],
            Self::MusicSheetInfo => &["getMusicSheetInfo", "getPlaylistDetail"],
            Self::TopLists => &["getTopLists"],
            Self::TopListDetail => &["getTopListDetail"],
            Self::ArtistWorks => &["getArtistWorks"],
            Self::ImportMusicSheet => &["importMusicSheet"],
        }
    }

    /// Canonical method name.
    pub fn as_str(self) -> &'static str {
        self.method_names()[0]
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of search result a provider may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Music,
    Album,
    Artist,
    Sheet,
    Lyric,
}

impl SearchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Music => "music",
            Self::Album => "album",
            Self::Artist => "artist",
            Self::Sheet => "sheet",
            Self::Lyric => "lyric",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "music" => Some(Self::Music),
            "album" => Some(Self::Album),
            "artist" => Some(Self::Artist),
            "sheet" => Some(Self::Sheet),
            "lyric" => Some(Self::Lyric),
            _ => None,
        }
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality hint passed to `getMediaSource`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaQuality {
    Low,
    #[default]
    Standard,
    High,
    Super,
}

impl MediaQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Standard => "standard",
            Self::High => "high",
            Self::Super => "super",
        }
    }
}

/// Identity fields of a normalized provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderIdentity {
    /// Platform identifier, never empty
    pub platform: String,
    /// Display author
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Provider version (semver recommended)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Supported search kinds, in provider order
    #[serde(rename = "supportedSearchType", skip_serializing_if = "Option::is_none")]
    pub supported_search_types: Option<Vec<SearchKind>>,
}

impl ProviderIdentity {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            author: None,
            version: None,
            supported_search_types: None,
        }
    }
}

/// Paginated result of `search` and `getArtistWorks`.
///
/// `Default` is the "no data" sentinel. Fields this host does not model
/// are kept in `extra` and serialized back out unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_end: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_count")]
    pub total: Option<u64>,
    #[serde(deserialize_with = "null_as_default")]
    pub data: Vec<Payload>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Payload>,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Playable stream location returned by `getMediaSource`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSource {
    pub url: String,
    #[serde(default, deserialize_with = "header_values")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// `null` reads as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Counts arrive as numbers or numeric strings; anything unreadable is absent.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Payload::deserialize(deserializer)?;
    Ok(match value {
        Payload::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|n| n.is_finite() && *n >= 0.0).map(|n| n as u64)),
        Payload::String(text) => {
            let text = text.trim();
            text.parse::<u64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite() && *n >= 0.0)
                    .map(|n| n as u64)
            })
        }
        Payload::Null => None,
        other => {
            return Err(de::Error::invalid_type(
                unexpected(&other),
                &"a number or numeric string",
            ))
        }
    })
}

/// Header values as strings. Scalars are stringified and `null` entries dropped.
fn header_values<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Map<String, Payload>>::deserialize(deserializer)?;
    let mut headers = BTreeMap::new();
    for (name, value) in raw.unwrap_or_default() {
        let value = match value {
            Payload::String(text) => text,
            Payload::Number(number) => number.to_string(),
            Payload::Bool(flag) => flag.to_string(),
            Payload::Null => continue,
            other => {
                return Err(de::Error::invalid_type(
                    unexpected(&other),
                    &"a header value string",
                ))
            }
        };
        headers.insert(name, value);
    }
    Ok(headers)
}

fn unexpected(value: &Payload) -> de::Unexpected<'_> {
    match value {
        Payload::Array(_) => de::Unexpected::Seq,
        Payload::Object(_) => de::Unexpected::Map,
        Payload::Bool(flag) => de::Unexpected::Bool(*flag),
        _ => de::Unexpected::Other("value"),
    }
}

/// Bound capability operations behind a provider.
///
/// Implemented by script-backed and in-process providers. Arguments and
/// results travel as JSON so both sides share one calling convention.
#[async_trait(?Send)]
pub trait CapabilityBackend {
    /// Whether the operation is present on the provider.
    fn supports(&self, capability: Capability) -> bool;

    /// Invoke a present operation and wait for it to settle.
    async fn invoke(
        &self,
        capability: Capability,
        args: Vec<Payload>,
    ) -> Result<Payload, CapabilityError>;
}
