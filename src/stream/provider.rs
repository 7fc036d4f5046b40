//! Source provider trait and the common streaming model.
//!
//! A [`SourceProvider`] knows how to turn an [`EpisodeRequest`] into
//! normalized [`StreamingSource`]s for one upstream (the primary catalog,
//! WatchAnimeWorld, Animeya, Animelok, AnimeHindiDubbed, or store-curated
//! custom sources).

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::fingerprint::DESKTOP_CHROME_UA;
use crate::http_client::FetchError;

/// Upstream family a source came from.
///
/// Attached by the adapter when the source is created; group flags are
/// computed from this tag, never from labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderGroup {
    Primary,
    WatchAnimeWorld,
    AnimeHindiDubbed,
    Animelok,
    Animeya,
    Custom,
}

impl ProviderGroup {
    /// Stable lowercase tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::WatchAnimeWorld => "watchanimeworld",
            Self::AnimeHindiDubbed => "animehindidubbed",
            Self::Animelok => "animelok",
            Self::Animeya => "animeya",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ProviderGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One playable stream option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingSource {
    /// Absolute upstream URL.
    pub url: String,
    /// HLS manifest rather than a direct file or embed page.
    pub is_manifest: bool,
    pub quality: String,
    /// Display language (`Japanese`, `Hindi`, ...).
    pub language: String,
    /// Provider-namespaced tag, e.g. `animelok-0-hin`.
    pub language_tag: String,
    pub is_dubbed: bool,
    pub provider_label: String,
    /// Page meant for an iframe rather than a media URL.
    pub is_embeddable: bool,
    /// The URL still needs a browser to yield the media URL.
    pub requires_headless_resolution: bool,
    pub group: ProviderGroup,
}

/// Subtitle track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtitle {
    pub language: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Intro/outro window in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkipWindow {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
}

/// Headers the player must send to the upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHeaders {
    #[serde(rename = "Referer")]
    pub referer: String,
    #[serde(rename = "User-Agent")]
    pub user_agent: String,
}

impl Default for RequestHeaders {
    fn default() -> Self {
        Self {
            referer: "https://megacloud.blog/".to_string(),
            user_agent: DESKTOP_CHROME_UA.to_string(),
        }
    }
}

/// Next-episode hint passed through from the primary catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextEpisodeEstimate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default)]
    pub label: String,
}

/// What the aggregator asks every provider for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRequest {
    /// Catalog episode key, e.g. `one-piece-100?ep=2142`.
    pub episode_key: String,
    pub anime_name: Option<String>,
    pub episode_number: Option<u32>,
    pub server: String,
    pub category: String,
    pub user_id: Option<String>,
    /// MAL id, when already known.
    pub mal_id: Option<u64>,
}

impl EpisodeRequest {
    pub const DEFAULT_SERVER: &'static str = "hd-2";
    pub const DEFAULT_CATEGORY: &'static str = "sub";

    pub fn new(episode_key: impl Into<String>) -> Self {
        Self {
            episode_key: episode_key.into(),
            anime_name: None,
            episode_number: None,
            server: Self::DEFAULT_SERVER.to_string(),
            category: Self::DEFAULT_CATEGORY.to_string(),
            user_id: None,
            mal_id: None,
        }
    }

    #[must_use]
    pub fn with_mal_id(mut self, mal_id: Option<u64>) -> Self {
        self.mal_id = mal_id;
        self
    }

    /// Catalog anime id: the episode key before any `?`.
    pub fn catalog_id(&self) -> Option<&str> {
        let id = self
            .episode_key
            .split('?')
            .next()
            .unwrap_or_default()
            .trim();
        (!id.is_empty()).then_some(id)
    }

    /// Title slug: the catalog id without its trailing `-<digits>`.
    pub fn anime_slug(&self) -> Option<&str> {
        let id = self.catalog_id()?;
        match id.rsplit_once('-') {
            Some((slug, tail))
                if !slug.is_empty() && !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) =>
            {
                Some(slug)
            }
            _ => Some(id),
        }
    }

    pub fn is_dub(&self) -> bool {
        self.category.eq_ignore_ascii_case("dub")
    }
}

/// Everything one provider call yields.
#[derive(Debug, Clone, Default)]
pub struct ProviderOutput {
    pub sources: Vec<StreamingSource>,
    pub subtitles: Vec<Subtitle>,
    pub headers: Option<RequestHeaders>,
    pub mal_id: Option<u64>,
    pub anilist_id: Option<u64>,
    pub intro: Option<SkipWindow>,
    pub outro: Option<SkipWindow>,
    pub next_episode_estimates: Option<Vec<NextEpisodeEstimate>>,
}

impl From<Vec<StreamingSource>> for ProviderOutput {
    fn from(sources: Vec<StreamingSource>) -> Self {
        Self {
            sources,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("unexpected payload: {0}")]
    Payload(String),

    #[error("upstream rejected the request: {0}")]
    Rejected(String),

    #[error("provider is not configured: {0}")]
    Unavailable(&'static str),
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        Self::Payload(e.to_string())
    }
}

/// Trait for upstream source providers.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Short lowercase provider name (e.g. `"animelok"`).
    fn name(&self) -> &'static str;

    fn group(&self) -> ProviderGroup;

    /// Whether [`fetch_sources`](Self::fetch_sources) needs
    /// `EpisodeRequest::mal_id` to be filled in.
    fn needs_mal_id(&self) -> bool {
        false
    }

    async fn fetch_sources(&self, request: &EpisodeRequest) -> Result<ProviderOutput, ProviderError>;
}

/// Manifest inference from the URL when the upstream doesn't say.
pub fn looks_like_manifest(url: &str) -> bool {
    url.to_ascii_lowercase().contains(".m3u8")
}

/// Trimmed URL if it is absolute http(s).
pub fn absolute_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(raw.to_string()),
        _ => None,
    }
}

/// Drop sources whose URL isn't absolute.
pub fn retain_absolute(sources: Vec<StreamingSource>) -> Vec<StreamingSource> {
    sources
        .into_iter()
        .filter_map(|mut source| match absolute_url(&source.url) {
            Some(url) => {
                source.url = url;
                Some(source)
            }
            None => {
                debug!(group = %source.group, url = %source.url, "Dropping source with relative URL");
                None
            }
        })
        .collect()
}

/// Numeric id that may arrive as a number or a string; zero means absent.
pub(crate) fn lenient_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|id| *id > 0))
}

/// Catalog ids are slugs: ASCII letters, digits and `-`.
///
/// Ids are spliced into URL paths and store filters, so anything else is
/// refused before a request is built.
pub fn is_catalog_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_id_charset() {
        assert!(is_catalog_id("one-piece-100"));
        assert!(is_catalog_id("FMA-1"));
        assert!(!is_catalog_id(""));
        assert!(!is_catalog_id("../admin"));
        assert!(!is_catalog_id("x,anime_id.is.null)"));
        assert!(!is_catalog_id("a b"));
    }

    fn source(url: &str) -> StreamingSource {
        StreamingSource {
            url: url.to_string(),
            is_manifest: false,
            quality: "auto".to_string(),
            language: "Japanese".to_string(),
            language_tag: "custom-1".to_string(),
            is_dubbed: false,
            provider_label: "Test".to_string(),
            is_embeddable: false,
            requires_headless_resolution: false,
            group: ProviderGroup::Custom,
        }
    }

    #[test]
    fn test_catalog_id_and_slug() {
        let req = EpisodeRequest::new("one-piece-100?ep=2142");
        assert_eq!(req.catalog_id(), Some("one-piece-100"));
        assert_eq!(req.anime_slug(), Some("one-piece"));

        let req = EpisodeRequest::new("naruto");
        assert_eq!(req.anime_slug(), Some("naruto"));

        let req = EpisodeRequest::new("86-eighty-six-15722");
        assert_eq!(req.anime_slug(), Some("86-eighty-six"));

        assert_eq!(EpisodeRequest::new("?ep=1").catalog_id(), None);
    }

    #[test]
    fn test_defaults() {
        let req = EpisodeRequest::new("x?ep=1");
        assert_eq!(req.server, "hd-2");
        assert_eq!(req.category, "sub");
        assert!(!req.is_dub());
    }

    #[test]
    fn test_manifest_inference() {
        assert!(looks_like_manifest("https://cdn.example.com/master.m3u8?token=1"));
        assert!(looks_like_manifest("https://cdn.example.com/INDEX.M3U8"));
        assert!(!looks_like_manifest("https://cdn.example.com/video.mp4"));
    }

    #[test]
    fn test_relative_urls_are_dropped() {
        let kept = retain_absolute(vec![
            source(" https://cdn.example.com/a.m3u8 "),
            source("/relative/b.m3u8"),
            source("ftp://cdn.example.com/c.mp4"),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].url, "https://cdn.example.com/a.m3u8");
    }

    #[test]
    fn test_group_serializes_lowercase() {
        let json = serde_json::to_value(source("https://a.example/x")).unwrap();
        assert_eq!(json["group"], "custom");
        assert_eq!(json["isManifest"], false);
        assert_eq!(json["languageTag"], "custom-1");
        assert_eq!(ProviderGroup::WatchAnimeWorld.to_string(), "watchanimeworld");
    }

    #[test]
    fn test_lenient_id() {
        #[derive(Deserialize)]
        struct Ids {
            #[serde(default, deserialize_with = "lenient_id")]
            id: Option<u64>,
        }
        let parse = |s: &str| serde_json::from_str::<Ids>(s).unwrap().id;
        assert_eq!(parse(r#"{"id": 21}"#), Some(21));
        assert_eq!(parse(r#"{"id": "5114"}"#), Some(5114));
        assert_eq!(parse(r#"{"id": 0}"#), None);
        assert_eq!(parse(r#"{"id": null}"#), None);
        assert_eq!(parse("{}"), None);
    }
}
