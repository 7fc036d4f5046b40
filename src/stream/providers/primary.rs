//! Primary catalog provider (TatakaiAPI, with the HiAnime API as fallback).
//!
//! Both catalogs expose the same episode-sources payload; they differ only
//! in envelope (`{status: 200, data}` vs `{success: true, data}`) and base
//! URL. [`CatalogClient`] also serves the identifier resolver, which needs
//! anime metadata and episode lists from the same API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::stream::provider::{
    is_catalog_id, lenient_id, looks_like_manifest, retain_absolute, EpisodeRequest,
    NextEpisodeEstimate, ProviderError, ProviderGroup, ProviderOutput, RequestHeaders, SkipWindow,
    SourceProvider, StreamingSource, Subtitle,
};
use crate::stream::relay::RelayClient;

/// Which catalog API answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Catalog {
    Tatakai,
    HiAnime,
}

impl Catalog {
    fn label(self) -> &'static str {
        match self {
            Self::Tatakai => "TatakaiAPI",
            Self::HiAnime => "HiAnime",
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeSourcesPayload {
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    sources: Vec<CatalogSource>,
    #[serde(default)]
    tracks: Vec<CatalogTrack>,
    #[serde(default)]
    subtitles: Vec<CatalogTrack>,
    #[serde(default, rename = "malID", alias = "malId", deserialize_with = "lenient_id")]
    mal_id: Option<u64>,
    #[serde(default, rename = "anilistID", alias = "anilistId", deserialize_with = "lenient_id")]
    anilist_id: Option<u64>,
    #[serde(default)]
    intro: Option<SkipWindow>,
    #[serde(default)]
    outro: Option<SkipWindow>,
    #[serde(default)]
    next_episode_estimates: Option<Vec<NextEpisodeEstimate>>,
}

#[derive(Debug, Deserialize)]
struct CatalogSource {
    url: String,
    #[serde(default, rename = "isM3U8")]
    is_m3u8: Option<bool>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    quality: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogTrack {
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    src: Option<String>,
    #[serde(default)]
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnimeInfoPayload {
    anime: AnimeEnvelope,
}

#[derive(Debug, Deserialize)]
struct AnimeEnvelope {
    info: AnimeInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnimeInfo {
    #[serde(default, alias = "malID", deserialize_with = "lenient_id")]
    mal_id: Option<u64>,
    #[serde(default, alias = "anilistID", deserialize_with = "lenient_id")]
    anilist_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EpisodesPayload {
    #[serde(default)]
    episodes: Vec<CatalogEpisode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEpisode {
    episode_id: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for the primary and secondary catalog APIs.
pub struct CatalogClient {
    relay: Arc<RelayClient>,
    tatakai_base: String,
    hianime_base: String,
}

impl CatalogClient {
    pub fn new(
        relay: Arc<RelayClient>,
        tatakai_base: impl Into<String>,
        hianime_base: impl Into<String>,
    ) -> Self {
        Self {
            relay,
            tatakai_base: tatakai_base.into().trim_end_matches('/').to_string(),
            hianime_base: hianime_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn tatakai_base(&self) -> &str {
        &self.tatakai_base
    }

    fn endpoint(&self, catalog: Catalog, path: &str, query: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let base = match catalog {
            Catalog::Tatakai => format!("{}/hianime", self.tatakai_base),
            Catalog::HiAnime => self.hianime_base.clone(),
        };
        Url::parse_with_params(&format!("{base}{path}"), query)
            .map_err(|e| ProviderError::Payload(format!("bad catalog URL: {e}")))
    }

    fn referer_for(url: &Url) -> String {
        url.origin().ascii_serialization()
    }

    async fn episode_sources(
        &self,
        catalog: Catalog,
        request: &EpisodeRequest,
    ) -> Result<EpisodeSourcesPayload, ProviderError> {
        let url = self.endpoint(
            catalog,
            "/episode/sources",
            &[
                ("animeEpisodeId", request.episode_key.as_str()),
                ("server", request.server.as_str()),
                ("category", request.category.as_str()),
            ],
        )?;
        let referer = Self::referer_for(&url);
        self.relay.get_data(&url, &referer).await
    }

    /// Episode sources from the primary catalog, falling back to the
    /// secondary catalog.
    pub async fn fetch_episode(&self, request: &EpisodeRequest) -> Result<ProviderOutput, ProviderError> {
        match self.episode_sources(Catalog::Tatakai, request).await {
            Ok(payload) => return Ok(map_payload(payload, Catalog::Tatakai, request)),
            Err(e) => warn!(error = %e, episode = %request.episode_key, "Primary catalog failed, trying secondary"),
        }
        let payload = self.episode_sources(Catalog::HiAnime, request).await?;
        Ok(map_payload(payload, Catalog::HiAnime, request))
    }

    /// MAL/AniList ids from the anime info page.
    pub async fn anime_ids(&self, catalog_id: &str) -> Result<(Option<u64>, Option<u64>), ProviderError> {
        check_catalog_id(catalog_id)?;
        let url = self.endpoint(Catalog::HiAnime, &format!("/anime/{catalog_id}"), &[])?;
        let payload: AnimeInfoPayload = self.relay.get_data(&url, &Self::referer_for(&url)).await?;
        Ok((payload.anime.info.mal_id, payload.anime.info.anilist_id))
    }

    /// Id of the first listed episode.
    pub async fn first_episode_id(&self, catalog_id: &str) -> Result<Option<String>, ProviderError> {
        check_catalog_id(catalog_id)?;
        let url = self.endpoint(Catalog::HiAnime, &format!("/anime/{catalog_id}/episodes"), &[])?;
        let payload: EpisodesPayload = self.relay.get_data(&url, &Self::referer_for(&url)).await?;
        Ok(payload.episodes.into_iter().next().map(|e| e.episode_id))
    }
}

fn check_catalog_id(catalog_id: &str) -> Result<(), ProviderError> {
    if is_catalog_id(catalog_id) {
        Ok(())
    } else {
        Err(ProviderError::Rejected(format!("invalid catalog id {catalog_id:?}")))
    }
}

fn map_payload(payload: EpisodeSourcesPayload, catalog: Catalog, request: &EpisodeRequest) -> ProviderOutput {
    let dubbed = request.is_dub();
    let language = if dubbed { "English" } else { "Japanese" };

    let sources = payload
        .sources
        .into_iter()
        .map(|s| {
            let is_manifest = s.is_m3u8.unwrap_or_else(|| {
                s.kind.as_deref().is_some_and(|k| k.eq_ignore_ascii_case("hls"))
                    || looks_like_manifest(&s.url)
            });
            StreamingSource {
                url: s.url,
                is_manifest,
                quality: s.quality.unwrap_or_else(|| "auto".to_string()),
                language: language.to_string(),
                language_tag: format!("primary-{}", request.category),
                is_dubbed: dubbed,
                provider_label: catalog.label().to_string(),
                is_embeddable: false,
                requires_headless_resolution: false,
                group: ProviderGroup::Primary,
            }
        })
        .collect();

    let tracks = if payload.tracks.is_empty() {
        payload.subtitles
    } else {
        payload.tracks
    };
    let subtitles = tracks
        .into_iter()
        .filter_map(|t| {
            let url = t.url.or(t.src).or(t.file)?;
            let language = t.lang.clone().or_else(|| t.label.clone())?;
            // thumbnail sprites ride along in the track list
            if language.eq_ignore_ascii_case("thumbnails") {
                return None;
            }
            Some(Subtitle {
                language,
                url,
                label: t.label,
            })
        })
        .collect();

    let headers = payload.headers.map(|h| {
        let get = |name: &str| {
            h.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };
        let fallback = RequestHeaders::default();
        RequestHeaders {
            referer: get("referer").unwrap_or(fallback.referer),
            user_agent: get("user-agent").unwrap_or(fallback.user_agent),
        }
    });

    let output = ProviderOutput {
        sources: retain_absolute(sources),
        subtitles,
        headers,
        mal_id: payload.mal_id,
        anilist_id: payload.anilist_id,
        intro: payload.intro,
        outro: payload.outro,
        next_episode_estimates: payload.next_episode_estimates,
    };
    debug!(catalog = catalog.label(), sources = output.sources.len(), "Catalog sources mapped");
    output
}

/// Primary catalog as a [`SourceProvider`].
pub struct PrimaryCatalogProvider {
    client: Arc<CatalogClient>,
}

impl PrimaryCatalogProvider {
    pub fn new(client: Arc<CatalogClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceProvider for PrimaryCatalogProvider {
    fn name(&self) -> &'static str {
        "primary"
    }

    fn group(&self) -> ProviderGroup {
        ProviderGroup::Primary
    }

    async fn fetch_sources(&self, request: &EpisodeRequest) -> Result<ProviderOutput, ProviderError> {
        self.client.fetch_episode(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::tests::ScriptedTransport;
    use crate::http_client::RetryingFetcher;
    use crate::identity::ClientIdentity;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const TATAKAI_BODY: &str = r#"{
        "status": 200,
        "data": {
            "headers": {"Referer": "https://megacloud.blog/", "User-Agent": "Mozilla/5.0"},
            "sources": [
                {"url": "https://cdn.example.com/master.m3u8", "isM3U8": true, "type": "hls"},
                {"url": "/relative.m3u8", "isM3U8": true}
            ],
            "tracks": [
                {"lang": "English", "url": "https://cdn.example.com/en.vtt"},
                {"lang": "thumbnails", "url": "https://cdn.example.com/thumbs.vtt"}
            ],
            "malID": 21,
            "anilistID": "21",
            "intro": {"start": 31, "end": 120},
            "outro": {"start": 1300, "end": 1390}
        }
    }"#;

    fn client(transport: Arc<ScriptedTransport>) -> CatalogClient {
        let fetcher = Arc::new(
            RetryingFetcher::new(transport)
                .with_max_attempts(1)
                .with_backoff(Duration::from_millis(1)),
        );
        let relay = Arc::new(RelayClient::new(fetcher, Arc::new(ClientIdentity::fixed("t"))));
        CatalogClient::new(relay, "https://tatakai.example.com/api/v1", "https://hianime.example.com/api/v2/hianime")
    }

    #[tokio::test]
    async fn maps_tatakai_payload() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok((200, TATAKAI_BODY))]));
        let out = client(transport)
            .fetch_episode(&EpisodeRequest::new("one-piece-100?ep=2142"))
            .await
            .unwrap();

        assert_eq!(out.sources.len(), 1);
        let src = &out.sources[0];
        assert!(src.is_manifest);
        assert_eq!(src.provider_label, "TatakaiAPI");
        assert_eq!(src.language_tag, "primary-sub");
        assert_eq!(src.group, ProviderGroup::Primary);

        assert_eq!(out.subtitles.len(), 1);
        assert_eq!(out.subtitles[0].language, "English");
        assert_eq!(out.mal_id, Some(21));
        assert_eq!(out.anilist_id, Some(21));
        assert_eq!(out.intro.unwrap().end, 120.0);
        assert_eq!(out.headers.unwrap().user_agent, "Mozilla/5.0");
    }

    #[tokio::test]
    async fn falls_back_to_secondary_catalog() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok((404, "{}")),
            Ok((
                200,
                r#"{"success": true, "data": {"sources": [{"url": "https://cdn.example.com/b.m3u8"}], "subtitles": [{"label": "Spanish", "src": "https://cdn.example.com/es.vtt"}]}}"#,
            )),
        ]));
        let mut request = EpisodeRequest::new("one-piece-100?ep=2142");
        request.category = "dub".to_string();
        let out = client(transport.clone()).fetch_episode(&request).await.unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.sources[0].provider_label, "HiAnime");
        assert!(out.sources[0].is_manifest);
        assert!(out.sources[0].is_dubbed);
        assert_eq!(out.sources[0].language, "English");
        assert_eq!(out.subtitles[0].language, "Spanish");
        assert!(out.headers.is_none());
    }

    #[tokio::test]
    async fn fails_when_both_catalogs_fail() {
        let transport = Arc::new(ScriptedTransport::statuses(&[404, 403]));
        let err = client(transport)
            .fetch_episode(&EpisodeRequest::new("x?ep=1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Fetch(_)));
    }

    #[tokio::test]
    async fn reads_anime_ids_and_first_episode() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok((200, r#"{"success": true, "data": {"anime": {"info": {"malId": 5114, "anilistId": 5114}}}}"#)),
            Ok((200, r#"{"success": true, "data": {"episodes": [{"episodeId": "fma-1?ep=1"}, {"episodeId": "fma-1?ep=2"}]}}"#)),
        ]));
        let client = client(transport);
        assert_eq!(client.anime_ids("fma-1").await.unwrap(), (Some(5114), Some(5114)));
        assert_eq!(client.first_episode_id("fma-1").await.unwrap().as_deref(), Some("fma-1?ep=1"));
    }

    #[tokio::test]
    async fn refuses_ids_outside_the_slug_charset() {
        let transport = Arc::new(ScriptedTransport::statuses(&[]));
        let client = client(transport.clone());
        let err = client.anime_ids("../search").await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
        assert!(client.first_episode_id("fma-1/../x").await.is_err());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }
}
