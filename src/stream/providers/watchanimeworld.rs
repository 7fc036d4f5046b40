//! WatchAnimeWorld scraper provider.
//!
//! The scraper function is keyed by `<slug>-1x<episode>` and answers with
//! a streaming-data shaped object of multi-language sources.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::stream::provider::{
    looks_like_manifest, retain_absolute, EpisodeRequest, ProviderError, ProviderGroup,
    ProviderOutput, SourceProvider, StreamingSource,
};
use crate::stream::relay::RelayClient;

#[derive(Debug, Deserialize)]
struct ScraperResponse {
    #[serde(default)]
    sources: Vec<ScraperSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScraperSource {
    url: String,
    #[serde(default, rename = "isM3U8")]
    is_m3u8: Option<bool>,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    is_dub: Option<bool>,
    #[serde(default)]
    provider_name: Option<String>,
    #[serde(default)]
    needs_headless: Option<bool>,
}

pub struct WatchAnimeWorldProvider {
    relay: Arc<RelayClient>,
    endpoint: Option<Url>,
}

impl WatchAnimeWorldProvider {
    /// `endpoint` is the scraper URL; the provider yields nothing when unset.
    pub fn new(relay: Arc<RelayClient>, endpoint: Option<Url>) -> Self {
        Self { relay, endpoint }
    }

    /// Scraper key for an episode: `<slug>-1x<episode>`.
    pub fn episode_key(request: &EpisodeRequest) -> Option<String> {
        let slug = request.anime_slug()?;
        let episode = request.episode_number?;
        Some(format!("{slug}-1x{episode}"))
    }
}

fn map_sources(response: ScraperResponse) -> Vec<StreamingSource> {
    let sources = response
        .sources
        .into_iter()
        .enumerate()
        .map(|(index, s)| {
            let is_manifest = s.is_m3u8.unwrap_or_else(|| looks_like_manifest(&s.url));
            let needs_headless = s.needs_headless.unwrap_or(false);
            let language = s.language.unwrap_or_else(|| "Unknown".to_string());
            let tag = if language == "Unknown" {
                index.to_string()
            } else {
                language.to_ascii_lowercase().replace(' ', "-")
            };
            let is_dubbed = s
                .is_dub
                .unwrap_or_else(|| !language.to_ascii_lowercase().starts_with("jap"));
            StreamingSource {
                url: s.url,
                is_manifest,
                quality: s.quality.unwrap_or_else(|| "auto".to_string()),
                provider_label: s
                    .provider_name
                    .unwrap_or_else(|| format!("WatchAnimeWorld ({language})")),
                language_tag: format!("watchanimeworld-{tag}"),
                language,
                is_dubbed,
                is_embeddable: !is_manifest && needs_headless,
                requires_headless_resolution: needs_headless,
                group: ProviderGroup::WatchAnimeWorld,
            }
        })
        .collect();
    retain_absolute(sources)
}

#[async_trait]
impl SourceProvider for WatchAnimeWorldProvider {
    fn name(&self) -> &'static str {
        "watchanimeworld"
    }

    fn group(&self) -> ProviderGroup {
        ProviderGroup::WatchAnimeWorld
    }

    async fn fetch_sources(&self, request: &EpisodeRequest) -> Result<ProviderOutput, ProviderError> {
        let Some(endpoint) = &self.endpoint else {
            return Err(ProviderError::Unavailable("watchanimeworld"));
        };
        let Some(key) = Self::episode_key(request) else {
            return Ok(ProviderOutput::default());
        };

        let mut url = endpoint.clone();
        url.query_pairs_mut().append_pair("episodeUrl", &key);
        let response: ScraperResponse = self.relay.get_platform_json(url).await?;
        Ok(map_sources(response).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_key() {
        let mut req = EpisodeRequest::new("naruto-shippuden-355?ep=7882");
        assert_eq!(WatchAnimeWorldProvider::episode_key(&req), None);
        req.episode_number = Some(12);
        assert_eq!(
            WatchAnimeWorldProvider::episode_key(&req).as_deref(),
            Some("naruto-shippuden-1x12")
        );
    }

    #[test]
    fn test_map_sources() {
        let response: ScraperResponse = serde_json::from_str(
            r#"{"sources": [
                {"url": "https://cdn.example.com/hin/index.m3u8", "isM3U8": true, "language": "Hindi", "isDub": true, "providerName": "Zephyr"},
                {"url": "https://embed.example.com/e/abc", "isM3U8": false, "needsHeadless": true},
                {"url": "not a url"}
            ]}"#,
        )
        .unwrap();
        let sources = map_sources(response);
        assert_eq!(sources.len(), 2);

        assert_eq!(sources[0].language_tag, "watchanimeworld-hindi");
        assert_eq!(sources[0].provider_label, "Zephyr");
        assert!(sources[0].is_manifest);
        assert!(!sources[0].is_embeddable);
        assert!(sources[0].is_dubbed);

        assert_eq!(sources[1].language_tag, "watchanimeworld-1");
        assert!(sources[1].is_embeddable);
        assert!(sources[1].requires_headless_resolution);
        assert_eq!(sources[1].group, ProviderGroup::WatchAnimeWorld);
    }
}
