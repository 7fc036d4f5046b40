//! AnimeHindiDubbed scraper provider (Hindi dubs, embed pages only).
//!
//! The scraper answers either with per-episode server lists
//! (`episodes: [{number, servers: [{name, url}]}]`) or with per-host lists
//! whose entries are named by episode (`servers: {filemoon: [{name: "01",
//! url}]}`, `"S5E1"` style names included).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::stream::provider::{
    retain_absolute, EpisodeRequest, ProviderError, ProviderGroup, ProviderOutput, SourceProvider,
    StreamingSource,
};
use crate::stream::relay::RelayClient;

#[derive(Debug, Deserialize)]
struct AnimePage {
    #[serde(default)]
    episodes: Vec<PageEpisode>,
    #[serde(default)]
    servers: BTreeMap<String, Vec<ServerVideo>>,
}

#[derive(Debug, Deserialize)]
struct PageEpisode {
    number: u32,
    #[serde(default)]
    servers: Vec<ServerVideo>,
}

#[derive(Debug, Deserialize)]
struct ServerVideo {
    name: String,
    url: String,
}

pub struct HindiDubbedProvider {
    relay: Arc<RelayClient>,
    endpoint: Option<Url>,
}

impl HindiDubbedProvider {
    pub fn new(relay: Arc<RelayClient>, endpoint: Option<Url>) -> Self {
        Self { relay, endpoint }
    }
}

/// Episode number from names like `"01"` or `"S5E12"`.
fn parse_episode_number(name: &str) -> Option<u32> {
    let name = name.trim();
    if name.bytes().all(|b| b.is_ascii_digit()) {
        return name.parse().ok();
    }
    let upper = name.to_ascii_uppercase();
    let rest = upper.strip_prefix('S')?;
    let (season, episode) = rest.split_once('E')?;
    if season.is_empty() || !season.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits: String = episode.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn server_label(server: &str) -> String {
    match server.to_ascii_lowercase().as_str() {
        "filemoon" => "Berlin".to_string(),
        "servabyss" => "Madrid".to_string(),
        "vidgroud" => "Vidgroud".to_string(),
        other => {
            let mut chars = other.chars();
            chars
                .next()
                .map(|c| c.to_ascii_uppercase().to_string() + chars.as_str())
                .unwrap_or_default()
        }
    }
}

fn hindi_source(server: &str, url: String) -> StreamingSource {
    StreamingSource {
        url,
        is_manifest: false,
        quality: "HD".to_string(),
        language: "Hindi".to_string(),
        language_tag: format!("animehindidubbed-{}", server.to_ascii_lowercase()),
        is_dubbed: true,
        provider_label: server_label(server),
        is_embeddable: true,
        requires_headless_resolution: true,
        group: ProviderGroup::AnimeHindiDubbed,
    }
}

fn sources_for_episode(page: AnimePage, episode: u32) -> Vec<StreamingSource> {
    let mut sources: Vec<StreamingSource> = page
        .episodes
        .into_iter()
        .filter(|e| e.number == episode)
        .flat_map(|e| e.servers)
        .map(|v| hindi_source(&v.name, v.url))
        .collect();

    for (server, videos) in page.servers {
        sources.extend(
            videos
                .into_iter()
                .filter(|v| parse_episode_number(&v.name) == Some(episode))
                .map(|v| hindi_source(&server, v.url)),
        );
    }
    retain_absolute(sources)
}

#[async_trait]
impl SourceProvider for HindiDubbedProvider {
    fn name(&self) -> &'static str {
        "animehindidubbed"
    }

    fn group(&self) -> ProviderGroup {
        ProviderGroup::AnimeHindiDubbed
    }

    async fn fetch_sources(&self, request: &EpisodeRequest) -> Result<ProviderOutput, ProviderError> {
        let Some(endpoint) = &self.endpoint else {
            return Err(ProviderError::Unavailable("animehindidubbed"));
        };
        let (Some(slug), Some(episode)) = (request.anime_slug(), request.episode_number) else {
            return Ok(ProviderOutput::default());
        };

        let mut url = endpoint.clone();
        url.query_pairs_mut()
            .append_pair("action", "anime")
            .append_pair("slug", slug);
        let page: AnimePage = self.relay.get_platform_json(url).await?;
        Ok(sources_for_episode(page, episode).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_episode_number() {
        assert_eq!(parse_episode_number("01"), Some(1));
        assert_eq!(parse_episode_number("12"), Some(12));
        assert_eq!(parse_episode_number("S5E12"), Some(12));
        assert_eq!(parse_episode_number("s2e3"), Some(3));
        assert_eq!(parse_episode_number("Episode 4"), None);
        assert_eq!(parse_episode_number("SE1"), None);
    }

    #[test]
    fn test_server_map_payload() {
        let page: AnimePage = serde_json::from_str(
            r#"{"title": "Black Butler", "slug": "black-butler", "servers": {
                "filemoon": [{"name": "01", "url": "https://filemoon.example/e/1"}, {"name": "02", "url": "https://filemoon.example/e/2"}],
                "servabyss": [{"name": "S1E2", "url": "https://abyss.example/e/2"}],
                "vidgroud": []
            }}"#,
        )
        .unwrap();
        let sources = sources_for_episode(page, 2);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].provider_label, "Berlin");
        assert_eq!(sources[0].language_tag, "animehindidubbed-filemoon");
        assert_eq!(sources[1].provider_label, "Madrid");
        assert!(sources.iter().all(|s| s.is_embeddable && s.is_dubbed));
    }

    #[test]
    fn test_episode_list_payload() {
        let page: AnimePage = serde_json::from_str(
            r#"{"episodes": [
                {"number": 1, "servers": [{"name": "filemoon", "url": "https://filemoon.example/e/1", "language": "Hindi"}]},
                {"number": 2, "servers": [{"name": "vidgroud", "url": "https://vidgroud.example/e/2"}]}
            ]}"#,
        )
        .unwrap();
        let sources = sources_for_episode(page, 2);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].provider_label, "Vidgroud");
        assert_eq!(sources[0].group, ProviderGroup::AnimeHindiDubbed);
    }
}
