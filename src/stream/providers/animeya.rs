//! Animeya provider (served by the primary catalog API).
//!
//! Animeya numbers episodes by its own ids, so the MAL id is first turned
//! into a real episode id: search by title, pick the slug ending in
//! `-<malId>`, then look the episode up in the info page (or interpolate
//! from the first listed episode when only a slice is returned).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::stream::provider::{
    retain_absolute, EpisodeRequest, ProviderError, ProviderGroup, ProviderOutput, SourceProvider,
    StreamingSource,
};
use crate::stream::relay::RelayClient;

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    slug: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnimeInfo {
    #[serde(default)]
    episodes: Vec<InfoEpisode>,
}

#[derive(Debug, Deserialize)]
struct InfoEpisode {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    number: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WatchPayload {
    #[serde(default)]
    sources: Vec<AnimeyaSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnimeyaSource {
    #[serde(default)]
    id: Option<Value>,
    url: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default, alias = "langue")]
    language: Option<String>,
    #[serde(default)]
    sub_type: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    quality: Option<String>,
}

/// Where the watch call points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EpisodeRef {
    /// Real Animeya episode id.
    Resolved(String),
    /// Unresolved: MAL id plus `?ep=`.
    Direct(u64),
}

pub struct AnimeyaProvider {
    relay: Arc<RelayClient>,
    base: String,
}

impl AnimeyaProvider {
    /// `catalog_base` is the primary catalog root (`.../api/v1`).
    pub fn new(relay: Arc<RelayClient>, catalog_base: &str) -> Self {
        Self {
            relay,
            base: format!("{}/animeya", catalog_base.trim_end_matches('/')),
        }
    }

    fn referer(&self) -> String {
        Url::parse(&self.base)
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_default()
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        Url::parse(&format!("{}{path}", self.base))
            .map_err(|e| ProviderError::Payload(format!("bad animeya URL: {e}")))
    }

    async fn resolve_episode(&self, mal_id: u64, name: &str, episode: u32) -> Result<Option<String>, ProviderError> {
        let mut search = self.url("/search")?;
        search.query_pairs_mut().append_pair("q", name);
        let hits: Vec<SearchHit> = self.relay.get_data(&search, &self.referer()).await?;
        let Some(slug) = pick_slug(&hits, mal_id) else {
            return Ok(None);
        };
        debug!(slug, "Animeya anime matched");

        let info: AnimeInfo = self
            .relay
            .get_data(&self.url(&format!("/info/{slug}"))?, &self.referer())
            .await?;
        Ok(episode_id(&info.episodes, episode))
    }

    fn watch_url(&self, episode: &EpisodeRef, number: u32) -> Result<Url, ProviderError> {
        match episode {
            EpisodeRef::Resolved(id) => self.url(&format!("/watch/{id}")),
            EpisodeRef::Direct(mal_id) => self.url(&format!("/watch/{mal_id}?ep={number}")),
        }
    }
}

fn pick_slug(hits: &[SearchHit], mal_id: u64) -> Option<&str> {
    let suffix = format!("-{mal_id}");
    hits.iter()
        .filter_map(|h| h.slug.as_deref())
        .find(|slug| slug.ends_with(&suffix))
        .or_else(|| hits.first().and_then(|h| h.slug.as_deref()))
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Exact episode id, else `anchor.id + (episode - anchor.number)` from
/// the first listed episode when both are numeric.
fn episode_id(episodes: &[InfoEpisode], episode: u32) -> Option<String> {
    let wanted = i64::from(episode);
    if let Some(id) = episodes
        .iter()
        .find(|e| e.number == Some(wanted))
        .and_then(|e| e.id.as_ref())
        .and_then(id_text)
    {
        return Some(id);
    }

    let anchor = episodes.first()?;
    let anchor_id = anchor.id.as_ref()?.as_i64()?;
    let estimated = anchor_id + (wanted - anchor.number?);
    debug!(anchor_id, estimated, "Interpolated Animeya episode id");
    Some(estimated.to_string())
}

/// First run of ASCII digits in `s`.
fn first_number(s: &str) -> Option<&str> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let rest = &s[start..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn provider_label(name: &str, sub_type: &str, language: &str, index: usize) -> String {
    if name.contains("Vidnest") {
        let kind = if sub_type == "NONE" { "Dub" } else { "Sub" };
        format!("Bebop {kind} ({language})")
    } else if name.contains("Pahe") {
        format!("Pahe ({language})")
    } else if name.contains("Player") {
        let number = first_number(name).map_or_else(|| (index + 1).to_string(), str::to_string);
        format!("Player {number} ({language})")
    } else if name.contains("Mp4") {
        format!("Mp4 ({language})")
    } else {
        format!("{name} ({language})")
    }
}

fn map_sources(payload: WatchPayload) -> Vec<StreamingSource> {
    let sources = payload
        .sources
        .into_iter()
        .enumerate()
        .map(|(index, s)| {
            let kind = s.kind.unwrap_or_default();
            let is_embed = kind == "EMBED";
            let language = s.language.unwrap_or_else(|| "ENG".to_string());
            let sub_type = s.sub_type.unwrap_or_else(|| "NONE".to_string());
            let name = s.name.unwrap_or_else(|| format!("Source {}", index + 1));
            let tag = s.id.as_ref().and_then(id_text).unwrap_or_else(|| index.to_string());
            StreamingSource {
                url: s.url,
                is_manifest: kind == "HLS",
                quality: s.quality.unwrap_or_else(|| "720p".to_string()),
                provider_label: provider_label(&name, &sub_type, &language, index),
                is_dubbed: sub_type == "NONE" || language != "JAP",
                language,
                language_tag: format!("animeya-{tag}"),
                is_embeddable: is_embed,
                requires_headless_resolution: is_embed,
                group: ProviderGroup::Animeya,
            }
        })
        .collect();
    retain_absolute(sources)
}

#[async_trait]
impl SourceProvider for AnimeyaProvider {
    fn name(&self) -> &'static str {
        "animeya"
    }

    fn group(&self) -> ProviderGroup {
        ProviderGroup::Animeya
    }

    fn needs_mal_id(&self) -> bool {
        true
    }

    async fn fetch_sources(&self, request: &EpisodeRequest) -> Result<ProviderOutput, ProviderError> {
        let (Some(mal_id), Some(number), Some(name)) =
            (request.mal_id, request.episode_number, request.anime_name.as_deref())
        else {
            return Ok(ProviderOutput::default());
        };

        let episode = match self.resolve_episode(mal_id, name, number).await {
            Ok(Some(id)) => EpisodeRef::Resolved(id),
            Ok(None) => EpisodeRef::Direct(mal_id),
            Err(e) => {
                warn!(error = %e, mal_id, "Animeya episode lookup failed, using MAL id");
                EpisodeRef::Direct(mal_id)
            }
        };

        let url = self.watch_url(&episode, number)?;
        let payload: WatchPayload = self.relay.get_data(&url, &self.referer()).await?;
        Ok(map_sources(payload).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::tests::ScriptedTransport;
    use crate::http_client::RetryingFetcher;
    use crate::identity::ClientIdentity;

    fn episodes(json: &str) -> Vec<InfoEpisode> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_pick_slug_prefers_mal_suffix() {
        let hits: Vec<SearchHit> =
            serde_json::from_str(r#"[{"slug": "one-piece-film-1"}, {"slug": "one-piece-21"}]"#).unwrap();
        assert_eq!(pick_slug(&hits, 21), Some("one-piece-21"));
        assert_eq!(pick_slug(&hits, 99), Some("one-piece-film-1"));
        assert_eq!(pick_slug(&[], 21), None);
    }

    #[test]
    fn test_episode_id_exact_and_interpolated() {
        let eps = episodes(r#"[{"id": 9001, "number": 401}, {"id": "abc", "number": 402}]"#);
        assert_eq!(episode_id(&eps, 402).as_deref(), Some("abc"));
        assert_eq!(episode_id(&eps, 410).as_deref(), Some("9010"));

        let eps = episodes(r#"[{"id": "x1", "number": 1}]"#);
        assert_eq!(episode_id(&eps, 5), None);
        assert_eq!(episode_id(&[], 1), None);
    }

    #[test]
    fn test_labels() {
        assert_eq!(provider_label("Vidnest", "NONE", "ENG", 0), "Bebop Dub (ENG)");
        assert_eq!(provider_label("Vidnest HD", "SUB", "JAP", 0), "Bebop Sub (JAP)");
        assert_eq!(provider_label("Player 3", "SUB", "JAP", 0), "Player 3 (JAP)");
        assert_eq!(provider_label("Player", "SUB", "JAP", 4), "Player 5 (JAP)");
        assert_eq!(provider_label("Mp4Upload", "SUB", "JAP", 0), "Mp4 (JAP)");
        assert_eq!(provider_label("Streamtape", "SUB", "FR", 0), "Streamtape (FR)");
    }

    #[test]
    fn test_map_sources() {
        let payload: WatchPayload = serde_json::from_str(
            r#"{"sources": [
                {"id": 77, "url": "https://cdn.example.com/a.m3u8", "type": "HLS", "langue": "JAP", "subType": "SUB", "name": "Pahe"},
                {"url": "https://embed.example.com/e/1", "type": "EMBED"}
            ]}"#,
        )
        .unwrap();
        let sources = map_sources(payload);
        assert_eq!(sources[0].language_tag, "animeya-77");
        assert!(sources[0].is_manifest);
        assert!(!sources[0].is_dubbed);
        assert_eq!(sources[0].provider_label, "Pahe (JAP)");

        assert_eq!(sources[1].language_tag, "animeya-1");
        assert_eq!(sources[1].language, "ENG");
        assert!(sources[1].is_dubbed);
        assert!(sources[1].is_embeddable);
        assert_eq!(sources[1].provider_label, "Source 2 (ENG)");
    }

    #[tokio::test]
    async fn skips_without_mal_id() {
        let transport = Arc::new(ScriptedTransport::statuses(&[]));
        let fetcher = Arc::new(RetryingFetcher::new(transport.clone()));
        let relay = Arc::new(RelayClient::new(fetcher, Arc::new(ClientIdentity::fixed("t"))));
        let provider = AnimeyaProvider::new(relay, "https://catalog.example.com/api/v1");

        let mut req = EpisodeRequest::new("one-piece-100?ep=2142");
        req.episode_number = Some(1);
        req.anime_name = Some("One Piece".into());
        let out = provider.fetch_sources(&req).await.unwrap();
        assert!(out.sources.is_empty());
        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolves_episode_before_watching() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok((200, r#"{"status": 200, "data": [{"slug": "one-piece-21"}]}"#)),
            Ok((200, r#"{"status": 200, "data": {"episodes": [{"id": 500, "number": 1}]}}"#)),
            Ok((200, r#"{"status": 200, "data": {"sources": [{"url": "https://cdn.example.com/ep.m3u8", "type": "HLS"}]}}"#)),
        ]));
        let fetcher = Arc::new(RetryingFetcher::new(transport.clone()));
        let relay = Arc::new(RelayClient::new(fetcher, Arc::new(ClientIdentity::fixed("t"))));
        let provider = AnimeyaProvider::new(relay, "https://catalog.example.com/api/v1");

        let mut req = EpisodeRequest::new("one-piece-100?ep=2142").with_mal_id(Some(21));
        req.episode_number = Some(3);
        req.anime_name = Some("One Piece".into());
        let out = provider.fetch_sources(&req).await.unwrap();
        assert_eq!(out.sources.len(), 1);
        assert_eq!(transport.calls.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(
            provider.watch_url(&EpisodeRef::Resolved("502".into()), 3).unwrap().path(),
            "/api/v1/animeya/watch/502"
        );
        assert_eq!(
            provider.watch_url(&EpisodeRef::Direct(21), 3).unwrap().query(),
            Some("ep=3")
        );
    }
}
