//! Animelok provider: multi-language (mostly Indian-language dub) servers
//! keyed by `<slug>-<malId>` and episode number.

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
struct WatchPayload {
    #[serde(default)]
    servers: Vec<AnimelokServer>,
}

#[derive(Debug, Deserialize)]
struct AnimelokServer {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    tip: Option<String>,
}

pub struct AnimelokProvider {
    relay: Arc<RelayClient>,
    base: String,
}

impl AnimelokProvider {
    /// `catalog_base` is the primary catalog root (`.../api/v1`).
    pub fn new(relay: Arc<RelayClient>, catalog_base: &str) -> Self {
        Self {
            relay,
            base: format!("{}/animelok", catalog_base.trim_end_matches('/')),
        }
    }

    fn watch_url(&self, slug: &str, mal_id: u64, episode: u32) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&format!("{}/watch/{slug}-{mal_id}", self.base))
            .map_err(|e| ProviderError::Payload(format!("bad animelok URL: {e}")))?;
        url.query_pairs_mut().append_pair("ep", &episode.to_string());
        Ok(url)
    }
}

/// Three-letter display code for an upstream language name.
fn display_language(language: &str) -> String {
    let upper = language.to_ascii_uppercase();
    let code = if upper.contains("JAP") {
        "JAP"
    } else if upper.contains("ENG") {
        "ENG"
    } else if upper.contains("HIN") {
        "HIN"
    } else if upper.contains("TAMIL") {
        "TAM"
    } else if upper.contains("MALAYALAM") {
        "MAL"
    } else if upper.contains("TELUGU") {
        "TEL"
    } else if upper.contains("SPANISH") || upper.contains("ESP") {
        "ESP"
    } else {
        return upper.chars().take(3).collect();
    };
    code.to_string()
}

/// Character name for abyss-hosted servers, by language.
fn abyss_character(lang: &str) -> &'static str {
    match lang {
        "HIN" => "Pain",
        "TAM" => "Kaido",
        "TEL" => "Broly",
        "MAL" => "Yami",
        "ENG" => "AllMight",
        "JAP" => "Sukuna",
        _ => "Akatsuki",
    }
}

/// Label for a server; the `abyss` host name never leaks into it.
fn server_label(name: Option<&str>, tip: Option<&str>, lang: &str, index: usize) -> String {
    let name_lower = name.unwrap_or_default().to_ascii_lowercase();
    let tip_lower = tip.unwrap_or_default().to_ascii_lowercase();

    if name_lower.contains("multi") || tip_lower.contains("multi") {
        format!("Multi ({lang})")
    } else if name_lower.contains("bato") {
        format!("Totoro ({lang})")
    } else if name_lower.contains("kuro") {
        format!("Kuro ({lang})")
    } else if name_lower.contains("pahe") {
        format!("Pahe ({lang})")
    } else if name_lower.contains("abyss") || tip_lower.contains("abyss") || tip_lower.contains("abyess") {
        let variant = if index % 2 == 0 { "I" } else { "II" };
        format!("{} {variant} ({lang})", abyss_character(lang))
    } else {
        match name.filter(|n| !n.trim().is_empty()) {
            Some(n) => format!("{n} ({lang})"),
            None => format!("Server {} ({lang})", index + 1),
        }
    }
}

/// First URL inside a `[...]` source-list payload.
fn first_listed_url(raw: &str) -> Option<String> {
    if !(raw.starts_with('[') && raw.ends_with(']')) {
        return None;
    }
    let items: Vec<serde_json::Value> = serde_json::from_str(raw).ok()?;
    items.iter().find_map(|item| match item {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => ["url", "file", "src"]
            .iter()
            .find_map(|k| map.get(*k).and_then(serde_json::Value::as_str))
            .map(str::to_string),
        _ => None,
    })
}

fn map_servers(payload: WatchPayload) -> Vec<StreamingSource> {
    let sources = payload
        .servers
        .into_iter()
        .enumerate()
        .filter_map(|(index, server)| {
            let raw = server.url?;
            // source lists are played as HLS
            let (url, is_manifest) = match first_listed_url(raw.trim()) {
                Some(listed) => (listed, true),
                None => {
                    let manifest = raw.contains("m3u8");
                    (raw, manifest)
                }
            };
            let language = server.language.unwrap_or_else(|| "Unknown".to_string());
            let lang = display_language(&language);
            Some(StreamingSource {
                url,
                is_manifest,
                quality: if is_manifest { "Auto" } else { "720p" }.to_string(),
                language_tag: format!("animelok-{index}-{}", lang.to_ascii_lowercase()),
                is_dubbed: !language.to_ascii_uppercase().contains("JAP"),
                provider_label: server_label(server.name.as_deref(), server.tip.as_deref(), &lang, index),
                is_embeddable: !is_manifest,
                requires_headless_resolution: !is_manifest,
                group: ProviderGroup::Animelok,
                language,
            })
        })
        .collect();
    retain_absolute(sources)
}

#[async_trait]
impl SourceProvider for AnimelokProvider {
    fn name(&self) -> &'static str {
        "animelok"
    }

    fn group(&self) -> ProviderGroup {
        ProviderGroup::Animelok
    }

    fn needs_mal_id(&self) -> bool {
        true
    }

    async fn fetch_sources(&self, request: &EpisodeRequest) -> Result<ProviderOutput, ProviderError> {
        let (Some(mal_id), Some(episode), Some(slug)) =
            (request.mal_id, request.episode_number, request.anime_slug())
        else {
            return Ok(ProviderOutput::default());
        };

        let url = self.watch_url(slug, mal_id, episode)?;
        let referer = url.origin().ascii_serialization();
        let payload: WatchPayload = self.relay.get_data(&url, &referer).await?;
        Ok(map_servers(payload).into())
    }
}
