use std::path::Path;

use anyhow::Result;

use nagare::proxy::{proxied_subtitle_url, proxied_video_url};
use nagare::EpisodeRequest;

use super::{build_state, load_config};

pub struct SourcesArgs {
    pub episode_id: String,
    pub name: Option<String>,
    pub episode: Option<u32>,
    pub server: String,
    pub category: String,
    pub proxy_base: Option<String>,
    pub json: bool,
}

pub async fn cmd_sources(config_path: Option<&Path>, args: SourcesArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let state = build_state(&config)?;

    let mut request = EpisodeRequest::new(args.episode_id);
    request.anime_name = args.name;
    request.episode_number = args.episode;
    request.server = args.server;
    request.category = args.category;

    eprintln!("🔎 Resolving: {}", request.episode_key);
    let data = state.aggregator.resolve_combined_sources(&request).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    let ids = match (data.mal_id, data.anilist_id) {
        (None, None) => "unknown".to_string(),
        (mal, anilist) => format!(
            "MAL {} / AniList {}",
            mal.map_or("-".to_string(), |m| m.to_string()),
            anilist.map_or("-".to_string(), |a| a.to_string())
        ),
    };
    println!("🆔 {ids}");
    println!("📺 {} sources", data.sources.len());

    let referer = Some(data.headers.referer.as_str());
    for source in &data.sources {
        let url = match &args.proxy_base {
            Some(base) if !source.is_embeddable => proxied_video_url(base, &source.url, referer, None),
            _ => source.url.clone(),
        };
        let kind = if source.is_manifest {
            "hls"
        } else if source.is_embeddable {
            "embed"
        } else {
            "file"
        };
        println!(
            "   [{}] {} · {} · {} · {kind}\n      {url}",
            source.group, source.provider_label, source.language, source.quality
        );
    }

    if !data.subtitles.is_empty() {
        println!("💬 {} subtitles", data.subtitles.len());
        for track in &data.subtitles {
            let url = match &args.proxy_base {
                Some(base) => proxied_subtitle_url(base, &track.url),
                None => track.url.clone(),
            };
            println!("   {} {url}", track.language);
        }
    }

    Ok(())
}
