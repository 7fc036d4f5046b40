//! `nagare` CLI - run the proxy server or query its services directly

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nagare")]
#[command(about = "Streaming-source aggregation and HLS-aware media proxy")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/nagare/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (proxy + JSON API)
    Serve {
        /// Address to bind, overrides config and NAGARE_BIND
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Resolve combined streaming sources for an episode
    Sources {
        /// Catalog episode id, e.g. "one-piece-100?ep=2142"
        episode_id: String,

        /// Anime title (used by title-matching providers)
        #[arg(long)]
        name: Option<String>,

        /// Episode number
        #[arg(short, long)]
        episode: Option<u32>,

        /// Catalog server
        #[arg(long, default_value = "hd-2")]
        server: String,

        /// sub or dub
        #[arg(long, default_value = "sub")]
        category: String,

        /// Print playable links through this proxy endpoint
        #[arg(long)]
        proxy_base: Option<String>,

        /// Print the full JSON result
        #[arg(long)]
        json: bool,
    },

    /// Resolve MAL/AniList ids for a catalog anime id
    Ids {
        /// Catalog anime id, e.g. "one-piece-100"
        catalog_id: String,

        /// User whose saved records are consulted
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Normalize an AniList or MAL id via the offline mapping dataset
    Map {
        id: String,
    },

    /// Rewrite an HLS manifest offline (reads stdin when no file or "-")
    Rewrite {
        /// Manifest file
        input: Option<PathBuf>,

        /// URL the manifest was fetched from
        #[arg(long)]
        base_url: String,

        /// Proxy endpoint for rewritten links
        #[arg(long)]
        proxy_base: Option<String>,

        /// Referer carried on rewritten links
        #[arg(long)]
        referer: Option<String>,

        /// Access key carried on rewritten links
        #[arg(long)]
        apikey: Option<String>,
    },

    /// Fetch intro/outro/recap skip times
    Skip {
        mal_id: u64,
        episode: u32,

        /// Episode length in seconds
        #[arg(long)]
        length: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nagare=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Serve { bind } => {
            cmd::cmd_serve(config, bind.as_deref()).await?;
        }
        Commands::Sources {
            episode_id,
            name,
            episode,
            server,
            category,
            proxy_base,
            json,
        } => {
            let args = cmd::SourcesArgs {
                episode_id,
                name,
                episode,
                server,
                category,
                proxy_base,
                json,
            };
            cmd::cmd_sources(config, args).await?;
        }
        Commands::Ids { catalog_id, user } => {
            cmd::cmd_ids(config, &catalog_id, user.as_deref()).await?;
        }
        Commands::Map { id } => {
            cmd::cmd_map(config, &id).await?;
        }
        Commands::Rewrite {
            input,
            base_url,
            proxy_base,
            referer,
            apikey,
        } => {
            cmd::cmd_rewrite(config, input.as_deref(), &base_url, proxy_base, referer, apikey)?;
        }
        Commands::Skip {
            mal_id,
            episode,
            length,
        } => {
            cmd::cmd_skip(config, mal_id, episode, length).await?;
        }
    }

    Ok(())
}
