use std::path::Path;

use anyhow::Result;

use super::{build_state, load_config};

pub async fn cmd_map(config_path: Option<&Path>, id: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let state = build_state(&config)?;

    let ids = state.mapping.normalize_id(id).await;
    eprintln!("🗺️  {} mapping entries loaded", state.mapping.len().await);
    println!("{}", serde_json::to_string_pretty(&ids)?);
    Ok(())
}
