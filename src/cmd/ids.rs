use std::path::Path;

use anyhow::Result;

use super::{build_state, load_config};

pub async fn cmd_ids(config_path: Option<&Path>, catalog_id: &str, user: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let state = build_state(&config)?;

    let ids = state.resolver.resolve_external_ids(catalog_id, user).await;
    println!("{}", serde_json::to_string_pretty(&ids)?);
    Ok(())
}
