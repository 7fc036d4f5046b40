use std::path::Path;

use anyhow::{Context, Result};

use super::{build_state, load_config};

pub async fn cmd_serve(config_path: Option<&Path>, bind: Option<&str>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(bind) = bind {
        config.bind = bind.parse().with_context(|| format!("invalid bind address: {bind}"))?;
    }

    let state = build_state(&config)?;
    eprintln!("🌊 nagare {} on http://{}", nagare::VERSION, config.bind);
    nagare::server::serve(state, config.bind)
        .await
        .with_context(|| format!("serving on {}", config.bind))
}
