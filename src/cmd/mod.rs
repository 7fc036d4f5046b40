mod ids;
mod map;
mod rewrite;
mod serve;
mod skip;
mod sources;

use std::path::Path;

use anyhow::{Context, Result};

use nagare::{AppState, Config};

pub use ids::cmd_ids;
pub use map::cmd_map;
pub use rewrite::cmd_rewrite;
pub use serve::cmd_serve;
pub use skip::cmd_skip;
pub use sources::{cmd_sources, SourcesArgs};

/// Config file plus `NAGARE_*` overrides.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = Config::load(path).context("loading config")?;
    config.apply_env().context("applying environment overrides")?;
    Ok(config)
}

pub fn build_state(config: &Config) -> Result<AppState> {
    AppState::from_config(config).context("initializing services")
}
