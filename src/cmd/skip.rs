use std::path::Path;

use anyhow::Result;

use super::{build_state, load_config};

pub async fn cmd_skip(config_path: Option<&Path>, mal_id: u64, episode: u32, length: Option<f64>) -> Result<()> {
    let config = load_config(config_path)?;
    let state = build_state(&config)?;

    let times = state.skip_times.fetch(mal_id, episode, length).await?;
    if times.is_empty() {
        println!("❌ No skip times for MAL {mal_id} episode {episode}");
        return Ok(());
    }

    for time in &times {
        println!(
            "⏭️  {:<12} {:>7.1}s → {:>7.1}s",
            time.skip_type.label(),
            time.interval.start_time,
            time.interval.end_time
        );
    }
    Ok(())
}
