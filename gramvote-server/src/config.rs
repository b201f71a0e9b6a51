use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Seconds between lifecycle passes (status transitions + tallies).
    pub tick_interval_secs: u64,
    /// Deployment timezone as minutes east of UTC. Defaults to +05:30.
    pub timezone_offset_minutes: i32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let tick_interval_secs = parse_tick_interval(env::var("TICK_INTERVAL_SECS").ok())?;

        let timezone_offset_minutes = env::var("TIMEZONE_OFFSET_MINUTES")
            .unwrap_or_else(|_| "330".to_string())
            .parse::<i32>()
            .context("TIMEZONE_OFFSET_MINUTES must be a valid number")?;

        Ok(Config {
            port,
            state_dir,
            tick_interval_secs,
            timezone_offset_minutes,
        })
    }
}

/// Parse a tick interval from an optional string value, falling back to
/// the default of one minute.
pub fn parse_tick_interval(value: Option<String>) -> Result<u64> {
    let secs = value
        .unwrap_or_else(|| "60".to_string())
        .parse::<u64>()
        .context("TICK_INTERVAL_SECS must be a valid number")?;
    if secs == 0 {
        anyhow::bail!("TICK_INTERVAL_SECS must be at least 1");
    }
    Ok(secs)
}
