use std::env;

use engine::{resolve_data_paths, DataPaths, PlaybackConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::cli::CliOptions;
use super::PlayerError;

pub(crate) const SPEED_ENV_VAR: &str = "FLYTHROUGH_SPEED";

#[derive(Debug, Clone)]
pub(crate) struct PlayerConfig {
    pub(crate) data_paths: DataPaths,
    pub(crate) playback: PlaybackConfig,
    pub(crate) episode_index: usize,
    pub(crate) inventory_slots: usize,
}

pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

/// Flags win over the environment; the environment wins over defaults.
pub(crate) fn resolve_config(options: &CliOptions) -> Result<PlayerConfig, PlayerError> {
    let data_paths = resolve_data_paths(options.data_root.as_deref())?;
    let speed = match options.speed {
        Some(speed) => speed,
        None => parse_speed_from_env(env::var(SPEED_ENV_VAR).ok().as_deref())?
            .unwrap_or(PlaybackConfig::default().speed),
    };
    let playback = PlaybackConfig::with_speed(speed);
    playback.validate()?;

    info!(
        data_root = %data_paths.root.display(),
        speed,
        episode_index = options.episode_index,
        inventory_slots = options.inventory_slots,
        "startup"
    );
    Ok(PlayerConfig {
        data_paths,
        playback,
        episode_index: options.episode_index,
        inventory_slots: options.inventory_slots,
    })
}

fn parse_speed_from_env(raw: Option<&str>) -> Result<Option<f64>, PlayerError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| PlayerError::Config(format!("{SPEED_ENV_VAR}='{raw}' is not a number")))
}
