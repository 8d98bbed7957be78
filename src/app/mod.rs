pub mod config;
pub mod dispatcher;
mod error;
mod logging;
pub mod outbound;
pub mod runtime;
pub mod services;
pub mod timers;

pub use config::AppConfig;
pub use error::AppError;

use crate::domain::scene::SceneKey;

pub fn run() -> Result<(), AppError> {
    start(false)
}

/// Same as [`run`] with simulation forced on, regardless of `AUTO_OFF_SIMULATION`.
pub fn run_simulation() -> Result<(), AppError> {
    start(true)
}

fn start(force_simulation: bool) -> Result<(), AppError> {
    let _ = dotenvy::dotenv();
    logging::init()?;

    let mut config = AppConfig::from_env()?;
    if force_simulation {
        config = config.with_simulation();
    }

    let settings = config.cycle_settings();
    tracing::info!(
        simulation_mode = config.simulation_mode,
        keep_alive = config.enable_keep_alive,
        initial_delay_s = settings.initial_delay.as_secs(),
        check_duration_s = settings.check_duration.as_secs(),
        confirmation_window_s = settings.initial_check_duration.as_secs(),
        power_on_threshold_w = config.power_on_threshold_w,
        power_active_threshold_w = config.power_active_threshold_w,
        scenes_mapped = config.scene_ids.mapped_count(),
        http_bind = %config.http_bind,
        "auto-off service starting"
    );

    let unmapped: Vec<&str> = SceneKey::ALL
        .into_iter()
        .filter(|key| config.scene_ids.resolve(*key).is_none())
        .map(SceneKey::as_str)
        .collect();
    if !unmapped.is_empty() {
        tracing::warn!(scenes = ?unmapped, "scenes without configured id will not be triggered");
    }

    runtime::run(config)
}
