use tracing_subscriber::{EnvFilter, fmt};

use crate::app::AppError;

const LOG_FILTER_ENV: &str = "AUTO_OFF_LOG";

pub fn init() -> Result<(), AppError> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(AppError::logging_init)
}
