use std::time::Duration;

use crate::app::AppError;
use crate::domain::auto_off::CycleSettings;
use crate::domain::scene::{SceneIds, SceneKey};

// In simulation mode every configured duration runs this many times faster,
// so a configured minute lasts one second.
const SIMULATION_TIME_SCALE: u32 = 60;

const MAX_MINUTES: u64 = 7 * 24 * 60;
const MAX_SECONDS: u64 = 24 * 60 * 60;
const MAX_SAMPLE_INTERVAL_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum RelaySource {
    Http { host: String, switch_id: u8 },
    DebugScript { path: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub relay: RelaySource,
    pub simulation_mode: bool,
    pub enable_keep_alive: bool,
    pub initial_delay_minutes: u64,
    pub check_duration_minutes: u64,
    pub initial_check_duration_minutes: u64,
    pub power_on_threshold_w: f64,
    pub power_active_threshold_w: f64,
    pub check_interval_seconds: u64,
    pub keep_alive_interval_seconds: u64,
    pub sample_interval_ms: u64,
    pub http_bind: String,
    pub cloud_base_url: Option<String>,
    pub cloud_auth_key: Option<String>,
    pub scene_ids: SceneIds,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let relay = match optional_string(&lookup, "SHELLY_DEBUG_SCRIPT") {
            Some(path) => RelaySource::DebugScript { path },
            None => RelaySource::Http {
                host: optional_string(&lookup, "SHELLY_HOST").ok_or_else(|| {
                    AppError::config("SHELLY_HOST is required unless SHELLY_DEBUG_SCRIPT is set")
                })?,
                switch_id: parse_or_default(&lookup, "SHELLY_SWITCH_ID", 0_u8)?,
            },
        };

        let mut scene_ids = SceneIds::new();
        for key in SceneKey::ALL {
            if let Some(id) = optional_string(&lookup, &key.env_key()) {
                scene_ids.insert(key, id);
            }
        }

        let config = Self {
            relay,
            simulation_mode: parse_bool_or_default(&lookup, "AUTO_OFF_SIMULATION", false)?,
            enable_keep_alive: parse_bool_or_default(&lookup, "ENABLE_KEEP_ALIVE", false)?,
            initial_delay_minutes: parse_or_default(&lookup, "INITIAL_DELAY_MINUTES", 30_u64)?,
            check_duration_minutes: parse_or_default(&lookup, "CHECK_DURATION_MINUTES", 20_u64)?,
            initial_check_duration_minutes: parse_or_default(
                &lookup,
                "INITIAL_CHECK_DURATION_MINUTES",
                15_u64,
            )?,
            power_on_threshold_w: parse_or_default(&lookup, "POWER_ON_THRESHOLD", 0.7_f64)?,
            power_active_threshold_w: parse_or_default(&lookup, "POWER_ACTIVE_THRESHOLD", 0.7_f64)?,
            check_interval_seconds: parse_or_default(&lookup, "CHECK_INTERVAL_SECONDS", 60_u64)?,
            keep_alive_interval_seconds: parse_or_default(
                &lookup,
                "KEEP_ALIVE_INTERVAL_SECONDS",
                60_u64,
            )?,
            sample_interval_ms: parse_or_default(&lookup, "SAMPLE_INTERVAL_MS", 1000_u64)?,
            http_bind: optional_string(&lookup, "HTTP_BIND")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            cloud_base_url: optional_string(&lookup, "SHELLY_CLOUD_BASE_URL"),
            cloud_auth_key: optional_string(&lookup, "SHELLY_CLOUD_AUTH_KEY"),
            scene_ids,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_simulation(mut self) -> Self {
        self.simulation_mode = true;
        self
    }

    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings {
            initial_delay: self.scaled(minutes(self.initial_delay_minutes)),
            initial_check_duration: self.scaled(minutes(self.initial_check_duration_minutes)),
            check_duration: self.scaled(minutes(self.check_duration_minutes)),
            check_interval: self.scaled(Duration::from_secs(self.check_interval_seconds)),
            power_on_threshold_w: self.power_on_threshold_w,
            power_active_threshold_w: self.power_active_threshold_w,
        }
    }

    pub fn keep_alive_interval(&self) -> Duration {
        self.scaled(Duration::from_secs(self.keep_alive_interval_seconds))
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    fn scaled(&self, duration: Duration) -> Duration {
        if self.simulation_mode {
            duration / SIMULATION_TIME_SCALE
        } else {
            duration
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        for (key, value) in [
            ("POWER_ON_THRESHOLD", self.power_on_threshold_w),
            ("POWER_ACTIVE_THRESHOLD", self.power_active_threshold_w),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::config(format!(
                    "{key} must be a finite non-negative number"
                )));
            }
        }

        for (key, value, max) in [
            ("INITIAL_DELAY_MINUTES", self.initial_delay_minutes, MAX_MINUTES),
            ("CHECK_DURATION_MINUTES", self.check_duration_minutes, MAX_MINUTES),
            (
                "INITIAL_CHECK_DURATION_MINUTES",
                self.initial_check_duration_minutes,
                MAX_MINUTES,
            ),
            ("CHECK_INTERVAL_SECONDS", self.check_interval_seconds, MAX_SECONDS),
            (
                "KEEP_ALIVE_INTERVAL_SECONDS",
                self.keep_alive_interval_seconds,
                MAX_SECONDS,
            ),
            ("SAMPLE_INTERVAL_MS", self.sample_interval_ms, MAX_SAMPLE_INTERVAL_MS),
        ] {
            if value == 0 {
                return Err(AppError::config(format!("{key} must be greater than zero")));
            }
            if value > max {
                return Err(AppError::config(format!("{key} must not exceed {max}")));
            }
        }

        if self.initial_check_duration_minutes >= self.initial_delay_minutes {
            return Err(AppError::config(
                "INITIAL_CHECK_DURATION_MINUTES must be shorter than INITIAL_DELAY_MINUTES",
            ));
        }

        Ok(())
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

fn optional_string<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}

fn parse_bool_or_default<F>(lookup: &F, key: &str, default: bool) -> Result<bool, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(AppError::config(format!("{key} must be a boolean"))),
        },
        None => Ok(default),
    }
}
