use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use actix_web::{App, HttpServer, web};
use chrono::{SecondsFormat, Utc};
use thiserror::Error;

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::shelly_cloud::{CloudCredentials, ShellyCloudClient};
use crate::adapters::shelly_debug_file::ShellyDebugFileClient;
use crate::adapters::shelly_rpc::{RelayClient, RelayClientError, ShellyRpcClient};
use crate::app::config::{AppConfig, RelaySource};
use crate::app::dispatcher::NotificationDispatcher;
use crate::app::error::AppError;
use crate::app::outbound::{
    QueuedEffects, RelayCommand, RelayWorker, SceneCommand, SceneWorker, start_relay_worker,
    start_scene_worker,
};
use crate::app::services::{RuntimeServices, SharedStatus};
use crate::app::timers::TokioTimerService;
use crate::domain::auto_off::{
    AutoOffMachine, Clock, CycleEffects, TimerHandle, TimerScheduler, TimestampMs,
};
use crate::domain::power_delta::PowerDeltaFilter;

// Upper bound for a single sleep so stop requests are noticed quickly.
const STOP_POLL_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuntimeEvent {
    PowerSample(f64),
    TimerFired(TimerHandle),
    Shutdown,
}

/// Monotonic clock. Wall time is read once at construction so timestamps
/// still render as real dates, but elapsed time never jumps with NTP or DST.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    started: Instant,
    started_ms: i64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_ms: Utc::now().timestamp_millis(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> TimestampMs {
        let elapsed_ms = i64::try_from(self.started.elapsed().as_millis()).unwrap_or(i64::MAX);
        TimestampMs(self.started_ms.saturating_add(elapsed_ms))
    }
}

/// Feeds events to the machine one at a time until `Shutdown` arrives or every
/// sender is gone. All timers are cancelled on the way out.
pub fn run_event_loop<T, E, C>(
    machine: &mut AutoOffMachine<T, E, C>,
    events: &Receiver<RuntimeEvent>,
    status: &SharedStatus,
) where
    T: TimerScheduler,
    E: CycleEffects,
    C: Clock,
{
    status.publish(machine.snapshot());

    for event in events {
        match event {
            RuntimeEvent::PowerSample(power_w) => machine.on_power_sample(power_w),
            RuntimeEvent::TimerFired(handle) => machine.on_timer_fired(handle),
            RuntimeEvent::Shutdown => break,
        }
        status.publish(machine.snapshot());
    }

    machine.reset_and_stop();
    status.publish(machine.snapshot());
    tracing::info!("event loop stopped");
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("failed to read relay status: {0}")]
    Read(#[source] RelayClientError),
    #[error("event loop is not running")]
    EventLoopStopped,
}

/// Polls the relay and forwards power changes to the event loop.
pub struct PowerWatcher {
    relay: Arc<dyn RelayClient>,
    filter: PowerDeltaFilter,
    events: Sender<RuntimeEvent>,
}

impl PowerWatcher {
    pub fn new(
        relay: Arc<dyn RelayClient>,
        filter: PowerDeltaFilter,
        events: Sender<RuntimeEvent>,
    ) -> Self {
        Self {
            relay,
            filter,
            events,
        }
    }

    pub fn tick(&mut self) -> Result<Option<f64>, WatcherError> {
        let status = self.relay.get_status().map_err(WatcherError::Read)?;
        let Some(power_w) = self.filter.observe(status.apower_w) else {
            return Ok(None);
        };

        self.events
            .send(RuntimeEvent::PowerSample(power_w))
            .map_err(|_| WatcherError::EventLoopStopped)?;
        Ok(Some(power_w))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOutcome {
    Healthy,
    Recovered,
    FirstFailure,
    StillFailing,
}

/// Tracks a streak of failed relay reads so only its first failure is loud.
#[derive(Debug, Default)]
struct ReadHealth {
    failing: bool,
}

impl ReadHealth {
    fn record(&mut self, succeeded: bool) -> ReadOutcome {
        let outcome = match (succeeded, self.failing) {
            (true, false) => ReadOutcome::Healthy,
            (true, true) => ReadOutcome::Recovered,
            (false, false) => ReadOutcome::FirstFailure,
            (false, true) => ReadOutcome::StillFailing,
        };
        self.failing = !succeeded;
        outcome
    }
}

pub fn start_power_watcher(
    mut watcher: PowerWatcher,
    interval: Duration,
    stop_flag: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, AppError> {
    std::thread::Builder::new()
        .name("power-watcher".to_string())
        .spawn(move || {
            let mut health = ReadHealth::default();
            while !stop_flag.load(Ordering::Relaxed) {
                match watcher.tick() {
                    Ok(power_w) => {
                        if health.record(true) == ReadOutcome::Recovered {
                            tracing::info!("relay status readable again");
                        }
                        if let Some(power_w) = power_w {
                            tracing::debug!(power_w, "power change forwarded");
                        }
                    }
                    Err(WatcherError::EventLoopStopped) => {
                        tracing::debug!("event loop gone, power watcher exiting");
                        break;
                    }
                    Err(error) => match health.record(false) {
                        ReadOutcome::FirstFailure => {
                            tracing::warn!(error = %error, "power watcher read failed");
                        }
                        _ => tracing::debug!(error = %error, "relay still unreadable"),
                    },
                }
                sleep_unless_stopped(interval, &stop_flag);
            }
        })
        .map_err(AppError::runtime)
}

/// Periodic status read that keeps the relay connection warm. Has no effect on
/// the cycle.
pub fn start_keep_alive(
    relay: Arc<dyn RelayClient>,
    interval: Duration,
    stop_flag: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, AppError> {
    std::thread::Builder::new()
        .name("keep-alive".to_string())
        .spawn(move || {
            loop {
                sleep_unless_stopped(interval, &stop_flag);
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                match relay.get_status() {
                    Ok(status) => tracing::debug!(power_w = status.apower_w, "keep-alive ok"),
                    Err(error) => tracing::warn!(error = %error, "keep-alive status read failed"),
                }
            }
        })
        .map_err(AppError::runtime)
}

fn sleep_unless_stopped(duration: Duration, stop_flag: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !stop_flag.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL_SLICE));
    }
}

pub fn build_relay_client(config: &AppConfig) -> Result<Arc<dyn RelayClient>, AppError> {
    match &config.relay {
        RelaySource::Http { host, switch_id } => {
            let client = ShellyRpcClient::new(host, *switch_id).map_err(AppError::runtime)?;
            Ok(Arc::new(client))
        }
        RelaySource::DebugScript { path } => {
            tracing::info!(path = %path, "using scripted relay replay");
            let client = ShellyDebugFileClient::from_file(path).map_err(AppError::runtime)?;
            Ok(Arc::new(client))
        }
    }
}

pub fn read_initial_power(relay: &dyn RelayClient) -> Option<f64> {
    match relay.get_status() {
        Ok(status) => Some(status.apower_w),
        Err(error) => {
            tracing::warn!(error = %error, "failed to read relay status on start");
            None
        }
    }
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let relay = build_relay_client(&config)?;

    let credentials = CloudCredentials::from_parts(
        config.cloud_base_url.as_deref(),
        config.cloud_auth_key.as_deref(),
    );
    if credentials.is_none() {
        tracing::error!("cloud base url or authorization key missing, notifications are disabled");
    }
    let cloud = ShellyCloudClient::new().map_err(AppError::runtime)?;
    let dispatcher = NotificationDispatcher::new(cloud, credentials, config.scene_ids.clone());

    let (scene_tx, scene_rx) = mpsc::channel();
    let scene_handle = start_scene_worker(SceneWorker::new(dispatcher), scene_rx)?;
    let (relay_tx, relay_rx) = mpsc::channel();
    let relay_handle = start_relay_worker(RelayWorker::new(Arc::clone(&relay)), relay_rx)?;

    let (event_tx, event_rx) = mpsc::channel();
    let timers = TokioTimerService::start(event_tx.clone())?;
    let status = SharedStatus::new();

    let initial_power_w = read_initial_power(relay.as_ref());
    let mut machine = AutoOffMachine::new(
        config.cycle_settings(),
        timers.clone(),
        QueuedEffects::new(scene_tx.clone(), relay_tx.clone()),
        SystemClock::new(),
    );
    machine.reconcile_startup(initial_power_w);

    let loop_status = status.clone();
    let event_loop_handle = std::thread::Builder::new()
        .name("event-loop".to_string())
        .spawn(move || run_event_loop(&mut machine, &event_rx, &loop_status))
        .map_err(AppError::runtime)?;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let watcher = PowerWatcher::new(
        Arc::clone(&relay),
        PowerDeltaFilter::seeded(initial_power_w),
        event_tx.clone(),
    );
    let watcher_handle =
        start_power_watcher(watcher, config.sample_interval(), Arc::clone(&stop_flag))?;
    let keep_alive_handle = if config.enable_keep_alive {
        Some(start_keep_alive(
            Arc::clone(&relay),
            config.keep_alive_interval(),
            Arc::clone(&stop_flag),
        )?)
    } else {
        None
    };

    let api_state = ApiState {
        services: RuntimeServices::new(status, event_tx.clone()),
    };
    let http_bind = config.http_bind.clone();

    tracing::info!(bind = %http_bind, "http server starting");

    let server_result = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&http_bind)?
        .run()
        .await
    });

    tracing::info!("shutting down");
    stop_flag.store(true, Ordering::Relaxed);

    let mut panicked = Vec::new();
    if watcher_handle.join().is_err() {
        panicked.push("power watcher");
    }
    if let Some(handle) = keep_alive_handle
        && handle.join().is_err()
    {
        panicked.push("keep-alive");
    }

    // A stopped loop has already reset itself.
    let _ = event_tx.send(RuntimeEvent::Shutdown);
    if event_loop_handle.join().is_err() {
        panicked.push("event loop");
    }
    timers.shutdown();
    let _ = relay_tx.send(RelayCommand::Shutdown);
    if relay_handle.join().is_err() {
        panicked.push("relay worker");
    }
    let _ = scene_tx.send(SceneCommand::Shutdown);
    if scene_handle.join().is_err() {
        panicked.push("scene worker");
    }

    if !panicked.is_empty() {
        return Err(AppError::runtime(format!(
            "threads panicked: {}",
            panicked.join(", ")
        )));
    }

    server_result.map_err(AppError::runtime)
}

pub fn timestamp_to_iso8601(timestamp: TimestampMs) -> String {
    let datetime = chrono::DateTime::<Utc>::from_timestamp_millis(timestamp.0)
        .unwrap_or_else(|| chrono::DateTime::<Utc>::from(std::time::UNIX_EPOCH));
    datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
}
