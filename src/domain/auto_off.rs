use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::scene::SceneKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampMs(pub i64);

impl TimestampMs {
    pub fn elapsed_since(self, earlier: TimestampMs) -> Duration {
        let millis = self.0.saturating_sub(earlier.0);
        Duration::from_millis(u64::try_from(millis).unwrap_or(0))
    }
}

pub trait Clock {
    fn now(&self) -> TimestampMs;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(pub u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Host timer capability. Expirations are delivered back to the machine through
/// [`AutoOffMachine::on_timer_fired`] with the handle returned here.
pub trait TimerScheduler {
    fn schedule(&mut self, after: Duration, repeating: bool) -> TimerHandle;
    /// Must tolerate handles that already fired or were already cancelled.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Fire-and-forget side effects. Implementations must not block and must not
/// report back into the machine.
pub trait CycleEffects {
    fn notify(&mut self, scene: SceneKey);
    fn set_scene_enabled(&mut self, scene: SceneKey, enabled: bool);
    fn switch_off(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleSettings {
    pub initial_delay: Duration,
    pub initial_check_duration: Duration,
    pub check_duration: Duration,
    pub check_interval: Duration,
    pub power_on_threshold_w: f64,
    pub power_active_threshold_w: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Delay,
    Monitoring,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Delay => "delay",
            Phase::Monitoring => "monitoring",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CycleState {
    Idle,
    Delay(DelayPhase),
    Monitoring(MonitoringPhase),
}

// early_confirm_timer is Some only while run_confirmed is false.
#[derive(Debug, Clone, PartialEq)]
struct DelayPhase {
    cycle_id: Uuid,
    delay_timer: TimerHandle,
    early_confirm_timer: Option<TimerHandle>,
    run_confirmed: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct MonitoringPhase {
    cycle_id: Uuid,
    poll_timer: TimerHandle,
    started_at: TimestampMs,
    run_confirmed: bool,
}

/// Read-only view of the current cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineSnapshot {
    pub phase: Phase,
    pub cycle_id: Option<Uuid>,
    pub run_confirmed: bool,
    pub monitoring_started_at: Option<TimestampMs>,
    pub delay_timer: Option<TimerHandle>,
    pub early_confirm_timer: Option<TimerHandle>,
    pub poll_timer: Option<TimerHandle>,
}

impl Default for MachineSnapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            cycle_id: None,
            run_confirmed: false,
            monitoring_started_at: None,
            delay_timer: None,
            early_confirm_timer: None,
            poll_timer: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TimerRole {
    Delay,
    EarlyConfirm,
    Poll,
}

pub struct AutoOffMachine<T, E, C> {
    settings: CycleSettings,
    timers: T,
    effects: E,
    clock: C,
    state: CycleState,
}

impl<T, E, C> AutoOffMachine<T, E, C>
where
    T: TimerScheduler,
    E: CycleEffects,
    C: Clock,
{
    pub fn new(settings: CycleSettings, timers: T, effects: E, clock: C) -> Self {
        Self {
            settings,
            timers,
            effects,
            clock,
            state: CycleState::Idle,
        }
    }

    #[cfg(test)]
    pub fn timers(&self) -> &T {
        &self.timers
    }

    #[cfg(test)]
    pub fn effects(&self) -> &E {
        &self.effects
    }

    #[cfg(test)]
    pub(crate) fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            CycleState::Idle => Phase::Idle,
            CycleState::Delay(_) => Phase::Delay,
            CycleState::Monitoring(_) => Phase::Monitoring,
        }
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        match &self.state {
            CycleState::Idle => MachineSnapshot::default(),
            CycleState::Delay(delay) => MachineSnapshot {
                phase: Phase::Delay,
                cycle_id: Some(delay.cycle_id),
                run_confirmed: delay.run_confirmed,
                delay_timer: Some(delay.delay_timer),
                early_confirm_timer: delay.early_confirm_timer,
                ..MachineSnapshot::default()
            },
            CycleState::Monitoring(monitoring) => MachineSnapshot {
                phase: Phase::Monitoring,
                cycle_id: Some(monitoring.cycle_id),
                run_confirmed: monitoring.run_confirmed,
                monitoring_started_at: Some(monitoring.started_at),
                poll_timer: Some(monitoring.poll_timer),
                ..MachineSnapshot::default()
            },
        }
    }

    /// Applies the relay reading taken once at process start. `None` means the
    /// status could not be retrieved; the machine then stays idle.
    pub fn reconcile_startup(&mut self, initial_power_w: Option<f64>) {
        match initial_power_w {
            Some(power_w) if power_w >= self.settings.power_on_threshold_w => {
                tracing::info!(power_w, "machine is active on start, starting cycle");
                self.start_cycle(power_w);
            }
            Some(power_w) => {
                tracing::info!(power_w, "machine is not active on start, waiting for power increase");
            }
            None => {
                tracing::warn!("initial relay status unavailable, waiting for power increase");
            }
        }
    }

    pub fn on_power_sample(&mut self, power_w: f64) {
        if !power_w.is_finite() {
            tracing::warn!(power_w, "ignoring non-finite power sample");
            return;
        }

        tracing::debug!(power_w, phase = %self.phase(), "power sample received");

        match self.phase() {
            Phase::Monitoring => self.sample_while_monitoring(power_w),
            Phase::Delay => self.sample_while_delayed(power_w),
            Phase::Idle => {
                if power_w >= self.settings.power_on_threshold_w {
                    self.start_cycle(power_w);
                }
            }
        }
    }

    /// Routes an expired timer to its handler. Handles that are not armed in the
    /// current phase are stale and ignored.
    pub fn on_timer_fired(&mut self, handle: TimerHandle) {
        let role = match &self.state {
            CycleState::Delay(delay) if delay.delay_timer == handle => Some(TimerRole::Delay),
            CycleState::Delay(delay) if delay.early_confirm_timer == Some(handle) => {
                Some(TimerRole::EarlyConfirm)
            }
            CycleState::Monitoring(monitoring) if monitoring.poll_timer == handle => {
                Some(TimerRole::Poll)
            }
            _ => None,
        };

        match role {
            Some(TimerRole::Delay) => self.on_delay_timer_expired(),
            Some(TimerRole::EarlyConfirm) => self.on_early_confirm_timer_expired(),
            Some(TimerRole::Poll) => self.on_poll_tick(),
            None => {
                tracing::debug!(timer = %handle, phase = %self.phase(), "stale timer ignored");
            }
        }
    }

    pub fn on_delay_timer_expired(&mut self) {
        let CycleState::Delay(delay) = &self.state else {
            tracing::debug!(phase = %self.phase(), "delay expiry outside delay phase ignored");
            return;
        };
        let cycle_id = delay.cycle_id;
        let run_confirmed = delay.run_confirmed;

        if let Some(handle) = delay.early_confirm_timer {
            self.timers.cancel(handle);
            tracing::debug!(%cycle_id, "early confirmation timer stopped because monitoring is starting");
        }

        let started_at = self.clock.now();
        let poll_timer = self.timers.schedule(self.settings.check_interval, true);
        self.state = CycleState::Monitoring(MonitoringPhase {
            cycle_id,
            poll_timer,
            started_at,
            run_confirmed,
        });

        tracing::info!(
            %cycle_id,
            check_duration_s = self.settings.check_duration.as_secs(),
            "initial delay elapsed, monitoring for standby"
        );
        self.effects.notify(SceneKey::MonitoringActive);
    }

    pub fn on_early_confirm_timer_expired(&mut self) {
        let CycleState::Delay(delay) = &mut self.state else {
            tracing::debug!("early confirmation expiry outside delay phase ignored");
            return;
        };
        if delay.early_confirm_timer.take().is_none() || delay.run_confirmed {
            tracing::debug!(cycle_id = %delay.cycle_id, "early confirmation already settled");
            return;
        }

        tracing::warn!(
            cycle_id = %delay.cycle_id,
            window_s = self.settings.initial_check_duration.as_secs(),
            "run cycle not confirmed in time, assuming false start"
        );
        self.effects.set_scene_enabled(SceneKey::CycleToggle, false);
        self.reset_and_stop();
    }

    pub fn on_poll_tick(&mut self) {
        let CycleState::Monitoring(monitoring) = &self.state else {
            tracing::debug!(phase = %self.phase(), "poll tick outside monitoring ignored");
            return;
        };

        let elapsed = self.clock.now().elapsed_since(monitoring.started_at);
        tracing::debug!(
            cycle_id = %monitoring.cycle_id,
            elapsed_s = elapsed.as_secs(),
            check_duration_s = self.settings.check_duration.as_secs(),
            "checking for standby"
        );

        if elapsed < self.settings.check_duration {
            return;
        }

        tracing::info!(cycle_id = %monitoring.cycle_id, "standby confirmed, switching off");
        self.effects.notify(SceneKey::StandbyOffDetected);
        self.effects.switch_off();
        self.effects.set_scene_enabled(SceneKey::CycleToggle, true);
        self.reset_and_stop();
    }

    /// Cancels every armed timer and returns to idle. Safe to call from any phase.
    pub fn reset_and_stop(&mut self) {
        match std::mem::replace(&mut self.state, CycleState::Idle) {
            CycleState::Idle => {}
            CycleState::Delay(delay) => {
                self.timers.cancel(delay.delay_timer);
                if let Some(handle) = delay.early_confirm_timer {
                    self.timers.cancel(handle);
                }
            }
            CycleState::Monitoring(monitoring) => self.timers.cancel(monitoring.poll_timer),
        }

        tracing::debug!("cycle timers stopped, state reset to idle");
    }

    fn start_cycle(&mut self, power_w: f64) {
        if !matches!(self.state, CycleState::Idle) {
            tracing::debug!(phase = %self.phase(), "active cycle detected, restarting");
            self.reset_and_stop();
        }

        let cycle_id = Uuid::new_v4();
        let delay_timer = self.timers.schedule(self.settings.initial_delay, false);
        let early_confirm_timer = self
            .timers
            .schedule(self.settings.initial_check_duration, false);
        self.state = CycleState::Delay(DelayPhase {
            cycle_id,
            delay_timer,
            early_confirm_timer: Some(early_confirm_timer),
            run_confirmed: false,
        });

        tracing::info!(
            %cycle_id,
            power_w,
            initial_delay_s = self.settings.initial_delay.as_secs(),
            confirmation_window_s = self.settings.initial_check_duration.as_secs(),
            "power increase detected, entering delay phase"
        );
        self.effects.notify(SceneKey::MachineOn);
        self.effects.set_scene_enabled(SceneKey::CycleToggle, true);
    }

    fn sample_while_delayed(&mut self, power_w: f64) {
        let CycleState::Delay(delay) = &mut self.state else {
            return;
        };

        if power_w >= self.settings.power_on_threshold_w
            && !delay.run_confirmed
            && let Some(handle) = delay.early_confirm_timer.take()
        {
            delay.run_confirmed = true;
            let cycle_id = delay.cycle_id;
            self.timers.cancel(handle);
            tracing::info!(%cycle_id, power_w, "run cycle confirmed");
            return;
        }

        tracing::debug!(power_w, "sample ignored during delay phase");
    }

    fn sample_while_monitoring(&mut self, power_w: f64) {
        let CycleState::Monitoring(monitoring) = &self.state else {
            return;
        };

        if power_w >= self.settings.power_active_threshold_w {
            tracing::warn!(
                cycle_id = %monitoring.cycle_id,
                power_w,
                "power increase during monitoring, emergency shutdown"
            );
            self.effects.switch_off();
            self.effects.notify(SceneKey::MachineAutoOff);
            self.effects.set_scene_enabled(SceneKey::CycleToggle, false);
            self.reset_and_stop();
            return;
        }

        if power_w >= self.settings.power_on_threshold_w {
            tracing::debug!(power_w, "power increase ignored, cycle already active");
        }
    }
}
