use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::task::AbortHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::app::AppError;
use crate::app::runtime::RuntimeEvent;
use crate::domain::auto_off::{TimerHandle, TimerScheduler};

// `interval` rejects a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

type ArmedTasks = Arc<Mutex<HashMap<u64, AbortHandle>>>;

fn lock(armed: &ArmedTasks) -> MutexGuard<'_, HashMap<u64, AbortHandle>> {
    armed.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Timers as tokio tasks on a small dedicated runtime. Every expiration is
/// posted to the event loop as [`RuntimeEvent::TimerFired`].
#[derive(Debug, Clone)]
pub struct TokioTimerService {
    runtime: Arc<Runtime>,
    events: Sender<RuntimeEvent>,
    armed: ArmedTasks,
    next_id: Arc<AtomicU64>,
}

impl TokioTimerService {
    pub fn start(events: Sender<RuntimeEvent>) -> Result<Self, AppError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("timers")
            .enable_time()
            .build()
            .map_err(AppError::runtime)?;

        Ok(Self {
            runtime: Arc::new(runtime),
            events,
            armed: Arc::default(),
            next_id: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Aborts every armed timer. None of them fires afterwards.
    pub fn shutdown(&self) {
        let mut armed = lock(&self.armed);
        for (_, task) in armed.drain() {
            task.abort();
        }
        tracing::debug!("timers stopped");
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        lock(&self.armed).len()
    }
}

impl TimerScheduler for TokioTimerService {
    fn schedule(&mut self, after: Duration, repeating: bool) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = TimerHandle(id);
        let events = self.events.clone();
        let armed = Arc::clone(&self.armed);

        // Held across the spawn so a short timer cannot finish before it is registered.
        let mut tasks = lock(&self.armed);
        let task = if repeating {
            self.runtime.spawn(async move {
                let period = after.max(MIN_PERIOD);
                let mut ticks = time::interval_at(time::Instant::now() + period, period);
                ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticks.tick().await;
                    if events.send(RuntimeEvent::TimerFired(handle)).is_err() {
                        break;
                    }
                }
                lock(&armed).remove(&id);
            })
        } else {
            self.runtime.spawn(async move {
                time::sleep(after).await;
                lock(&armed).remove(&id);
                let _ = events.send(RuntimeEvent::TimerFired(handle));
            })
        };
        tasks.insert(id, task.abort_handle());

        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = lock(&self.armed).remove(&handle.0) {
            task.abort();
            tracing::trace!(%handle, "timer cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver};
    use std::time::Duration;

    use crate::app::runtime::RuntimeEvent;
    use crate::domain::auto_off::{TimerHandle, TimerScheduler};

    use super::TokioTimerService;

    const GENEROUS: Duration = Duration::from_secs(2);

    fn fired(receiver: &Receiver<RuntimeEvent>) -> TimerHandle {
        match receiver.recv_timeout(GENEROUS) {
            Ok(RuntimeEvent::TimerFired(handle)) => handle,
            other => panic!("expected timer event, got {other:?}"),
        }
    }

    #[test]
    fn single_shot_timer_fires_once() {
        let (sender, receiver) = mpsc::channel();
        let mut timers = TokioTimerService::start(sender).expect("timers should start");

        let timer = timers.schedule(Duration::from_millis(10), false);

        assert_eq!(fired(&receiver), timer);
        assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let (sender, receiver) = mpsc::channel();
        let mut timers = TokioTimerService::start(sender).expect("timers should start");

        let cancelled = timers.schedule(Duration::from_millis(30), false);
        let kept = timers.schedule(Duration::from_millis(60), false);
        timers.cancel(cancelled);
        timers.cancel(cancelled);

        assert_eq!(fired(&receiver), kept);
        assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn repeating_timer_fires_until_cancelled() {
        let (sender, receiver) = mpsc::channel();
        let mut timers = TokioTimerService::start(sender).expect("timers should start");

        let poll = timers.schedule(Duration::from_millis(10), true);
        for _ in 0..3 {
            assert_eq!(fired(&receiver), poll);
        }
        assert_eq!(timers.pending(), 1);

        timers.cancel(poll);
        assert_eq!(timers.pending(), 0);
        while receiver.recv_timeout(Duration::from_millis(50)).is_ok() {}
        assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn fires_in_deadline_order() {
        let (sender, receiver) = mpsc::channel();
        let mut timers = TokioTimerService::start(sender).expect("timers should start");

        let late = timers.schedule(Duration::from_millis(80), false);
        let early = timers.schedule(Duration::from_millis(20), false);

        assert_eq!(fired(&receiver), early);
        assert_eq!(fired(&receiver), late);
    }

    #[test]
    fn shutdown_discards_pending_timers() {
        let (sender, receiver) = mpsc::channel();
        let mut timers = TokioTimerService::start(sender).expect("timers should start");

        timers.schedule(Duration::from_millis(30), false);
        timers.schedule(Duration::from_millis(10), true);
        timers.shutdown();

        assert_eq!(timers.pending(), 0);
        assert!(receiver.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn handles_are_unique_across_clones() {
        let (sender, _receiver) = mpsc::channel();
        let mut timers = TokioTimerService::start(sender).expect("timers should start");
        let mut other = timers.clone();

        let first = timers.schedule(Duration::from_secs(60), false);
        let second = other.schedule(Duration::from_secs(60), false);

        assert_ne!(first, second);
        assert_eq!(timers.pending(), 2);
        timers.shutdown();
    }
}
