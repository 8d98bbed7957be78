use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::domain::auto_off::{Clock, CycleEffects, TimerHandle, TimerScheduler, TimestampMs};
use crate::domain::scene::SceneKey;

#[derive(Debug, Clone)]
pub struct FakeClock {
    now: Arc<AtomicI64>,
}

impl FakeClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).expect("duration fits in i64 millis");
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn now_ms(&self) -> TimestampMs {
        TimestampMs(self.now.load(Ordering::SeqCst))
    }
}

impl Clock for FakeClock {
    fn now(&self) -> TimestampMs {
        self.now_ms()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTimer {
    pub after: Duration,
    pub repeating: bool,
}

/// Timer fake: tests decide when a handle fires.
#[derive(Debug, Default)]
pub struct ManualTimers {
    next_id: u64,
    scheduled: BTreeMap<TimerHandle, ScheduledTimer>,
    armed: BTreeMap<TimerHandle, ScheduledTimer>,
    pub cancelled: Vec<TimerHandle>,
}

impl ManualTimers {
    pub fn get(&self, handle: TimerHandle) -> Option<&ScheduledTimer> {
        self.scheduled.get(&handle)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Mirrors the host: a single-shot timer is gone once it has fired.
    pub fn fire(&mut self, handle: TimerHandle) {
        let repeating = self
            .armed
            .get(&handle)
            .map(|timer| timer.repeating)
            .expect("only armed timers can fire");
        if !repeating {
            self.armed.remove(&handle);
        }
    }
}

impl TimerScheduler for ManualTimers {
    fn schedule(&mut self, after: Duration, repeating: bool) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        let timer = ScheduledTimer { after, repeating };
        self.scheduled.insert(handle, timer);
        self.armed.insert(handle, timer);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if self.armed.remove(&handle).is_some() {
            self.cancelled.push(handle);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Notify(SceneKey),
    Scene(SceneKey, bool),
    SwitchOff,
}

#[derive(Debug, Default)]
pub struct RecordingEffects {
    pub calls: Vec<Effect>,
}

impl CycleEffects for RecordingEffects {
    fn notify(&mut self, scene: SceneKey) {
        self.calls.push(Effect::Notify(scene));
    }

    fn set_scene_enabled(&mut self, scene: SceneKey, enabled: bool) {
        self.calls.push(Effect::Scene(scene, enabled));
    }

    fn switch_off(&mut self) {
        self.calls.push(Effect::SwitchOff);
    }
}

/// Serves one canned HTTP response per accepted connection and returns the
/// request lines it saw, in order.
pub fn spawn_http_responder(
    responses: Vec<(u16, &'static str)>,
) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("responder should bind");
    let addr = listener.local_addr().expect("addr should be available");

    let handle = thread::spawn(move || {
        let mut request_lines = Vec::new();

        for (status, body) in responses {
            let (mut stream, _) = listener.accept().expect("connection should be accepted");
            let mut reader = BufReader::new(stream.try_clone().expect("stream should clone"));

            let mut request_line = String::new();
            reader
                .read_line(&mut request_line)
                .expect("request line should be readable");
            loop {
                let mut header = String::new();
                let read = reader.read_line(&mut header).expect("header should be readable");
                if read == 0 || header == "\r\n" {
                    break;
                }
            }
            request_lines.push(request_line.trim().to_string());

            let response = format!(
                "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream
                .write_all(response.as_bytes())
                .expect("response should be written");
        }

        request_lines
    });

    (format!("http://{addr}"), handle)
}
