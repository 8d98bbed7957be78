use std::fs;
use std::io;
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::Value;

use crate::adapters::shelly_rpc::{RelayClient, RelayClientError};
use crate::domain::switch_status::{SwitchStatus, parse_switch_status};

#[derive(Debug, Clone, Deserialize)]
struct ScriptFile {
    #[serde(default = "default_loop")]
    loop_forever: bool,
    status: Vec<ScriptEvent>,
}

/// One replayed `get_status` answer: a raw payload, a bare power value or an error kind.
#[derive(Debug, Clone, Deserialize)]
struct ScriptEvent {
    ok: Option<Value>,
    power: Option<f64>,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct ReplayState {
    status_idx: usize,
}

/// Relay replaying a scripted sequence of status readings. Switch commands are
/// only logged.
#[derive(Debug)]
pub struct ShellyDebugFileClient {
    script: ScriptFile,
    state: Mutex<ReplayState>,
}

fn default_loop() -> bool {
    false
}

impl ShellyDebugFileClient {
    pub fn from_file(path: &str) -> Result<Self, RelayClientError> {
        let content = fs::read_to_string(path).map_err(RelayClientError::Io)?;
        let script: ScriptFile =
            serde_json::from_str(&content).map_err(RelayClientError::Json)?;

        if script.status.is_empty() {
            return Err(RelayClientError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "debug script must contain at least one status event",
            )));
        }

        Ok(Self {
            script,
            state: Mutex::new(ReplayState::default()),
        })
    }

    fn next_event(&self) -> Result<ScriptEvent, RelayClientError> {
        let mut state = self.state.lock().map_err(|_| {
            RelayClientError::Io(io::Error::other("debug replay state lock poisoned"))
        })?;

        if state.status_idx >= self.script.status.len() {
            if self.script.loop_forever {
                state.status_idx = 0;
            } else {
                return Err(RelayClientError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "debug replay finished",
                )));
            }
        }

        let event = self
            .script
            .status
            .get(state.status_idx)
            .cloned()
            .ok_or_else(|| {
                RelayClientError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "debug script event index out of bounds",
                ))
            })?;
        state.status_idx = state.status_idx.saturating_add(1);

        Ok(event)
    }

    fn execute_event(event: ScriptEvent) -> Result<SwitchStatus, RelayClientError> {
        match (event.ok, event.power, event.error) {
            (Some(payload), None, None) => Ok(parse_switch_status(&payload, 0)?),
            (None, Some(power), None) => Ok(parse_switch_status(
                &serde_json::json!({ "output": true, "apower": power }),
                0,
            )?),
            (None, None, Some(error)) => Err(map_script_error(&error)),
            _ => Err(RelayClientError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "script event must contain exactly one of: ok, power or error",
            ))),
        }
    }
}

fn map_script_error(kind: &str) -> RelayClientError {
    let normalized = kind.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "timeout" => RelayClientError::Io(io::Error::new(io::ErrorKind::TimedOut, kind)),
        "host_unreachable" | "relay_unreachable" => {
            RelayClientError::Io(io::Error::new(io::ErrorKind::HostUnreachable, kind))
        }
        "connection_refused" => {
            RelayClientError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, kind))
        }
        "http_500" => RelayClientError::Status(500),
        "invalid_json" => match serde_json::from_str::<Value>("not json") {
            Err(parse_err) => RelayClientError::Json(parse_err),
            Ok(_) => RelayClientError::Io(io::Error::new(io::ErrorKind::InvalidData, kind)),
        },
        _ => RelayClientError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unknown scripted error kind: {kind}"),
        )),
    }
}

impl RelayClient for ShellyDebugFileClient {
    fn get_status(&self) -> Result<SwitchStatus, RelayClientError> {
        Self::execute_event(self.next_event()?)
    }

    fn set_switch(&self, on: bool) -> Result<(), RelayClientError> {
        tracing::info!(on, "simulated relay switch command");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{ErrorKind, Write};

    use tempfile::NamedTempFile;

    use crate::adapters::shelly_rpc::{RelayClient, RelayClientError};

    use super::ShellyDebugFileClient;

    fn script(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file should be created");
        file.write_all(content.as_bytes())
            .expect("script should be written");
        file
    }

    fn load(file: &NamedTempFile) -> Result<ShellyDebugFileClient, RelayClientError> {
        ShellyDebugFileClient::from_file(file.path().to_string_lossy().as_ref())
    }

    #[test]
    fn replays_power_values_and_raw_payloads() {
        let file = script(
            r#"{"status": [
                {"power": 0.0},
                {"ok": {"id": 0, "output": true, "apower": 1450.5}}
            ]}"#,
        );
        let client = load(&file).expect("script should load");

        let first = client.get_status().expect("first reading");
        let second = client.get_status().expect("second reading");
        let finished = client.get_status().expect_err("replay should be finished");

        assert_eq!(first.apower_w, 0.0);
        assert_eq!(second.apower_w, 1450.5);
        match finished {
            RelayClientError::Io(io) => assert_eq!(io.kind(), ErrorKind::UnexpectedEof),
            other => panic!("expected eof, got {other:?}"),
        }
    }

    #[test]
    fn loops_when_requested() {
        let file = script(r#"{"loop_forever": true, "status": [{"power": 1.0}, {"power": 2.0}]}"#);
        let client = load(&file).expect("script should load");

        let readings: Vec<f64> = (0..3)
            .map(|_| client.get_status().expect("reading").apower_w)
            .collect();

        assert_eq!(readings, vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn simulates_relay_failures() {
        let file = script(
            r#"{"status": [
                {"error": "relay_unreachable"},
                {"error": "timeout"},
                {"error": "invalid_json"},
                {"error": "flux_capacitor"}
            ]}"#,
        );
        let client = load(&file).expect("script should load");

        match client.get_status() {
            Err(RelayClientError::Io(io)) => assert_eq!(io.kind(), ErrorKind::HostUnreachable),
            other => panic!("expected host unreachable, got {other:?}"),
        }
        match client.get_status() {
            Err(RelayClientError::Io(io)) => assert_eq!(io.kind(), ErrorKind::TimedOut),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(matches!(client.get_status(), Err(RelayClientError::Json(_))));
        match client.get_status() {
            Err(RelayClientError::Io(io)) => assert_eq!(io.kind(), ErrorKind::InvalidInput),
            other => panic!("expected invalid input, got {other:?}"),
        }
    }

    #[test]
    fn rejects_ambiguous_events() {
        let file = script(r#"{"status": [{"power": 1.0, "error": "timeout"}]}"#);
        let client = load(&file).expect("script should load");

        match client.get_status() {
            Err(RelayClientError::Io(io)) => assert_eq!(io.kind(), ErrorKind::InvalidData),
            other => panic!("expected invalid data, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_or_invalid_scripts() {
        let empty = script(r#"{"status": []}"#);
        let invalid = script("not json");

        assert!(matches!(load(&empty), Err(RelayClientError::Io(_))));
        assert!(matches!(load(&invalid), Err(RelayClientError::Json(_))));
    }

    #[test]
    fn switch_commands_do_not_advance_the_replay() {
        let file = script(r#"{"status": [{"power": 7.5}, {"power": 0.2}]}"#);
        let client = load(&file).expect("script should load");

        client.set_switch(false).expect("switch off");
        client.set_switch(true).expect("switch on");

        assert_eq!(client.get_status().expect("first reading").apower_w, 7.5);
        assert_eq!(client.get_status().expect("second reading").apower_w, 0.2);
    }
}
