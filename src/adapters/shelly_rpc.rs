use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;
use thiserror::Error;

use crate::domain::switch_status::{ParseError, SwitchStatus, parse_switch_status};

const HTTP_TIMEOUT_SECONDS: u64 = 5;

/// Power reading and switching capability of the relay.
pub trait RelayClient: Send + Sync + 'static {
    fn get_status(&self) -> Result<SwitchStatus, RelayClientError>;
    fn set_switch(&self, on: bool) -> Result<(), RelayClientError>;
}

#[derive(Debug, Error)]
pub enum RelayClientError {
    #[error("failed to build relay http client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay answered with http status {0}")]
    Status(u16),
    #[error("failed to parse relay status: {0}")]
    Parse(#[from] ParseError),
    #[error("relay i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse relay response as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shelly Gen2 local RPC over HTTP (`/rpc/Switch.GetStatus`, `/rpc/Switch.Set`).
#[derive(Debug, Clone)]
pub struct ShellyRpcClient {
    http: Client,
    base_url: String,
    switch_id: u8,
}

impl ShellyRpcClient {
    pub fn new(host: &str, switch_id: u8) -> Result<Self, RelayClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()
            .map_err(RelayClientError::Build)?;

        Ok(Self {
            http,
            base_url: base_url_for(host),
            switch_id,
        })
    }

    pub fn switch_id(&self) -> u8 {
        self.switch_id
    }

    fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value, RelayClientError> {
        let response = self
            .http
            .get(format!("{}/rpc/{method}", self.base_url))
            .query(params)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayClientError::Status(status.as_u16()));
        }

        Ok(response.json::<Value>()?)
    }
}

impl RelayClient for ShellyRpcClient {
    fn get_status(&self) -> Result<SwitchStatus, RelayClientError> {
        let payload = self.call("Switch.GetStatus", &[("id", self.switch_id.to_string())])?;
        Ok(parse_switch_status(&payload, self.switch_id)?)
    }

    fn set_switch(&self, on: bool) -> Result<(), RelayClientError> {
        self.call(
            "Switch.Set",
            &[("id", self.switch_id.to_string()), ("on", on.to_string())],
        )?;
        Ok(())
    }
}

fn base_url_for(host: &str) -> String {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::spawn_http_responder;

    use super::{RelayClient, RelayClientError, ShellyRpcClient, base_url_for};

    #[test]
    fn builds_base_url_from_bare_host_or_url() {
        assert_eq!(base_url_for("192.168.1.40"), "http://192.168.1.40");
        assert_eq!(base_url_for(" http://plug.local/ "), "http://plug.local");
        assert_eq!(base_url_for("https://plug.local"), "https://plug.local");
    }

    #[test]
    fn reads_switch_status_over_rpc() {
        let (base_url, responder) = spawn_http_responder(vec![(
            200,
            r#"{"id":0,"output":true,"apower":812.4,"voltage":231.2,"aenergy":{"total":120.5}}"#,
        )]);
        let client = ShellyRpcClient::new(&base_url, 0).expect("client should build");

        let status = client.get_status().expect("status should be readable");

        assert_eq!(status.apower_w, 812.4);
        assert_eq!(status.output, Some(true));
        assert_eq!(status.energy_total_wh, Some(120.5));

        let requests = responder.join().expect("responder should finish");
        assert_eq!(requests, vec!["GET /rpc/Switch.GetStatus?id=0 HTTP/1.1"]);
    }

    #[test]
    fn sends_switch_off_command() {
        let (base_url, responder) =
            spawn_http_responder(vec![(200, r#"{"was_on":true}"#)]);
        let client = ShellyRpcClient::new(&base_url, 1).expect("client should build");

        client.set_switch(false).expect("switch command should succeed");

        let requests = responder.join().expect("responder should finish");
        assert_eq!(requests, vec!["GET /rpc/Switch.Set?id=1&on=false HTTP/1.1"]);
    }

    #[test]
    fn maps_error_status() {
        let (base_url, responder) =
            spawn_http_responder(vec![(500, r#"{"code":-105,"message":"bad id"}"#)]);
        let client = ShellyRpcClient::new(&base_url, 0).expect("client should build");

        let err = client.get_status().expect_err("500 must fail");

        assert!(matches!(err, RelayClientError::Status(500)));
        responder.join().expect("responder should finish");
    }

    #[test]
    fn maps_payload_without_power_to_parse_error() {
        let (base_url, responder) = spawn_http_responder(vec![(200, r#"{"id":0}"#)]);
        let client = ShellyRpcClient::new(&base_url, 0).expect("client should build");

        let err = client.get_status().expect_err("missing apower must fail");

        assert!(matches!(err, RelayClientError::Parse(_)));
        responder.join().expect("responder should finish");
    }
}
