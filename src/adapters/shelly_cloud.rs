use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;
use thiserror::Error;

const HTTP_TIMEOUT_SECONDS: u64 = 10;

// Template values shipped with the device script.
const AUTH_KEY_PLACEHOLDER: &str = "YOUR_CLOUD_AUTHORIZATION_KEY_HERE";
const BASE_URL_PLACEHOLDER: &str = "<YOUR-CLUSTER>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudCredentials {
    pub base_url: String,
    pub auth_key: String,
}

impl CloudCredentials {
    /// Returns `None` when either part is missing, blank or still the template value.
    pub fn from_parts(base_url: Option<&str>, auth_key: Option<&str>) -> Option<Self> {
        let base_url = base_url
            .map(|value| value.trim().trim_end_matches('/'))
            .filter(|value| !value.is_empty() && !value.contains(BASE_URL_PLACEHOLDER))?;
        let auth_key = auth_key
            .map(str::trim)
            .filter(|value| !value.is_empty() && *value != AUTH_KEY_PLACEHOLDER)?;

        Some(Self {
            base_url: base_url.to_string(),
            auth_key: auth_key.to_string(),
        })
    }
}

/// Cloud scene capability used for notifications and automation toggles.
pub trait SceneClient: Send + 'static {
    fn run_scene(&self, credentials: &CloudCredentials, scene_id: &str) -> Result<(), CloudError>;
    fn set_scene_enabled(
        &self,
        credentials: &CloudCredentials,
        scene_id: &str,
        enabled: bool,
    ) -> Result<(), CloudError>;
}

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("failed to build cloud http client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("cloud request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cloud answered with http status {0}")]
    Status(u16),
    #[error("cloud rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct ShellyCloudClient {
    http: Client,
}

impl ShellyCloudClient {
    pub fn new() -> Result<Self, CloudError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()
            .map_err(CloudError::Build)?;
        Ok(Self { http })
    }

    fn get(
        &self,
        credentials: &CloudCredentials,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<(), CloudError> {
        let response = self
            .http
            .get(format!("{}{path}", credentials.base_url))
            .query(params)
            .query(&[("auth_key", credentials.auth_key.as_str())])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::Status(status.as_u16()));
        }

        let body = response.text()?;
        check_cloud_body(&body)
    }
}

impl SceneClient for ShellyCloudClient {
    fn run_scene(&self, credentials: &CloudCredentials, scene_id: &str) -> Result<(), CloudError> {
        self.get(credentials, "/scene/manual_run", &[("id", scene_id)])
    }

    fn set_scene_enabled(
        &self,
        credentials: &CloudCredentials,
        scene_id: &str,
        enabled: bool,
    ) -> Result<(), CloudError> {
        let enabled = if enabled { "true" } else { "false" };
        self.get(
            credentials,
            "/scene/enable",
            &[("id", scene_id), ("enabled", enabled)],
        )
    }
}

// The cloud answers 200 with {"isok": false, "errors": {...}} on rejected calls.
fn check_cloud_body(body: &str) -> Result<(), CloudError> {
    let Ok(payload) = serde_json::from_str::<Value>(body) else {
        return Ok(());
    };

    match payload.get("isok").and_then(Value::as_bool) {
        Some(false) => Err(CloudError::Rejected(
            payload
                .get("errors")
                .map(Value::to_string)
                .unwrap_or_else(|| "unknown error".to_string()),
        )),
        _ => Ok(()),
    }
}
