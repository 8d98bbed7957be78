use thiserror::Error;

use crate::adapters::shelly_cloud::{CloudCredentials, CloudError, SceneClient};
use crate::domain::scene::{SceneIds, SceneKey};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no scene id configured for '{0}'")]
    UnmappedScene(SceneKey),
    #[error("cloud base url or authorization key not set")]
    MissingCredentials,
    #[error("scene '{scene}' call failed: {source}")]
    Request {
        scene: SceneKey,
        #[source]
        source: CloudError,
    },
}

impl DispatchError {
    /// Configuration problems, as opposed to failed calls.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DispatchError::UnmappedScene(_) | DispatchError::MissingCredentials
        )
    }
}

/// Maps symbolic scene names to cloud scene ids and issues a single call per
/// request. Never retries.
pub struct NotificationDispatcher<S> {
    client: S,
    credentials: Option<CloudCredentials>,
    scene_ids: SceneIds,
}

impl<S> NotificationDispatcher<S>
where
    S: SceneClient,
{
    pub fn new(client: S, credentials: Option<CloudCredentials>, scene_ids: SceneIds) -> Self {
        Self {
            client,
            credentials,
            scene_ids,
        }
    }

    #[cfg(test)]
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn notify(&self, scene: SceneKey) -> Result<(), DispatchError> {
        let (credentials, scene_id) = self.resolve(scene)?;
        self.client
            .run_scene(credentials, scene_id)
            .map_err(|source| DispatchError::Request { scene, source })
    }

    pub fn set_scene_enabled(&self, scene: SceneKey, enabled: bool) -> Result<(), DispatchError> {
        let (credentials, scene_id) = self.resolve(scene)?;
        self.client
            .set_scene_enabled(credentials, scene_id, enabled)
            .map_err(|source| DispatchError::Request { scene, source })
    }

    fn resolve(&self, scene: SceneKey) -> Result<(&CloudCredentials, &str), DispatchError> {
        let scene_id = self
            .scene_ids
            .resolve(scene)
            .ok_or(DispatchError::UnmappedScene(scene))?;
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(DispatchError::MissingCredentials)?;
        Ok((credentials, scene_id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::adapters::shelly_cloud::{CloudCredentials, CloudError, SceneClient};
    use crate::domain::scene::{SceneIds, SceneKey};

    use super::{DispatchError, NotificationDispatcher};

    #[derive(Clone, Default)]
    struct FakeSceneClient {
        calls: Arc<Mutex<Vec<String>>>,
        fail_with_status: Option<u16>,
    }

    impl FakeSceneClient {
        fn record(&self, call: String) -> Result<(), CloudError> {
            self.calls.lock().expect("calls lock").push(call);
            match self.fail_with_status {
                Some(status) => Err(CloudError::Status(status)),
                None => Ok(()),
            }
        }
    }

    impl SceneClient for FakeSceneClient {
        fn run_scene(&self, credentials: &CloudCredentials, scene_id: &str) -> Result<(), CloudError> {
            self.record(format!("run {scene_id} via {}", credentials.base_url))
        }

        fn set_scene_enabled(
            &self,
            _credentials: &CloudCredentials,
            scene_id: &str,
            enabled: bool,
        ) -> Result<(), CloudError> {
            self.record(format!("enable {scene_id}={enabled}"))
        }
    }

    fn credentials() -> Option<CloudCredentials> {
        CloudCredentials::from_parts(Some("https://eu.shelly.cloud"), Some("key"))
    }

    fn scene_ids() -> SceneIds {
        SceneIds::new()
            .with(SceneKey::MachineOn, "100")
            .with(SceneKey::CycleToggle, "200")
    }

    #[test]
    fn runs_mapped_scene() {
        let client = FakeSceneClient::default();
        let dispatcher = NotificationDispatcher::new(client.clone(), credentials(), scene_ids());

        dispatcher
            .notify(SceneKey::MachineOn)
            .expect("notification should be sent");
        dispatcher
            .set_scene_enabled(SceneKey::CycleToggle, false)
            .expect("toggle should be sent");

        assert_eq!(
            *client.calls.lock().expect("calls lock"),
            vec![
                "run 100 via https://eu.shelly.cloud".to_string(),
                "enable 200=false".to_string(),
            ]
        );
    }

    #[test]
    fn unmapped_scene_is_a_configuration_error_without_call() {
        let client = FakeSceneClient::default();
        let dispatcher = NotificationDispatcher::new(client.clone(), credentials(), scene_ids());

        let err = dispatcher
            .notify(SceneKey::MonitoringActive)
            .expect_err("unmapped scene must fail");

        assert!(matches!(err, DispatchError::UnmappedScene(SceneKey::MonitoringActive)));
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "no scene id configured for 'MONITORING_ACTIVE'"
        );
        assert!(client.calls.lock().expect("calls lock").is_empty());
    }

    #[test]
    fn missing_credentials_degrade_to_noop() {
        let client = FakeSceneClient::default();
        let dispatcher = NotificationDispatcher::new(client.clone(), None, scene_ids());

        let err = dispatcher
            .set_scene_enabled(SceneKey::CycleToggle, true)
            .expect_err("missing credentials must fail");

        assert!(matches!(err, DispatchError::MissingCredentials));
        assert!(!dispatcher.has_credentials());
        assert!(client.calls.lock().expect("calls lock").is_empty());
    }

    #[test]
    fn wraps_failed_calls_once_without_retry() {
        let client = FakeSceneClient {
            fail_with_status: Some(503),
            ..FakeSceneClient::default()
        };
        let dispatcher = NotificationDispatcher::new(client.clone(), credentials(), scene_ids());

        let err = dispatcher
            .notify(SceneKey::MachineOn)
            .expect_err("failed call must surface");

        assert!(!err.is_configuration());
        assert_eq!(
            err.to_string(),
            "scene 'MACHINE_ON' call failed: cloud answered with http status 503"
        );
        assert_eq!(client.calls.lock().expect("calls lock").len(), 1);
    }
}
