use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;

use crate::adapters::shelly_cloud::SceneClient;
use crate::adapters::shelly_rpc::RelayClient;
use crate::app::AppError;
use crate::app::dispatcher::NotificationDispatcher;
use crate::domain::auto_off::CycleEffects;
use crate::domain::scene::SceneKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneCommand {
    Notify(SceneKey),
    SetEnabled(SceneKey, bool),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    SetSwitch(bool),
    Shutdown,
}

/// Side effects of the state machine. Relay commands and cloud calls go to
/// separate workers, so a slow cloud request never holds back a switch-off.
#[derive(Debug, Clone)]
pub struct QueuedEffects {
    scenes: Sender<SceneCommand>,
    relay: Sender<RelayCommand>,
}

impl QueuedEffects {
    pub fn new(scenes: Sender<SceneCommand>, relay: Sender<RelayCommand>) -> Self {
        Self { scenes, relay }
    }

    fn enqueue_scene(&self, command: SceneCommand) {
        if self.scenes.send(command).is_err() {
            tracing::error!(?command, "scene worker stopped, command dropped");
        }
    }
}

impl CycleEffects for QueuedEffects {
    fn notify(&mut self, scene: SceneKey) {
        self.enqueue_scene(SceneCommand::Notify(scene));
    }

    fn set_scene_enabled(&mut self, scene: SceneKey, enabled: bool) {
        self.enqueue_scene(SceneCommand::SetEnabled(scene, enabled));
    }

    fn switch_off(&mut self) {
        if self.relay.send(RelayCommand::SetSwitch(false)).is_err() {
            tracing::error!("relay worker stopped, switch-off dropped");
        }
    }
}

pub struct SceneWorker<S> {
    dispatcher: NotificationDispatcher<S>,
}

impl<S> SceneWorker<S>
where
    S: SceneClient,
{
    pub fn new(dispatcher: NotificationDispatcher<S>) -> Self {
        Self { dispatcher }
    }

    /// Executes one command and logs the outcome. Nothing is reported back.
    pub fn execute(&self, command: SceneCommand) {
        match command {
            SceneCommand::Notify(scene) => match self.dispatcher.notify(scene) {
                Ok(()) => tracing::debug!(%scene, "scene triggered"),
                Err(error) if error.is_configuration() => {
                    tracing::error!(%scene, error = %error, "notification skipped");
                }
                Err(error) => tracing::error!(%scene, error = %error, "notification failed"),
            },
            SceneCommand::SetEnabled(scene, enabled) => {
                match self.dispatcher.set_scene_enabled(scene, enabled) {
                    Ok(()) => tracing::debug!(%scene, enabled, "scene activation changed"),
                    Err(error) if error.is_configuration() => {
                        tracing::error!(%scene, enabled, error = %error, "scene toggle skipped");
                    }
                    Err(error) => {
                        tracing::error!(%scene, enabled, error = %error, "scene toggle failed");
                    }
                }
            }
            SceneCommand::Shutdown => {}
        }
    }

    pub fn run(self, commands: Receiver<SceneCommand>) {
        for command in commands {
            if command == SceneCommand::Shutdown {
                break;
            }
            self.execute(command);
        }
        tracing::debug!("scene worker stopped");
    }
}

pub struct RelayWorker {
    relay: Arc<dyn RelayClient>,
}

impl RelayWorker {
    pub fn new(relay: Arc<dyn RelayClient>) -> Self {
        Self { relay }
    }

    pub fn run(self, commands: Receiver<RelayCommand>) {
        for command in commands {
            match command {
                RelayCommand::SetSwitch(on) => match self.relay.set_switch(on) {
                    Ok(()) => tracing::info!(on, "relay switched"),
                    Err(error) => tracing::error!(on, error = %error, "could not switch relay"),
                },
                RelayCommand::Shutdown => break,
            }
        }
        tracing::debug!("relay worker stopped");
    }
}

pub fn start_scene_worker<S>(
    worker: SceneWorker<S>,
    commands: Receiver<SceneCommand>,
) -> Result<JoinHandle<()>, AppError>
where
    S: SceneClient,
{
    std::thread::Builder::new()
        .name("scene-worker".to_string())
        .spawn(move || worker.run(commands))
        .map_err(AppError::runtime)
}

pub fn start_relay_worker(
    worker: RelayWorker,
    commands: Receiver<RelayCommand>,
) -> Result<JoinHandle<()>, AppError> {
    std::thread::Builder::new()
        .name("relay-worker".to_string())
        .spawn(move || worker.run(commands))
        .map_err(AppError::runtime)
}
