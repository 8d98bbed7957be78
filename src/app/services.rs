use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::app::runtime::RuntimeEvent;
use crate::domain::auto_off::MachineSnapshot;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("status lock poisoned")]
    StatusLockPoisoned,
    #[error("event loop is not running")]
    EventLoopStopped,
    #[error("invalid power sample: {0}")]
    InvalidSample(f64),
}

pub trait StatusQueryHandler {
    fn current_status(&self) -> Result<MachineSnapshot, ServiceError>;
}

pub trait PowerEventSink {
    fn submit_power_sample(&self, power_w: f64) -> Result<(), ServiceError>;
}

/// Last snapshot published by the event loop.
#[derive(Debug, Clone, Default)]
pub struct SharedStatus {
    snapshot: Arc<Mutex<MachineSnapshot>>,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: MachineSnapshot) {
        match self.snapshot.lock() {
            Ok(mut current) => *current = snapshot,
            Err(_) => tracing::warn!("status lock poisoned, snapshot not published"),
        }
    }
}

impl StatusQueryHandler for SharedStatus {
    fn current_status(&self) -> Result<MachineSnapshot, ServiceError> {
        self.snapshot
            .lock()
            .map(|snapshot| snapshot.clone())
            .map_err(|_| ServiceError::StatusLockPoisoned)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeServices {
    status: SharedStatus,
    events: Sender<RuntimeEvent>,
}

impl RuntimeServices {
    pub fn new(status: SharedStatus, events: Sender<RuntimeEvent>) -> Self {
        Self { status, events }
    }
}

impl StatusQueryHandler for RuntimeServices {
    fn current_status(&self) -> Result<MachineSnapshot, ServiceError> {
        self.status.current_status()
    }
}

impl PowerEventSink for RuntimeServices {
    fn submit_power_sample(&self, power_w: f64) -> Result<(), ServiceError> {
        if !power_w.is_finite() || power_w < 0.0 {
            return Err(ServiceError::InvalidSample(power_w));
        }

        self.events
            .send(RuntimeEvent::PowerSample(power_w))
            .map_err(|_| ServiceError::EventLoopStopped)
    }
}
