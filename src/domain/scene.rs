use std::collections::HashMap;
use std::fmt;

/// Symbolic names of the cloud scenes the auto-off cycle triggers or toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneKey {
    MachineOn,
    MonitoringActive,
    StandbyOffDetected,
    MachineAutoOff,
    CycleToggle,
}

impl SceneKey {
    pub const ALL: [SceneKey; 5] = [
        SceneKey::MachineOn,
        SceneKey::MonitoringActive,
        SceneKey::StandbyOffDetected,
        SceneKey::MachineAutoOff,
        SceneKey::CycleToggle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SceneKey::MachineOn => "MACHINE_ON",
            SceneKey::MonitoringActive => "MONITORING_ACTIVE",
            SceneKey::StandbyOffDetected => "STANDBY_OFF_DETECTED",
            SceneKey::MachineAutoOff => "MACHINE_AUTO_OFF",
            SceneKey::CycleToggle => "CYCLE_TOGGLE",
        }
    }

    /// Environment key holding the cloud scene id for this name.
    pub fn env_key(self) -> String {
        format!("SCENE_ID_{}", self.as_str())
    }
}

impl fmt::Display for SceneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Template value shipped with the device script for every scene id.
const SCENE_ID_PLACEHOLDER_PREFIX: &str = "YOUR_SCENE_ID";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneIds {
    ids: HashMap<SceneKey, String>,
}

impl SceneIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: SceneKey, id: impl Into<String>) -> Self {
        self.insert(key, id);
        self
    }

    pub fn insert(&mut self, key: SceneKey, id: impl Into<String>) {
        self.ids.insert(key, id.into());
    }

    /// Returns the configured id, treating blank and template values as unmapped.
    pub fn resolve(&self, key: SceneKey) -> Option<&str> {
        self.ids
            .get(&key)
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && !id.starts_with(SCENE_ID_PLACEHOLDER_PREFIX))
    }

    pub fn mapped_count(&self) -> usize {
        SceneKey::ALL
            .iter()
            .filter(|key| self.resolve(**key).is_some())
            .count()
    }
}
