/// Turns periodic relay readings into power-delta events: a reading is forwarded
/// only when it differs from the last value seen.
#[derive(Debug, Clone, Default)]
pub struct PowerDeltaFilter {
    last_power_w: Option<f64>,
}

impl PowerDeltaFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a known reading so that an unchanged first poll is not reported.
    pub fn seeded(initial_power_w: Option<f64>) -> Self {
        Self {
            last_power_w: initial_power_w.filter(|value| value.is_finite()),
        }
    }

    pub fn observe(&mut self, power_w: f64) -> Option<f64> {
        if !power_w.is_finite() {
            return None;
        }

        match self.last_power_w {
            Some(previous) if (previous - power_w).abs() < f64::EPSILON => None,
            _ => {
                self.last_power_w = Some(power_w);
                Some(power_w)
            }
        }
    }

    #[cfg(test)]
    pub fn last_power_w(&self) -> Option<f64> {
        self.last_power_w
    }
}
