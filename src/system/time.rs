use std::time::Duration;

/// Preset sampling cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickRate {
    Fast,
    #[default]
    Normal,
    Slow,
}

impl TickRate {
    pub fn millis(self) -> u64 {
        match self {
            TickRate::Fast => 500,
            TickRate::Normal => 1000,
            TickRate::Slow => 2000,
        }
    }

    pub fn from_str_config(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fast" => Some(TickRate::Fast),
            "normal" => Some(TickRate::Normal),
            "slow" => Some(TickRate::Slow),
            _ => None,
        }
    }
}

impl From<TickRate> for Duration {
    fn from(rate: TickRate) -> Self {
        Duration::from_millis(rate.millis())
    }
}

/// A span of time in float seconds, as handed over by a frame loop.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Timestep(f32);

impl Timestep {
    pub fn from_seconds(seconds: f32) -> Self {
        Timestep(seconds)
    }

    pub fn seconds(self) -> f32 {
        self.0
    }

    pub fn millis(self) -> f32 {
        self.0 * 1000.0
    }
}

impl From<Timestep> for Duration {
    fn from(step: Timestep) -> Self {
        // Negative or NaN steps collapse to zero.
        Duration::try_from_secs_f32(step.0).unwrap_or(Duration::ZERO)
    }
}

impl From<TickRate> for Timestep {
    fn from(rate: TickRate) -> Self {
        Timestep(rate.millis() as f32 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_rates_match_presets() {
        assert_eq!(Duration::from(TickRate::Fast), Duration::from_millis(500));
        assert_eq!(Duration::from(TickRate::Normal), Duration::from_millis(1000));
        assert_eq!(Duration::from(TickRate::Slow), Duration::from_millis(2000));
        assert_eq!(TickRate::from_str_config("SLOW"), Some(TickRate::Slow));
        assert_eq!(TickRate::from_str_config("warp"), None);
    }

    #[test]
    fn timestep_converts_to_millis() {
        let step = Timestep::from_seconds(0.25);
        assert!((step.millis() - 250.0).abs() < f32::EPSILON);
        assert_eq!(Duration::from(step), Duration::from_millis(250));
        assert_eq!(Duration::from(Timestep::from_seconds(-1.0)), Duration::ZERO);
    }
}
