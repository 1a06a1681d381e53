use std::time::Duration;

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperSettings {
    pub sweep_interval: Duration,
    pub inactivity_threshold: Duration,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            inactivity_threshold: Duration::from_secs(480 * 60),
        }
    }
}

impl ReaperSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            sweep_interval: Duration::from_secs(cfg.agent_sweep_interval_seconds.max(1)),
            inactivity_threshold: Duration::from_secs(cfg.agent_inactivity_minutes.max(1) * 60),
        }
    }
}
