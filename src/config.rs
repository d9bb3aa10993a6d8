use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::system::control::{DEFAULT_GRACE_PERIOD, DEFAULT_LOAD_WINDOW};
use crate::system::{EngineSettings, SamplerSettings, TickRate};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub sampling: SamplingConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub refresh_rate_ms: u64,
    pub grace_period_ms: u64,
    /// 0 sizes the pool from the host.
    pub worker_threads: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            refresh_rate_ms: TickRate::Normal.millis(),
            grace_period_ms: DEFAULT_GRACE_PERIOD.as_millis() as u64,
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub cpu_interval_ms: u64,
    pub memory_interval_ms: u64,
    pub process_interval_ms: u64,
    pub load_window: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            cpu_interval_ms: TickRate::Normal.millis(),
            memory_interval_ms: TickRate::Normal.millis(),
            process_interval_ms: TickRate::Normal.millis(),
            load_window: DEFAULT_LOAD_WINDOW,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub max_processes: usize,
    pub default_sort: String,
    pub format: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            max_processes: 15,
            default_sort: "memory".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Point every sampler at the same interval.
    pub fn set_all_intervals(&mut self, interval_ms: u64) {
        self.sampling.cpu_interval_ms = interval_ms;
        self.sampling.memory_interval_ms = interval_ms;
        self.sampling.process_interval_ms = interval_ms;
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let sampler = |interval_ms: u64| SamplerSettings {
            interval: Duration::from_millis(interval_ms),
            grace_period: Duration::from_millis(self.general.grace_period_ms),
            load_window: self.sampling.load_window,
        };
        EngineSettings {
            cpu: sampler(self.sampling.cpu_interval_ms),
            memory: sampler(self.sampling.memory_interval_ms),
            processes: sampler(self.sampling.process_interval_ms),
            worker_threads: self.general.worker_threads,
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("telemon").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), %err, "invalid config, using defaults");
            Config::default()
        }),
        Err(_) => Config::default(),
    }
}
