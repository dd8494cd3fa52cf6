//! Server configuration loaded from YAML

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_database_path() -> PathBuf {
    PathBuf::from("civsim.sqlite")
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_seed() -> u64 {
    7
}

fn default_map_width() -> u32 {
    40
}

fn default_map_height() -> u32 {
    30
}

fn default_starting_year() -> i64 {
    -4_000
}

fn default_founding_steps() -> u32 {
    3
}

fn default_annual_growth_rate() -> f64 {
    0.01
}

fn default_settler_population() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level configuration for a server process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub simulation: SimulationRules,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Enables the manual tick and id reset endpoints and sequential ids.
    #[serde(default)]
    pub test_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Wall-clock period between polls of the store.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wall-clock time that corresponds to one simulated year.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_interval(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.tick_interval_ms).unwrap_or(i64::MAX))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Tunable constants of the simulation. None of these are authoritative
/// balance values; deployments are expected to override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRules {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_map_width")]
    pub map_width: u32,
    #[serde(default = "default_map_height")]
    pub map_height: u32,
    #[serde(default = "default_starting_year")]
    pub starting_year: i64,
    /// Steps a settler unit walks before it founds a settlement.
    #[serde(default = "default_founding_steps")]
    pub founding_steps: u32,
    #[serde(default = "default_annual_growth_rate")]
    pub annual_growth_rate: f64,
    /// Population embodied in each starting settler unit.
    #[serde(default = "default_settler_population")]
    pub settler_population: u64,
}

impl Default for SimulationRules {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            map_width: default_map_width(),
            map_height: default_map_height(),
            starting_year: default_starting_year(),
            founding_steps: default_founding_steps(),
            annual_growth_rate: default_annual_growth_rate(),
            settler_population: default_settler_population(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_yaml_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let rules = &self.simulation;
        ensure!(
            rules.map_width > 0 && rules.map_height > 0,
            "map dimensions must be non-zero (got {}x{})",
            rules.map_width,
            rules.map_height
        );
        ensure!(rules.founding_steps > 0, "founding_steps must be at least 1");
        ensure!(
            rules.annual_growth_rate.is_finite() && rules.annual_growth_rate >= 0.0,
            "annual_growth_rate must be a non-negative number"
        );
        ensure!(
            self.scheduler.poll_interval_ms > 0,
            "poll_interval_ms must be at least 1"
        );
        Ok(())
    }
}
