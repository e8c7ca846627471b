// src/config.rs - Runtime configuration structures

use crate::{
    alarms::AlarmSpec,
    error::{PlcError, Result},
    machine::MachineSettings,
    scheduler::SchedulerMode,
    tag::TagSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Alarm manager tick thread
    #[serde(default)]
    pub alarm_manager: AlarmManagerConfig,

    /// Machine scheduler
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// UI notification channel
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Tags created at startup
    #[serde(default)]
    pub tags: Vec<TagSpec>,

    /// Alarms created at startup
    #[serde(default)]
    pub alarms: Vec<AlarmSpec>,

    /// Acquisition machines
    #[serde(default)]
    pub machines: Vec<MachineConfig>,

    /// Append alarm summaries to this JSON-lines file
    #[serde(default)]
    pub summary_log: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PlcError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject duplicate names and zero periods before anything is built
    pub fn validate(&self) -> Result<()> {
        if self.alarm_manager.tick_ms == 0 {
            return Err(PlcError::Config("alarm_manager.tick_ms must be positive".into()));
        }

        let mut tags = HashSet::new();
        for tag in &self.tags {
            if !tags.insert(tag.name.as_str()) {
                return Err(PlcError::Config(format!("Duplicate tag '{}'", tag.name)));
            }
            tag.variable.validate_unit(&tag.unit)?;
        }

        let mut alarms = HashSet::new();
        for alarm in &self.alarms {
            if !alarms.insert(alarm.name.as_str()) {
                return Err(PlcError::Config(format!("Duplicate alarm '{}'", alarm.name)));
            }
            if !tags.contains(alarm.tag.as_str()) {
                return Err(PlcError::Config(format!(
                    "Alarm '{}' references unknown tag '{}'",
                    alarm.name, alarm.tag
                )));
            }
        }

        let mut machines = HashSet::new();
        for machine in &self.machines {
            if !machines.insert(machine.name.as_str()) {
                return Err(PlcError::Config(format!("Duplicate machine '{}'", machine.name)));
            }
            if machine.interval_ms == 0 {
                return Err(PlcError::Config(format!(
                    "Machine '{}' needs a positive interval",
                    machine.name
                )));
            }
            if let Some(tag) = machine.tags.iter().find(|t| !tags.contains(t.as_str())) {
                return Err(PlcError::Config(format!(
                    "Machine '{}' references unknown tag '{}'",
                    machine.name, tag
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SUBSYSTEM CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmManagerConfig {
    /// Period between queue drains in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Capacity of the shared notification queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl AlarmManagerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for AlarmManagerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub mode: SchedulerMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Events buffered per subscriber before it starts lagging
    #[serde(default = "default_notification_capacity")]
    pub capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: default_notification_capacity(),
        }
    }
}

// ============================================================================
// MACHINE CONFIGURATION
// ============================================================================

/// Data acquisition machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub name: String,

    /// Execution period in milliseconds
    pub interval_ms: u64,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_classification")]
    pub classification: String,

    #[serde(default)]
    pub priority: u8,

    /// Samples kept per subscribed tag
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Tags written on every running tick
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub source: SourceConfig,
}

impl MachineConfig {
    pub fn settings(&self) -> MachineSettings {
        let interval = Duration::from_millis(self.interval_ms);
        let mut settings = MachineSettings::new(self.name.clone(), interval)
            .with_buffer_size(self.buffer_size)
            .with_description(self.description.clone());
        settings.classification = self.classification.clone();
        settings.priority = self.priority;
        settings
    }
}

/// Parameters of the simulated data source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,

    #[serde(default)]
    pub offset: f64,

    /// Sine period in seconds
    #[serde(default = "default_period")]
    pub period_s: f64,

    /// Peak uniform noise added to each reading
    #[serde(default)]
    pub noise: f64,

    /// Fixed seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            amplitude: default_amplitude(),
            offset: 0.0,
            period_s: default_period(),
            noise: 0.0,
            seed: None,
        }
    }
}

// ============================================================================
// DEFAULTS
// ============================================================================

fn default_tick_ms() -> u64 { 1000 }
fn default_queue_capacity() -> usize { 1024 }
fn default_notification_capacity() -> usize { 256 }
fn default_buffer_size() -> usize { 10 }
fn default_classification() -> String { "Data acquisition".to_string() }
fn default_amplitude() -> f64 { 1.0 }
fn default_period() -> f64 { 60.0 }
