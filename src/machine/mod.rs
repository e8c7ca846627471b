// src/machine/mod.rs - Cooperatively scheduled, state-driven machines
use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

mod base;
mod daq;
mod state_machine;

pub use base::{machine_fsm, MachineCore, MachineSettings, ProcessVariable};
pub use daq::{acquisition_machine, DataAcquisition};
pub use state_machine::{MachineLogic, StateMachine};

/// Something the scheduler can run.
///
/// `execute` is one state-dispatch step. It must return promptly: the
/// scheduler cannot interrupt a step, it only checks its stop flag between
/// steps.
pub trait Machine: Send {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    fn execute(&mut self) -> Result<()>;

    fn info(&self) -> MachineInfo;

    /// Operator transition by event name, e.g. `"reset"` or `"restart"`
    fn transition(&mut self, event: &str) -> Result<MachineInfo>;

    /// Called once when the machine is dropped from the scheduler
    fn shutdown(&mut self) {}
}

/// Cooperative states shared by every machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineState {
    Starting,
    Waiting,
    Running,
    Resetting,
    Restarting,
    /// Domain specific state added by a specialised machine
    Custom(&'static str),
}

impl MachineState {
    pub fn name(&self) -> &'static str {
        match self {
            MachineState::Starting => "starting",
            MachineState::Waiting => "waiting",
            MachineState::Running => "running",
            MachineState::Resetting => "resetting",
            MachineState::Restarting => "restarting",
            MachineState::Custom(name) => name,
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineEvent {
    Start,
    Wait,
    Run,
    Reset,
    Restart,
    Custom(&'static str),
}

impl MachineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MachineEvent::Start => "start",
            MachineEvent::Wait => "wait",
            MachineEvent::Run => "run",
            MachineEvent::Reset => "reset",
            MachineEvent::Restart => "restart",
            MachineEvent::Custom(name) => name,
        }
    }
}

impl fmt::Display for MachineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Serializable snapshot of a machine, pushed on `on.machine`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineInfo {
    pub name: String,
    pub state: String,
    pub interval_ms: u64,
    pub classification: String,
    pub priority: u8,
    pub description: String,
    pub process_variables: Vec<ProcessVariable>,
    pub buffers: BTreeMap<String, Vec<f64>>,
    pub allowed_transitions: Vec<String>,
    /// Every tag the machine reads or writes
    pub tags: Vec<String>,
}
