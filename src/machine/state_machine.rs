// src/machine/state_machine.rs - Generic state dispatch on top of MachineCore
use super::{Machine, MachineCore, MachineEvent, MachineInfo, MachineState};
use crate::error::Result;
use std::time::Duration;

/// Per-state behaviour of a machine.
///
/// Only `on_running` is required. The defaults implement the generic cycle:
/// start straight into waiting, hold in waiting until every subscribed
/// buffer is full, and clear buffers on reset and restart.
pub trait MachineLogic: Send {
    fn on_starting(&mut self, core: &mut MachineCore) -> Result<()> {
        core.send(MachineEvent::Wait).map(|_| ())
    }

    fn on_waiting(&mut self, core: &mut MachineCore) -> Result<()> {
        if core.buffers_full() {
            core.send(MachineEvent::Run)?;
        }
        Ok(())
    }

    fn on_running(&mut self, core: &mut MachineCore) -> Result<()>;

    fn on_resetting(&mut self, core: &mut MachineCore) -> Result<()> {
        core.clear_buffers();
        core.send(MachineEvent::Start).map(|_| ())
    }

    fn on_restarting(&mut self, core: &mut MachineCore) -> Result<()> {
        core.clear_buffers();
        core.send(MachineEvent::Wait).map(|_| ())
    }

    /// Dispatch for states added through `MachineCore::extend_transitions`
    fn on_custom(&mut self, _state: &'static str, _core: &mut MachineCore) -> Result<()> {
        Ok(())
    }
}

/// A [`Machine`] built from a [`MachineCore`] and some [`MachineLogic`].
pub struct StateMachine<L> {
    core: MachineCore,
    logic: L,
}

impl<L: MachineLogic> StateMachine<L> {
    pub fn new(core: MachineCore, logic: L) -> Self {
        Self { core, logic }
    }

    pub fn core(&self) -> &MachineCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut MachineCore {
        &mut self.core
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    pub fn state(&self) -> MachineState {
        self.core.state()
    }
}

impl<L: MachineLogic> Machine for StateMachine<L> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn interval(&self) -> Duration {
        self.core.interval()
    }

    fn execute(&mut self) -> Result<()> {
        self.core.drain_notifications();
        let core = &mut self.core;
        match core.state() {
            MachineState::Starting => self.logic.on_starting(core),
            MachineState::Waiting => self.logic.on_waiting(core),
            MachineState::Running => self.logic.on_running(core),
            MachineState::Resetting => self.logic.on_resetting(core),
            MachineState::Restarting => self.logic.on_restarting(core),
            MachineState::Custom(state) => self.logic.on_custom(state, core),
        }
    }

    fn info(&self) -> MachineInfo {
        self.core.info()
    }

    fn transition(&mut self, event: &str) -> Result<MachineInfo> {
        self.core.send_by_name(event)?;
        Ok(self.core.info())
    }

    fn shutdown(&mut self) {
        self.core.unsubscribe_all();
    }
}
