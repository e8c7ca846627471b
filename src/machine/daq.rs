// src/machine/daq.rs - Data acquisition machine polling a DataSource
use super::{MachineCore, MachineLogic, MachineSettings, StateMachine};
use crate::{
    bridge::DataSource,
    config::MachineConfig,
    error::{PlcError, Result},
    notify::EventHub,
    tag_store::TagStore,
};
use tracing::{trace, warn};

/// Polls its source for every configured tag on each running tick and
/// writes the readings into the store.
///
/// The written tags are outputs, not subscriptions: subscribing them would
/// hold the machine in `waiting` forever since nothing fills the buffers
/// before the first acquisition.
pub struct DataAcquisition {
    source: Box<dyn DataSource>,
    tags: Vec<String>,
    reads: u64,
    errors: u64,
}

impl DataAcquisition {
    pub fn new(source: Box<dyn DataSource>, tags: Vec<String>) -> Self {
        Self {
            source,
            tags,
            reads: 0,
            errors: 0,
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }
}

impl MachineLogic for DataAcquisition {
    fn on_running(&mut self, core: &mut MachineCore) -> Result<()> {
        let store = core.store().clone();
        for name in &self.tags {
            let tag = match store.get_tag_by_name(name) {
                Ok(tag) => tag,
                Err(e) => {
                    self.errors += 1;
                    warn!("{}: {}", core.name(), e);
                    continue;
                }
            };
            match self
                .source
                .read(&tag)
                .and_then(|value| store.set_value(&tag.id, value, None))
            {
                Ok(()) => {
                    self.reads += 1;
                    trace!("{} acquired {} from {}", core.name(), tag.name, self.source.name());
                }
                Err(e) => {
                    self.errors += 1;
                    warn!("{} failed to acquire {}: {}", core.name(), tag.name, e);
                }
            }
        }
        Ok(())
    }
}

/// Build an acquisition machine from its configuration.
///
/// Every configured tag must already exist in the store.
pub fn acquisition_machine(
    config: &MachineConfig,
    store: TagStore,
    hub: Option<EventHub>,
) -> Result<StateMachine<DataAcquisition>> {
    for tag in &config.tags {
        if !store.contains(tag) {
            return Err(PlcError::not_found("Tag", tag.clone()));
        }
    }
    let source = build_source(config)?;
    let mut core = MachineCore::new(config.settings(), store);
    if let Some(hub) = hub {
        core = core.with_hub(hub);
    }
    for tag in &config.tags {
        core.declare_output(tag);
    }
    Ok(StateMachine::new(
        core,
        DataAcquisition::new(source, config.tags.clone()),
    ))
}

#[cfg(feature = "simulation")]
fn build_source(config: &MachineConfig) -> Result<Box<dyn DataSource>> {
    Ok(Box::new(crate::bridge::SimulatedSource::from_config(
        &config.source,
    )))
}

#[cfg(not(feature = "simulation"))]
fn build_source(config: &MachineConfig) -> Result<Box<dyn DataSource>> {
    Err(PlcError::Config(format!(
        "Machine '{}' needs the simulation feature for its data source",
        config.name
    )))
}
