// src/machine/base.rs - Shared machine state: transitions, process variables, buffers
use super::{MachineEvent, MachineInfo, MachineState};
use crate::{
    buffer::Buffer,
    error::{PlcError, Result},
    fsm::{Fsm, Transition},
    notify::{EventHub, MACHINE_TOPIC},
    observer::Observer,
    tag_store::TagStore,
    value::Value,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

fn default_buffer_size() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    256
}

fn default_classification() -> String {
    "Data acquisition".to_string()
}

/// Static description of a machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSettings {
    pub name: String,
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
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl MachineSettings {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval_ms: interval.as_millis() as u64,
            description: String::new(),
            classification: default_classification(),
            priority: 0,
            buffer_size: default_buffer_size(),
            queue_capacity: default_queue_capacity(),
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// A tag subscribed by a machine under a logical name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessVariable {
    pub name: String,
    pub tag: String,
    /// Sourced externally; the machine may read but not write it
    pub read_only: bool,
    pub value: Option<Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// The generic start/wait/run/reset/restart cycle.
pub fn machine_fsm() -> Fsm<MachineState, MachineEvent> {
    use MachineEvent::*;
    use MachineState::*;

    Fsm::with_transitions(
        Starting,
        &[
            (MachineState::Starting, Wait, Waiting),
            (Waiting, Run, Running),
            (Waiting, Reset, Resetting),
            (Waiting, Restart, Restarting),
            (Running, Reset, Resetting),
            (Running, Restart, Restarting),
            (Resetting, Start, MachineState::Starting),
            (Restarting, Wait, Waiting),
        ],
    )
}

/// State every machine carries regardless of what it does.
///
/// Holds the transition table, one observer shared by all subscribed tags,
/// the process variable map and one sample buffer per subscribed tag.
/// Tags are referenced by name and re-resolved through the store on every
/// read.
pub struct MachineCore {
    settings: MachineSettings,
    fsm: Fsm<MachineState, MachineEvent>,
    store: TagStore,
    observer: Observer,
    variables: BTreeMap<String, ProcessVariable>,
    buffers: HashMap<String, Buffer>,
    /// Tags written without being subscribed
    outputs: Vec<String>,
    hub: Option<EventHub>,
}

impl MachineCore {
    pub fn new(settings: MachineSettings, store: TagStore) -> Self {
        let observer = Observer::new(settings.name.clone(), settings.queue_capacity);
        Self {
            settings,
            fsm: machine_fsm(),
            store,
            observer,
            variables: BTreeMap::new(),
            buffers: HashMap::new(),
            outputs: Vec::new(),
            hub: None,
        }
    }

    pub fn with_hub(mut self, hub: EventHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn interval(&self) -> Duration {
        self.settings.interval()
    }

    pub fn settings(&self) -> &MachineSettings {
        &self.settings
    }

    pub fn state(&self) -> MachineState {
        self.fsm.state()
    }

    pub fn store(&self) -> &TagStore {
        &self.store
    }

    /// Subscribe `tag` under the logical name `name`.
    pub fn subscribe(&mut self, name: &str, tag: &str, read_only: bool) -> Result<()> {
        if self.variables.contains_key(name) {
            return Err(PlcError::duplicate("Process variable", name));
        }
        let snapshot = self.store.get_tag_by_name(tag)?;
        self.store.attach(tag, self.observer.clone())?;
        self.variables.insert(
            name.to_string(),
            ProcessVariable {
                name: name.to_string(),
                tag: tag.to_string(),
                read_only,
                value: Some(snapshot.value),
                timestamp: snapshot.timestamp,
            },
        );
        let size = self.settings.buffer_size;
        self.buffers
            .entry(tag.to_string())
            .or_insert_with(|| Buffer::new(size));
        debug!("Machine '{}' subscribed '{}' as {}", self.name(), tag, name);
        Ok(())
    }

    /// Drop a process variable, detaching its tag once nothing else uses it.
    pub fn unsubscribe(&mut self, name: &str) -> Result<()> {
        let pv = self
            .variables
            .remove(name)
            .ok_or_else(|| PlcError::not_found("Process variable", name))?;
        if !self.variables.values().any(|v| v.tag == pv.tag) {
            self.buffers.remove(&pv.tag);
            if let Err(e) = self.store.detach(&pv.tag, self.observer.id()) {
                debug!("Detach of '{}' skipped: {}", pv.tag, e);
            }
        }
        Ok(())
    }

    pub fn unsubscribe_all(&mut self) {
        let names: Vec<String> = self.variables.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.unsubscribe(&name) {
                warn!("Machine '{}': {}", self.settings.name, e);
            }
        }
    }

    /// Move queued tag changes into buffers and process variables.
    pub fn drain_notifications(&mut self) -> usize {
        let events = self.observer.queue().drain();
        for event in &events {
            if let (Some(buffer), Some(sample)) =
                (self.buffers.get_mut(&event.tag_name), event.value.as_float())
            {
                buffer.push(sample);
            }
            for pv in self.variables.values_mut().filter(|v| v.tag == event.tag_name) {
                pv.value = Some(event.value);
                pv.timestamp = Some(event.timestamp);
            }
        }
        events.len()
    }

    /// True when every subscribed tag has a full buffer (or nothing is subscribed)
    pub fn buffers_full(&self) -> bool {
        self.buffers.values().all(Buffer::is_full)
    }

    pub fn buffer(&self, tag: &str) -> Option<&Buffer> {
        self.buffers.get(tag)
    }

    pub fn clear_buffers(&mut self) {
        for buffer in self.buffers.values_mut() {
            buffer.clear();
        }
    }

    pub fn process_variable(&self, name: &str) -> Option<&ProcessVariable> {
        self.variables.get(name)
    }

    /// Current value of a process variable, read from the store
    pub fn read(&self, name: &str) -> Result<Value> {
        let pv = self
            .variables
            .get(name)
            .ok_or_else(|| PlcError::not_found("Process variable", name))?;
        Ok(self.store.get_tag_by_name(&pv.tag)?.value)
    }

    /// Write a process variable through the store
    pub fn write(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let pv = self
            .variables
            .get(name)
            .ok_or_else(|| PlcError::not_found("Process variable", name))?;
        if pv.read_only {
            return Err(PlcError::ReadOnly(name.to_string()));
        }
        self.store.set_value_by_name(&pv.tag, value, None)
    }

    /// Fire `event`, then announce the new state.
    pub fn send(&mut self, event: MachineEvent) -> Result<Transition<MachineState, MachineEvent>> {
        let state = self.state();
        let transition = self
            .fsm
            .send(event)
            .ok_or_else(|| PlcError::IllegalTransition {
                entity: self.settings.name.clone(),
                action: event.name().to_string(),
                state: state.to_string(),
            })?;
        info!(
            "Machine '{}' {} -> {}",
            self.settings.name, transition.from, transition.to
        );
        self.publish();
        Ok(transition)
    }

    /// Fire the allowed event called `event`
    pub fn send_by_name(&mut self, event: &str) -> Result<Transition<MachineState, MachineEvent>> {
        let found = self
            .fsm
            .allowed_events()
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(event));
        match found {
            Some(e) => self.send(e),
            None => Err(PlcError::IllegalTransition {
                entity: self.settings.name.clone(),
                action: event.to_string(),
                state: self.state().to_string(),
            }),
        }
    }

    pub fn allowed_transitions(&self) -> Vec<String> {
        self.fsm
            .allowed_events()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Add domain transitions on top of the generic cycle
    pub fn extend_transitions(&mut self, table: &[(MachineState, MachineEvent, MachineState)]) {
        for &(from, event, to) in table {
            self.fsm.add_transition(from, event, to);
        }
    }

    /// Record a tag the machine writes without subscribing to it
    pub fn declare_output(&mut self, tag: &str) {
        if !self.outputs.iter().any(|t| t == tag) {
            self.outputs.push(tag.to_string());
        }
    }

    pub fn info(&self) -> MachineInfo {
        let mut tags: Vec<String> = self.variables.values().map(|v| v.tag.clone()).collect();
        tags.extend(self.outputs.iter().cloned());
        tags.sort();
        tags.dedup();
        MachineInfo {
            name: self.settings.name.clone(),
            state: self.state().to_string(),
            interval_ms: self.settings.interval_ms,
            classification: self.settings.classification.clone(),
            priority: self.settings.priority,
            description: self.settings.description.clone(),
            process_variables: self.variables.values().cloned().collect(),
            buffers: self
                .buffers
                .iter()
                .map(|(tag, buffer)| (tag.clone(), buffer.values()))
                .collect(),
            allowed_transitions: self.allowed_transitions(),
            tags,
        }
    }

    fn publish(&self) {
        let Some(hub) = &self.hub else { return };
        match serde_json::to_value(self.info()) {
            Ok(payload) => {
                hub.publish(MACHINE_TOPIC, payload);
            }
            Err(e) => warn!("Cannot serialize machine '{}': {}", self.settings.name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tag::TagSpec, units::Variable, value::DataType};

    fn core_with_tag() -> (TagStore, MachineCore) {
        let store = TagStore::new();
        store
            .set_tag(TagSpec::new("T1", Variable::Pressure, "Pa", DataType::Float))
            .unwrap();
        let settings = MachineSettings::new("M1", Duration::from_millis(100)).with_buffer_size(2);
        let core = MachineCore::new(settings, store.clone());
        (store, core)
    }

    #[test]
    fn test_generic_cycle() {
        let mut fsm = machine_fsm();
        for (event, expected) in [
            (MachineEvent::Wait, MachineState::Waiting),
            (MachineEvent::Run, MachineState::Running),
            (MachineEvent::Restart, MachineState::Restarting),
            (MachineEvent::Wait, MachineState::Waiting),
            (MachineEvent::Reset, MachineState::Resetting),
            (MachineEvent::Start, MachineState::Starting),
        ] {
            assert_eq!(fsm.send(event).map(|t| t.to), Some(expected));
        }
        assert!(fsm.send(MachineEvent::Run).is_none());
    }

    #[test]
    fn test_buffers_fill_from_notifications() {
        let (store, mut core) = core_with_tag();
        core.subscribe("pressure", "T1", true).unwrap();
        assert!(!core.buffers_full());

        store.set_value_by_name("T1", 1.0, None).unwrap();
        store.set_value_by_name("T1", 2.0, None).unwrap();
        assert_eq!(core.drain_notifications(), 2);
        assert!(core.buffers_full());
        assert_eq!(core.buffer("T1").unwrap().values(), vec![1.0, 2.0]);
        assert_eq!(core.process_variable("pressure").unwrap().value, Some(Value::Float(2.0)));
    }

    #[test]
    fn test_read_only_variable_rejects_write() {
        let (_, mut core) = core_with_tag();
        core.subscribe("pressure", "T1", true).unwrap();
        assert!(matches!(core.write("pressure", 3.0), Err(PlcError::ReadOnly(_))));
    }

    #[test]
    fn test_read_reresolves_through_store() {
        let (store, mut core) = core_with_tag();
        core.subscribe("pressure", "T1", false).unwrap();
        core.write("pressure", 7.0).unwrap();
        assert_eq!(core.read("pressure").unwrap(), Value::Float(7.0));
        store.set_value_by_name("T1", 8.0, None).unwrap();
        assert_eq!(core.read("pressure").unwrap(), Value::Float(8.0));
    }

    #[test]
    fn test_unsubscribe_detaches() {
        let (store, mut core) = core_with_tag();
        core.subscribe("pressure", "T1", true).unwrap();
        assert_eq!(store.subscribers("T1").unwrap(), vec!["M1"]);
        core.unsubscribe_all();
        assert!(store.subscribers("T1").unwrap().is_empty());
        assert!(core.buffers_full());
    }

    #[test]
    fn test_illegal_operator_transition() {
        let (_, mut core) = core_with_tag();
        let err = core.send_by_name("reset").unwrap_err();
        assert!(matches!(err, PlcError::IllegalTransition { .. }));
        assert_eq!(core.state(), MachineState::Starting);
        core.send_by_name("wait").unwrap();
        assert_eq!(core.allowed_transitions(), vec!["run", "reset", "restart"]);
    }
}
