// src/runtime.rs - Explicitly wired services: store, alarms, scheduler
use crate::{
    alarms::{AlarmManager, AlarmRecord, AlarmSpec},
    bridge::{BridgeIngress, ProtocolBridge},
    clock::{Clock, SystemClock},
    config::{MachineConfig, RuntimeConfig},
    error::{PlcError, Result},
    machine::{acquisition_machine, Machine},
    notify::EventHub,
    persistence::Persistence,
    scheduler::Scheduler,
    tag::{Tag, TagSpec, TagUpdate},
    tag_store::TagStore,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of recreating tags and alarms from persisted records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    pub tags_loaded: usize,
    pub tags_skipped: usize,
    pub alarms_loaded: usize,
    pub alarms_skipped: usize,
}

struct AttachedBridge {
    address: Option<String>,
    bridge: Arc<dyn ProtocolBridge>,
}

/// Owner of the process lifecycle.
///
/// Builds the tag store, alarm manager and scheduler from a configuration
/// and hands them out by reference. Nothing here is global; tests build as
/// many runtimes as they like.
pub struct Runtime {
    config: RuntimeConfig,
    store: TagStore,
    alarms: AlarmManager,
    scheduler: Arc<Scheduler>,
    persistence: Arc<dyn Persistence>,
    hub: EventHub,
    bridges: Mutex<Vec<AttachedBridge>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, persistence: Arc<dyn Persistence>) -> Self {
        Self::with_clock(config, persistence, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: RuntimeConfig,
        persistence: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = TagStore::new();
        let hub = EventHub::new(config.notifications.capacity);
        let alarms = AlarmManager::with_clock(
            store.clone(),
            persistence.clone(),
            hub.clone(),
            config.alarm_manager.queue_capacity,
            clock,
        );
        let scheduler = Arc::new(Scheduler::new(config.scheduler.mode));
        Self {
            config,
            store,
            alarms,
            scheduler,
            persistence,
            hub,
            bridges: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn store(&self) -> &TagStore {
        &self.store
    }

    pub fn alarms(&self) -> &AlarmManager {
        &self.alarms
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Recreate tags and alarms from persisted records.
    ///
    /// Records whose name already exists are skipped, so running this twice
    /// changes nothing. An unreachable persistence layer is logged and
    /// treated as empty.
    pub fn reload(&self) -> Result<ReloadReport> {
        let mut report = ReloadReport::default();

        let tags = self.persistence.get_tags().unwrap_or_else(|e| {
            warn!("Cannot read persisted tags: {}", e);
            Vec::new()
        });
        for record in tags {
            if self.store.contains(&record.name) {
                report.tags_skipped += 1;
                continue;
            }
            match self.store.set_tag(TagSpec::from(&record)) {
                Ok(tag) => {
                    if record.timestamp.is_some() {
                        self.store.set_value(&tag.id, record.value, record.timestamp)?;
                    }
                    report.tags_loaded += 1;
                }
                Err(e) => {
                    warn!("Persisted tag '{}' not restored: {}", record.name, e);
                    report.tags_skipped += 1;
                }
            }
        }

        let alarms = self.persistence.get_alarms().unwrap_or_else(|e| {
            warn!("Cannot read persisted alarms: {}", e);
            Vec::new()
        });
        for record in alarms {
            match self.alarms.append_alarm(AlarmSpec::from(&record), true) {
                Ok(_) => report.alarms_loaded += 1,
                Err(PlcError::DuplicateName { .. }) => {
                    debug!("Alarm '{}' already loaded", record.name);
                    report.alarms_skipped += 1;
                }
                Err(e) => {
                    warn!("Persisted alarm '{}' not restored: {}", record.name, e);
                    report.alarms_skipped += 1;
                }
            }
        }

        info!(
            "Reload: {} tags, {} alarms ({} skipped)",
            report.tags_loaded,
            report.alarms_loaded,
            report.tags_skipped + report.alarms_skipped
        );
        Ok(report)
    }

    /// Create whatever the configuration file declares and does not exist yet
    pub fn load_config(&self) -> Result<()> {
        for spec in &self.config.tags {
            if !self.store.contains(&spec.name) {
                self.add_tag(spec.clone())?;
            }
        }
        for spec in &self.config.alarms {
            if self.alarms.get_alarm_by_name(&spec.name).is_err() {
                self.add_alarm(spec.clone())?;
            }
        }
        for machine in &self.config.machines {
            if !self.scheduler.contains(&machine.name) {
                self.add_machine(machine)?;
            }
        }
        Ok(())
    }

    pub fn add_tag(&self, spec: TagSpec) -> Result<Tag> {
        let tag = self.store.set_tag(spec)?;
        if let Err(e) = self.persistence.put_tag(&tag) {
            warn!("Tag '{}' not persisted: {}", tag.name, e);
        }
        Ok(tag)
    }

    /// Names of the alarms and machines referencing `tag_name`
    pub fn tag_users(&self, tag_name: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .alarms
            .get_alarms_by_tag(tag_name)
            .into_iter()
            .map(|a| a.name)
            .collect();
        users.extend(
            self.scheduler
                .infos()
                .into_iter()
                .filter(|m| m.tags.iter().any(|t| t == tag_name))
                .map(|m| m.name),
        );
        users
    }

    /// Partial tag update; renaming a referenced tag is refused.
    pub fn update_tag(&self, id: &str, update: TagUpdate) -> Result<Tag> {
        let current = self.store.get_tag(id)?;
        if update.name.as_ref().is_some_and(|n| *n != current.name) {
            let users = self.tag_users(&current.name);
            if !users.is_empty() {
                return Err(PlcError::TagInUse {
                    tag: current.name,
                    users,
                });
            }
        }
        let tag = self.store.update_tag(id, update)?;
        if let Err(e) = self.persistence.put_tag(&tag) {
            warn!("Tag '{}' not persisted: {}", tag.name, e);
        }
        Ok(tag)
    }

    /// Delete a tag nothing references any more
    pub fn delete_tag(&self, id: &str) -> Result<Tag> {
        let current = self.store.get_tag(id)?;
        let users = self.tag_users(&current.name);
        if !users.is_empty() {
            return Err(PlcError::TagInUse {
                tag: current.name,
                users,
            });
        }
        let tag = self.store.delete_tag(id)?;
        if let Err(e) = self.persistence.delete_tag(id) {
            warn!("Tag '{}' not removed from storage: {}", tag.name, e);
        }
        Ok(tag)
    }

    pub fn add_alarm(&self, spec: AlarmSpec) -> Result<AlarmRecord> {
        self.alarms.append_alarm(spec, false)
    }

    /// Build an acquisition machine and hand it to the scheduler
    pub fn add_machine(&self, config: &MachineConfig) -> Result<()> {
        let machine = acquisition_machine(config, self.store.clone(), Some(self.hub.clone()))?;
        self.scheduler.append_machine(Box::new(machine))
    }

    pub fn append_machine(&self, machine: Box<dyn Machine>) -> Result<()> {
        self.scheduler.append_machine(machine)
    }

    /// Subscribe every tag bound to `address` (or every bound tag) on `bridge`.
    ///
    /// Returns the ingress the bridge delivers values through.
    pub fn attach_bridge(
        &self,
        address: Option<String>,
        bridge: Arc<dyn ProtocolBridge>,
    ) -> BridgeIngress {
        let mut subscribed = 0;
        for tag in self.bridged_tags(address.as_deref()) {
            match bridge.subscribe(&tag) {
                Ok(()) => subscribed += 1,
                Err(e) => warn!("Bridge could not subscribe '{}': {}", tag.name, e),
            }
        }
        info!("Bridge attached with {} subscriptions", subscribed);
        self.bridges.lock().push(AttachedBridge {
            address: address.clone(),
            bridge,
        });
        BridgeIngress::new(self.store.clone(), address)
    }

    fn bridged_tags(&self, address: Option<&str>) -> Vec<Tag> {
        self.store
            .get_tags()
            .into_iter()
            .filter(|t| t.node_namespace.is_some())
            .filter(|t| address.is_none() || t.opcua_address.as_deref() == address)
            .collect()
    }

    /// Start the alarm tick thread and the machine loops
    pub fn start(&self) -> Result<()> {
        self.alarms.spawn(self.config.alarm_manager.tick())?;
        self.scheduler.start()?;
        info!(
            "Runtime started: {} tags, {} alarms, {} machines",
            self.store.len(),
            self.alarms.len(),
            self.scheduler.len()
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        self.scheduler.stop();
        self.alarms.stop();
        let bridges = std::mem::take(&mut *self.bridges.lock());
        for attached in bridges {
            for tag in self.bridged_tags(attached.address.as_deref()) {
                if let Err(e) = attached.bridge.unsubscribe(&tag) {
                    debug!("Bridge unsubscribe of '{}' failed: {}", tag.name, e);
                }
            }
        }
        info!("Runtime shut down");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.alarms.stop();
    }
}
