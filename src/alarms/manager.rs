// src/alarms/manager.rs - Alarm collection, tag routing and the tick thread
use super::{
    alarm::{Alarm, AlarmRecord, AlarmSpec, AlarmTransition, AlarmUpdate, ShelveOptions},
    state::AlarmState,
};
use crate::{
    clock::{Clock, SystemClock},
    error::{PlcError, Result},
    notify::{EventHub, ALARM_TOPIC},
    observer::{NotificationQueue, Observer},
    persistence::{AlarmSummary, Persistence},
    stop::StopSignal,
    tag::fresh_id,
    tag_store::TagStore,
    value::Value,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Owner name reported for the manager's tag subscriptions
pub const ALARM_MANAGER_OWNER: &str = "AlarmManager";

#[derive(Default)]
struct AlarmTable {
    /// Keyed by identifier; iteration order is the evaluation order
    alarms: BTreeMap<String, Alarm>,
    /// One registration per distinct alarm tag
    observers: HashMap<String, Observer>,
}

impl AlarmTable {
    fn get_mut(&mut self, id: &str) -> Result<&mut Alarm> {
        self.alarms
            .get_mut(id)
            .ok_or_else(|| PlcError::not_found("Alarm", id))
    }

    fn name_taken(&self, name: &str, except: Option<&str>) -> bool {
        self.alarms
            .values()
            .any(|a| a.name() == name && Some(a.identifier()) != except)
    }
}

struct ManagerInner {
    table: Mutex<AlarmTable>,
    store: TagStore,
    queue: Arc<NotificationQueue>,
    persistence: Arc<dyn Persistence>,
    hub: EventHub,
    clock: Arc<dyn Clock>,
    stop: StopSignal,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Owns every alarm and routes tag changes to them.
///
/// All alarms share one notification queue; [`AlarmManager::tick`] drains it
/// and evaluates the alarms bound to each changed tag. The manager is the
/// only place alarm state changes, and every change is written to the
/// persistence collaborator and pushed on `on.alarm`.
///
/// Lock order is always the alarm table first, then the tag store.
#[derive(Clone)]
pub struct AlarmManager {
    inner: Arc<ManagerInner>,
}

impl AlarmManager {
    pub fn new(
        store: TagStore,
        persistence: Arc<dyn Persistence>,
        hub: EventHub,
        queue_capacity: usize,
    ) -> Self {
        Self::with_clock(store, persistence, hub, queue_capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: TagStore,
        persistence: Arc<dyn Persistence>,
        hub: EventHub,
        queue_capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                table: Mutex::new(AlarmTable::default()),
                store,
                queue: Arc::new(NotificationQueue::new(queue_capacity)),
                persistence,
                hub,
                clock,
                stop: StopSignal::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Create an alarm.
    ///
    /// With `reload` set the alarm comes from persisted records and is not
    /// written back. Names are unique, so reloading twice is harmless.
    pub fn append_alarm(&self, mut spec: AlarmSpec, reload: bool) -> Result<AlarmRecord> {
        let record = {
            let mut table = self.inner.table.lock();
            if table.name_taken(&spec.name, None) {
                return Err(PlcError::duplicate("Alarm", spec.name));
            }
            if let Some(id) = &spec.identifier {
                if table.alarms.contains_key(id) {
                    return Err(PlcError::duplicate("Alarm id", id.clone()));
                }
            }
            if !self.inner.store.contains(&spec.tag) {
                return Err(PlcError::not_found("Tag", spec.tag));
            }
            if spec.identifier.is_none() {
                spec.identifier = Some(fresh_id(|candidate| table.alarms.contains_key(candidate)));
            }
            let alarm = Alarm::from_spec(spec);
            let record = alarm.to_record();
            table.alarms.insert(record.identifier.clone(), alarm);
            self.attach_locked(&mut table);
            record
        };
        info!(
            "Alarm '{}' on '{}' added ({} {})",
            record.name, record.tag, record.alarm_setpoint.trigger_type, record.alarm_setpoint.value
        );
        if !reload {
            if let Err(e) = self.inner.persistence.put_alarm(&record) {
                warn!("Failed to persist alarm '{}': {}", record.name, e);
            }
        }
        Ok(record)
    }

    pub fn update_alarm(&self, id: &str, update: AlarmUpdate) -> Result<AlarmRecord> {
        let record = {
            let mut table = self.inner.table.lock();
            if let Some(name) = &update.name {
                if table.name_taken(name, Some(id)) {
                    return Err(PlcError::duplicate("Alarm", name.clone()));
                }
            }
            if let Some(tag) = &update.tag {
                if !self.inner.store.contains(tag) {
                    return Err(PlcError::not_found("Tag", tag.clone()));
                }
            }
            let alarm = table.get_mut(id)?;
            alarm.update(update);
            let record = alarm.to_record();
            self.attach_locked(&mut table);
            record
        };
        info!("Alarm '{}' updated", record.name);
        if let Err(e) = self.inner.persistence.put_alarm(&record) {
            warn!("Failed to persist alarm '{}': {}", record.name, e);
        }
        Ok(record)
    }

    pub fn delete_alarm(&self, id: &str) -> Result<AlarmRecord> {
        let record = {
            let mut table = self.inner.table.lock();
            let alarm = table
                .alarms
                .remove(id)
                .ok_or_else(|| PlcError::not_found("Alarm", id))?;
            self.attach_locked(&mut table);
            alarm.to_record()
        };
        info!("Alarm '{}' deleted", record.name);
        if let Err(e) = self.inner.persistence.delete_alarm(id) {
            warn!("Failed to delete persisted alarm '{}': {}", record.name, e);
        }
        Ok(record)
    }

    pub fn get_alarm(&self, id: &str) -> Result<AlarmRecord> {
        self.inner
            .table
            .lock()
            .alarms
            .get(id)
            .map(Alarm::to_record)
            .ok_or_else(|| PlcError::not_found("Alarm", id))
    }

    pub fn get_alarm_by_name(&self, name: &str) -> Result<AlarmRecord> {
        self.inner
            .table
            .lock()
            .alarms
            .values()
            .find(|a| a.name() == name)
            .map(Alarm::to_record)
            .ok_or_else(|| PlcError::not_found("Alarm", name))
    }

    pub fn get_alarms_by_tag(&self, tag: &str) -> Vec<AlarmRecord> {
        self.inner
            .table
            .lock()
            .alarms
            .values()
            .filter(|a| a.tag() == tag)
            .map(Alarm::to_record)
            .collect()
    }

    /// Every alarm, in identifier order
    pub fn get_alarms(&self) -> Vec<AlarmRecord> {
        self.inner
            .table
            .lock()
            .alarms
            .values()
            .map(Alarm::to_record)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.table.lock().alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn acknowledge(&self, id: &str) -> Result<AlarmRecord> {
        self.operate(id, |alarm, _, now| alarm.acknowledge(now))
    }

    pub fn shelve(&self, id: &str, options: ShelveOptions) -> Result<AlarmRecord> {
        self.operate(id, |alarm, _, now| alarm.shelve(options, now))
    }

    pub fn unshelve(&self, id: &str) -> Result<AlarmRecord> {
        self.operate(id, |alarm, abnormal, now| alarm.unshelve(abnormal, now))
    }

    pub fn designed_suppression(&self, id: &str) -> Result<AlarmRecord> {
        self.operate(id, |alarm, _, now| alarm.designed_suppression(now))
    }

    pub fn designed_unsuppression(&self, id: &str) -> Result<AlarmRecord> {
        self.operate(id, |alarm, abnormal, now| {
            alarm.designed_unsuppression(abnormal, now)
        })
    }

    pub fn remove_from_service(&self, id: &str) -> Result<AlarmRecord> {
        self.operate(id, |alarm, _, now| alarm.remove_from_service(now))
    }

    pub fn return_to_service(&self, id: &str) -> Result<AlarmRecord> {
        self.operate(id, |alarm, abnormal, now| alarm.return_to_service(abnormal, now))
    }

    fn operate<F>(&self, id: &str, action: F) -> Result<AlarmRecord>
    where
        F: FnOnce(&mut Alarm, bool, DateTime<Utc>) -> Result<AlarmTransition>,
    {
        let now = self.inner.clock.now();
        let (record, transition) = {
            let mut table = self.inner.table.lock();
            let alarm = table.get_mut(id)?;
            let abnormal = self.condition(alarm);
            let transition = action(alarm, abnormal, now).map_err(|e| {
                debug!("Rejected operator action: {}", e);
                e
            })?;
            (alarm.to_record(), transition)
        };
        self.record(&record, &transition);
        Ok(record)
    }

    /// Whether the alarm's tag is currently in an abnormal condition.
    /// A missing tag counts as normal.
    fn condition(&self, alarm: &Alarm) -> bool {
        self.inner
            .store
            .get_tag_by_name(alarm.tag())
            .map(|tag| alarm.is_abnormal(&tag.value))
            .unwrap_or(false)
    }

    /// Evaluate every alarm bound to `tag_name` against the tag's current value.
    ///
    /// Shelved alarms are only checked for an expired shelving window. A
    /// panicking alarm is logged and skipped; the others still run.
    pub fn execute(&self, tag_name: &str) {
        let value = match self.inner.store.get_tag_by_name(tag_name) {
            Ok(tag) => tag.value,
            Err(e) => {
                debug!("Skipping evaluation of '{}': {}", tag_name, e);
                return;
            }
        };
        let now = self.inner.clock.now();
        let emitted = {
            let mut table = self.inner.table.lock();
            let mut emitted = Vec::new();
            for alarm in table.alarms.values_mut().filter(|a| a.tag() == tag_name) {
                if let Some(t) = Self::evaluate(alarm, &value, now) {
                    emitted.push((alarm.to_record(), t));
                }
            }
            emitted
        };
        for (record, transition) in emitted {
            self.record(&record, &transition);
        }
    }

    fn evaluate(alarm: &mut Alarm, value: &Value, now: DateTime<Utc>) -> Option<AlarmTransition> {
        let name = alarm.name().to_string();
        let result = catch_unwind(AssertUnwindSafe(|| {
            if alarm.state() == AlarmState::Shelved {
                if alarm.shelve_expired(now) {
                    let abnormal = alarm.is_abnormal(value);
                    return alarm.unshelve(abnormal, now).ok();
                }
                return None;
            }
            alarm.process(value, now)
        }));
        result.unwrap_or_else(|_| {
            error!("Alarm '{}' panicked while evaluating {}", name, value);
            None
        })
    }

    /// Drain the notification queue, then expire shelves and fire due delays.
    ///
    /// Returns the number of notifications processed.
    pub fn tick(&self) -> usize {
        let mut processed = 0;
        while let Some(notification) = self.inner.queue.pop() {
            self.execute(&notification.tag_name);
            processed += 1;
        }
        self.expire_shelves();
        self.poll_delays();
        processed
    }

    fn expire_shelves(&self) {
        let now = self.inner.clock.now();
        let emitted = {
            let mut table = self.inner.table.lock();
            let mut emitted = Vec::new();
            let expired: Vec<String> = table
                .alarms
                .values()
                .filter(|a| a.shelve_expired(now))
                .map(|a| a.identifier().to_string())
                .collect();
            for id in expired {
                let Ok(alarm) = table.get_mut(&id) else { continue };
                let abnormal = self.condition(alarm);
                match alarm.unshelve(abnormal, now) {
                    Ok(t) => {
                        debug!("Shelve of '{}' expired", alarm.name());
                        emitted.push((alarm.to_record(), t));
                    }
                    Err(e) => warn!("Automatic unshelve failed: {}", e),
                }
            }
            emitted
        };
        for (record, transition) in emitted {
            self.record(&record, &transition);
        }
    }

    fn poll_delays(&self) {
        let now = self.inner.clock.now();
        let emitted: Vec<_> = {
            let mut table = self.inner.table.lock();
            table
                .alarms
                .values_mut()
                .filter_map(|a| a.poll_delays(now).map(|t| (a.to_record(), t)))
                .collect()
        };
        for (record, transition) in emitted {
            self.record(&record, &transition);
        }
    }

    /// Make sure every distinct alarm tag has exactly one registration and
    /// that tags without alarms have none.
    pub fn attach_all(&self) {
        let mut table = self.inner.table.lock();
        self.attach_locked(&mut table);
    }

    fn attach_locked(&self, table: &mut AlarmTable) {
        let wanted: BTreeSet<String> = table.alarms.values().map(|a| a.tag().to_string()).collect();

        let stale: Vec<String> = table
            .observers
            .keys()
            .filter(|tag| !wanted.contains(*tag))
            .cloned()
            .collect();
        for tag in stale {
            if let Some(observer) = table.observers.remove(&tag) {
                if let Err(e) = self.inner.store.detach(&tag, observer.id()) {
                    debug!("Detach from '{}' skipped: {}", tag, e);
                }
            }
        }

        for tag in wanted {
            let observer = table
                .observers
                .entry(tag.clone())
                .or_insert_with(|| {
                    Observer::with_queue(ALARM_MANAGER_OWNER, self.inner.queue.clone())
                })
                .clone();
            if let Err(e) = self.inner.store.attach(&tag, observer) {
                warn!("Cannot observe tag '{}': {}", tag, e);
            }
        }
    }

    fn record(&self, record: &AlarmRecord, transition: &AlarmTransition) {
        info!(
            "Alarm '{}' {} -> {} on {}",
            record.name,
            transition.from,
            transition.to,
            transition.action.name()
        );
        let summary = AlarmSummary {
            name: record.name.clone(),
            state: transition.to,
            timestamp: record.timestamp,
            ack_timestamp: record.ack_timestamp,
            recorded_at: self.inner.clock.now(),
        };
        if let Err(e) = self.inner.persistence.create_alarm_summary(&summary) {
            warn!("Alarm summary for '{}' not recorded: {}", record.name, e);
        }
        if let Err(e) = self.inner.persistence.put_alarm(record) {
            warn!("Alarm '{}' state not persisted: {}", record.name, e);
        }
        match serde_json::to_value(record) {
            Ok(payload) => {
                self.inner.hub.publish(ALARM_TOPIC, payload);
            }
            Err(e) => warn!("Cannot serialize alarm '{}': {}", record.name, e),
        }
    }

    /// Notifications lost because the shared queue was full
    pub fn dropped_notifications(&self) -> u64 {
        self.inner.queue.dropped()
    }

    pub fn pending_notifications(&self) -> usize {
        self.inner.queue.len()
    }

    /// Run [`AlarmManager::tick`] every `period` on a dedicated thread.
    pub fn spawn(&self, period: Duration) -> Result<()> {
        let mut worker = self.inner.worker.lock();
        if worker.is_some() {
            return Err(PlcError::Runtime("Alarm manager already running".to_string()));
        }
        self.inner.stop.reset();
        let manager = self.clone();
        let handle = thread::Builder::new()
            .name("alarm-manager".to_string())
            .spawn(move || {
                info!("Alarm manager ticking every {:?}", period);
                while !manager.inner.stop.wait_timeout(period) {
                    manager.tick();
                }
                debug!("Alarm manager thread exiting");
            })?;
        *worker = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.worker.lock().is_some()
    }

    /// Stop the tick thread and wait for it to finish its current tick
    pub fn stop(&self) {
        self.inner.stop.trigger();
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Alarm manager thread panicked");
            }
            info!("Alarm manager stopped");
        }
    }
}
