// src/tag_store.rs - Current value table (CVT) with observer fan-out
use crate::{
    error::{PlcError, Result},
    observer::{Notification, Observer},
    tag::{fresh_id, Tag, TagId, TagSpec, TagUpdate},
    value::Value,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

#[derive(Debug)]
struct TagEntry {
    tag: Tag,
    observers: Vec<Observer>,
}

#[derive(Debug, Default)]
struct TagTable {
    tags: HashMap<TagId, TagEntry>,
    by_name: HashMap<String, TagId>,
}

impl TagTable {
    fn entry(&self, id: &str) -> Result<&TagEntry> {
        self.tags.get(id).ok_or_else(|| PlcError::not_found("Tag", id))
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut TagEntry> {
        self.tags
            .get_mut(id)
            .ok_or_else(|| PlcError::not_found("Tag", id))
    }

    fn id_by_name(&self, name: &str) -> Result<TagId> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| PlcError::not_found("Tag", name))
    }

    fn check_display_name(&self, display_name: &str, except: Option<&str>) -> Result<()> {
        let taken = self.tags.values().any(|e| {
            Some(e.tag.id.as_str()) != except && e.tag.display_name.as_deref() == Some(display_name)
        });
        if taken {
            return Err(PlcError::duplicate("Display name", display_name));
        }
        Ok(())
    }

    /// Namespaces only collide within the same source address.
    fn check_namespace(
        &self,
        address: Option<&str>,
        namespace: &str,
        except: Option<&str>,
    ) -> Result<()> {
        let taken = self.tags.values().any(|e| {
            Some(e.tag.id.as_str()) != except
                && e.tag.node_namespace.as_deref() == Some(namespace)
                && e.tag.opcua_address.as_deref() == address
        });
        if taken {
            return Err(PlcError::duplicate("Node namespace", namespace));
        }
        Ok(())
    }

    fn find_by_namespace(&self, address: Option<&str>, namespace: &str) -> Option<&TagEntry> {
        self.tags.values().find(|e| {
            e.tag.node_namespace.as_deref() == Some(namespace)
                && (address.is_none() || e.tag.opcua_address.as_deref() == address)
        })
    }

    fn write(&mut self, id: &str, value: Value, timestamp: DateTime<Utc>) -> Result<()> {
        let entry = self.entry_mut(id)?;
        let value = entry.tag.data_type.coerce(value)?;
        entry.tag.value = value;
        entry.tag.timestamp = Some(timestamp);
        trace!("Tag {} = {} at {}", entry.tag.name, value, timestamp);

        for observer in &entry.observers {
            let delivered = observer.notify(Notification {
                tag_name: entry.tag.name.clone(),
                value,
                timestamp,
            });
            if !delivered {
                debug!(
                    "Observer {} of '{}' is full, notification dropped",
                    observer.owner(),
                    entry.tag.name
                );
            }
        }
        Ok(())
    }
}

/// Thread-safe current value table.
///
/// Every operation goes through one gate, so concurrent callers observe a
/// consistent table and notifications for a tag are delivered in the order
/// its values were written. Observers are queue-backed: the store never
/// calls back into foreign code while holding the gate.
///
/// Cloning the store yields another handle to the same table.
///
/// # Examples
///
/// ```rust
/// use plc_runtime::{DataType, TagSpec, TagStore, Variable};
///
/// let store = TagStore::new();
/// let tag = store.set_tag(TagSpec::new("PT-101", Variable::Pressure, "Pa", DataType::Float))?;
/// store.set_value(&tag.id, 150.0, None)?;
/// assert_eq!(store.get_tag_by_name("PT-101")?.value.as_float(), Some(150.0));
/// # Ok::<(), plc_runtime::PlcError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct TagStore {
    inner: Arc<Mutex<TagTable>>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tag from `spec` and return a snapshot of it.
    pub fn set_tag(&self, spec: TagSpec) -> Result<Tag> {
        spec.variable.validate_unit(&spec.unit)?;
        let display_unit = spec.display_unit.unwrap_or_else(|| spec.unit.clone());
        spec.variable.validate_unit(&display_unit)?;

        let mut table = self.inner.lock();
        if table.by_name.contains_key(&spec.name) {
            return Err(PlcError::duplicate("Tag", spec.name));
        }
        if let Some(display_name) = &spec.display_name {
            table.check_display_name(display_name, None)?;
        }
        if let Some(namespace) = &spec.node_namespace {
            table.check_namespace(spec.opcua_address.as_deref(), namespace, None)?;
        }
        let id = match spec.id {
            Some(id) if table.tags.contains_key(&id) => {
                return Err(PlcError::duplicate("Tag id", id));
            }
            Some(id) => id,
            None => fresh_id(|candidate| table.tags.contains_key(candidate)),
        };

        let tag = Tag {
            id: id.clone(),
            name: spec.name,
            display_name: spec.display_name,
            unit: spec.unit,
            display_unit,
            variable: spec.variable,
            data_type: spec.data_type,
            value: spec.data_type.default_value(),
            timestamp: None,
            description: spec.description,
            opcua_address: spec.opcua_address,
            node_namespace: spec.node_namespace,
            scan_time: spec.scan_time,
            dead_band: spec.dead_band,
        };
        info!("Tag '{}' created ({}, {})", tag.name, tag.variable, tag.unit);
        table.by_name.insert(tag.name.clone(), id.clone());
        table.tags.insert(
            id,
            TagEntry {
                tag: tag.clone(),
                observers: Vec::new(),
            },
        );
        Ok(tag)
    }

    pub fn get_tag(&self, id: &str) -> Result<Tag> {
        Ok(self.inner.lock().entry(id)?.tag.clone())
    }

    pub fn get_tag_by_name(&self, name: &str) -> Result<Tag> {
        let table = self.inner.lock();
        let id = table.id_by_name(name)?;
        Ok(table.entry(&id)?.tag.clone())
    }

    /// Look a tag up by its protocol binding.
    ///
    /// With `address` set only tags bound to that source address match.
    pub fn get_tag_by_node_namespace(&self, address: Option<&str>, namespace: &str) -> Result<Tag> {
        self.inner
            .lock()
            .find_by_namespace(address, namespace)
            .map(|e| e.tag.clone())
            .ok_or_else(|| PlcError::not_found("Node namespace", namespace))
    }

    /// Snapshots of every tag, ordered by name
    pub fn get_tags(&self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .inner
            .lock()
            .tags
            .values()
            .map(|e| e.tag.clone())
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a value expressed in the tag's native unit and notify observers.
    ///
    /// The value is coerced to the tag's data type. `timestamp` defaults to now.
    pub fn set_value(
        &self,
        id: &str,
        value: impl Into<Value>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        self.inner.lock().write(id, value.into(), timestamp)
    }

    /// Store a value expressed in `unit`, converting it to the native unit first.
    pub fn set_value_in_unit(
        &self,
        id: &str,
        value: f64,
        unit: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let mut table = self.inner.lock();
        let tag = &table.entry(id)?.tag;
        let native = tag.variable.convert(value, unit, &tag.unit)?;
        table.write(id, Value::Float(native), timestamp)
    }

    pub fn set_value_by_name(
        &self,
        name: &str,
        value: impl Into<Value>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let mut table = self.inner.lock();
        let id = table.id_by_name(name)?;
        table.write(&id, value.into(), timestamp)
    }

    /// Ingress for protocol bridges: write the tag bound to `namespace`.
    pub fn write_by_node_namespace(
        &self,
        address: Option<&str>,
        namespace: &str,
        value: impl Into<Value>,
        source_timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let timestamp = source_timestamp.unwrap_or_else(Utc::now);
        let mut table = self.inner.lock();
        let id = table
            .find_by_namespace(address, namespace)
            .map(|e| e.tag.id.clone())
            .ok_or_else(|| PlcError::not_found("Node namespace", namespace))?;
        table.write(&id, value.into(), timestamp)
    }

    /// Register `observer` on the tag called `name`.
    ///
    /// Attaching the same observer twice is a no-op.
    pub fn attach(&self, name: &str, observer: Observer) -> Result<()> {
        let mut table = self.inner.lock();
        let id = table.id_by_name(name)?;
        let entry = table.entry_mut(&id)?;
        if entry.observers.iter().any(|o| o.id() == observer.id()) {
            return Ok(());
        }
        debug!("Observer {} attached to '{}'", observer.owner(), name);
        entry.observers.push(observer);
        Ok(())
    }

    /// Remove an observer; returns whether it was attached.
    pub fn detach(&self, name: &str, observer_id: u64) -> Result<bool> {
        let mut table = self.inner.lock();
        let id = table.id_by_name(name)?;
        let entry = table.entry_mut(&id)?;
        let before = entry.observers.len();
        entry.observers.retain(|o| o.id() != observer_id);
        let removed = entry.observers.len() != before;
        if removed {
            debug!("Observer {} detached from '{}'", observer_id, name);
        }
        Ok(removed)
    }

    /// Owners of the observers attached to a tag, without duplicates
    pub fn subscribers(&self, name: &str) -> Result<Vec<String>> {
        let table = self.inner.lock();
        let id = table.id_by_name(name)?;
        let mut owners: Vec<String> = Vec::new();
        for observer in &table.entry(&id)?.observers {
            if !owners.iter().any(|o| o == observer.owner()) {
                owners.push(observer.owner().to_string());
            }
        }
        Ok(owners)
    }

    /// Apply a partial update and return the new snapshot.
    ///
    /// Renaming a tag is refused while anything is subscribed to it.
    /// Changing the unit converts the stored value; changing the variable
    /// resets it to the data type's default.
    pub fn update_tag(&self, id: &str, update: TagUpdate) -> Result<Tag> {
        let mut table = self.inner.lock();
        let current = table.entry(id)?;
        let tag = &current.tag;

        let rename = update.name.as_ref().filter(|n| **n != tag.name).cloned();
        if let Some(new_name) = &rename {
            if table.by_name.contains_key(new_name) {
                return Err(PlcError::duplicate("Tag", new_name.clone()));
            }
            if !current.observers.is_empty() {
                let mut users: Vec<String> = Vec::new();
                for o in &current.observers {
                    if !users.iter().any(|u| u == o.owner()) {
                        users.push(o.owner().to_string());
                    }
                }
                warn!("Rename of '{}' refused, subscribed by {:?}", tag.name, users);
                return Err(PlcError::TagInUse {
                    tag: tag.name.clone(),
                    users,
                });
            }
        }
        if let Some(display_name) = &update.display_name {
            table.check_display_name(display_name, Some(id))?;
        }

        let variable = update.variable.unwrap_or(tag.variable);
        let variable_changed = variable != tag.variable;
        let unit = update
            .unit
            .clone()
            .unwrap_or_else(|| {
                if variable_changed {
                    variable.base_unit().to_string()
                } else {
                    tag.unit.clone()
                }
            });
        variable.validate_unit(&unit)?;
        let display_unit = update
            .display_unit
            .clone()
            .unwrap_or_else(|| {
                if variable_changed {
                    unit.clone()
                } else {
                    tag.display_unit.clone()
                }
            });
        variable.validate_unit(&display_unit)?;

        let address = update.opcua_address.clone().or_else(|| tag.opcua_address.clone());
        let namespace = update.node_namespace.clone().or_else(|| tag.node_namespace.clone());
        if update.opcua_address.is_some() || update.node_namespace.is_some() {
            if let Some(ns) = &namespace {
                table.check_namespace(address.as_deref(), ns, Some(id))?;
            }
        }

        let value = if variable_changed {
            tag.data_type.default_value()
        } else if unit != tag.unit {
            match tag.value {
                Value::Bool(_) => tag.value,
                other => {
                    let v = other.as_float().unwrap_or_default();
                    tag.data_type
                        .coerce(Value::Float(variable.convert(v, &tag.unit, &unit)?))?
                }
            }
        } else {
            tag.value
        };

        let old_name = tag.name.clone();
        let entry = table.entry_mut(id)?;
        let tag = &mut entry.tag;
        if let Some(name) = &rename {
            tag.name = name.clone();
        }
        if let Some(display_name) = update.display_name {
            tag.display_name = Some(display_name);
        }
        if let Some(description) = update.description {
            tag.description = description;
        }
        if let Some(scan_time) = update.scan_time {
            tag.scan_time = Some(scan_time);
        }
        if let Some(dead_band) = update.dead_band {
            tag.dead_band = Some(dead_band);
        }
        tag.variable = variable;
        tag.unit = unit;
        tag.display_unit = display_unit;
        tag.opcua_address = address;
        tag.node_namespace = namespace;
        tag.value = value;
        let snapshot = tag.clone();

        if let Some(name) = rename {
            table.by_name.remove(&old_name);
            table.by_name.insert(name, id.to_string());
        }
        info!("Tag '{}' updated", snapshot.name);
        Ok(snapshot)
    }

    /// Remove a tag. References held by alarms or machines are not checked.
    pub fn delete_tag(&self, id: &str) -> Result<Tag> {
        let mut table = self.inner.lock();
        let entry = table
            .tags
            .remove(id)
            .ok_or_else(|| PlcError::not_found("Tag", id))?;
        table.by_name.remove(&entry.tag.name);
        info!("Tag '{}' deleted", entry.tag.name);
        Ok(entry.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{units::Variable, value::DataType};

    fn pressure(name: &str) -> TagSpec {
        TagSpec::new(name, Variable::Pressure, "Pa", DataType::Float)
    }

    #[test]
    fn test_duplicate_name_leaves_store_unchanged() {
        let store = TagStore::new();
        store.set_tag(pressure("T1")).unwrap();
        let err = store.set_tag(pressure("T1")).unwrap_err();
        assert!(matches!(err, PlcError::DuplicateName { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_namespace_collision_is_scoped_per_address() {
        let store = TagStore::new();
        store
            .set_tag(pressure("T1").with_node("opc.tcp://a:4840", "ns=2;i=1"))
            .unwrap();
        store
            .set_tag(pressure("T2").with_node("opc.tcp://b:4840", "ns=2;i=1"))
            .unwrap();
        let err = store
            .set_tag(pressure("T3").with_node("opc.tcp://a:4840", "ns=2;i=1"))
            .unwrap_err();
        assert!(matches!(err, PlcError::DuplicateName { kind: "Node namespace", .. }));

        let tag = store
            .get_tag_by_node_namespace(Some("opc.tcp://b:4840"), "ns=2;i=1")
            .unwrap();
        assert_eq!(tag.name, "T2");
    }

    #[test]
    fn test_display_name_must_be_unique() {
        let store = TagStore::new();
        store.set_tag(pressure("T1").with_display_name("Inlet")).unwrap();
        let err = store
            .set_tag(pressure("T2").with_display_name("Inlet"))
            .unwrap_err();
        assert!(matches!(err, PlcError::DuplicateName { kind: "Display name", .. }));
    }

    #[test]
    fn test_invalid_unit_rejected() {
        let store = TagStore::new();
        let err = store
            .set_tag(TagSpec::new("T1", Variable::Pressure, "degC", DataType::Float))
            .unwrap_err();
        assert!(matches!(err, PlcError::InvalidUnit { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_value_notifies_every_observer() {
        let store = TagStore::new();
        let tag = store.set_tag(pressure("T1")).unwrap();
        let small = Observer::new("small", 1);
        let big = Observer::new("big", 8);
        store.attach("T1", small.clone()).unwrap();
        store.attach("T1", big.clone()).unwrap();

        store.set_value(&tag.id, 1.0, None).unwrap();
        store.set_value(&tag.id, 2.0, None).unwrap();

        assert_eq!(small.queue().len(), 1);
        assert_eq!(small.queue().dropped(), 1);
        assert_eq!(big.queue().len(), 2);
    }

    #[test]
    fn test_snapshots_do_not_alias_store() {
        let store = TagStore::new();
        let mut tag = store.set_tag(pressure("T1")).unwrap();
        tag.value = Value::Float(99.0);
        assert_eq!(store.get_tag(&tag.id).unwrap().value, Value::Float(0.0));
    }

    #[test]
    fn test_set_value_in_unit_converts_to_native() {
        let store = TagStore::new();
        let tag = store.set_tag(pressure("T1")).unwrap();
        store.set_value_in_unit(&tag.id, 1.5, "kPa", None).unwrap();
        assert_eq!(store.get_tag(&tag.id).unwrap().value, Value::Float(1500.0));
    }

    #[test]
    fn test_rename_refused_while_subscribed() {
        let store = TagStore::new();
        let tag = store.set_tag(pressure("T1")).unwrap();
        let observer = Observer::new("M1", 4);
        store.attach("T1", observer.clone()).unwrap();

        let err = store.update_tag(&tag.id, TagUpdate::rename("T9")).unwrap_err();
        assert!(err.to_string().contains("M1"));
        assert_eq!(store.get_tag(&tag.id).unwrap().name, "T1");

        store.detach("T1", observer.id()).unwrap();
        let renamed = store.update_tag(&tag.id, TagUpdate::rename("T9")).unwrap();
        assert_eq!(renamed.name, "T9");
        assert!(store.get_tag_by_name("T1").is_err());
        assert!(store.get_tag_by_name("T9").is_ok());
    }

    #[test]
    fn test_unit_change_converts_stored_value() {
        let store = TagStore::new();
        let tag = store.set_tag(pressure("T1")).unwrap();
        store.set_value(&tag.id, 2000.0, None).unwrap();
        let update = TagUpdate {
            unit: Some("kPa".into()),
            ..Default::default()
        };
        let tag = store.update_tag(&tag.id, update).unwrap();
        assert_eq!(tag.value, Value::Float(2.0));
    }

    #[test]
    fn test_delete_does_not_cascade() {
        let store = TagStore::new();
        let tag = store.set_tag(pressure("T1")).unwrap();
        store.attach("T1", Observer::new("A", 1)).unwrap();
        store.delete_tag(&tag.id).unwrap();
        assert!(matches!(
            store.get_tag(&tag.id),
            Err(PlcError::NotFound { .. })
        ));
    }
}
