// src/tag.rs - Tag entity, creation spec and partial updates
use crate::{
    error::Result,
    units::Variable,
    value::{DataType, Value},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable short identifier of a tag or alarm
pub type TagId = String;

/// Generate an 8 character hex identifier.
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Generate a short identifier that `is_taken` does not report as in use.
pub fn fresh_id(is_taken: impl Fn(&str) -> bool) -> String {
    loop {
        let id = short_id();
        if !is_taken(&id) {
            return id;
        }
    }
}

/// A named, unit-aware measurement point.
///
/// Instances handed out by the [`TagStore`](crate::TagStore) are snapshots.
/// Changing them has no effect on the store; use the store's write
/// operations instead. The serialized form is the persisted tag record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub unit: String,
    pub display_unit: String,
    pub variable: Variable,
    #[serde(default)]
    pub data_type: DataType,
    pub value: Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub opcua_address: Option<String>,
    #[serde(default)]
    pub node_namespace: Option<String>,
    /// Expected update period in milliseconds
    #[serde(default)]
    pub scan_time: Option<u64>,
    #[serde(default)]
    pub dead_band: Option<f64>,
}

impl Tag {
    /// Current value expressed in `unit`.
    pub fn value_in(&self, unit: &str) -> Result<Value> {
        match self.value {
            Value::Float(v) => Ok(Value::Float(self.variable.convert(v, &self.unit, unit)?)),
            Value::Int(v) => Ok(Value::Float(
                self.variable.convert(v as f64, &self.unit, unit)?,
            )),
            Value::Bool(_) => Ok(self.value),
        }
    }

    /// Current value expressed in the display unit
    pub fn display_value(&self) -> Result<Value> {
        self.value_in(&self.display_unit)
    }

    /// Name shown to operators, falling back to the tag name
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Everything needed to create a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSpec {
    /// Identifier to reuse, typically when reloading persisted records
    #[serde(default)]
    pub id: Option<TagId>,
    pub name: String,
    pub unit: String,
    pub variable: Variable,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub display_unit: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub opcua_address: Option<String>,
    #[serde(default)]
    pub node_namespace: Option<String>,
    #[serde(default)]
    pub scan_time: Option<u64>,
    #[serde(default)]
    pub dead_band: Option<f64>,
}

impl TagSpec {
    pub fn new(
        name: impl Into<String>,
        variable: Variable,
        unit: impl Into<String>,
        data_type: DataType,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            unit: unit.into(),
            variable,
            data_type,
            display_name: None,
            display_unit: None,
            description: String::new(),
            opcua_address: None,
            node_namespace: None,
            scan_time: None,
            dead_band: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_display_unit(mut self, unit: impl Into<String>) -> Self {
        self.display_unit = Some(unit.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Bind the tag to a node of a protocol server
    pub fn with_node(mut self, address: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.opcua_address = Some(address.into());
        self.node_namespace = Some(namespace.into());
        self
    }

    pub fn with_scan_time(mut self, scan_time_ms: u64) -> Self {
        self.scan_time = Some(scan_time_ms);
        self
    }

    pub fn with_dead_band(mut self, dead_band: f64) -> Self {
        self.dead_band = Some(dead_band);
        self
    }
}

impl From<&Tag> for TagSpec {
    fn from(tag: &Tag) -> Self {
        Self {
            id: Some(tag.id.clone()),
            name: tag.name.clone(),
            unit: tag.unit.clone(),
            variable: tag.variable,
            data_type: tag.data_type,
            display_name: tag.display_name.clone(),
            display_unit: Some(tag.display_unit.clone()),
            description: tag.description.clone(),
            opcua_address: tag.opcua_address.clone(),
            node_namespace: tag.node_namespace.clone(),
            scan_time: tag.scan_time,
            dead_band: tag.dead_band,
        }
    }
}

/// Partial update of a tag; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagUpdate {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub variable: Option<Variable>,
    pub unit: Option<String>,
    pub display_unit: Option<String>,
    pub opcua_address: Option<String>,
    pub node_namespace: Option<String>,
    pub scan_time: Option<u64>,
    pub dead_band: Option<f64>,
}

impl TagUpdate {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == TagUpdate::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_length() {
        let a = short_id();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, short_id());
    }

    #[test]
    fn test_fresh_id_skips_taken_candidates() {
        use std::cell::RefCell;
        let rejected = RefCell::new(Vec::new());
        let id = fresh_id(|candidate| {
            let mut seen = rejected.borrow_mut();
            if seen.len() < 3 {
                seen.push(candidate.to_string());
                true
            } else {
                false
            }
        });
        let rejected = rejected.into_inner();
        assert_eq!(rejected.len(), 3);
        assert!(!rejected.contains(&id));
        assert_eq!(id.len(), 8);
    }

    #[test]
    fn test_display_value_converts() {
        let tag = Tag {
            id: short_id(),
            name: "PT-101".into(),
            display_name: None,
            unit: "Pa".into(),
            display_unit: "kPa".into(),
            variable: Variable::Pressure,
            data_type: DataType::Float,
            value: Value::Float(2500.0),
            timestamp: None,
            description: String::new(),
            opcua_address: None,
            node_namespace: None,
            scan_time: None,
            dead_band: None,
        };
        assert_eq!(tag.display_value().unwrap(), Value::Float(2.5));
        assert_eq!(tag.label(), "PT-101");
    }
}
