// src/alarms/trigger.rs - Alarm trigger definition and condition evaluation
use crate::{
    error::{PlcError, Result},
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerType {
    #[serde(rename = "HIGH-HIGH")]
    HighHigh,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "LOW-LOW")]
    LowLow,
    #[serde(rename = "BOOL")]
    Bool,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::HighHigh => "HIGH-HIGH",
            TriggerType::High => "HIGH",
            TriggerType::Low => "LOW",
            TriggerType::LowLow => "LOW-LOW",
            TriggerType::Bool => "BOOL",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts `HIGH-HIGH`, `high_high`, `HighHigh` and similar spellings.
impl FromStr for TriggerType {
    type Err = PlcError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match normalized.as_str() {
            "HIGHHIGH" | "HH" => Ok(TriggerType::HighHigh),
            "HIGH" | "H" => Ok(TriggerType::High),
            "LOW" | "L" => Ok(TriggerType::Low),
            "LOWLOW" | "LL" => Ok(TriggerType::LowLow),
            "BOOL" | "BOOLEAN" => Ok(TriggerType::Bool),
            _ => Err(PlcError::InvalidTrigger(s.to_string())),
        }
    }
}

/// Condition an alarm watches: a trigger type and its threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    pub value: f64,
}

impl Trigger {
    pub fn new(trigger_type: TriggerType, value: f64) -> Self {
        Self { trigger_type, value }
    }

    /// Parse the trigger type from its textual form
    pub fn parse(trigger_type: &str, value: f64) -> Result<Self> {
        Ok(Self::new(trigger_type.parse()?, value))
    }

    /// Whether `value` is an alarm condition for this trigger.
    ///
    /// Values that cannot be interpreted (NaN) are never abnormal.
    pub fn is_abnormal(&self, value: &Value) -> bool {
        match self.trigger_type {
            TriggerType::High | TriggerType::HighHigh => {
                value.as_float().is_some_and(|v| v > self.value)
            }
            TriggerType::Low | TriggerType::LowLow => {
                value.as_float().is_some_and(|v| v < self.value)
            }
            TriggerType::Bool => value
                .as_bool()
                .is_some_and(|b| b == (self.value != 0.0)),
        }
    }

    /// Whether an active alarm may return to normal at `value`.
    ///
    /// The deadband widens the clear threshold away from the setpoint so a
    /// value hovering on the threshold does not chatter.
    pub fn clears(&self, value: &Value, deadband: f64) -> bool {
        let db = deadband.max(0.0);
        match self.trigger_type {
            TriggerType::High | TriggerType::HighHigh => {
                value.as_float().is_some_and(|v| v <= self.value - db)
            }
            TriggerType::Low | TriggerType::LowLow => {
                value.as_float().is_some_and(|v| v >= self.value + db)
            }
            TriggerType::Bool => !self.is_abnormal(value),
        }
    }
}
