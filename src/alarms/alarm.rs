// src/alarms/alarm.rs - One ISA-18.2 alarm bound to a tag
use super::{
    state::{alarm_fsm, AlarmAction, AlarmState},
    trigger::Trigger,
};
use crate::{
    error::{PlcError, Result},
    fsm::Fsm,
    tag::short_id,
    value::Value,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Shelving duration. All zero means shelved until explicitly unshelved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShelveOptions {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl ShelveOptions {
    pub fn minutes(minutes: u32) -> Self {
        Self {
            minutes,
            ..Default::default()
        }
    }

    pub fn seconds(seconds: u32) -> Self {
        Self {
            seconds,
            ..Default::default()
        }
    }

    /// `None` for an indefinite shelve
    pub fn duration(&self) -> Option<Duration> {
        let total = i64::from(self.days) * 86_400
            + i64::from(self.hours) * 3_600
            + i64::from(self.minutes) * 60
            + i64::from(self.seconds);
        (total > 0).then(|| Duration::seconds(total))
    }
}

/// Everything needed to create an alarm.
///
/// The optional state fields are only set when recreating an alarm from a
/// persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmSpec {
    pub name: String,
    pub tag: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub deadband: f64,
    /// Seconds the abnormal condition must persist before annunciating
    #[serde(default)]
    pub on_delay: f64,
    /// Seconds the normal condition must persist before clearing
    #[serde(default)]
    pub off_delay: f64,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub state: Option<AlarmState>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ack_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub shelved_until: Option<DateTime<Utc>>,
}

impl AlarmSpec {
    pub fn new(name: impl Into<String>, tag: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
            trigger,
            description: String::new(),
            deadband: 0.0,
            on_delay: 0.0,
            off_delay: 0.0,
            identifier: None,
            state: None,
            timestamp: None,
            ack_timestamp: None,
            shelved_until: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_deadband(mut self, deadband: f64) -> Self {
        self.deadband = deadband;
        self
    }

    pub fn with_delays(mut self, on_delay: f64, off_delay: f64) -> Self {
        self.on_delay = on_delay;
        self.off_delay = off_delay;
        self
    }
}

impl From<&AlarmRecord> for AlarmSpec {
    fn from(record: &AlarmRecord) -> Self {
        Self {
            name: record.name.clone(),
            tag: record.tag.clone(),
            trigger: record.alarm_setpoint,
            description: record.description.clone(),
            deadband: record.deadband,
            on_delay: record.on_delay,
            off_delay: record.off_delay,
            identifier: Some(record.identifier.clone()),
            state: Some(record.state),
            timestamp: record.timestamp,
            ack_timestamp: record.ack_timestamp,
            shelved_until: record.shelved_until,
        }
    }
}

/// Serialized form of an alarm, as persisted and pushed to UI consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub identifier: String,
    pub name: String,
    pub tag: String,
    pub state: AlarmState,
    pub alarm_setpoint: Trigger,
    pub timestamp: Option<DateTime<Utc>>,
    pub ack_timestamp: Option<DateTime<Utc>>,
    pub description: String,
    #[serde(default)]
    pub deadband: f64,
    #[serde(default)]
    pub on_delay: f64,
    #[serde(default)]
    pub off_delay: f64,
    #[serde(default)]
    pub shelved_until: Option<DateTime<Utc>>,
}

/// Partial update of an alarm definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmUpdate {
    pub name: Option<String>,
    pub tag: Option<String>,
    pub trigger: Option<Trigger>,
    pub description: Option<String>,
    pub deadband: Option<f64>,
    pub on_delay: Option<f64>,
    pub off_delay: Option<f64>,
}

/// A state change that happened on an alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmTransition {
    pub action: AlarmAction,
    pub from: AlarmState,
    pub to: AlarmState,
}

#[derive(Debug, Clone, Copy)]
struct PendingDelay {
    abnormal: bool,
    since: DateTime<Utc>,
}

fn seconds(s: f64) -> Duration {
    Duration::milliseconds((s.max(0.0) * 1000.0) as i64)
}

/// An alarm bound by name to one tag.
///
/// Alarms never read the tag store themselves; the manager feeds them
/// values and tells them whether the condition is abnormal when an operator
/// returns them from an overlay state.
#[derive(Debug, Clone)]
pub struct Alarm {
    identifier: String,
    name: String,
    tag: String,
    trigger: Trigger,
    description: String,
    deadband: f64,
    on_delay: f64,
    off_delay: f64,
    fsm: Fsm<AlarmState, AlarmAction>,
    timestamp: Option<DateTime<Utc>>,
    ack_timestamp: Option<DateTime<Utc>>,
    shelved_until: Option<DateTime<Utc>>,
    pending: Option<PendingDelay>,
}

impl Alarm {
    pub fn from_spec(spec: AlarmSpec) -> Self {
        Self {
            identifier: spec.identifier.unwrap_or_else(short_id),
            name: spec.name,
            tag: spec.tag,
            trigger: spec.trigger,
            description: spec.description,
            deadband: spec.deadband,
            on_delay: spec.on_delay,
            off_delay: spec.off_delay,
            fsm: alarm_fsm(spec.state.unwrap_or_default()),
            timestamp: spec.timestamp,
            ack_timestamp: spec.ack_timestamp,
            shelved_until: spec.shelved_until,
            pending: None,
        }
    }

    /// Recreate an alarm from its persisted record, state included
    pub fn restore(record: &AlarmRecord) -> Self {
        Self::from_spec(AlarmSpec::from(record))
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn state(&self) -> AlarmState {
        self.fsm.state()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn ack_timestamp(&self) -> Option<DateTime<Utc>> {
        self.ack_timestamp
    }

    pub fn shelved_until(&self) -> Option<DateTime<Utc>> {
        self.shelved_until
    }

    /// Operator actions accepted in the current state
    pub fn allowed_actions(&self) -> Vec<AlarmAction> {
        self.fsm
            .allowed_events()
            .into_iter()
            .filter(|a| !matches!(a, AlarmAction::Activate | AlarmAction::Clear))
            .collect()
    }

    pub fn is_abnormal(&self, value: &Value) -> bool {
        self.trigger.is_abnormal(value)
    }

    /// Evaluate a new tag value.
    ///
    /// Does nothing while the alarm is in an overlay state.
    pub fn process(&mut self, value: &Value, now: DateTime<Utc>) -> Option<AlarmTransition> {
        match self.state() {
            AlarmState::Normal | AlarmState::RtnUnack => {
                if self.trigger.is_abnormal(value) {
                    self.delay_or_fire(true, now)
                } else {
                    self.pending = None;
                    None
                }
            }
            AlarmState::Unack | AlarmState::Acked => {
                if self.trigger.clears(value, self.deadband) {
                    self.delay_or_fire(false, now)
                } else {
                    self.pending = None;
                    None
                }
            }
            _ => None,
        }
    }

    /// Fire a pending on/off delay whose time has come
    pub fn poll_delays(&mut self, now: DateTime<Utc>) -> Option<AlarmTransition> {
        let pending = self.pending?;
        let delay = self.delay_for(pending.abnormal);
        if now - pending.since >= delay {
            self.fire(pending.abnormal, now)
        } else {
            None
        }
    }

    fn delay_for(&self, abnormal: bool) -> Duration {
        seconds(if abnormal { self.on_delay } else { self.off_delay })
    }

    fn delay_or_fire(&mut self, abnormal: bool, now: DateTime<Utc>) -> Option<AlarmTransition> {
        let delay = self.delay_for(abnormal);
        if delay <= Duration::zero() {
            return self.fire(abnormal, now);
        }
        match self.pending {
            Some(p) if p.abnormal == abnormal => {
                if now - p.since >= delay {
                    self.fire(abnormal, now)
                } else {
                    None
                }
            }
            _ => {
                self.pending = Some(PendingDelay {
                    abnormal,
                    since: now,
                });
                None
            }
        }
    }

    fn fire(&mut self, abnormal: bool, now: DateTime<Utc>) -> Option<AlarmTransition> {
        self.pending = None;
        let action = if abnormal {
            AlarmAction::Activate
        } else {
            AlarmAction::Clear
        };
        self.apply(action, now)
    }

    fn apply(&mut self, action: AlarmAction, now: DateTime<Utc>) -> Option<AlarmTransition> {
        let t = self.fsm.send(action)?;
        match t.to {
            AlarmState::Unack => {
                self.timestamp = Some(now);
                self.ack_timestamp = None;
            }
            AlarmState::Acked => self.ack_timestamp = Some(now),
            AlarmState::Normal if action == AlarmAction::Acknowledge => {
                self.ack_timestamp = Some(now)
            }
            _ => {}
        }
        if t.from == AlarmState::Shelved {
            self.shelved_until = None;
        }
        if t.to.is_overlay() {
            self.pending = None;
        }
        Some(AlarmTransition {
            action,
            from: t.from,
            to: t.to,
        })
    }

    fn operator(&mut self, action: AlarmAction, now: DateTime<Utc>) -> Result<AlarmTransition> {
        let state = self.state();
        self.apply(action, now)
            .ok_or_else(|| PlcError::IllegalTransition {
                entity: self.name.clone(),
                action: action.name().to_string(),
                state: state.to_string(),
            })
    }

    /// Leave an overlay, landing in `Unack` when the condition is abnormal now.
    fn return_from(
        &mut self,
        action: AlarmAction,
        abnormal: bool,
        now: DateTime<Utc>,
    ) -> Result<AlarmTransition> {
        let mut t = self.operator(action, now)?;
        if abnormal {
            if let Some(activated) = self.apply(AlarmAction::Activate, now) {
                t.to = activated.to;
            }
        }
        Ok(t)
    }

    pub fn acknowledge(&mut self, now: DateTime<Utc>) -> Result<AlarmTransition> {
        self.operator(AlarmAction::Acknowledge, now)
    }

    pub fn shelve(
        &mut self,
        options: ShelveOptions,
        now: DateTime<Utc>,
    ) -> Result<AlarmTransition> {
        // a rejected duration must leave the state untouched
        let until = match options.duration() {
            Some(d) => Some(now.checked_add_signed(d).ok_or_else(|| {
                PlcError::OutOfRange(format!("Shelve duration of '{}'", self.name))
            })?),
            None => None,
        };
        let t = self.operator(AlarmAction::Shelve, now)?;
        self.shelved_until = until;
        Ok(t)
    }

    pub fn unshelve(&mut self, abnormal: bool, now: DateTime<Utc>) -> Result<AlarmTransition> {
        self.return_from(AlarmAction::Unshelve, abnormal, now)
    }

    pub fn designed_suppression(&mut self, now: DateTime<Utc>) -> Result<AlarmTransition> {
        self.operator(AlarmAction::Suppress, now)
    }

    pub fn designed_unsuppression(
        &mut self,
        abnormal: bool,
        now: DateTime<Utc>,
    ) -> Result<AlarmTransition> {
        self.return_from(AlarmAction::Unsuppress, abnormal, now)
    }

    pub fn remove_from_service(&mut self, now: DateTime<Utc>) -> Result<AlarmTransition> {
        self.operator(AlarmAction::RemoveFromService, now)
    }

    pub fn return_to_service(
        &mut self,
        abnormal: bool,
        now: DateTime<Utc>,
    ) -> Result<AlarmTransition> {
        self.return_from(AlarmAction::ReturnToService, abnormal, now)
    }

    /// Whether a timed shelve has run out
    pub fn shelve_expired(&self, now: DateTime<Utc>) -> bool {
        self.state() == AlarmState::Shelved && self.shelved_until.is_some_and(|until| now >= until)
    }

    /// Apply a definition change. State is kept; pending delays restart.
    pub fn update(&mut self, update: AlarmUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(tag) = update.tag {
            self.tag = tag;
        }
        if let Some(trigger) = update.trigger {
            self.trigger = trigger;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(deadband) = update.deadband {
            self.deadband = deadband;
        }
        if let Some(on_delay) = update.on_delay {
            self.on_delay = on_delay;
        }
        if let Some(off_delay) = update.off_delay {
            self.off_delay = off_delay;
        }
        self.pending = None;
    }

    pub fn to_record(&self) -> AlarmRecord {
        AlarmRecord {
            identifier: self.identifier.clone(),
            name: self.name.clone(),
            tag: self.tag.clone(),
            state: self.state(),
            alarm_setpoint: self.trigger,
            timestamp: self.timestamp,
            ack_timestamp: self.ack_timestamp,
            description: self.description.clone(),
            deadband: self.deadband,
            on_delay: self.on_delay,
            off_delay: self.off_delay,
            shelved_until: self.shelved_until,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.to_record())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::TriggerType;

    fn high(threshold: f64) -> Alarm {
        Alarm::from_spec(AlarmSpec::new(
            "A1",
            "T1",
            Trigger::new(TriggerType::High, threshold),
        ))
    }

    #[test]
    fn test_activation_sets_timestamp_and_clears_ack() {
        let mut alarm = high(100.0);
        let now = Utc::now();
        let t = alarm.process(&Value::Float(150.0), now).unwrap();
        assert_eq!((t.from, t.to), (AlarmState::Normal, AlarmState::Unack));
        assert_eq!(alarm.timestamp(), Some(now));

        alarm.acknowledge(now).unwrap();
        assert!(alarm.ack_timestamp().is_some());

        alarm.process(&Value::Float(50.0), now).unwrap();
        alarm.process(&Value::Float(150.0), now).unwrap();
        assert_eq!(alarm.state(), AlarmState::Unack);
        assert_eq!(alarm.ack_timestamp(), None);
    }

    #[test]
    fn test_acknowledge_when_acked_is_rejected() {
        let mut alarm = high(100.0);
        let now = Utc::now();
        alarm.process(&Value::Float(150.0), now);
        alarm.acknowledge(now).unwrap();
        let err = alarm.acknowledge(now).unwrap_err();
        assert!(matches!(err, PlcError::IllegalTransition { .. }));
        assert_eq!(alarm.state(), AlarmState::Acked);
    }

    #[test]
    fn test_overlay_ignores_values() {
        let mut alarm = high(100.0);
        let now = Utc::now();
        alarm.designed_suppression(now).unwrap();
        assert!(alarm.process(&Value::Float(500.0), now).is_none());
        assert_eq!(alarm.state(), AlarmState::SuppressedByDesign);

        let t = alarm.designed_unsuppression(true, now).unwrap();
        assert_eq!((t.from, t.to), (AlarmState::SuppressedByDesign, AlarmState::Unack));
    }

    #[test]
    fn test_on_delay_requires_persistence() {
        let mut alarm = Alarm::from_spec(
            AlarmSpec::new("A1", "T1", Trigger::new(TriggerType::High, 100.0))
                .with_delays(5.0, 0.0),
        );
        let t0 = Utc::now();
        assert!(alarm.process(&Value::Float(150.0), t0).is_none());
        assert!(alarm.poll_delays(t0 + Duration::seconds(2)).is_none());
        let t = alarm.poll_delays(t0 + Duration::seconds(5)).unwrap();
        assert_eq!(t.to, AlarmState::Unack);
    }

    #[test]
    fn test_on_delay_resets_when_condition_clears() {
        let mut alarm = Alarm::from_spec(
            AlarmSpec::new("A1", "T1", Trigger::new(TriggerType::High, 100.0))
                .with_delays(5.0, 0.0),
        );
        let t0 = Utc::now();
        alarm.process(&Value::Float(150.0), t0);
        alarm.process(&Value::Float(50.0), t0 + Duration::seconds(1));
        assert!(alarm.poll_delays(t0 + Duration::seconds(10)).is_none());
        assert_eq!(alarm.state(), AlarmState::Normal);
    }

    #[test]
    fn test_timed_shelve_expiry() {
        let mut alarm = high(100.0);
        let now = Utc::now();
        alarm.shelve(ShelveOptions::minutes(5), now).unwrap();
        assert!(!alarm.shelve_expired(now + Duration::minutes(4)));
        assert!(alarm.shelve_expired(now + Duration::minutes(5)));

        alarm.unshelve(false, now).unwrap();
        assert_eq!(alarm.shelved_until(), None);

        alarm.shelve(ShelveOptions::default(), now).unwrap();
        assert!(!alarm.shelve_expired(now + Duration::days(365)));
    }

    #[test]
    fn test_unrepresentable_shelve_is_rejected() {
        let mut alarm = high(100.0);
        let now = Utc::now();
        let options = ShelveOptions {
            days: u32::MAX,
            ..Default::default()
        };
        let err = alarm.shelve(options, now).unwrap_err();
        assert!(matches!(err, PlcError::OutOfRange(_)));
        assert_eq!(alarm.state(), AlarmState::Normal);
        assert_eq!(alarm.shelved_until(), None);

        // the alarm still shelves normally afterwards
        alarm.shelve(ShelveOptions::minutes(1), now).unwrap();
        assert_eq!(alarm.state(), AlarmState::Shelved);
    }

    #[test]
    fn test_record_round_trip_keeps_state() {
        let mut alarm = high(100.0);
        alarm.process(&Value::Float(150.0), Utc::now());
        let record = alarm.to_record();
        let restored = Alarm::restore(&record);
        assert_eq!(restored.state(), AlarmState::Unack);
        assert_eq!(restored.identifier(), alarm.identifier());
        let json = alarm.to_json().unwrap();
        assert_eq!(json["alarm_setpoint"]["type"], "HIGH");
        assert_eq!(json["state"], "UNACK");
    }
}
