// src/alarms/mod.rs - ISA-18.2 alarm management
//
// state.rs holds the state set and transition table, trigger.rs the
// condition evaluation, alarm.rs a single alarm and manager.rs the
// collection driven by tag change notifications.

mod alarm;
mod manager;
mod state;
mod trigger;

pub use alarm::{Alarm, AlarmRecord, AlarmSpec, AlarmTransition, AlarmUpdate, ShelveOptions};
pub use manager::{AlarmManager, ALARM_MANAGER_OWNER};
pub use state::{alarm_fsm, AlarmAction, AlarmState, StateDescriptor};
pub use trigger::{Trigger, TriggerType};
