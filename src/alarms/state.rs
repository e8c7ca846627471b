// src/alarms/state.rs - ISA-18.2 alarm states and the transition table
use crate::fsm::Fsm;
use serde::{Deserialize, Serialize};
use std::fmt;

/// ISA-18.2 alarm states.
///
/// The first four are the main states driven by the process condition.
/// `Shelved`, `SuppressedByDesign` and `OutOfService` are overlays that can be
/// entered from any main state and each have exactly one way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlarmState {
    #[default]
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "UNACK")]
    Unack,
    #[serde(rename = "ACKED")]
    Acked,
    #[serde(rename = "RTN_UNACK")]
    RtnUnack,
    #[serde(rename = "SHELVED")]
    Shelved,
    #[serde(rename = "SUPPRESSED_BY_DESIGN")]
    SuppressedByDesign,
    #[serde(rename = "OUT_OF_SERVICE")]
    OutOfService,
}

/// Operator-facing description of a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateDescriptor {
    pub mnemonic: &'static str,
    pub process_condition: &'static str,
    pub acknowledged: bool,
    pub annunciated: bool,
}

impl AlarmState {
    pub const MAIN: [AlarmState; 4] = [
        AlarmState::Normal,
        AlarmState::Unack,
        AlarmState::Acked,
        AlarmState::RtnUnack,
    ];

    pub fn is_main(&self) -> bool {
        Self::MAIN.contains(self)
    }

    /// True while evaluation of the process condition is suspended
    pub fn is_overlay(&self) -> bool {
        !self.is_main()
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            AlarmState::Normal => "NORMAL",
            AlarmState::Unack => "UNACK",
            AlarmState::Acked => "ACKED",
            AlarmState::RtnUnack => "RTN_UNACK",
            AlarmState::Shelved => "SHELVED",
            AlarmState::SuppressedByDesign => "SUPPRESSED_BY_DESIGN",
            AlarmState::OutOfService => "OUT_OF_SERVICE",
        }
    }

    pub fn descriptor(&self) -> StateDescriptor {
        let (process_condition, acknowledged, annunciated) = match self {
            AlarmState::Normal => ("Normal", true, false),
            AlarmState::Unack => ("Abnormal", false, true),
            AlarmState::Acked => ("Abnormal", true, true),
            AlarmState::RtnUnack => ("Normal", false, true),
            AlarmState::Shelved => ("Normal or Abnormal", true, false),
            AlarmState::SuppressedByDesign => ("Normal or Abnormal", true, false),
            AlarmState::OutOfService => ("Normal or Abnormal", true, false),
        };
        StateDescriptor {
            mnemonic: self.mnemonic(),
            process_condition,
            acknowledged,
            annunciated,
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Events accepted by the alarm state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmAction {
    Activate,
    Clear,
    Acknowledge,
    Shelve,
    Unshelve,
    Suppress,
    Unsuppress,
    RemoveFromService,
    ReturnToService,
}

impl AlarmAction {
    pub fn name(&self) -> &'static str {
        match self {
            AlarmAction::Activate => "activate",
            AlarmAction::Clear => "clear",
            AlarmAction::Acknowledge => "acknowledge",
            AlarmAction::Shelve => "shelve",
            AlarmAction::Unshelve => "unshelve",
            AlarmAction::Suppress => "suppress",
            AlarmAction::Unsuppress => "unsuppress",
            AlarmAction::RemoveFromService => "remove from service",
            AlarmAction::ReturnToService => "return to service",
        }
    }
}

/// Build the ISA-18.2 transition table, starting in `initial`.
///
/// Overlay exits always land in `Normal`; the caller re-evaluates the
/// process condition right after and activates when it is abnormal.
pub fn alarm_fsm(initial: AlarmState) -> Fsm<AlarmState, AlarmAction> {
    use AlarmAction::*;
    use AlarmState::*;

    let mut fsm = Fsm::with_transitions(
        initial,
        &[
            (Normal, Activate, Unack),
            (RtnUnack, Activate, Unack),
            (Unack, Clear, RtnUnack),
            (Acked, Clear, Normal),
            (Unack, Acknowledge, Acked),
            (RtnUnack, Acknowledge, Normal),
            (Shelved, Unshelve, Normal),
            (SuppressedByDesign, Unsuppress, Normal),
            (OutOfService, ReturnToService, Normal),
        ],
    );
    for main in AlarmState::MAIN {
        fsm.add_transition(main, Shelve, Shelved);
        fsm.add_transition(main, Suppress, SuppressedByDesign);
        fsm.add_transition(main, RemoveFromService, OutOfService);
    }
    fsm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlays_have_single_exit() {
        for (overlay, exit) in [
            (AlarmState::Shelved, AlarmAction::Unshelve),
            (AlarmState::SuppressedByDesign, AlarmAction::Unsuppress),
            (AlarmState::OutOfService, AlarmAction::ReturnToService),
        ] {
            let fsm = alarm_fsm(overlay);
            assert_eq!(fsm.allowed_events(), vec![exit]);
        }
    }

    #[test]
    fn test_acknowledge_only_from_unacknowledged_states() {
        for state in [
            AlarmState::Normal,
            AlarmState::Acked,
            AlarmState::Shelved,
            AlarmState::OutOfService,
        ] {
            assert!(!alarm_fsm(state).can(AlarmAction::Acknowledge), "{}", state);
        }
        assert!(alarm_fsm(AlarmState::Unack).can(AlarmAction::Acknowledge));
        assert!(alarm_fsm(AlarmState::RtnUnack).can(AlarmAction::Acknowledge));
    }

    #[test]
    fn test_state_serializes_as_mnemonic() {
        let json = serde_json::to_string(&AlarmState::RtnUnack).unwrap();
        assert_eq!(json, "\"RTN_UNACK\"");
        assert!(!AlarmState::Shelved.descriptor().annunciated);
    }
}
