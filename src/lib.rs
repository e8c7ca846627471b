//! PLC-RUNTIME - Tag store, ISA-18.2 alarms and machine scheduler
//!
//! Execution core of an industrial automation runtime:
//!
//! - [`TagStore`]: the current value table. Every write goes through it and
//!   fans out to the observers attached to the tag.
//! - [`AlarmManager`]: evaluates ISA-18.2 alarms from tag change
//!   notifications and records every state change.
//! - [`Scheduler`]: runs state-driven machines, each on its own loop thread
//!   or interleaved on a shared one.
//!
//! # Examples
//!
//! ```rust
//! use plc_runtime::{DataType, TagSpec, TagStore, Variable};
//!
//! let store = TagStore::new();
//! let tag = store.set_tag(TagSpec::new("PT-101", Variable::Pressure, "kPa", DataType::Float))?;
//! store.set_value(&tag.id, 101.3, None)?;
//! assert_eq!(store.get_tag_by_name("PT-101")?.value.as_float(), Some(101.3));
//! # Ok::<(), plc_runtime::PlcError>(())
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Crate error type
pub mod error;

/// Typed tag values
pub mod value;

/// Physical variables and unit conversion
pub mod units;

/// Tag records and creation/update requests
pub mod tag;

/// Injectable time source
pub mod clock;

/// Observer queues fed by tag writes
pub mod observer;

/// Current value table
pub mod tag_store;

/// Generic finite state machine over enums
pub mod fsm;

/// Fixed-capacity sample buffers
pub mod buffer;

/// Cancellable sleep for loop threads
pub mod stop;

// ============================================================================
// ALARMS AND MACHINES
// ============================================================================

/// ISA-18.2 alarm model and manager
pub mod alarms;

/// Machine framework and the data acquisition machine
pub mod machine;

/// Async and sync machine loops
pub mod scheduler;

// ============================================================================
// COLLABORATORS AND WIRING
// ============================================================================

/// Persistence contract and bundled implementations
pub mod persistence;

/// Protocol bridge and data source contracts
pub mod bridge;

/// UI event fan-out
pub mod notify;

/// YAML configuration
pub mod config;

/// Explicit service wiring
pub mod runtime;

// ============================================================================
// PUBLIC API EXPORTS
// ============================================================================

pub use alarms::{
    Alarm, AlarmAction, AlarmManager, AlarmRecord, AlarmSpec, AlarmState, AlarmTransition,
    AlarmUpdate, ShelveOptions, Trigger, TriggerType,
};
pub use bridge::{BridgeIngress, DataSource, ProtocolBridge};
#[cfg(feature = "simulation")]
pub use bridge::SimulatedSource;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MachineConfig, RuntimeConfig, SourceConfig};
pub use error::{PlcError, Result};
pub use machine::{
    acquisition_machine, DataAcquisition, Machine, MachineCore, MachineEvent, MachineInfo,
    MachineLogic, MachineSettings, MachineState, StateMachine,
};
pub use notify::{EventHub, UiEvent, ALARM_TOPIC, MACHINE_TOPIC};
pub use observer::{Notification, NotificationQueue, Observer};
pub use persistence::{
    AlarmSummary, JsonlSummaryLog, MemoryPersistence, NullPersistence, Persistence,
};
pub use runtime::{ReloadReport, Runtime};
pub use scheduler::{LoopStats, Scheduler, SchedulerMode};
pub use tag::{Tag, TagId, TagSpec, TagUpdate};
pub use tag_store::TagStore;
pub use units::Variable;
pub use value::{DataType, Value};

/// Crate version, logged at startup
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
