use thiserror::Error;

/// Application level error type used throughout the crate.
///
/// Validation failures (duplicates, illegal transitions, bad units) are
/// ordinary variants returned to the caller. Collaborator failures are
/// reported as [`PlcError::Persistence`] and are usually logged and swallowed
/// by the component that hit them.
#[derive(Error, Debug)]
pub enum PlcError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while encoding or decoding JSON payloads
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A unique key (name, display name, node namespace) is already taken
    #[error("{kind} '{name}' already exists")]
    DuplicateName { kind: &'static str, name: String },

    /// Requested entity was not found
    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    /// Unit does not belong to the physical variable of the tag
    #[error("Unit '{unit}' is not valid for variable {variable}")]
    InvalidUnit { unit: String, variable: String },

    /// Trigger type string could not be parsed
    #[error("Invalid trigger type '{0}'")]
    InvalidTrigger(String),

    /// Requested state machine transition is not allowed from the current state
    #[error("'{entity}' cannot {action} while {state}")]
    IllegalTransition {
        entity: String,
        action: String,
        state: String,
    },

    /// Tag cannot be changed or removed while other components reference it
    #[error("Tag '{tag}' is in use by {}", .users.join(", "))]
    TagInUse { tag: String, users: Vec<String> },

    /// Write attempted on a read-only process variable
    #[error("Process variable '{0}' is read-only")]
    ReadOnly(String),

    /// Returned value type does not match the expected type
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Numeric input outside what the runtime can represent
    #[error("{0} is out of range")]
    OutOfRange(String),

    /// Persistence collaborator failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Scheduler misuse (double start, join on a stopped scheduler, ...)
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Generic runtime failure
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl PlcError {
    pub(crate) fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        PlcError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub(crate) fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        PlcError::DuplicateName {
            kind,
            name: name.into(),
        }
    }

    /// True for errors caused by the request itself rather than by the system.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PlcError::DuplicateName { .. }
                | PlcError::NotFound { .. }
                | PlcError::InvalidUnit { .. }
                | PlcError::InvalidTrigger(_)
                | PlcError::IllegalTransition { .. }
                | PlcError::TagInUse { .. }
                | PlcError::ReadOnly(_)
                | PlcError::TypeMismatch { .. }
                | PlcError::OutOfRange(_)
        )
    }
}

/// Convenient alias over [`Result`] using [`PlcError`]
pub type Result<T> = std::result::Result<T, PlcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_in_use_message_names_users() {
        let err = PlcError::TagInUse {
            tag: "T1".to_string(),
            users: vec!["M1".to_string(), "M2".to_string()],
        };
        assert_eq!(err.to_string(), "Tag 'T1' is in use by M1, M2");
        assert!(err.is_validation());
    }

    #[test]
    fn test_persistence_is_not_validation() {
        assert!(!PlcError::Persistence("down".into()).is_validation());
    }

    #[test]
    fn test_out_of_range_is_validation() {
        let err = PlcError::OutOfRange("Shelve duration of 'A1'".into());
        assert_eq!(err.to_string(), "Shelve duration of 'A1' is out of range");
        assert!(err.is_validation());
    }
}
