//! # Scene Error Types
//!
//! All errors that can occur while building or editing a world.
//!
//! Liveness is never reported through this type: a closed world tells its
//! subsystems to stop by returning `false` from `Context::step`.

use std::fmt;

use thiserror::Error;

use crate::entity::EntityRef;

/// Errors that can occur in the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// A column for the same column type or value type already exists.
    #[error("column for {column} already declared")]
    DuplicateColumn {
        /// Name of the offending column type.
        column: &'static str,
    },

    /// A subsystem required a column nobody declared.
    #[error("no column declared for required type {column}")]
    UndeclaredDependency {
        /// Name of the required column type.
        column: &'static str,
    },

    /// The same column appears twice in one requirement.
    #[error("column {column} required more than once")]
    DuplicateRequirement {
        /// Name of the repeated column type.
        column: &'static str,
    },

    /// A one-time setup call was made a second time.
    #[error("{call} may only be called once per subsystem")]
    RepeatedCall {
        /// The repeated call.
        call: &'static str,
    },

    /// A setup call was made in the wrong order, or after `step`.
    #[error("{call} called out of order: {reason}")]
    OutOfOrder {
        /// The misplaced call.
        call: &'static str,
        /// What was expected instead.
        reason: &'static str,
    },

    /// A subsystem panicked.
    #[error("subsystem panicked: {message}")]
    SubsystemPanicked {
        /// The panic payload, if it was a string.
        message: String,
    },

    /// A subsystem returned an error of its own.
    #[error("subsystem failed: {reason}")]
    SubsystemFailed {
        /// Reason given by the subsystem.
        reason: String,
    },

    /// A subsystem returned from `run` before its first `step`.
    #[error("subsystem returned before its first step")]
    ExitedDuringSetup,

    /// Not every subsystem finished setup in time.
    #[error("setup timed out after {waited_ms}ms with {pending} subsystem(s) pending")]
    SetupTimeout {
        /// How long the world waited.
        waited_ms: u64,
        /// Number of subsystems that never reported.
        pending: usize,
    },

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {reason}")]
    Spawn {
        /// OS error text.
        reason: String,
    },

    /// World construction failed; one entry per faulty subsystem.
    #[error("world setup failed: {}", SetupFaults(.faults))]
    Setup {
        /// The collected faults.
        faults: Vec<SetupFault>,
    },

    /// No column stores values of the requested type.
    #[error("no column stores values of type {value}")]
    NoColumn {
        /// Name of the value type.
        value: &'static str,
    },

    /// The entity reference is not alive.
    #[error("entity {0} not found")]
    EntityNotFound(EntityRef),

    /// The entity is alive but has no data in the requested column.
    #[error("entity {entity} has no {value} data")]
    MissingData {
        /// The entity looked up.
        entity: EntityRef,
        /// Name of the value type.
        value: &'static str,
    },

    /// Every entity reference is in use.
    #[error("entity references exhausted")]
    EntitiesExhausted,

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SceneError {
    /// Convenience constructor for subsystem-defined failures.
    #[must_use]
    pub fn subsystem(reason: impl Into<String>) -> Self {
        Self::SubsystemFailed {
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised while the world was being built.
    #[must_use]
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::DuplicateColumn { .. }
                | Self::UndeclaredDependency { .. }
                | Self::DuplicateRequirement { .. }
                | Self::RepeatedCall { .. }
                | Self::OutOfOrder { .. }
                | Self::ExitedDuringSetup
                | Self::SetupTimeout { .. }
                | Self::Setup { .. }
        )
    }
}

/// One subsystem's contribution to a failed setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupFault {
    /// Position of the subsystem in the list passed to the world.
    pub index: usize,
    /// Subsystem name.
    pub subsystem: String,
    /// What went wrong.
    pub error: SceneError,
}

impl fmt::Display for SetupFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}: {}", self.index, self.subsystem, self.error)
    }
}

struct SetupFaults<'a>(&'a [SetupFault]);

impl fmt::Display for SetupFaults<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, fault) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{fault}")?;
        }
        Ok(())
    }
}

/// Result type for scheduler operations.
pub type SceneResult<T> = Result<T, SceneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_lists_every_fault() {
        let err = SceneError::Setup {
            faults: vec![
                SetupFault {
                    index: 0,
                    subsystem: "physics".into(),
                    error: SceneError::DuplicateColumn { column: "Positions" },
                },
                SetupFault {
                    index: 2,
                    subsystem: "render".into(),
                    error: SceneError::UndeclaredDependency { column: "Meshes" },
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("#0 physics"));
        assert!(text.contains("#2 render"));
        assert!(text.contains("Meshes"));
        assert!(err.is_setup());
    }

    #[test]
    fn test_usage_errors_are_not_setup() {
        assert!(!SceneError::EntityNotFound(EntityRef::NIL).is_setup());
        assert!(!SceneError::subsystem("boom").is_setup());
    }
}
