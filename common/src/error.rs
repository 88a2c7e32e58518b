use thiserror::Error;

use crate::timeprog::DayOfWeek;

/// Failures of the time program model itself, independent of any device I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("no schedule for weekday {0:?}")]
    DayNotFound(DayOfWeek),
    #[error("invalid time of day '{0}'")]
    InvalidTime(String),
}

/// Failures reported by the parameter/schedule gateway. The transport is
/// owned by the gateway implementation; callers only see this taxonomy.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failure or timeout; the device could not be reached.
    #[error("device unavailable: {0}")]
    Unavailable(String),
    /// The device answered but declined the write.
    #[error("device rejected write: {0}")]
    Rejected(String),
    /// Unknown program, parameter, or sensor.
    #[error("not found: {0}")]
    NotFound(String),
    /// Value outside the range the device accepts.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Failures of the override state machine as surfaced to its callers.
#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("a hot water override is already active")]
    AlreadyActive,
    #[error("no hot water override is active")]
    NotActive,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
