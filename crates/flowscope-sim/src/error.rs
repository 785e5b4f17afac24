//! Error kinds for the simulation engine

use crate::core::{AlarmActionKind, AlarmStatus};
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by generators, the alarm state machine and the session
#[derive(Error, Debug)]
pub enum SimError {
    /// Bad generator parameters. Returned to the caller, never retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Illegal alarm operation. The alarm is left untouched.
    #[error("Invalid alarm transition: cannot {action} an alarm that is {from}")]
    InvalidTransition {
        from: AlarmStatus,
        action: AlarmActionKind,
    },

    /// A generated value escaped its declared envelope (a programming bug).
    #[error("{field} out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Alarm not found: {0}")]
    AlarmNotFound(Uuid),

    #[error("Simulation session is closed")]
    SessionClosed,

    #[error("Config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        SimError::InvalidConfiguration(msg.into())
    }
}

/// Check that `value` is finite and inside `[min, max]`.
///
/// Violations are logged here so every call site reports them the same way.
pub fn ensure_in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, SimError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(value)
    } else {
        tracing::error!(field, value, min, max, "Generated value outside declared envelope");
        Err(SimError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}
