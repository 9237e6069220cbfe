//! Error types shared across the workspace.
//!
//! Capability traits return `anyhow::Result`. Drivers raise a [`DeviceError`]
//! for conditions callers may want to match on (soft limits, state checks,
//! aborts) and wrap transport failures with `anyhow::Context`. Callers use
//! `err.downcast_ref::<DeviceError>()` to recover the variant.

use crate::state::MotorState;
use thiserror::Error;

/// Typed device failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// The transport to the device failed or was closed.
    #[error("Communication error with '{device}': {message}")]
    Communication {
        /// Device or connection name
        device: String,
        /// Underlying failure
        message: String,
    },

    /// The device answered something the driver cannot interpret.
    #[error("Unexpected response from '{device}': {response:?}")]
    Protocol {
        /// Device or connection name
        device: String,
        /// Raw response text
        response: String,
    },

    /// The controller refused a move because of its soft limits.
    #[error("Motor '{motor}' cannot move beyond soft limits")]
    SoftLimit {
        /// Motor name
        motor: String,
    },

    /// Target position outside the device-reported limits.
    #[error("Target {target} outside limits [{lower}, {upper}]")]
    OutOfLimits {
        /// Requested position
        target: f64,
        /// Lower limit
        lower: f64,
        /// Upper limit
        upper: f64,
    },

    /// A parameter was accessed in a state that does not allow it.
    #[error("Parameter '{parameter}' cannot be accessed in state '{state}'")]
    StateCheck {
        /// Parameter name
        parameter: String,
        /// Current motor state
        state: MotorState,
    },

    /// Operation not implemented by this device.
    #[error("'{operation}' is not supported by '{device}'")]
    NotSupported {
        /// Device name
        device: String,
        /// Operation name
        operation: String,
    },

    /// Waiting for a device condition timed out.
    #[error("Timed out after {seconds:.1}s waiting for {what}")]
    Timeout {
        /// What was awaited
        what: String,
        /// Elapsed seconds
        seconds: f64,
    },

    /// Sample moves require both magnets engaged.
    #[error("Magnets are not in")]
    MagnetsOut,

    /// The running acquisition was aborted on request.
    #[error("Acquisition aborted")]
    Aborted,
}

impl DeviceError {
    /// Shorthand for [`DeviceError::NotSupported`].
    pub fn not_supported(device: impl Into<String>, operation: impl Into<String>) -> Self {
        DeviceError::NotSupported {
            device: device.into(),
            operation: operation.into(),
        }
    }

    /// True if `err` (or any error in its chain) is [`DeviceError::Aborted`].
    pub fn is_abort(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<DeviceError>(),
                Some(DeviceError::Aborted)
            )
        })
    }
}

/// Configuration load and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Parse error (invalid TOML or wrong types)
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Field-level validation error
    #[error("Schema validation failed:\n{0}")]
    SchemaValidationError(String),

    /// Cross-field validation error
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn abort_is_found_through_context() {
        let err: anyhow::Result<()> = Err(DeviceError::Aborted.into());
        let err = err.context("taking radios").unwrap_err();
        assert!(DeviceError::is_abort(&err));

        let other = anyhow::Error::new(DeviceError::MagnetsOut);
        assert!(!DeviceError::is_abort(&other));
    }

    #[test]
    fn messages_name_the_device() {
        let err = DeviceError::SoftLimit {
            motor: "lamino_rot".into(),
        };
        assert_eq!(err.to_string(), "Motor 'lamino_rot' cannot move beyond soft limits");
    }
}
