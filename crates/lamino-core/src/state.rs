//! Device state enums.
//!
//! Vendor layers report state in their own vocabulary (Micos `IsReady`
//! replies, Bliss state strings, machine-info mode integers). Drivers map
//! those onto the enums below so sequencers can reason about every device
//! the same way.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Derived motor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MotorState {
    /// Idle and ready to accept a move
    Standby,
    /// Motion in progress (including homing)
    Moving,
    /// Magnet pusher engaged
    In,
    /// Magnet pusher retracted
    Out,
    /// A hardware limit switch is active
    HardLimit,
    /// Controller reported a fault
    Error,
    /// Axis powered off
    Off,
    /// Axis disabled in the controller configuration
    Disabled,
    /// State string was not recognised
    Unknown,
}

impl MotorState {
    /// States from which a new positional move may be started.
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            MotorState::Standby | MotorState::HardLimit | MotorState::In | MotorState::Out
        )
    }
}

impl fmt::Display for MotorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MotorState::Standby => "standby",
            MotorState::Moving => "moving",
            MotorState::In => "in",
            MotorState::Out => "out",
            MotorState::HardLimit => "hard-limit",
            MotorState::Error => "error",
            MotorState::Off => "off",
            MotorState::Disabled => "disabled",
            MotorState::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Shutter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutterState {
    /// Beam passes
    Open,
    /// Beam blocked
    Closed,
    /// Transition in progress
    Moving,
    /// Fault or interlock
    Error,
    /// Not recognised
    Unknown,
}

impl fmt::Display for ShutterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ShutterState::Open => "open",
            ShutterState::Closed => "closed",
            ShutterState::Moving => "moving",
            ShutterState::Error => "error",
            ShutterState::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Storage ring operation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageRingState {
    /// User mode, beam delivered to the beamlines
    UserOperation,
    /// Machine development shifts
    MachineDevelopment,
    /// No beam
    Shutdown,
    /// Safety system tests
    SafetyTest,
    /// Insertion device tests
    InsertionDeviceTest,
    /// Mode code without a known meaning
    Unknown,
}

impl StorageRingState {
    /// Map the machine-information `SR_Mode` integer.
    pub fn from_mode(mode: i64) -> Self {
        match mode {
            1 => StorageRingState::UserOperation,
            2 => StorageRingState::MachineDevelopment,
            3 => StorageRingState::Shutdown,
            4 => StorageRingState::SafetyTest,
            5 => StorageRingState::InsertionDeviceTest,
            _ => StorageRingState::Unknown,
        }
    }
}

impl fmt::Display for StorageRingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StorageRingState::UserOperation => "UserOperation",
            StorageRingState::MachineDevelopment => "MachineDevelopment",
            StorageRingState::Shutdown => "Shutdown",
            StorageRingState::SafetyTest => "SafetyTest",
            StorageRingState::InsertionDeviceTest => "InsertionDeviceTest",
            StorageRingState::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Motor geometry, which fixes the unit of every motor quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotorKind {
    /// Positions in mm, velocities in mm/s, accelerations in mm/s²
    Linear,
    /// Positions in deg, velocities in deg/s, accelerations in deg/s²
    Rotation,
}

impl MotorKind {
    /// Unit of position values.
    pub fn position_unit(self) -> &'static str {
        match self {
            MotorKind::Linear => "mm",
            MotorKind::Rotation => "deg",
        }
    }

    /// Unit of velocity values.
    pub fn velocity_unit(self) -> &'static str {
        match self {
            MotorKind::Linear => "mm/s",
            MotorKind::Rotation => "deg/s",
        }
    }

    /// Unit of acceleration values.
    pub fn acceleration_unit(self) -> &'static str {
        match self {
            MotorKind::Linear => "mm/s^2",
            MotorKind::Rotation => "deg/s^2",
        }
    }
}

/// Camera trigger source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerSource {
    /// Free running at the configured frame rate
    Auto,
    /// One frame per `trigger()` call
    Software,
    /// Hardware trigger input
    External,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TriggerSource::Auto => "AUTO",
            TriggerSource::Software => "SOFTWARE",
            TriggerSource::External => "EXTERNAL",
        };
        write!(f, "{}", label)
    }
}
