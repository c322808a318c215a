//! Error types for the virtual device layer

use super::KeyId;
use thiserror::Error;

/// Failures while emitting into an already created device
///
/// Any of these makes the running session meaningless, so the session treats
/// them as fatal after releasing whatever it can.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Writing a key event failed
    #[error("Failed to emit {key} ({state}): {source}")]
    KeyEmit {
        key: KeyId,
        state: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Writing an axis event failed
    #[error("Failed to emit axis value {value}: {source}")]
    AxisEmit {
        value: i32,
        #[source]
        source: std::io::Error,
    },

    /// Axis value outside the range the gamepad was created with
    #[error("Axis value out of range: {0}")]
    AxisOutOfRange(i32),

    /// Another writer panicked while holding the device
    #[error("Device lock poisoned: {0}")]
    Poisoned(String),

    /// The steering loop task ended without handing back its state
    #[error("Steering loop aborted: {0}")]
    LoopAborted(String),
}

impl DeviceError {
    pub(crate) fn key_emit(key: KeyId, pressed: bool, source: std::io::Error) -> Self {
        DeviceError::KeyEmit {
            key,
            state: if pressed { "down" } else { "up" },
            source,
        }
    }
}

/// Failures that prevent the bridge from accepting any session
#[derive(Debug, Error)]
pub enum StartupError {
    /// The OS refused to create a virtual device (usually missing access to /dev/uinput)
    #[error("Failed to create virtual {device}: {source}")]
    DeviceCreation {
        device: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The freshly created device rejected its initial state
    #[error("Virtual device rejected initial state: {0}")]
    InitialState(#[from] DeviceError),

    /// No virtual device backend exists for this platform
    #[error("Virtual input devices are only supported on Linux")]
    Unsupported,
}
