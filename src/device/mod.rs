//! Virtual input devices the bridge writes into.
//!
//! Everything downstream of the command router ends up here: key state changes
//! on a virtual keyboard and the X axis of a virtual gamepad. The sink is kept
//! behind the [`VirtualDeviceSink`] trait so the steering engine and router can
//! be driven against a recording double in tests.
//!
//! # Architecture
//!
//! ```text
//! CommandRouter ──┬──► set_axis ───────────► virtual gamepad (ABS_X)
//!                 └──► set_key_state ──┐
//! PWM loop ────────────────────────────┴──► virtual keyboard
//! ```

pub mod error;
pub mod focus;
#[cfg(test)]
pub mod recording;
#[cfg(target_os = "linux")]
pub mod uinput;

pub use error::{DeviceError, StartupError};
pub use focus::{FocusTarget, WindowFocus};

use std::fmt::{self, Display};
use std::sync::Arc;

/// Lowest value the gamepad axis accepts
pub const AXIS_MIN: i32 = -32768;

/// Highest value the gamepad axis accepts
pub const AXIS_MAX: i32 = 32767;

/// Axis value for a centred wheel
pub const AXIS_CENTER: i32 = 0;

/// Keys exposed by the virtual keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyId {
    W,
    A,
    S,
    D,
    Up,
    Down,
    Left,
    Right,
    Space,
}

impl KeyId {
    /// Every key the virtual keyboard must be able to emit
    pub const ALL: [KeyId; 9] = [
        KeyId::W,
        KeyId::A,
        KeyId::S,
        KeyId::D,
        KeyId::Up,
        KeyId::Down,
        KeyId::Left,
        KeyId::Right,
        KeyId::Space,
    ];
}

impl Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::W => write!(f, "W"),
            KeyId::A => write!(f, "A"),
            KeyId::S => write!(f, "S"),
            KeyId::D => write!(f, "D"),
            KeyId::Up => write!(f, "Up"),
            KeyId::Down => write!(f, "Down"),
            KeyId::Left => write!(f, "Left"),
            KeyId::Right => write!(f, "Right"),
            KeyId::Space => write!(f, "Space"),
        }
    }
}

/// Output side of the bridge
///
/// Both calls are synchronous and side-effect only. Implementations are
/// shared between the connection task and the PWM loop task, so writes must
/// be mutually exclusive inside the implementation.
pub trait VirtualDeviceSink: Send + Sync + 'static {
    /// Presses or releases a single key
    fn set_key_state(&self, key: KeyId, pressed: bool) -> Result<(), DeviceError>;

    /// Moves the gamepad axis to `value` (within [`AXIS_MIN`]..=[`AXIS_MAX`])
    fn set_axis(&self, value: i32) -> Result<(), DeviceError>;
}

/// Sink handle shared by the router and every steering engine
pub type SharedSink = Arc<dyn VirtualDeviceSink>;
