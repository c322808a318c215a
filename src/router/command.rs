//! Wire format of client commands
//!
//! Every frame is a JSON object with an `action` string. Depending on the
//! action it also carries `value`, `mode` or `state`:
//!
//! ```text
//! {"action": "STEER",       "value": 0.35}          gamepad axis
//! {"action": "STEER_PWM",   "value": 0.35}          PWM keyboard steering
//! {"action": "STEER_MODE",  "mode": "KEYBOARD_AD"}  steering mode switch
//! {"action": "ACCELERATE_W","state": "DOWN"}        button press / release
//! ```

use super::CommandError;
use crate::device::KeyId;
use crate::steering::KeyPair;
use serde::{Deserialize, Deserializer};
use std::fmt::{self, Display};
use tracing::warn;

/// Raw shape of a frame before the action is interpreted
#[derive(Debug, Deserialize)]
struct Envelope {
    action: String,
    /// Absent means centre; an explicit `null` is rejected
    #[serde(default, deserialize_with = "present_number")]
    value: Option<f64>,
    mode: Option<String>,
    state: Option<String>,
}

fn present_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    f64::deserialize(deserializer).map(Some)
}

/// Buttons the client can hold down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonAction {
    AccelerateW,
    AccelerateUp,
    BrakeS,
    BrakeDown,
    SteerA,
    SteerLeft,
    SteerD,
    SteerRight,
    Handbrake,
}

impl ButtonAction {
    pub fn from_wire(action: &str) -> Option<Self> {
        match action {
            "ACCELERATE_W" => Some(ButtonAction::AccelerateW),
            "ACCELERATE_UP" => Some(ButtonAction::AccelerateUp),
            "BRAKE_S" => Some(ButtonAction::BrakeS),
            "BRAKE_DOWN" => Some(ButtonAction::BrakeDown),
            "STEER_A" => Some(ButtonAction::SteerA),
            "STEER_LEFT" => Some(ButtonAction::SteerLeft),
            "STEER_D" => Some(ButtonAction::SteerD),
            "STEER_RIGHT" => Some(ButtonAction::SteerRight),
            "HANDBRAKE" => Some(ButtonAction::Handbrake),
            _ => None,
        }
    }

    /// Key on the virtual keyboard this button drives
    pub fn key(self) -> KeyId {
        match self {
            ButtonAction::AccelerateW => KeyId::W,
            ButtonAction::AccelerateUp => KeyId::Up,
            ButtonAction::BrakeS => KeyId::S,
            ButtonAction::BrakeDown => KeyId::Down,
            ButtonAction::SteerA => KeyId::A,
            ButtonAction::SteerLeft => KeyId::Left,
            ButtonAction::SteerD => KeyId::D,
            ButtonAction::SteerRight => KeyId::Right,
            ButtonAction::Handbrake => KeyId::Space,
        }
    }
}

impl Display for ButtonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ButtonAction::AccelerateW => "ACCELERATE_W",
            ButtonAction::AccelerateUp => "ACCELERATE_UP",
            ButtonAction::BrakeS => "BRAKE_S",
            ButtonAction::BrakeDown => "BRAKE_DOWN",
            ButtonAction::SteerA => "STEER_A",
            ButtonAction::SteerLeft => "STEER_LEFT",
            ButtonAction::SteerD => "STEER_D",
            ButtonAction::SteerRight => "STEER_RIGHT",
            ButtonAction::Handbrake => "HANDBRAKE",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Down,
    Up,
}

impl ButtonState {
    fn from_wire(state: &str) -> Option<Self> {
        match state {
            "DOWN" => Some(ButtonState::Down),
            "UP" => Some(ButtonState::Up),
            _ => None,
        }
    }
}

/// Which steering engine (if any) owns the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineSlot {
    /// A / D
    Primary,
    /// ← / →
    Alternate,
}

impl EngineSlot {
    pub fn keys(self) -> KeyPair {
        match self {
            EngineSlot::Primary => KeyPair::PRIMARY,
            EngineSlot::Alternate => KeyPair::ALTERNATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteerMode {
    KeyboardAd,
    KeyboardArrows,
    Gamepad,
}

impl SteerMode {
    /// Unrecognised names fall back to raw gamepad mode
    pub fn from_wire(mode: &str) -> Self {
        match mode {
            "KEYBOARD_AD" => SteerMode::KeyboardAd,
            "KEYBOARD_ARROWS" => SteerMode::KeyboardArrows,
            "GAMEPAD" => SteerMode::Gamepad,
            other => {
                warn!("Unknown steering mode {:?}, using gamepad", other);
                SteerMode::Gamepad
            }
        }
    }

    pub fn engine_slot(self) -> Option<EngineSlot> {
        match self {
            SteerMode::KeyboardAd => Some(EngineSlot::Primary),
            SteerMode::KeyboardArrows => Some(EngineSlot::Alternate),
            SteerMode::Gamepad => None,
        }
    }
}

impl Display for SteerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SteerMode::KeyboardAd => write!(f, "KEYBOARD_AD"),
            SteerMode::KeyboardArrows => write!(f, "KEYBOARD_ARROWS"),
            SteerMode::Gamepad => write!(f, "GAMEPAD"),
        }
    }
}

/// A validated client command; numeric values are not clamped yet
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Steer(f64),
    SteerPwm(f64),
    SteerMode(SteerMode),
    Button {
        action: ButtonAction,
        state: ButtonState,
    },
}

impl Command {
    /// Decodes one frame (UTF-8 JSON)
    pub fn decode(frame: &[u8]) -> Result<Self, CommandError> {
        let envelope: Envelope = serde_json::from_slice(frame)?;
        Self::from_envelope(envelope)
    }

    fn from_envelope(envelope: Envelope) -> Result<Self, CommandError> {
        match envelope.action.as_str() {
            "STEER" => Ok(Command::Steer(finite_value(&envelope)?)),
            "STEER_PWM" => Ok(Command::SteerPwm(finite_value(&envelope)?)),
            "STEER_MODE" => Ok(Command::SteerMode(
                envelope
                    .mode
                    .as_deref()
                    .map_or(SteerMode::KeyboardAd, SteerMode::from_wire),
            )),
            action => {
                let Some(button) = ButtonAction::from_wire(action) else {
                    return Err(CommandError::UnknownAction(envelope.action));
                };
                match envelope.state.as_deref().and_then(ButtonState::from_wire) {
                    Some(state) => Ok(Command::Button {
                        action: button,
                        state,
                    }),
                    None => Err(CommandError::UnknownState {
                        action: envelope.action,
                        state: envelope.state,
                    }),
                }
            }
        }
    }
}

/// Missing value counts as centre
fn finite_value(envelope: &Envelope) -> Result<f64, CommandError> {
    let value = envelope.value.unwrap_or(0.0);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CommandError::NonFinite {
            action: envelope.action.clone(),
            value,
        })
    }
}
