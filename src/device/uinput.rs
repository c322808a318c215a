//! `uinput` backed sink: one virtual keyboard and one virtual gamepad
//!
//! Requires write access to `/dev/uinput` (membership in the `input` group or root).

use super::{DeviceError, KeyId, StartupError, VirtualDeviceSink, AXIS_CENTER, AXIS_MAX, AXIS_MIN};
use evdev::{
    uinput::VirtualDevice, AbsInfo, AbsoluteAxisCode, AttributeSet, EventType, InputEvent,
    KeyCode, UinputAbsSetup,
};
use std::io;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};

const KEYBOARD_NAME: &str = "DriveBridge Keyboard";
const GAMEPAD_NAME: &str = "DriveBridge Gamepad";

/// Virtual keyboard plus gamepad, each behind its own lock
pub struct UinputSink {
    keyboard: Mutex<VirtualDevice>,
    gamepad: Mutex<VirtualDevice>,
}

impl UinputSink {
    /// Creates both devices and centres the axis
    ///
    /// `settle` gives the desktop time to enumerate the gamepad before the
    /// first axis event; events sent earlier are silently dropped by some
    /// consumers.
    pub async fn create(settle: Duration) -> Result<Self, StartupError> {
        info!("Setting up virtual devices via uinput");

        let keyboard = create_keyboard().map_err(|source| {
            error!("Failed to create virtual keyboard: {}", source);
            error!("Add your user to the input group: sudo gpasswd -a $USER input");
            StartupError::DeviceCreation {
                device: "keyboard",
                source,
            }
        })?;
        info!("Virtual keyboard created");

        let gamepad = create_gamepad().map_err(|source| {
            error!("Failed to create virtual gamepad: {}", source);
            StartupError::DeviceCreation {
                device: "gamepad",
                source,
            }
        })?;

        tokio::time::sleep(settle).await;

        let sink = Self {
            keyboard: Mutex::new(keyboard),
            gamepad: Mutex::new(gamepad),
        };
        sink.set_axis(AXIS_CENTER)?;
        info!("Virtual gamepad created");

        Ok(sink)
    }
}

impl VirtualDeviceSink for UinputSink {
    fn set_key_state(&self, key: KeyId, pressed: bool) -> Result<(), DeviceError> {
        let event = InputEvent::new(EventType::KEY.0, key_code(key).0, i32::from(pressed));
        let mut keyboard = self
            .keyboard
            .lock()
            .map_err(|e| DeviceError::Poisoned(e.to_string()))?;
        keyboard
            .emit(&[event])
            .map_err(|source| DeviceError::key_emit(key, pressed, source))
    }

    fn set_axis(&self, value: i32) -> Result<(), DeviceError> {
        if !(AXIS_MIN..=AXIS_MAX).contains(&value) {
            return Err(DeviceError::AxisOutOfRange(value));
        }
        let event = InputEvent::new(EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_X.0, value);
        let mut gamepad = self
            .gamepad
            .lock()
            .map_err(|e| DeviceError::Poisoned(e.to_string()))?;
        gamepad
            .emit(&[event])
            .map_err(|source| DeviceError::AxisEmit { value, source })
    }
}

fn key_code(key: KeyId) -> KeyCode {
    match key {
        KeyId::W => KeyCode::KEY_W,
        KeyId::A => KeyCode::KEY_A,
        KeyId::S => KeyCode::KEY_S,
        KeyId::D => KeyCode::KEY_D,
        KeyId::Up => KeyCode::KEY_UP,
        KeyId::Down => KeyCode::KEY_DOWN,
        KeyId::Left => KeyCode::KEY_LEFT,
        KeyId::Right => KeyCode::KEY_RIGHT,
        KeyId::Space => KeyCode::KEY_SPACE,
    }
}

fn create_keyboard() -> io::Result<VirtualDevice> {
    let mut keys = AttributeSet::<KeyCode>::new();
    for key in KeyId::ALL {
        keys.insert(key_code(key));
    }

    VirtualDevice::builder()?
        .name(KEYBOARD_NAME)
        .with_keys(&keys)?
        .build()
}

fn create_gamepad() -> io::Result<VirtualDevice> {
    let axis = UinputAbsSetup::new(
        AbsoluteAxisCode::ABS_X,
        AbsInfo::new(AXIS_CENTER, AXIS_MIN, AXIS_MAX, 0, 0, 0),
    );

    // SDL only registers a joystick that has at least one button
    let mut buttons = AttributeSet::<KeyCode>::new();
    buttons.insert(KeyCode::BTN_SOUTH);
    buttons.insert(KeyCode::BTN_EAST);

    VirtualDevice::builder()?
        .name(GAMEPAD_NAME)
        .with_keys(&buttons)?
        .with_absolute_axis(&axis)?
        .build()
}
