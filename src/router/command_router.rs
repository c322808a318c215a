//! Stateful dispatcher for decoded commands
//!
//! Owns everything a session can change on the devices: which steering engine
//! is active, which button keys are held and the last axis value sent. That
//! makes [`CommandRouter::reset`] the single place that can guarantee nothing
//! is left pressed.

use super::{ButtonAction, ButtonState, Command, EngineSlot, SteerMode};
use crate::device::{DeviceError, FocusTarget, KeyId, SharedSink, AXIS_CENTER, AXIS_MAX};
use crate::steering::{PwmSettings, SteeringPwmEngine};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Router tunables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterSettings {
    /// Timing shared by both steering engines
    pub pwm: PwmSettings,

    /// Minimum change of the integer axis value before it is re-sent
    pub axis_debounce: i32,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            pwm: PwmSettings::default(),
            axis_debounce: 200, // ~0.6 % of the axis range
        }
    }
}

/// Whether a command changed anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    Unchanged,
}

pub struct CommandRouter {
    sink: SharedSink,
    focus: Arc<dyn FocusTarget>,
    primary: SteeringPwmEngine,
    alternate: SteeringPwmEngine,
    /// `None` in raw gamepad mode
    active: Option<EngineSlot>,
    /// Button keys currently held down
    pressed: HashSet<KeyId>,
    last_axis: i32,
    axis_debounce: i32,
}

impl CommandRouter {
    pub fn new(sink: SharedSink, focus: Arc<dyn FocusTarget>, settings: RouterSettings) -> Self {
        let primary = SteeringPwmEngine::new(
            "pwm-ad",
            EngineSlot::Primary.keys(),
            settings.pwm,
            sink.clone(),
        );
        let alternate = SteeringPwmEngine::new(
            "pwm-arrows",
            EngineSlot::Alternate.keys(),
            settings.pwm,
            sink.clone(),
        );

        Self {
            sink,
            focus,
            primary,
            alternate,
            active: None,
            pressed: HashSet::new(),
            last_axis: AXIS_CENTER,
            axis_debounce: settings.axis_debounce,
        }
    }

    /// Applies one command
    ///
    /// Only device failures are returned; everything else is clamped or ignored.
    pub async fn dispatch(&mut self, command: Command) -> Result<DispatchOutcome, DeviceError> {
        debug!("Dispatching {:?}", command);
        match command {
            Command::Steer(value) => self.steer_axis(value),
            Command::SteerPwm(value) => Ok(self.steer_pwm(value)),
            Command::SteerMode(mode) => self.switch_mode(mode).await,
            Command::Button { action, state } => self.button(action, state),
        }
    }

    fn steer_axis(&mut self, value: f64) -> Result<DispatchOutcome, DeviceError> {
        let axis = axis_from_value(value);
        if (axis - self.last_axis).abs() <= self.axis_debounce {
            return Ok(DispatchOutcome::Unchanged);
        }

        self.focus.focus();
        self.sink.set_axis(axis)?;
        self.last_axis = axis;
        Ok(DispatchOutcome::Applied)
    }

    fn steer_pwm(&mut self, value: f64) -> DispatchOutcome {
        let Some(engine) = self.active_engine() else {
            debug!("STEER_PWM without an active engine, dropped");
            return DispatchOutcome::Unchanged;
        };

        self.focus.focus();
        engine.set_target(value.clamp(-1.0, 1.0) as f32);
        DispatchOutcome::Applied
    }

    /// Hot-swaps the steering engine
    ///
    /// Not atomic: between stopping the old engine and starting the new one no
    /// engine is active, and a STEER_PWM arriving then is dropped.
    pub async fn switch_mode(&mut self, mode: SteerMode) -> Result<DispatchOutcome, DeviceError> {
        let next = mode.engine_slot();
        if next == self.active {
            debug!("Steering mode {} already active", mode);
            return Ok(DispatchOutcome::Unchanged);
        }

        if let Some(current) = self.active.take() {
            self.engine_mut(current).stop().await?;
        }

        self.active = next;
        if let Some(slot) = next {
            self.engine_mut(slot).start();
        }

        info!("Steering mode switched to: {}", mode);
        Ok(DispatchOutcome::Applied)
    }

    fn button(
        &mut self,
        action: ButtonAction,
        state: ButtonState,
    ) -> Result<DispatchOutcome, DeviceError> {
        let key = action.key();
        let pressed = state == ButtonState::Down;
        if self.pressed.contains(&key) == pressed {
            return Ok(DispatchOutcome::Unchanged);
        }

        self.focus.focus();
        self.sink.set_key_state(key, pressed)?;
        if pressed {
            self.pressed.insert(key);
        } else {
            self.pressed.remove(&key);
        }
        debug!("{} -> {} {:?}", action, key, state);
        Ok(DispatchOutcome::Applied)
    }

    /// Starts the primary engine if nothing is active; returns true if it did
    pub fn activate_default(&mut self) -> bool {
        if self.active.is_some() {
            return false;
        }
        self.active = Some(EngineSlot::Primary);
        self.primary.start();
        true
    }

    /// Returns every device to neutral: engine stopped, axis centred, buttons released
    ///
    /// Each step is attempted even if an earlier one failed; the first error is returned.
    pub async fn reset(&mut self) -> Result<(), DeviceError> {
        let mut first_error = None;

        if let Some(slot) = self.active.take() {
            if let Err(e) = self.engine_mut(slot).stop().await {
                warn!("Failed to stop steering engine: {}", e);
                first_error = Some(e);
            }
        }

        self.last_axis = AXIS_CENTER;
        if let Err(e) = self.sink.set_axis(AXIS_CENTER) {
            warn!("Failed to centre axis: {}", e);
            if first_error.is_none() {
                first_error = Some(e);
            }
        }

        for key in self.pressed.drain() {
            if let Err(e) = self.sink.set_key_state(key, false) {
                warn!("Failed to release {}: {}", key, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        info!("All virtual keys released");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fault signal of the running engine, if there is one
    pub fn active_fault(&self) -> Option<CancellationToken> {
        self.active_engine().and_then(SteeringPwmEngine::fault_signal)
    }

    pub fn active_slot(&self) -> Option<EngineSlot> {
        self.active
    }

    pub fn pressed_keys(&self) -> &HashSet<KeyId> {
        &self.pressed
    }

    pub fn last_axis(&self) -> i32 {
        self.last_axis
    }

    pub fn engine(&self, slot: EngineSlot) -> &SteeringPwmEngine {
        match slot {
            EngineSlot::Primary => &self.primary,
            EngineSlot::Alternate => &self.alternate,
        }
    }

    fn engine_mut(&mut self, slot: EngineSlot) -> &mut SteeringPwmEngine {
        match slot {
            EngineSlot::Primary => &mut self.primary,
            EngineSlot::Alternate => &mut self.alternate,
        }
    }

    fn active_engine(&self) -> Option<&SteeringPwmEngine> {
        self.active.map(|slot| self.engine(slot))
    }
}

/// Maps [-1, 1] onto the gamepad axis, truncating toward zero
pub fn axis_from_value(value: f64) -> i32 {
    (value.clamp(-1.0, 1.0) * f64::from(AXIS_MAX)) as i32
}
