//! Proportional steering over two binary keys
//!
//! A game that only understands "left held" / "right held" integrates rapid key
//! taps into gradual wheel movement. The engine exploits that by holding the key
//! for a share of every cycle proportional to the requested magnitude.
//!
//! # Duty cycle
//!
//! ```text
//!  |target| < center      ──►  no key
//!  center ≤ |target| < lock ──►  ▇▇▇▇▁▁▁▁ ▇▇▇▇▁▁▁▁   on = C·|target|, off = C − on
//!  |target| ≥ lock          ──►  ▇▇▇▇▇▇▇▇ ▇▇▇▇▇▇▇▇   held
//! ```
//!
//! [`pulse`] holds the timing math, [`engine`] the running loop.

pub mod engine;
pub mod pulse;

pub use engine::SteeringPwmEngine;
pub use pulse::{Direction, PulsePlan, PwmSettings};

use crate::device::KeyId;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// The two keys one engine steers with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPair {
    pub left: KeyId,
    pub right: KeyId,
}

impl KeyPair {
    /// A / D
    pub const PRIMARY: KeyPair = KeyPair {
        left: KeyId::A,
        right: KeyId::D,
    };

    /// ← / →
    pub const ALTERNATE: KeyPair = KeyPair {
        left: KeyId::Left,
        right: KeyId::Right,
    };

    pub fn key_for(&self, direction: Direction) -> KeyId {
        match direction {
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }
}

/// Latest requested steering value, written by the router and read by the loop
///
/// Only the newest value matters, so a bit-cast `f32` in an atomic is enough.
#[derive(Debug, Clone, Default)]
pub struct SteeringTarget(Arc<AtomicU32>);

impl SteeringTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` clamped to [-1, 1]; non-finite input centres
    pub fn set(&self, value: f32) {
        let value = if value.is_finite() {
            value.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}
