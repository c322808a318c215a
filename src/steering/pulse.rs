//! Timing of a single PWM cycle

use std::time::Duration;

/// Which key of the pair a cycle uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

/// What one cycle of the loop does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulsePlan {
    /// Release everything for a full cycle
    Idle,

    /// Keep the key down for a full cycle
    Hold(Direction),

    /// Press for `on`, release for `off`
    Pulse {
        direction: Direction,
        on: Duration,
        off: Duration,
    },
}

/// Tunables of the PWM loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmSettings {
    /// Length of one press/release cycle
    pub cycle: Duration,

    /// Magnitudes below this press nothing
    pub center_threshold: f32,

    /// Magnitudes at or above this hold the key continuously
    pub full_lock_threshold: f32,

    /// Floor on the release part of a pulse so the key-up edge is observable
    pub min_off: Duration,
}

impl Default for PwmSettings {
    fn default() -> Self {
        Self {
            cycle: Duration::from_millis(50), // 20 Hz
            center_threshold: 0.04,
            full_lock_threshold: 0.97,
            min_off: Duration::from_millis(8),
        }
    }
}

impl PwmSettings {
    /// Plans the next cycle for a target in [-1, 1]
    pub fn plan(&self, target: f32) -> PulsePlan {
        let magnitude = target.abs();
        if !(magnitude >= self.center_threshold) {
            // also catches NaN
            return PulsePlan::Idle;
        }

        let direction = if target < 0.0 {
            Direction::Left
        } else {
            Direction::Right
        };

        if magnitude >= self.full_lock_threshold {
            return PulsePlan::Hold(direction);
        }

        let mut on = self.cycle.mul_f32(magnitude.min(1.0));
        let mut off = self.cycle.saturating_sub(on);
        if off < self.min_off {
            off = self.min_off;
            on = self.cycle.saturating_sub(off);
        }

        PulsePlan::Pulse { direction, on, off }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn on_off(plan: PulsePlan) -> (Duration, Duration) {
        match plan {
            PulsePlan::Pulse { on, off, .. } => (on, off),
            other => panic!("expected a pulse, got {:?}", other),
        }
    }

    #[test]
    fn centre_zone_is_idle() {
        let settings = PwmSettings::default();
        for target in [0.0, 0.01, -0.03, 0.0399] {
            assert_eq!(settings.plan(target), PulsePlan::Idle);
        }
        assert_eq!(settings.plan(f32::NAN), PulsePlan::Idle);
    }

    #[test]
    fn full_lock_holds_in_the_requested_direction() {
        let settings = PwmSettings::default();
        assert_eq!(settings.plan(-0.99), PulsePlan::Hold(Direction::Left));
        assert_eq!(settings.plan(0.97), PulsePlan::Hold(Direction::Right));
        assert_eq!(settings.plan(1.0), PulsePlan::Hold(Direction::Right));
    }

    #[test]
    fn half_deflection_splits_cycle_evenly() {
        let settings = PwmSettings::default();
        assert_eq!(
            settings.plan(-0.5),
            PulsePlan::Pulse {
                direction: Direction::Left,
                on: Duration::from_millis(25),
                off: Duration::from_millis(25),
            }
        );
    }

    #[test]
    fn on_and_off_always_fill_the_cycle() {
        let settings = PwmSettings::default();
        let mut previous_on = Duration::ZERO;
        let mut magnitude = settings.center_threshold;
        while magnitude < settings.full_lock_threshold {
            let (on, off) = on_off(settings.plan(magnitude));
            assert_eq!(on + off, settings.cycle, "magnitude {}", magnitude);
            assert!(off >= settings.min_off, "magnitude {}", magnitude);
            assert!(on >= previous_on, "on time shrank at {}", magnitude);
            previous_on = on;
            magnitude += 0.01;
        }
    }

    #[test]
    fn off_time_is_floored_near_lock() {
        let settings = PwmSettings::default();
        let (on, off) = on_off(settings.plan(0.95));
        assert_eq!(off, Duration::from_millis(8));
        assert_eq!(on, Duration::from_millis(42));
    }

    #[test]
    fn sign_selects_direction() {
        let settings = PwmSettings::default();
        assert!(matches!(
            settings.plan(0.3),
            PulsePlan::Pulse {
                direction: Direction::Right,
                ..
            }
        ));
        assert!(matches!(
            settings.plan(-0.3),
            PulsePlan::Pulse {
                direction: Direction::Left,
                ..
            }
        ));
    }
}
