//! Test doubles for the device layer

use super::{DeviceError, FocusTarget, KeyId, VirtualDeviceSink};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    Key { key: KeyId, pressed: bool },
    Axis(i32),
}

/// Records every emission with the (virtual) time it happened at
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Instant, SinkEvent)>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every following emission fail
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Lets emissions succeed again
    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.timed_events().into_iter().map(|(_, e)| e).collect()
    }

    pub fn timed_events(&self) -> Vec<(Instant, SinkEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn key_events(&self, key: KeyId) -> Vec<(Instant, bool)> {
        self.timed_events()
            .into_iter()
            .filter_map(|(at, event)| match event {
                SinkEvent::Key { key: k, pressed } if k == key => Some((at, pressed)),
                _ => None,
            })
            .collect()
    }

    pub fn axis_events(&self) -> Vec<i32> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Axis(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Replays the key log and returns every key left pressed
    pub fn held_keys(&self) -> Vec<KeyId> {
        let mut held = Vec::new();
        for event in self.events() {
            if let SinkEvent::Key { key, pressed } = event {
                held.retain(|k| *k != key);
                if pressed {
                    held.push(key);
                }
            }
        }
        held
    }

    fn record(&self, event: SinkEvent) -> std::io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("injected sink failure"));
        }
        self.events.lock().unwrap().push((Instant::now(), event));
        Ok(())
    }
}

impl VirtualDeviceSink for RecordingSink {
    fn set_key_state(&self, key: KeyId, pressed: bool) -> Result<(), DeviceError> {
        self.record(SinkEvent::Key { key, pressed })
            .map_err(|source| DeviceError::key_emit(key, pressed, source))
    }

    fn set_axis(&self, value: i32) -> Result<(), DeviceError> {
        self.record(SinkEvent::Axis(value))
            .map_err(|source| DeviceError::AxisEmit { value, source })
    }
}

/// Counts focus requests
#[derive(Debug, Default)]
pub struct CountingFocus {
    calls: AtomicUsize,
}

impl CountingFocus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FocusTarget for CountingFocus {
    fn focus(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}
