//! PWM steering engine bound to one key pair
//!
//! The engine is built once per key pair at startup and toggled with
//! [`SteeringPwmEngine::start`] / [`SteeringPwmEngine::stop`] as often as the
//! client switches steering modes.
//!
//! # Task layout
//!
//! ```text
//! router ──set_target──► SteeringTarget ◄──get── pulse loop task ──► sink
//!   │                                               ▲
//!   └──start/stop──► EngineRun { cancel, fault, task }
//! ```
//!
//! The held key lives in a [`Pulser`] that is moved into the loop task and
//! handed back when the task ends, so only one owner ever touches it.

use super::{KeyPair, PulsePlan, PwmSettings, SteeringTarget};
use crate::device::{DeviceError, KeyId, SharedSink};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Press/release bookkeeping for one key pair
struct Pulser {
    name: &'static str,
    keys: KeyPair,
    sink: SharedSink,
    held: Option<KeyId>,
}

impl Pulser {
    fn new(name: &'static str, keys: KeyPair, sink: SharedSink) -> Self {
        Self {
            name,
            keys,
            sink,
            held: None,
        }
    }

    /// Presses `key`, releasing the other key of the pair first
    fn press(&mut self, key: KeyId) -> Result<(), DeviceError> {
        if self.held == Some(key) {
            return Ok(());
        }
        self.release_current()?;
        self.sink.set_key_state(key, true)?;
        self.held = Some(key);
        Ok(())
    }

    fn release_current(&mut self) -> Result<(), DeviceError> {
        if let Some(key) = self.held {
            self.sink.set_key_state(key, false)?;
            self.held = None;
        }
        Ok(())
    }

    async fn run(
        &mut self,
        settings: &PwmSettings,
        target: &SteeringTarget,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceError> {
        while !cancel.is_cancelled() {
            match settings.plan(target.get()) {
                PulsePlan::Idle => {
                    self.release_current()?;
                    if sleep_unless_cancelled(settings.cycle, cancel).await {
                        break;
                    }
                }
                PulsePlan::Hold(direction) => {
                    self.press(self.keys.key_for(direction))?;
                    if sleep_unless_cancelled(settings.cycle, cancel).await {
                        break;
                    }
                }
                PulsePlan::Pulse { direction, on, off } => {
                    self.press(self.keys.key_for(direction))?;
                    if sleep_unless_cancelled(on, cancel).await {
                        break;
                    }
                    self.release_current()?;
                    if sleep_unless_cancelled(off, cancel).await {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for Pulser {
    fn drop(&mut self) {
        if let Err(e) = self.release_current() {
            warn!("{}: failed to release key on drop: {}", self.name, e);
        }
    }
}

/// Returns true if `cancel` fired before `duration` elapsed
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

async fn pulse_loop(
    mut pulser: Pulser,
    settings: PwmSettings,
    target: SteeringTarget,
    cancel: CancellationToken,
    fault: CancellationToken,
) -> (Pulser, Result<(), DeviceError>) {
    let result = pulser.run(&settings, &target, &cancel).await;
    if let Err(e) = &result {
        error!("{}: steering loop failed: {}", pulser.name, e);
        fault.cancel();
    }
    (pulser, result)
}

/// Handles of one running loop
struct EngineRun {
    cancel: CancellationToken,
    fault: CancellationToken,
    task: JoinHandle<(Pulser, Result<(), DeviceError>)>,
}

/// Simulated analog steering over one key pair
pub struct SteeringPwmEngine {
    name: &'static str,
    keys: KeyPair,
    settings: PwmSettings,
    target: SteeringTarget,
    sink: SharedSink,
    run: Option<EngineRun>,
    activations: u64,
}

impl SteeringPwmEngine {
    pub fn new(name: &'static str, keys: KeyPair, settings: PwmSettings, sink: SharedSink) -> Self {
        debug!("Creating steering engine {} ({} / {})", name, keys.left, keys.right);
        Self {
            name,
            keys,
            settings,
            target: SteeringTarget::new(),
            sink,
            run: None,
            activations: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// How many times the loop has been started
    pub fn activations(&self) -> u64 {
        self.activations
    }

    /// Updates the value the loop steers towards; picked up at the next cycle
    pub fn set_target(&self, value: f32) {
        self.target.set(value);
    }

    pub fn target(&self) -> f32 {
        self.target.get()
    }

    /// Token that fires if the running loop died on a device error
    pub fn fault_signal(&self) -> Option<CancellationToken> {
        self.run.as_ref().map(|run| run.fault.clone())
    }

    /// Spawns the loop; a second call while running does nothing
    pub fn start(&mut self) {
        if self.run.is_some() {
            debug!("{}: already running", self.name);
            return;
        }

        let cancel = CancellationToken::new();
        let fault = CancellationToken::new();
        let pulser = Pulser::new(self.name, self.keys, self.sink.clone());
        let task = tokio::spawn(pulse_loop(
            pulser,
            self.settings,
            self.target.clone(),
            cancel.clone(),
            fault.clone(),
        ));

        self.run = Some(EngineRun {
            cancel,
            fault,
            task,
        });
        self.activations += 1;
        info!("{}: PWM steering loop started", self.name);
    }

    /// Cancels the loop, waits for it to end and releases whatever it held
    ///
    /// Returns the device error that killed the loop, if any, otherwise the
    /// result of the final release. Calling it on a stopped engine is a no-op.
    pub async fn stop(&mut self) -> Result<(), DeviceError> {
        let Some(run) = self.run.take() else {
            return Ok(());
        };

        run.cancel.cancel();
        let outcome = match run.task.await {
            Ok((mut pulser, loop_result)) => {
                let released = pulser.release_current();
                loop_result.and(released)
            }
            Err(e) => {
                error!("{}: steering loop task aborted: {}", self.name, e);
                // held key is unknown, release the whole pair
                let left = self.sink.set_key_state(self.keys.left, false);
                let right = self.sink.set_key_state(self.keys.right, false);
                left.and(right)
                    .and(Err(DeviceError::LoopAborted(e.to_string())))
            }
        };

        self.target.set(0.0);
        info!("{}: PWM steering loop stopped", self.name);
        outcome
    }
}

impl Drop for SteeringPwmEngine {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            run.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::recording::{RecordingSink, SinkEvent};
    use std::sync::Arc;
    use tokio::time::{sleep, Instant};

    fn engine(sink: &Arc<RecordingSink>) -> SteeringPwmEngine {
        SteeringPwmEngine::new(
            "test",
            KeyPair::PRIMARY,
            PwmSettings::default(),
            sink.clone(),
        )
    }

    fn millis_since(start: Instant, at: Instant) -> u128 {
        at.duration_since(start).as_millis()
    }

    #[tokio::test(start_paused = true)]
    async fn centred_target_never_presses() {
        let sink = RecordingSink::new();
        let mut engine = engine(&sink);

        engine.start();
        sleep(Duration::from_millis(300)).await;
        engine.stop().await.unwrap();

        assert!(sink.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn half_left_pulses_evenly() {
        let sink = RecordingSink::new();
        let mut engine = engine(&sink);
        engine.set_target(-0.5);

        let start = Instant::now();
        engine.start();
        sleep(Duration::from_millis(140)).await;
        engine.stop().await.unwrap();

        let left = sink.key_events(KeyId::A);
        assert!(sink.key_events(KeyId::D).is_empty());

        // press at 0, 50, 100; release at 25, 75, 125
        let expected = [
            (0, true),
            (25, false),
            (50, true),
            (75, false),
            (100, true),
            (125, false),
        ];
        assert!(left.len() >= expected.len(), "events: {:?}", left);
        for ((at, pressed), (ms, want)) in left.iter().zip(expected) {
            assert_eq!(*pressed, want);
            let got = millis_since(start, *at);
            assert!(got.abs_diff(ms) <= 5, "expected ~{}ms, got {}ms", ms, got);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_lock_holds_without_release() {
        let sink = RecordingSink::new();
        let mut engine = engine(&sink);
        engine.set_target(-0.99);

        engine.start();
        sleep(Duration::from_millis(400)).await;
        assert_eq!(
            sink.events(),
            vec![SinkEvent::Key {
                key: KeyId::A,
                pressed: true
            }]
        );

        engine.stop().await.unwrap();
        assert_eq!(
            sink.events().last(),
            Some(&SinkEvent::Key {
                key: KeyId::A,
                pressed: false
            })
        );
        assert!(sink.held_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reversing_releases_the_other_key_first() {
        let sink = RecordingSink::new();
        let mut engine = engine(&sink);
        engine.set_target(1.0);

        engine.start();
        sleep(Duration::from_millis(60)).await;
        engine.set_target(-1.0);
        sleep(Duration::from_millis(60)).await;
        engine.stop().await.unwrap();

        assert_eq!(
            sink.events(),
            vec![
                SinkEvent::Key {
                    key: KeyId::D,
                    pressed: true
                },
                SinkEvent::Key {
                    key: KeyId::D,
                    pressed: false
                },
                SinkEvent::Key {
                    key: KeyId::A,
                    pressed: true
                },
                SinkEvent::Key {
                    key: KeyId::A,
                    pressed: false
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_runs_a_single_loop() {
        let sink = RecordingSink::new();
        let mut engine = engine(&sink);
        engine.set_target(0.5);

        engine.start();
        engine.start();
        assert_eq!(engine.activations(), 1);
        sleep(Duration::from_millis(230)).await;
        engine.stop().await.unwrap();

        let right = sink.key_events(KeyId::D);
        assert!(!right.is_empty());
        for (i, (_, pressed)) in right.iter().enumerate() {
            assert_eq!(*pressed, i % 2 == 0, "presses and releases must alternate");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_mid_press_releases_and_is_idempotent() {
        let sink = RecordingSink::new();
        let mut engine = engine(&sink);
        engine.set_target(0.8);

        engine.start();
        sleep(Duration::from_millis(10)).await;
        engine.stop().await.unwrap();
        assert!(!engine.is_running());
        assert!(sink.held_keys().is_empty());

        let before = sink.events().len();
        engine.stop().await.unwrap();
        assert_eq!(sink.events().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_resets_target_and_engine_restarts() {
        let sink = RecordingSink::new();
        let mut engine = engine(&sink);
        engine.set_target(1.0);

        engine.start();
        sleep(Duration::from_millis(20)).await;
        engine.stop().await.unwrap();
        assert_eq!(engine.target(), 0.0);

        sink.clear();
        engine.start();
        sleep(Duration::from_millis(100)).await;
        assert!(sink.events().is_empty(), "restart must not resume a stale target");

        engine.set_target(1.0);
        sleep(Duration::from_millis(60)).await;
        engine.stop().await.unwrap();
        assert_eq!(engine.activations(), 2);
        assert_eq!(sink.key_events(KeyId::D).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sink_failure_fires_fault_and_surfaces_on_stop() {
        let sink = RecordingSink::new();
        let mut engine = engine(&sink);
        engine.set_target(0.5);
        sink.fail();

        engine.start();
        let fault = engine.fault_signal().unwrap();
        tokio::time::timeout(Duration::from_millis(100), fault.cancelled())
            .await
            .expect("fault signal should fire");

        assert!(matches!(
            engine.stop().await,
            Err(DeviceError::KeyEmit { key: KeyId::D, .. })
        ));
        assert!(!engine.is_running());
    }
}
