//! Client session lifecycle with statum state machine
//!
//! A session owns the router for as long as one client is connected. Holding
//! the router's lock guard for the whole session serializes clients: a second
//! connection waits until the first one has been cleaned up.
//!
//! # State Machine
//!
//! ```text
//! Connected ──begin──► Serving ──close──► Closed
//!   (lock held)     (frames flow)    (devices neutral)
//! ```
//!
//! `begin` seeds the default steering engine so a client that never sends
//! STEER_MODE still gets PWM steering. `close` runs [`CommandRouter::reset`],
//! whatever ended the session.

use crate::device::DeviceError;
use crate::router::{Command, CommandRouter, DispatchOutcome};
use chrono::{DateTime, Local};
use statum::{machine, state};
use std::fmt::{self, Display};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// States of one client session
#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Connected, // router locked, nothing started yet
    Serving,   // default engine seeded, processing frames
    Closed,    // all input released
}

/// Why a session ended
#[derive(Debug)]
pub enum SessionEnd {
    /// Client sent Close or the stream ended
    ClientClosed,
    /// Transport error on the connection
    Transport(String),
    /// A sink write from the router failed
    Device(DeviceError),
    /// The steering loop died on a sink write
    EngineFault,
    /// Process is shutting down
    Shutdown,
}

impl Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::ClientClosed => write!(f, "client closed"),
            SessionEnd::Transport(e) => write!(f, "transport error: {}", e),
            SessionEnd::Device(e) => write!(f, "device error: {}", e),
            SessionEnd::EngineFault => write!(f, "steering engine fault"),
            SessionEnd::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Counters kept for the close summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub applied: u64,
    pub unchanged: u64,
    pub decode_failures: u64,
    pub unknown_commands: u64,
}

#[machine]
pub struct Session<S: SessionState> {
    peer: String,
    router: OwnedMutexGuard<CommandRouter>,
    opened_at: DateTime<Local>,
    stats: SessionStats,
}

impl<S: SessionState> Session<S> {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }
}

impl Session<Connected> {
    pub fn open(peer: String, router: OwnedMutexGuard<CommandRouter>) -> Self {
        info!("Client connected from {}", peer);
        Self::new(peer, router, Local::now(), SessionStats::default())
    }

    /// Seeds the default steering engine and starts serving
    pub fn begin(mut self) -> Session<Serving> {
        if self.router.activate_default() {
            debug!("Default A/D steering engine activated for {}", self.peer);
        }
        self.transition()
    }
}

impl Session<Serving> {
    /// Decodes and applies one frame
    ///
    /// Malformed and unknown commands are logged and skipped. Only device
    /// failures are returned, and they end the session.
    pub async fn handle_frame(&mut self, frame: &[u8]) -> Result<(), DeviceError> {
        self.stats.frames += 1;

        let command = match Command::decode(frame) {
            Ok(command) => command,
            Err(e) if e.is_decode() => {
                self.stats.decode_failures += 1;
                warn!("Invalid command from {}: {}", self.peer, e);
                return Ok(());
            }
            Err(e) => {
                self.stats.unknown_commands += 1;
                warn!("{} from {}", e, self.peer);
                return Ok(());
            }
        };

        match self.router.dispatch(command).await? {
            DispatchOutcome::Applied => self.stats.applied += 1,
            DispatchOutcome::Unchanged => self.stats.unchanged += 1,
        }
        Ok(())
    }

    /// Fault signal of the engine active right now
    pub fn engine_fault(&self) -> Option<CancellationToken> {
        self.router.active_fault()
    }

    /// Releases all input and ends the session
    ///
    /// Returns the closed session and the outcome of the cleanup.
    pub async fn close(mut self, reason: &SessionEnd) -> (Session<Closed>, Result<(), DeviceError>) {
        match reason {
            SessionEnd::ClientClosed | SessionEnd::Shutdown => {
                info!("Client {} disconnected ({})", self.peer, reason)
            }
            _ => error!("Session with {} ended: {}", self.peer, reason),
        }

        let cleanup = self.router.reset().await;
        if let Err(e) = &cleanup {
            error!("Cleanup for {} incomplete: {}", self.peer, e);
        }

        let duration = Local::now().signed_duration_since(self.opened_at);
        info!(
            "Session {} lasted {}s: {} frames, {} applied, {} unchanged, {} invalid, {} unknown",
            self.peer,
            duration.num_seconds(),
            self.stats.frames,
            self.stats.applied,
            self.stats.unchanged,
            self.stats.decode_failures,
            self.stats.unknown_commands,
        );

        (self.transition(), cleanup)
    }
}

impl Session<Closed> {}
