//! Command routing between the client and the virtual devices
//!
//! ```text
//! frame ──► Command::decode ──► CommandRouter::dispatch ──┬──► SteeringPwmEngine::set_target
//!                                                         ├──► sink.set_axis
//!                                                         └──► sink.set_key_state
//! ```

pub mod command;
pub mod command_router;
pub mod error;

pub use command::{ButtonAction, ButtonState, Command, EngineSlot, SteerMode};
pub use command_router::{CommandRouter, DispatchOutcome, RouterSettings};
pub use error::CommandError;
