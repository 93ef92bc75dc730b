//! Wacrab — resilient WhatsApp chatbot core.
//!
//! A message-driven assistant built around three load-bearing pieces:
//!
//! - **Connection supervision** ([`bot`]): a state machine over an opaque
//!   transport with classified disconnects, bounded exponential backoff,
//!   serialized soft-restart/shutdown, and a terminal standby state for
//!   invalidated credentials.
//! - **Health feedback** ([`cognition`]): rolling metrics reduced to a
//!   normalized state vector, a PID controller over its distance from ideal,
//!   and a Bayesian disconnect diagnosis on the side.
//! - **Layered dispatch** ([`dispatch`]): every inbound message runs a fixed
//!   stage chain — moderation, session continuation, command routing, AI
//!   fallback — where the first claiming stage wins.
//!
//! The WhatsApp protocol client itself lives outside this crate; see
//! [`transport`] for the seam.

pub mod ai;
pub mod bot;
pub mod cognition;
pub mod commands;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod session;
pub mod social;
pub mod state;
pub mod transport;
pub mod utils;
pub mod vitals;

pub use bot::{Bot, ControlHandle, OperationalState};
pub use config::BotConfig;
pub use error::BotError;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
