//! Crate-level error taxonomy.
//!
//! Subsystems carry their own error enums (`TransportError`, `ProviderError`,
//! `SessionError`); this umbrella exists for the few places that cross
//! subsystem boundaries, chiefly startup.

use crate::ai::ProviderError;
use crate::session::SessionError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),
}
