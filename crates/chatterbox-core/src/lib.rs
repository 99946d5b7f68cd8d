//! # Chatterbox Core
//! Configuration, error taxonomy, message types and the transport trait
//! shared by every Chatterbox crate.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{BotConfig, DispatchConfig};
pub use error::{BotError, Result};
pub use traits::Transport;
pub use types::{ChatEvent, IncomingMessage};
