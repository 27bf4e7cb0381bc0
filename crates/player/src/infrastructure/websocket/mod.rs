//! WebSocket connection to the game server
//!
//! - `client`: the connection manager (tokio-tungstenite)
//! - `core`: reconnection backoff and the cancellable task handle
//! - `endpoint`: URL construction from configuration
//! - `shared`: protocol constants

mod client;
mod core;
mod endpoint;
mod error;
pub mod shared;

pub use self::core::{BackoffState, ReconnectPolicy, ScheduledTask};
pub use client::ConnectionManager;
pub use endpoint::{redact, EndpointConfig};
pub use error::{ConnectionError, ErrorKind};
