//! Tavern Player - real-time session client.
//!
//! Layers:
//! - `ports` - outbound traits (connection, credential storage)
//! - `application` - credential resolution, session store and commands
//! - `infrastructure` - websocket connection manager, event dispatcher,
//!   storage adapters and wire → domain translation
//! - `runner` - terminal front end used by the `tavern-player` binary

pub mod application;
pub mod config;
pub mod infrastructure;
pub mod ports;
pub mod runner;

pub use application::services::{SessionService, SessionStore};
pub use config::ClientConfig;
pub use infrastructure::messaging::{ConnectionState, EventDispatcher, LifecycleEvent, SessionEvent};
pub use infrastructure::websocket::{ConnectionError, ConnectionManager};
