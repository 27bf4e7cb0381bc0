//! Inbound event plumbing.
//!
//! - `ConnectionState`: lifecycle state, stored atomically by the manager
//! - `EventDispatcher`: routes decoded frames and lifecycle events to
//!   subscribers

pub mod connection;
pub mod dispatcher;

pub use connection::{swap_connection_state, ConnectionState};
pub use dispatcher::{
    DisconnectReason, DispatchError, DispatchOutcome, EventDispatcher, EventKey, Handler,
    HandlerFault, LifecycleEvent, SessionEvent, SubscriptionId,
};
