//! Aggregate roots - domain objects that own their related data
//!
//! Aggregates keep their fields private and expose behaviour through
//! methods, so invariants hold no matter which event drove the mutation.

pub mod session;

pub use session::{ConnectionStatus, SessionState, DEFAULT_MESSAGE_CAPACITY};
