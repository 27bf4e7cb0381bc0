//! Application services

pub mod dice_roller;
pub mod session_service;
pub mod session_store;

pub use session_service::SessionService;
pub use session_store::SessionStore;
