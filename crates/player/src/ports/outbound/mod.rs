//! Outbound ports

pub mod game_connection_port;
pub mod storage_port;

pub use game_connection_port::{GameConnectionPort, SendError};
pub use storage_port::StorageProvider;

#[cfg(any(test, feature = "testing"))]
pub use game_connection_port::MockGameConnectionPort;
#[cfg(any(test, feature = "testing"))]
pub use storage_port::MockStorageProvider;
