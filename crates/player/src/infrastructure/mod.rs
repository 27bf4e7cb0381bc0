pub mod message_translator;
pub mod messaging;
pub mod storage;
pub mod websocket;

pub use messaging::{ConnectionState, EventDispatcher};
pub use storage::{FileStorageProvider, MemoryStorageProvider};
