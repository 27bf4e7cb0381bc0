//! Tavern Protocol - wire types for the game session socket
//!
//! Every frame in either direction is an [`Envelope`]:
//! `{ "type": string, "data": object, "timestamp": ISO-8601 }`.
//!
//! - [`ServerEvent`] - typed inbound payloads, decoded from an envelope
//! - [`ClientCommand`] - typed outbound commands, encoded into an envelope
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - serde, serde_json, chrono and thiserror
//! 2. **No business logic** - pure data types and serialization
//! 3. **Lenient inbound** - payload fields default when absent, ids may be
//!    numbers or strings, known aliases are accepted

pub mod commands;
pub mod envelope;
pub mod error;
pub mod messages;

pub use commands::ClientCommand;
pub use envelope::Envelope;
pub use error::ProtocolError;
pub use messages::{
    ActionPayload, AiResponsePayload, CharacterInfo, CharacterUpdatePayload, ChatPayload,
    CheckResultPayload, DiceRollPayload, DisconnectedPayload, ErrorPayload, GameStatePayload,
    GameUpdatedPayload, HistoryPayload, InitiativeItem, InitiativePayload, PresencePayload,
    RollRequestPayload, RosterEntry, SceneFields, SceneUpdatePayload, SceneValue, ServerEvent,
    ServerEventKind, SystemPayload, TurnInfo, TurnValue,
};
