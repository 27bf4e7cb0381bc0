//! Tavern Domain - core types for a live tabletop session.
//!
//! Pure data and rules, no I/O:
//! - dice notation parsing and evaluation (`value_objects::dice`)
//! - roster, message log, scene and initiative entities
//! - the `SessionState` aggregate and its reconciliation rules

extern crate self as tavern_domain;

pub mod aggregates;
pub mod entities;
pub mod error;
pub mod ids;
pub mod value_objects;

pub use aggregates::{ConnectionStatus, SessionState, DEFAULT_MESSAGE_CAPACITY};
pub use entities::{
    CheckResultMetadata, DiceRollMetadata, InitiativeEntry, Message, MessageKind,
    MessageMetadata, Player, PlayerUpdate, RollRequestMetadata, Scene, SceneUpdate,
};
pub use error::DomainError;
pub use ids::MessageId;
pub use value_objects::{
    DiceExpression, DiceParseError, DiceRollResult, DiceTerm, DieRoll, ParsedNotation,
    RejectedTerm, RollMode, MAX_DICE, SUPPORTED_DIE_SIZES,
};
