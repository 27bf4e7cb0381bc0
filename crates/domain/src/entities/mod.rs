//! Domain entities - roster entries, log entries and the scene

mod message;
mod player;
mod scene;

pub use message::{
    CheckResultMetadata, DiceRollMetadata, Message, MessageKind, MessageMetadata,
    RollRequestMetadata,
};
pub use player::{InitiativeEntry, Player, PlayerUpdate};
pub use scene::{Scene, SceneUpdate};
