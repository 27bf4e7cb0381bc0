//! Outbound message types (client → server)

use serde_json::{json, Map, Value};

use crate::envelope::Envelope;

/// Messages from the client to the game server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    ChatMessage {
        content: String,
        is_ooc: bool,
        /// Correlates the server's broadcast with the local echo
        client_message_id: Option<String>,
    },
    PlayerAction {
        action: String,
        client_message_id: Option<String>,
    },
    DiceRoll {
        notation: String,
        purpose: Option<String>,
        advantage: bool,
        disadvantage: bool,
    },
    RequestGameState,
    RequestMessageHistory {
        limit: Option<u32>,
    },
    RequestSceneInfo,
    InitiativeRoll {
        roll: u32,
        modifier: i32,
        total: i32,
    },
    NextTurn,
    /// Heartbeat
    Ping,
}

impl ClientCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatMessage { .. } => "chat_message",
            Self::PlayerAction { .. } => "player_action",
            Self::DiceRoll { .. } => "dice_roll",
            Self::RequestGameState => "request_game_state",
            Self::RequestMessageHistory { .. } => "request_message_history",
            Self::RequestSceneInfo => "request_scene_info",
            Self::InitiativeRoll { .. } => "initiative_roll",
            Self::NextTurn => "next_turn",
            Self::Ping => "ping",
        }
    }

    /// Wrap the command in a timestamped envelope
    pub fn into_envelope(self) -> Envelope {
        let kind = self.kind();
        let data = match self {
            Self::ChatMessage {
                content,
                is_ooc,
                client_message_id,
            } => {
                let mut data = json!({ "content": content, "is_ooc": is_ooc });
                insert_opt(&mut data, "client_message_id", client_message_id);
                data
            }
            Self::PlayerAction {
                action,
                client_message_id,
            } => {
                let mut data = json!({ "action": action });
                insert_opt(&mut data, "client_message_id", client_message_id);
                data
            }
            Self::DiceRoll {
                notation,
                purpose,
                advantage,
                disadvantage,
            } => {
                let mut data = json!({
                    "notation": notation,
                    "advantage": advantage,
                    "disadvantage": disadvantage,
                });
                insert_opt(&mut data, "purpose", purpose);
                data
            }
            Self::RequestMessageHistory { limit } => {
                let mut data = json!({});
                insert_opt(&mut data, "limit", limit);
                data
            }
            Self::InitiativeRoll {
                roll,
                modifier,
                total,
            } => json!({ "roll": roll, "modifier": modifier, "total": total }),
            Self::RequestGameState | Self::RequestSceneInfo | Self::NextTurn | Self::Ping => {
                Value::Object(Map::new())
            }
        };
        Envelope::new(kind, data)
    }
}

fn insert_opt<T: Into<Value>>(data: &mut Value, key: &str, value: Option<T>) {
    if let (Some(map), Some(value)) = (data.as_object_mut(), value) {
        map.insert(key.to_string(), value.into());
    }
}
