//! Inbound message types (server → client)
//!
//! [`ServerEvent::decode`] turns an [`Envelope`] into a typed event. Payloads
//! are lenient: every field defaults when absent, ids are accepted as numbers
//! or strings, and the field names used by older server builds are accepted
//! as aliases.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::ProtocolError;

// =============================================================================
// Event kinds
// =============================================================================

/// Inbound `type` vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
    Connected,
    System,
    PlayerJoined,
    PlayerLeft,
    ChatMessage,
    PlayerAction,
    DiceRoll,
    SceneUpdate,
    GameStateUpdate,
    GameUpdated,
    InitiativeUpdate,
    CharacterUpdate,
    AiResponse,
    MessageHistory,
    RollRequest,
    DiceCheckResult,
    Error,
    Disconnected,
    Pong,
}

impl ServerEventKind {
    pub const ALL: [ServerEventKind; 19] = [
        Self::Connected,
        Self::System,
        Self::PlayerJoined,
        Self::PlayerLeft,
        Self::ChatMessage,
        Self::PlayerAction,
        Self::DiceRoll,
        Self::SceneUpdate,
        Self::GameStateUpdate,
        Self::GameUpdated,
        Self::InitiativeUpdate,
        Self::CharacterUpdate,
        Self::AiResponse,
        Self::MessageHistory,
        Self::RollRequest,
        Self::DiceCheckResult,
        Self::Error,
        Self::Disconnected,
        Self::Pong,
    ];

    /// Map a wire `type` to a kind. `game_state` and `dice_roll_request` are
    /// accepted as aliases of `connected` and `roll_request`.
    pub fn from_wire(kind: &str) -> Option<Self> {
        let kind = match kind {
            "game_state" => Self::Connected,
            "dice_roll_request" => Self::RollRequest,
            other => *Self::ALL.iter().find(|k| k.as_str() == other)?,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::System => "system",
            Self::PlayerJoined => "player_joined",
            Self::PlayerLeft => "player_left",
            Self::ChatMessage => "chat_message",
            Self::PlayerAction => "player_action",
            Self::DiceRoll => "dice_roll",
            Self::SceneUpdate => "scene_update",
            Self::GameStateUpdate => "game_state_update",
            Self::GameUpdated => "game_updated",
            Self::InitiativeUpdate => "initiative_update",
            Self::CharacterUpdate => "character_update",
            Self::AiResponse => "ai_response",
            Self::MessageHistory => "message_history",
            Self::RollRequest => "roll_request",
            Self::DiceCheckResult => "dice_check_result",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
            Self::Pong => "pong",
        }
    }
}

impl std::fmt::Display for ServerEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Decoded events
// =============================================================================

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Initial snapshot sent right after the handshake
    Connected(GameStatePayload),
    System(SystemPayload),
    PlayerJoined(PresencePayload),
    PlayerLeft(PresencePayload),
    ChatMessage(ChatPayload),
    PlayerAction(ActionPayload),
    DiceRoll(DiceRollPayload),
    SceneUpdate(SceneUpdatePayload),
    GameStateUpdate(SceneUpdatePayload),
    GameUpdated(GameUpdatedPayload),
    InitiativeUpdate(InitiativePayload),
    CharacterUpdate(CharacterUpdatePayload),
    AiResponse(AiResponsePayload),
    MessageHistory(HistoryPayload),
    RollRequest(RollRequestPayload),
    DiceCheckResult(CheckResultPayload),
    Error(ErrorPayload),
    Disconnected(DisconnectedPayload),
    /// Heartbeat acknowledgement
    Pong,
}

impl ServerEvent {
    /// Decode the envelope's payload according to its type.
    ///
    /// The payload is fully decoded before anything is returned, so a bad
    /// frame never yields a partial event.
    pub fn decode(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let kind = ServerEventKind::from_wire(&envelope.kind)
            .ok_or_else(|| ProtocolError::UnknownType(envelope.kind.clone()))?;
        let data = &envelope.data;

        let event = match kind {
            ServerEventKind::Connected => Self::Connected(payload(kind, data)?),
            ServerEventKind::System => Self::System(payload(kind, data)?),
            ServerEventKind::PlayerJoined => Self::PlayerJoined(payload(kind, data)?),
            ServerEventKind::PlayerLeft => Self::PlayerLeft(payload(kind, data)?),
            ServerEventKind::ChatMessage => Self::ChatMessage(payload(kind, data)?),
            ServerEventKind::PlayerAction => Self::PlayerAction(payload(kind, data)?),
            ServerEventKind::DiceRoll => Self::DiceRoll(payload(kind, data)?),
            ServerEventKind::SceneUpdate => Self::SceneUpdate(payload(kind, data)?),
            ServerEventKind::GameStateUpdate => Self::GameStateUpdate(payload(kind, data)?),
            ServerEventKind::GameUpdated => Self::GameUpdated(payload(kind, data)?),
            ServerEventKind::InitiativeUpdate => Self::InitiativeUpdate(payload(kind, data)?),
            ServerEventKind::CharacterUpdate => Self::CharacterUpdate(payload(kind, data)?),
            ServerEventKind::AiResponse => Self::AiResponse(payload(kind, data)?),
            ServerEventKind::MessageHistory => Self::MessageHistory(payload(kind, data)?),
            ServerEventKind::RollRequest => Self::RollRequest(payload(kind, data)?),
            ServerEventKind::DiceCheckResult => Self::DiceCheckResult(payload(kind, data)?),
            ServerEventKind::Error => Self::Error(payload(kind, data)?),
            ServerEventKind::Disconnected => Self::Disconnected(payload(kind, data)?),
            ServerEventKind::Pong => Self::Pong,
        };
        Ok(event)
    }

    pub fn kind(&self) -> ServerEventKind {
        match self {
            Self::Connected(_) => ServerEventKind::Connected,
            Self::System(_) => ServerEventKind::System,
            Self::PlayerJoined(_) => ServerEventKind::PlayerJoined,
            Self::PlayerLeft(_) => ServerEventKind::PlayerLeft,
            Self::ChatMessage(_) => ServerEventKind::ChatMessage,
            Self::PlayerAction(_) => ServerEventKind::PlayerAction,
            Self::DiceRoll(_) => ServerEventKind::DiceRoll,
            Self::SceneUpdate(_) => ServerEventKind::SceneUpdate,
            Self::GameStateUpdate(_) => ServerEventKind::GameStateUpdate,
            Self::GameUpdated(_) => ServerEventKind::GameUpdated,
            Self::InitiativeUpdate(_) => ServerEventKind::InitiativeUpdate,
            Self::CharacterUpdate(_) => ServerEventKind::CharacterUpdate,
            Self::AiResponse(_) => ServerEventKind::AiResponse,
            Self::MessageHistory(_) => ServerEventKind::MessageHistory,
            Self::RollRequest(_) => ServerEventKind::RollRequest,
            Self::DiceCheckResult(_) => ServerEventKind::DiceCheckResult,
            Self::Error(_) => ServerEventKind::Error,
            Self::Disconnected(_) => ServerEventKind::Disconnected,
            Self::Pong => ServerEventKind::Pong,
        }
    }
}

fn payload<T: DeserializeOwned>(kind: ServerEventKind, data: &Value) -> Result<T, ProtocolError> {
    let data = if data.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        data.clone()
    };
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload {
        kind: kind.as_str(),
        source,
    })
}

// =============================================================================
// Field helpers
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

fn opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(d)?.map(|id| match id {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    }))
}

fn id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(opt_id(d)?.unwrap_or_default())
}

/// The roster arrives either as a list or as a map keyed by user id
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRoster {
    List(Vec<RosterEntry>),
    Map(BTreeMap<String, RosterEntry>),
}

fn opt_roster<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<RosterEntry>>, D::Error> {
    Ok(Option::<RawRoster>::deserialize(d)?.map(|raw| match raw {
        RawRoster::List(list) => list,
        RawRoster::Map(map) => map
            .into_iter()
            .map(|(key, mut entry)| {
                if entry.user_id.is_empty() {
                    entry.user_id = key;
                }
                entry
            })
            .collect(),
    }))
}

fn roster<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<RosterEntry>, D::Error> {
    Ok(opt_roster(d)?.unwrap_or_default())
}

// =============================================================================
// Roster and character data
// =============================================================================

/// Character sheet summary attached to roster and presence payloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterInfo {
    #[serde(deserialize_with = "opt_id")]
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(alias = "current_hp")]
    pub current_hit_points: Option<i32>,
    #[serde(alias = "max_hp")]
    pub max_hit_points: Option<i32>,
}

/// One roster entry in a snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterEntry {
    #[serde(alias = "userId", deserialize_with = "id")]
    pub user_id: String,
    pub username: Option<String>,
    #[serde(alias = "displayName")]
    pub display_name: Option<String>,
    #[serde(alias = "characterName")]
    pub character_name: Option<String>,
    #[serde(alias = "characterId", deserialize_with = "opt_id")]
    pub character_id: Option<String>,
    pub character_info: Option<CharacterInfo>,
    #[serde(alias = "isOnline")]
    pub is_online: Option<bool>,
    pub initiative: Option<i32>,
    #[serde(alias = "currentHp")]
    pub current_hp: Option<i32>,
    #[serde(alias = "maxHp")]
    pub max_hp: Option<i32>,
}

/// Whose turn it is. The server sends either a turn counter or a player id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnValue {
    Number(u32),
    Id(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnInfo {
    pub current_turn: Option<TurnValue>,
    pub current_player_index: Option<u32>,
    #[serde(deserialize_with = "opt_id")]
    pub current_player_id: Option<String>,
    pub turn_number: Option<u32>,
}

impl TurnInfo {
    /// Resolve to `(current player id, turn number)`.
    ///
    /// Explicit `current_player_id` / `turn_number` win over `current_turn`.
    pub fn resolve(&self) -> (Option<String>, Option<u32>) {
        let mut player = self.current_player_id.clone();
        let mut number = self.turn_number;
        match &self.current_turn {
            Some(TurnValue::Id(id)) => player = player.or_else(|| Some(id.clone())),
            Some(TurnValue::Number(n)) => number = number.or(Some(*n)),
            None => {}
        }
        (player, number)
    }
}

// =============================================================================
// Scene
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneFields {
    #[serde(alias = "name")]
    pub title: Option<String>,
    #[serde(alias = "text")]
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(alias = "imageUrl")]
    pub image_url: Option<String>,
    /// Fields without a dedicated slot
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A scene is either free text (older servers) or a structured object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SceneValue {
    Text(String),
    Fields(SceneFields),
}

impl SceneValue {
    pub fn into_fields(self) -> SceneFields {
        match self {
            Self::Text(text) => SceneFields {
                description: Some(text),
                ..SceneFields::default()
            },
            Self::Fields(fields) => fields,
        }
    }
}

/// `scene_update` and `game_state_update` payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneUpdatePayload {
    #[serde(alias = "current_scene")]
    pub scene: Option<SceneValue>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub image_url: Option<String>,
    /// `game_state_update` may carry roster changes
    #[serde(deserialize_with = "opt_roster")]
    pub players: Option<Vec<RosterEntry>>,
    pub turn_info: Option<TurnInfo>,
}

impl SceneUpdatePayload {
    /// Nested scene fields overlaid with any top-level ones
    pub fn scene_fields(&self) -> SceneFields {
        let mut fields = self
            .scene
            .clone()
            .map(SceneValue::into_fields)
            .unwrap_or_default();
        let overrides = [
            (&mut fields.title, &self.title),
            (&mut fields.description, &self.description),
            (&mut fields.location, &self.location),
            (&mut fields.image_url, &self.image_url),
        ];
        for (field, value) in overrides {
            if value.is_some() {
                field.clone_from(value);
            }
        }
        fields
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// `connected` / `game_state` snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameStatePayload {
    #[serde(deserialize_with = "opt_id")]
    pub game_id: Option<String>,
    pub game_name: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "roster")]
    pub players: Vec<RosterEntry>,
    #[serde(alias = "scene")]
    pub current_scene: Option<SceneValue>,
    pub turn_info: Option<TurnInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemPayload {
    #[serde(alias = "content")]
    pub message: String,
    pub player_name: Option<String>,
    #[serde(deserialize_with = "opt_id")]
    pub user_id: Option<String>,
    pub timestamp: Option<String>,
}

/// `player_joined` / `player_left`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresencePayload {
    #[serde(alias = "player_id", alias = "userId", deserialize_with = "id")]
    pub user_id: String,
    pub username: Option<String>,
    #[serde(alias = "player_name")]
    pub display_name: Option<String>,
    pub character_name: Option<String>,
    pub character_info: Option<CharacterInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatPayload {
    #[serde(alias = "message")]
    pub content: String,
    #[serde(alias = "user_id", deserialize_with = "opt_id")]
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub sender_username: Option<String>,
    pub message_type: Option<String>,
    pub is_ooc: bool,
    pub client_message_id: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionPayload {
    #[serde(alias = "content")]
    pub action: String,
    #[serde(alias = "user_id", deserialize_with = "opt_id")]
    pub player_id: Option<String>,
    pub player_name: Option<String>,
    pub client_message_id: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiceRollPayload {
    pub notation: String,
    #[serde(alias = "rolls")]
    pub individual_rolls: Vec<u32>,
    /// Named modifiers, summed into the roll
    pub modifiers: BTreeMap<String, i32>,
    pub modifier: Option<i32>,
    pub total: i32,
    pub is_critical: bool,
    pub is_fumble: bool,
    pub player_name: Option<String>,
    #[serde(alias = "user_id", deserialize_with = "opt_id")]
    pub player_id: Option<String>,
    pub purpose: Option<String>,
    pub timestamp: Option<String>,
}

impl DiceRollPayload {
    /// Flat modifier, or the sum of the named ones
    pub fn modifier_total(&self) -> i32 {
        self.modifier
            .unwrap_or_else(|| self.modifiers.values().copied().sum())
    }
}

/// `roll_request` / `dice_roll_request`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollRequestPayload {
    pub message: String,
    pub player_name: Option<String>,
    pub roll_type: Option<String>,
    #[serde(alias = "ability_or_skill")]
    pub skill: Option<String>,
    pub dc: Option<i32>,
    pub modifier: Option<i32>,
    pub advantage: bool,
    pub disadvantage: bool,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckResultPayload {
    pub message: String,
    pub sender_name: Option<String>,
    pub base_roll: i32,
    pub modifier: i32,
    pub final_total: i32,
    pub dc: Option<i32>,
    pub success: bool,
    #[serde(alias = "skill")]
    pub skill_display: Option<String>,
    pub original_action: Option<String>,
    pub player_name: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiResponsePayload {
    #[serde(alias = "content")]
    pub message: String,
    pub sender_name: Option<String>,
    pub in_response_to: Option<String>,
    pub is_fallback: bool,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPayload {
    pub message: String,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisconnectedPayload {
    #[serde(alias = "message")]
    pub reason: Option<String>,
    pub code: Option<u16>,
    pub timestamp: Option<String>,
}

/// `game_updated` - turn progression, flat or nested under `turn_info`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameUpdatedPayload {
    #[serde(flatten)]
    pub turn: TurnInfo,
    pub turn_info: Option<TurnInfo>,
}

impl GameUpdatedPayload {
    pub fn resolve(&self) -> (Option<String>, Option<u32>) {
        let (player, number) = self.turn.resolve();
        let (nested_player, nested_number) = self
            .turn_info
            .as_ref()
            .map(TurnInfo::resolve)
            .unwrap_or_default();
        (player.or(nested_player), number.or(nested_number))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitiativeItem {
    #[serde(alias = "player_id", alias = "userId", deserialize_with = "id")]
    pub user_id: String,
    #[serde(alias = "player_name", alias = "character_name")]
    pub name: String,
    #[serde(alias = "total")]
    pub initiative: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitiativePayload {
    #[serde(alias = "turn_order", alias = "initiative_order")]
    pub order: Vec<InitiativeItem>,
    #[serde(flatten)]
    pub turn: TurnInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterUpdatePayload {
    #[serde(alias = "player_id", alias = "userId", deserialize_with = "id")]
    pub user_id: String,
    #[serde(deserialize_with = "opt_id")]
    pub character_id: Option<String>,
    #[serde(alias = "name")]
    pub character_name: Option<String>,
    #[serde(alias = "current_hit_points")]
    pub current_hp: Option<i32>,
    #[serde(alias = "max_hit_points")]
    pub max_hp: Option<i32>,
    pub character_info: Option<CharacterInfo>,
}

/// `message_history` - past frames in chronological order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryPayload {
    pub messages: Vec<Envelope>,
}
