//! Translates decoded protocol payloads into domain types
//!
//! The session store works on domain types only; this is the one place that
//! knows how server field names and fallbacks map onto them.

use chrono::{DateTime, NaiveDateTime, Utc};
use tavern_domain::{
    CheckResultMetadata, DiceRollMetadata, InitiativeEntry, Message, MessageMetadata, Player,
    PlayerUpdate, RollRequestMetadata, SceneUpdate,
};
use tavern_protocol::{
    CharacterUpdatePayload, HistoryPayload, InitiativeItem, PresencePayload, ProtocolError,
    RosterEntry, SceneFields, ServerEvent,
};

const UNKNOWN_AUTHOR: &str = "Unknown";
const DM_AUTHOR: &str = "Dungeon Master";

/// Full roster entry from a snapshot
pub fn player_from_roster(entry: &RosterEntry) -> Player {
    Player::from_update(entry.user_id.clone(), &roster_update(entry))
}

/// Roster entry as a merge; missing `is_online` means online
pub fn roster_update(entry: &RosterEntry) -> PlayerUpdate {
    let info = entry.character_info.as_ref();
    PlayerUpdate {
        display_name: first_text([
            entry.display_name.as_deref(),
            entry.username.as_deref(),
        ]),
        character_id: entry
            .character_id
            .clone()
            .or_else(|| info.and_then(|i| i.id.clone())),
        character_name: first_text([
            entry.character_name.as_deref(),
            info.and_then(|i| i.name.as_deref()),
        ]),
        is_online: Some(entry.is_online.unwrap_or(true)),
        initiative: entry.initiative,
        current_hp: entry
            .current_hp
            .or_else(|| info.and_then(|i| i.current_hit_points)),
        max_hp: entry.max_hp.or_else(|| info.and_then(|i| i.max_hit_points)),
    }
}

/// `player_joined` / `player_left`
pub fn presence_update(payload: &PresencePayload, online: bool) -> PlayerUpdate {
    let info = payload.character_info.as_ref();
    PlayerUpdate {
        display_name: first_text([
            payload.display_name.as_deref(),
            payload.username.as_deref(),
        ]),
        character_id: info.and_then(|i| i.id.clone()),
        character_name: first_text([
            payload.character_name.as_deref(),
            info.and_then(|i| i.name.as_deref()),
        ]),
        is_online: Some(online),
        current_hp: info.and_then(|i| i.current_hit_points),
        max_hp: info.and_then(|i| i.max_hit_points),
        ..PlayerUpdate::default()
    }
}

pub fn character_update(payload: &CharacterUpdatePayload) -> PlayerUpdate {
    let info = payload.character_info.as_ref();
    PlayerUpdate {
        character_id: payload
            .character_id
            .clone()
            .or_else(|| info.and_then(|i| i.id.clone())),
        character_name: first_text([
            payload.character_name.as_deref(),
            info.and_then(|i| i.name.as_deref()),
        ]),
        current_hp: payload
            .current_hp
            .or_else(|| info.and_then(|i| i.current_hit_points)),
        max_hp: payload
            .max_hp
            .or_else(|| info.and_then(|i| i.max_hit_points)),
        ..PlayerUpdate::default()
    }
}

/// Unmodelled scene fields are kept as display text
pub fn scene_update(fields: SceneFields) -> SceneUpdate {
    SceneUpdate {
        title: fields.title,
        description: fields.description,
        location: fields.location,
        image_url: fields.image_url,
        extra: fields
            .extra
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| {
                let text = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect(),
    }
}

pub fn initiative_entries(items: &[InitiativeItem]) -> Vec<InitiativeEntry> {
    items
        .iter()
        .filter(|item| !item.user_id.is_empty())
        .map(|item| InitiativeEntry {
            user_id: item.user_id.clone(),
            name: item.name.clone(),
            initiative: item.initiative,
        })
        .collect()
}

/// The log entry an event produces, if any
pub fn message_from_event(event: &ServerEvent) -> Option<Message> {
    let message = match event {
        ServerEvent::ChatMessage(p) => {
            let is_ooc = p.is_ooc || p.message_type.as_deref() == Some("ooc");
            let author = first_text([
                p.sender_name.as_deref(),
                p.sender_username.as_deref(),
                p.sender_id.as_deref(),
            ]);
            with_correlation(
                Message::new(
                    author.unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
                    p.content.clone(),
                    MessageMetadata::Chat { is_ooc },
                ),
                p.sender_id.as_deref(),
                p.client_message_id.as_deref(),
            )
            .with_timestamp(parse_timestamp(p.timestamp.as_deref()))
        }
        ServerEvent::PlayerAction(p) => with_correlation(
            Message::new(
                first_text([p.player_name.as_deref(), p.player_id.as_deref()])
                    .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
                p.action.clone(),
                MessageMetadata::Action,
            ),
            p.player_id.as_deref(),
            p.client_message_id.as_deref(),
        )
        .with_timestamp(parse_timestamp(p.timestamp.as_deref())),
        ServerEvent::DiceRoll(p) => {
            let rolls = p
                .individual_rolls
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let content = match &p.purpose {
                Some(purpose) => format!("{} ({purpose}): [{rolls}] = {}", p.notation, p.total),
                None => format!("{}: [{rolls}] = {}", p.notation, p.total),
            };
            let metadata = MessageMetadata::DiceRoll(DiceRollMetadata {
                notation: p.notation.clone(),
                rolls: p.individual_rolls.clone(),
                total: p.total,
                modifier: p.modifier_total(),
                is_critical: p.is_critical,
                is_fumble: p.is_fumble,
                purpose: p.purpose.clone(),
            });
            with_correlation(
                Message::new(
                    first_text([p.player_name.as_deref(), p.player_id.as_deref()])
                        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
                    content,
                    metadata,
                ),
                p.player_id.as_deref(),
                None,
            )
            .with_timestamp(parse_timestamp(p.timestamp.as_deref()))
        }
        ServerEvent::RollRequest(p) => Message::new(
            DM_AUTHOR,
            p.message.clone(),
            MessageMetadata::RollRequest(RollRequestMetadata {
                ability_or_skill: p.skill.clone(),
                dc: p.dc,
                advantage: p.advantage,
                disadvantage: p.disadvantage,
                roll_type: p.roll_type.clone(),
                modifier: p.modifier,
            }),
        )
        .with_timestamp(parse_timestamp(p.timestamp.as_deref())),
        ServerEvent::DiceCheckResult(p) => Message::new(
            first_text([p.sender_name.as_deref(), p.player_name.as_deref()])
                .unwrap_or_else(|| DM_AUTHOR.to_string()),
            p.message.clone(),
            MessageMetadata::DiceCheckResult(CheckResultMetadata {
                base_roll: p.base_roll,
                modifier: p.modifier,
                final_total: p.final_total,
                dc: p.dc,
                success: p.success,
                skill: p.skill_display.clone(),
            }),
        )
        .with_timestamp(parse_timestamp(p.timestamp.as_deref())),
        ServerEvent::AiResponse(p) => Message::new(
            first_text([p.sender_name.as_deref()]).unwrap_or_else(|| DM_AUTHOR.to_string()),
            p.message.clone(),
            MessageMetadata::AiDm {
                in_response_to: p.in_response_to.clone(),
                is_fallback: p.is_fallback,
            },
        )
        .with_timestamp(parse_timestamp(p.timestamp.as_deref())),
        ServerEvent::System(p) => {
            let message = Message::system(p.message.clone(), false)
                .with_timestamp(parse_timestamp(p.timestamp.as_deref()));
            match &p.user_id {
                Some(user_id) => message.with_author_id(user_id.clone()),
                None => message,
            }
        }
        ServerEvent::Error(p) => Message::system(p.message.clone(), true)
            .with_timestamp(parse_timestamp(p.timestamp.as_deref())),
        ServerEvent::Disconnected(p) => {
            let reason = p.reason.as_deref().unwrap_or("connection closed by server");
            Message::system(format!("Disconnected: {reason}"), false)
                .with_timestamp(parse_timestamp(p.timestamp.as_deref()))
        }
        ServerEvent::Connected(_)
        | ServerEvent::PlayerJoined(_)
        | ServerEvent::PlayerLeft(_)
        | ServerEvent::SceneUpdate(_)
        | ServerEvent::GameStateUpdate(_)
        | ServerEvent::GameUpdated(_)
        | ServerEvent::InitiativeUpdate(_)
        | ServerEvent::CharacterUpdate(_)
        | ServerEvent::MessageHistory(_)
        | ServerEvent::Pong => return None,
    };
    Some(message)
}

/// Decode every entry of a history frame.
///
/// All-or-nothing: one undecodable entry fails the whole frame. Entries of
/// kinds that produce no log line are skipped.
pub fn history_messages(payload: &HistoryPayload) -> Result<Vec<Message>, ProtocolError> {
    let mut messages = Vec::with_capacity(payload.messages.len());
    for envelope in &payload.messages {
        let event = ServerEvent::decode(envelope)?;
        messages.extend(message_from_event(&event));
    }
    Ok(messages)
}

/// Server timestamps are naive ISO-8601 (UTC) or RFC 3339; anything else
/// becomes "now"
pub fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Utc::now();
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => naive.and_utc(),
        Err(e) => {
            tracing::debug!(timestamp = raw, error = %e, "Unparseable timestamp, using now");
            Utc::now()
        }
    }
}

fn with_correlation(
    mut message: Message,
    author_id: Option<&str>,
    client_message_id: Option<&str>,
) -> Message {
    message.author_id = author_id.map(str::to_string);
    message.client_message_id = client_message_id.map(str::to_string);
    message
}

fn first_text<const N: usize>(candidates: [Option<&str>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
