//! Session aggregate - the client's canonical view of one live game
//!
//! # Invariants
//!
//! - The roster never holds two entries with the same `user_id`
//! - Every turn order entry names a roster entry (unknown ids get an
//!   offline placeholder first)
//! - The message log never exceeds its capacity; the oldest entries go first
//!
//! Mutators return `true` when the state actually changed so observers can
//! skip redundant notifications.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::entities::{InitiativeEntry, Message, Player, PlayerUpdate, Scene, SceneUpdate};

/// Log capacity used when none is configured
pub const DEFAULT_MESSAGE_CAPACITY: usize = 100;

/// Connection health as seen by session observers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Everything a UI needs to render the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    connection_status: ConnectionStatus,
    roster: Vec<Player>,
    messages: VecDeque<Message>,
    capacity: usize,
    scene: Scene,
    turn_order: Vec<InitiativeEntry>,
    current_turn: Option<String>,
    turn_number: Option<u32>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_CAPACITY)
    }
}

impl SessionState {
    /// Empty session whose log keeps at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            connection_status: ConnectionStatus::Disconnected,
            roster: Vec::new(),
            messages: VecDeque::with_capacity(capacity),
            capacity,
            scene: Scene::default(),
            turn_order: Vec::new(),
            current_turn: None,
            turn_number: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    pub fn roster(&self) -> &[Player] {
        &self.roster
    }

    pub fn player(&self, user_id: &str) -> Option<&Player> {
        self.roster.iter().find(|p| p.user_id == user_id)
    }

    pub fn online_players(&self) -> impl Iterator<Item = &Player> {
        self.roster.iter().filter(|p| p.is_online)
    }

    pub fn messages(&self) -> &VecDeque<Message> {
        &self.messages
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn turn_order(&self) -> &[InitiativeEntry] {
        &self.turn_order
    }

    /// User id whose turn it is
    pub fn current_turn(&self) -> Option<&str> {
        self.current_turn.as_deref()
    }

    pub fn turn_number(&self) -> Option<u32> {
        self.turn_number
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub fn set_connection_status(&mut self, status: ConnectionStatus) -> bool {
        if self.connection_status == status {
            return false;
        }
        self.connection_status = status;
        true
    }

    /// Replace the roster with an authoritative snapshot.
    ///
    /// Duplicate ids in the snapshot collapse into one entry (later data wins,
    /// first position kept).
    pub fn replace_roster(&mut self, players: Vec<Player>) -> bool {
        let mut roster: Vec<Player> = Vec::with_capacity(players.len());
        for player in players {
            match roster.iter_mut().find(|p| p.user_id == player.user_id) {
                Some(existing) => *existing = player,
                None => roster.push(player),
            }
        }
        if roster == self.roster {
            return false;
        }
        self.roster = roster;
        true
    }

    /// Merge an update into the entry keyed by `user_id`, creating it if needed
    pub fn upsert_player(&mut self, user_id: &str, update: &PlayerUpdate) -> bool {
        match self.roster.iter_mut().find(|p| p.user_id == user_id) {
            Some(player) => player.apply(update),
            None => {
                self.roster.push(Player::from_update(user_id, update));
                true
            }
        }
    }

    /// Players are never removed; leaving only flips `is_online`
    pub fn mark_offline(&mut self, user_id: &str) -> bool {
        self.upsert_player(user_id, &PlayerUpdate::online(false))
    }

    /// Append a log entry, trimming to capacity.
    ///
    /// A confirmed entry replaces the first provisional echo it confirms.
    pub fn append_message(&mut self, message: Message) -> bool {
        if !message.provisional {
            if let Some(echo) = self.messages.iter_mut().find(|m| message.confirms(m)) {
                *echo = message;
                return true;
            }
        }
        self.messages.push_back(message);
        self.trim_messages();
        true
    }

    /// Replace confirmed entries with server history. Pending echoes are kept
    /// after the history.
    pub fn replace_history(&mut self, history: Vec<Message>) -> bool {
        let pending: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| m.provisional)
            .collect();
        self.messages.extend(history.into_iter().filter(|m| !m.provisional));
        self.messages.extend(pending);
        self.trim_messages();
        true
    }

    /// Drop a provisional echo whose send failed
    pub fn discard_provisional(&mut self, client_message_id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| {
            !(m.provisional && m.client_message_id.as_deref() == Some(client_message_id))
        });
        self.messages.len() != before
    }

    pub fn apply_scene(&mut self, update: &SceneUpdate) -> bool {
        self.scene.apply(update)
    }

    /// Replace whichever turn fields are present
    pub fn set_turn(&mut self, current_turn: Option<String>, turn_number: Option<u32>) -> bool {
        let mut changed = false;
        if let Some(current) = current_turn {
            if self.current_turn.as_deref() != Some(current.as_str()) {
                self.current_turn = Some(current);
                changed = true;
            }
        }
        if let Some(number) = turn_number {
            if self.turn_number != Some(number) {
                self.turn_number = Some(number);
                changed = true;
            }
        }
        changed
    }

    /// Replace the turn order and copy each initiative onto the roster
    pub fn replace_turn_order(&mut self, entries: Vec<InitiativeEntry>) -> bool {
        let mut changed = false;
        for entry in &entries {
            if self.player(&entry.user_id).is_none() {
                let mut placeholder = Player::unknown_offline(entry.user_id.clone());
                if !entry.name.is_empty() {
                    placeholder.display_name = entry.name.clone();
                }
                self.roster.push(placeholder);
                changed = true;
            }
            let update = PlayerUpdate {
                initiative: Some(entry.initiative),
                ..PlayerUpdate::default()
            };
            changed |= self.upsert_player(&entry.user_id, &update);
        }
        if self.turn_order != entries {
            self.turn_order = entries;
            changed = true;
        }
        changed
    }

    /// Forget everything except the log capacity
    pub fn reset(&mut self) {
        *self = Self::new(self.capacity);
    }

    fn trim_messages(&mut self) {
        let overflow = self.messages.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.messages.drain(..overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MessageMetadata;

    fn chat(content: &str) -> Message {
        Message::new("alice", content, MessageMetadata::Chat { is_ooc: false })
    }

    #[test]
    fn log_keeps_most_recent_entries() {
        let mut state = SessionState::new(20);
        for i in 1..=25 {
            state.append_message(chat(&format!("message {i}")));
        }

        let contents: Vec<&str> = state.messages().iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (6..=25).map(|i| format!("message {i}")).collect();
        assert_eq!(contents.len(), 20);
        assert_eq!(contents, expected);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut state = SessionState::new(0);
        state.append_message(chat("a"));
        state.append_message(chat("b"));
        assert_eq!(state.capacity(), 1);
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].content, "b");
    }

    #[test]
    fn joining_twice_yields_one_entry() {
        let mut state = SessionState::default();
        let joined = PlayerUpdate::online(true).with_display_name("Alice");

        assert!(state.upsert_player("u1", &joined));
        assert!(!state.upsert_player("u1", &joined));
        assert_eq!(state.roster().len(), 1);
    }

    #[test]
    fn leaving_marks_offline_without_removing() {
        let mut state = SessionState::default();
        state.replace_roster(vec![Player::new("u1", "Alice")]);

        state.mark_offline("u1");

        let player = state.player("u1").unwrap();
        assert!(!player.is_online);
        assert_eq!(state.roster().len(), 1);
    }

    #[test]
    fn leaving_unknown_player_creates_offline_entry() {
        let mut state = SessionState::default();
        state.mark_offline("ghost");
        assert_eq!(state.player("ghost").map(|p| p.is_online), Some(false));
    }

    #[test]
    fn replace_roster_dedupes() {
        let mut state = SessionState::default();
        let mut later = Player::new("u1", "Alice v2");
        later.is_online = false;
        state.replace_roster(vec![
            Player::new("u1", "Alice"),
            Player::new("u2", "Bob"),
            later,
        ]);

        assert_eq!(state.roster().len(), 2);
        assert_eq!(state.roster()[0].display_name, "Alice v2");
        assert_eq!(state.roster()[1].user_id, "u2");
    }

    #[test]
    fn confirmed_message_replaces_echo_in_place() {
        let mut state = SessionState::default();
        state.append_message(chat("first"));
        state.append_message(chat("hello").with_client_message_id("c1").into_provisional());
        state.append_message(Message::system("someone joined", false));

        state.append_message(chat("hello").with_client_message_id("c1"));

        let log = state.messages();
        assert_eq!(log.len(), 3);
        assert_eq!(log[1].content, "hello");
        assert!(!log[1].provisional);
    }

    #[test]
    fn history_keeps_pending_echoes() {
        let mut state = SessionState::new(10);
        state.append_message(chat("old"));
        state.append_message(chat("pending").into_provisional());

        state.replace_history(vec![chat("h1"), chat("h2")]);

        let contents: Vec<&str> = state.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["h1", "h2", "pending"]);
    }

    #[test]
    fn discard_provisional_removes_only_matching_echo() {
        let mut state = SessionState::default();
        state.append_message(chat("a").with_client_message_id("c1").into_provisional());
        state.append_message(chat("b").with_client_message_id("c2").into_provisional());

        assert!(state.discard_provisional("c1"));
        assert!(!state.discard_provisional("c1"));
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].content, "b");
    }

    #[test]
    fn set_turn_replaces_present_fields_only() {
        let mut state = SessionState::default();
        assert!(state.set_turn(Some("u1".into()), Some(1)));
        assert!(state.set_turn(None, Some(2)));
        assert_eq!(state.current_turn(), Some("u1"));
        assert_eq!(state.turn_number(), Some(2));
        assert!(!state.set_turn(None, None));
    }

    #[test]
    fn turn_order_creates_missing_roster_entries() {
        let mut state = SessionState::default();
        state.replace_roster(vec![Player::new("u1", "Alice")]);

        state.replace_turn_order(vec![
            InitiativeEntry {
                user_id: "u2".into(),
                name: "Goblin".into(),
                initiative: 18,
            },
            InitiativeEntry {
                user_id: "u1".into(),
                name: "Alice".into(),
                initiative: 12,
            },
        ]);

        assert_eq!(state.turn_order().len(), 2);
        let goblin = state.player("u2").unwrap();
        assert!(!goblin.is_online);
        assert_eq!(goblin.display_name, "Goblin");
        assert_eq!(goblin.initiative, Some(18));
        assert_eq!(state.player("u1").unwrap().initiative, Some(12));
    }

    #[test]
    fn status_change_detection() {
        let mut state = SessionState::default();
        assert!(!state.set_connection_status(ConnectionStatus::Disconnected));
        assert!(state.set_connection_status(ConnectionStatus::Connected));
        assert!(state.connection_status().is_connected());
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut state = SessionState::new(5);
        state.append_message(chat("x"));
        state.reset();
        assert!(state.messages().is_empty());
        assert_eq!(state.capacity(), 5);
    }
}
