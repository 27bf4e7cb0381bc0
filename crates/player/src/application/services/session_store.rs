//! Session store - the client's view of the live session.
//!
//! Reconciles dispatched events into a [`SessionState`] and publishes each
//! change on a `watch` channel. Outbound commands go through the
//! [`GameConnectionPort`]; chat and actions get an optimistic echo that the
//! server's broadcast later confirms.

use std::sync::Arc;

use tavern_domain::error::require_text;
use tavern_domain::{
    DiceExpression, DiceRollResult, Message, MessageMetadata, ParsedNotation, RollMode,
    SessionState,
};
use tavern_protocol::{ClientCommand, ServerEvent};
use tokio::sync::watch;
use uuid::Uuid;

use crate::application::error::CommandError;
use crate::application::services::dice_roller;
use crate::infrastructure::message_translator::{
    character_update, history_messages, initiative_entries, message_from_event, player_from_roster,
    presence_update, roster_update, scene_update,
};
use crate::infrastructure::messaging::{
    EventDispatcher, LifecycleEvent, SessionEvent, SubscriptionId,
};
use crate::ports::outbound::GameConnectionPort;

/// Author shown on local echoes when no display name is configured
pub const DEFAULT_AUTHOR: &str = Message::LOCAL_AUTHOR;

#[derive(Clone)]
pub struct SessionStore {
    state: Arc<watch::Sender<SessionState>>,
    connection: Arc<dyn GameConnectionPort>,
    author: String,
}

impl SessionStore {
    pub fn new(connection: Arc<dyn GameConnectionPort>, capacity: usize) -> Self {
        let (state, _) = watch::channel(SessionState::new(capacity));
        Self {
            state: Arc::new(state),
            connection,
            author: DEFAULT_AUTHOR.to_string(),
        }
    }

    /// Display name used on optimistic echoes
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Route every dispatched event into this store
    pub fn attach(&self, dispatcher: &EventDispatcher) -> SubscriptionId {
        let state = Arc::clone(&self.state);
        dispatcher.subscribe_all(move |event| {
            state.send_if_modified(|s| reconcile(s, event));
            Ok(())
        })
    }

    /// Apply one event directly; returns whether anything changed
    pub fn apply(&self, event: &SessionEvent) -> bool {
        self.state.send_if_modified(|s| reconcile(s, event))
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver that wakes on every change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Forget the previous session (roster, log, scene, turns)
    pub fn reset(&self) {
        self.state.send_modify(SessionState::reset);
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub fn send_chat(&self, text: &str, is_ooc: bool) -> Result<(), CommandError> {
        let content = require_text(text, "chat message")?;
        let client_id = Uuid::new_v4().to_string();
        let echo = Message::new(
            self.author.clone(),
            content.clone(),
            MessageMetadata::Chat { is_ooc },
        );
        self.send_with_echo(
            ClientCommand::ChatMessage {
                content,
                is_ooc,
                client_message_id: Some(client_id.clone()),
            },
            echo,
            client_id,
        )
    }

    pub fn send_action(&self, text: &str) -> Result<(), CommandError> {
        let action = require_text(text, "action")?;
        let client_id = Uuid::new_v4().to_string();
        let echo = Message::new(self.author.clone(), action.clone(), MessageMetadata::Action);
        self.send_with_echo(
            ClientCommand::PlayerAction {
                action,
                client_message_id: Some(client_id.clone()),
            },
            echo,
            client_id,
        )
    }

    /// Validate and send a roll. The server rolls; nothing is echoed.
    pub fn send_dice_roll(
        &self,
        notation: &str,
        purpose: Option<&str>,
    ) -> Result<ParsedNotation, CommandError> {
        self.send_dice_roll_with_mode(notation, purpose, RollMode::Normal)
    }

    pub fn send_dice_roll_with_mode(
        &self,
        notation: &str,
        purpose: Option<&str>,
        mode: RollMode,
    ) -> Result<ParsedNotation, CommandError> {
        let parsed = DiceExpression::parse_with_report(notation)?;
        for rejected in &parsed.rejected {
            tracing::warn!(term = %rejected.term, sides = rejected.sides, "Dropping unsupported die");
        }
        let purpose = purpose
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        self.send(ClientCommand::DiceRoll {
            notation: parsed.expression.to_string(),
            purpose,
            advantage: mode == RollMode::Advantage,
            disadvantage: mode == RollMode::Disadvantage,
        })?;
        Ok(parsed)
    }

    /// Roll 1d20 + modifier locally and report it
    pub fn roll_initiative(&self, modifier: i32) -> Result<DiceRollResult, CommandError> {
        let mut expression = DiceExpression::parse("1d20")?;
        expression.modifier = modifier;
        let result = dice_roller::roll(&expression, RollMode::Normal);
        let roll = result.rolls.first().map(|d| d.value).unwrap_or_default();
        self.send(ClientCommand::InitiativeRoll {
            roll,
            modifier,
            total: result.total,
        })?;
        Ok(result)
    }

    pub fn advance_turn(&self) -> Result<(), CommandError> {
        self.send(ClientCommand::NextTurn)
    }

    pub fn request_game_state(&self) -> Result<(), CommandError> {
        self.send(ClientCommand::RequestGameState)
    }

    pub fn request_message_history(&self, limit: Option<u32>) -> Result<(), CommandError> {
        self.send(ClientCommand::RequestMessageHistory { limit })
    }

    pub fn request_scene_info(&self) -> Result<(), CommandError> {
        self.send(ClientCommand::RequestSceneInfo)
    }

    fn send(&self, command: ClientCommand) -> Result<(), CommandError> {
        let kind = command.kind();
        self.connection.send(command.into_envelope()).map_err(|e| {
            tracing::warn!(command = kind, error = %e, "Command not sent");
            CommandError::from(e)
        })
    }

    fn send_with_echo(
        &self,
        command: ClientCommand,
        echo: Message,
        client_id: String,
    ) -> Result<(), CommandError> {
        let echo = echo.with_client_message_id(client_id.clone()).into_provisional();
        self.state.send_modify(|s| {
            s.append_message(echo);
        });
        let result = self.send(command);
        if result.is_err() {
            self.state
                .send_if_modified(|s| s.discard_provisional(&client_id));
        }
        result
    }
}

/// Fold one event into the state. Returns whether anything changed.
fn reconcile(state: &mut SessionState, event: &SessionEvent) -> bool {
    match event {
        SessionEvent::StateChanged(connection) => state.set_connection_status((*connection).into()),
        SessionEvent::Lifecycle(LifecycleEvent::Error {
            message, terminal, ..
        }) => {
            let content = if *terminal {
                format!("Connection failed: {message}")
            } else {
                format!("Connection error: {message}")
            };
            state.append_message(Message::system(content, true))
        }
        SessionEvent::Lifecycle(_) => false,
        SessionEvent::Server(event) => reconcile_server(state, event),
    }
}

fn reconcile_server(state: &mut SessionState, event: &ServerEvent) -> bool {
    match event {
        ServerEvent::Connected(snapshot) => {
            let mut changed =
                state.replace_roster(snapshot.players.iter().map(player_from_roster).collect());
            if let Some(scene) = &snapshot.current_scene {
                changed |= state.apply_scene(&scene_update(scene.clone().into_fields()));
            }
            if let Some(turn) = &snapshot.turn_info {
                let (player, number) = turn.resolve();
                changed |= state.set_turn(player, number);
            }
            changed
        }
        ServerEvent::PlayerJoined(p) | ServerEvent::PlayerLeft(p) if p.user_id.is_empty() => {
            tracing::warn!(event = %event.kind(), "Presence update without user_id");
            false
        }
        ServerEvent::PlayerJoined(p) => state.upsert_player(&p.user_id, &presence_update(p, true)),
        ServerEvent::PlayerLeft(p) => state.upsert_player(&p.user_id, &presence_update(p, false)),
        ServerEvent::CharacterUpdate(p) if p.user_id.is_empty() => {
            tracing::warn!("Character update without user_id");
            false
        }
        ServerEvent::CharacterUpdate(p) => state.upsert_player(&p.user_id, &character_update(p)),
        ServerEvent::SceneUpdate(p) | ServerEvent::GameStateUpdate(p) => {
            let mut changed = state.apply_scene(&scene_update(p.scene_fields()));
            for entry in p.players.iter().flatten() {
                if !entry.user_id.is_empty() {
                    changed |= state.upsert_player(&entry.user_id, &roster_update(entry));
                }
            }
            if let Some(turn) = &p.turn_info {
                let (player, number) = turn.resolve();
                changed |= state.set_turn(player, number);
            }
            changed
        }
        ServerEvent::GameUpdated(p) => {
            let (player, number) = p.resolve();
            state.set_turn(player, number)
        }
        ServerEvent::InitiativeUpdate(p) => {
            let mut changed = state.replace_turn_order(initiative_entries(&p.order));
            let (player, number) = p.turn.resolve();
            changed |= state.set_turn(player, number);
            changed
        }
        ServerEvent::MessageHistory(p) => match history_messages(p) {
            Ok(history) => state.replace_history(history),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed message history");
                false
            }
        },
        ServerEvent::Pong => false,
        other => match message_from_event(other) {
            Some(message) => state.append_message(message),
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::messaging::ConnectionState;
    use crate::ports::outbound::{MockGameConnectionPort, SendError};
    use serde_json::json;
    use std::sync::Mutex;
    use tavern_domain::{ConnectionStatus, MessageKind};
    use tavern_protocol::Envelope;

    fn decode(kind: &str, data: serde_json::Value) -> SessionEvent {
        SessionEvent::Server(ServerEvent::decode(&Envelope::new(kind, data)).unwrap())
    }

    /// Store whose connection records every sent envelope
    fn recording_store() -> (SessionStore, Arc<Mutex<Vec<Envelope>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut port = MockGameConnectionPort::new();
        let sink = Arc::clone(&sent);
        port.expect_send().returning(move |envelope| {
            sink.lock().unwrap().push(envelope);
            Ok(())
        });
        port.expect_status()
            .returning(|| ConnectionStatus::Connected);
        (SessionStore::new(Arc::new(port), 100).with_author("Mira"), sent)
    }

    fn disconnected_store() -> SessionStore {
        let mut port = MockGameConnectionPort::new();
        port.expect_send().returning(|_| {
            Err(SendError::SendWhileDisconnected {
                state: ConnectionStatus::Disconnected,
            })
        });
        SessionStore::new(Arc::new(port), 100)
    }

    #[test]
    fn connected_snapshot_replaces_roster_scene_and_turn() {
        let (store, _) = recording_store();
        store.apply(&decode(
            "connected",
            json!({
                "game_id": "g1",
                "players": [
                    { "user_id": "u1", "username": "ann", "character_name": "Aria" },
                    { "user_id": 2, "username": "bob", "is_online": false }
                ],
                "current_scene": { "title": "Crypt", "description": "Damp stone" },
                "turn_info": { "current_turn": "u1", "turn_number": 3 }
            }),
        ));

        let state = store.snapshot();
        assert_eq!(state.roster().len(), 2);
        assert!(state.player("u1").unwrap().is_online);
        assert!(!state.player("2").unwrap().is_online);
        assert_eq!(state.scene().title.as_deref(), Some("Crypt"));
        assert_eq!(state.current_turn(), Some("u1"));
        assert_eq!(state.turn_number(), Some(3));
    }

    #[test]
    fn presence_marks_players_online_and_offline() {
        let (store, _) = recording_store();
        store.apply(&decode("player_joined", json!({ "user_id": "u9", "username": "zed" })));
        assert!(store.snapshot().player("u9").unwrap().is_online);

        store.apply(&decode("player_left", json!({ "user_id": "u9" })));
        let state = store.snapshot();
        let player = state.player("u9").unwrap();
        assert!(!player.is_online);
        assert_eq!(player.label(), "zed");
    }

    #[test]
    fn presence_without_user_id_is_ignored() {
        let (store, _) = recording_store();
        assert!(!store.apply(&decode("player_joined", json!({ "username": "ghost" }))));
        assert!(store.snapshot().roster().is_empty());
    }

    #[test]
    fn chat_echo_is_confirmed_by_broadcast() {
        let (store, sent) = recording_store();
        store.send_chat("  hello there ", false).unwrap();

        let envelope = sent.lock().unwrap()[0].clone();
        assert_eq!(envelope.kind, "chat_message");
        assert_eq!(envelope.data["content"], "hello there");
        let client_id = envelope.data["client_message_id"].as_str().unwrap().to_string();

        let state = store.snapshot();
        assert_eq!(state.messages().len(), 1);
        assert!(state.messages()[0].provisional);
        assert_eq!(state.messages()[0].author, "Mira");

        store.apply(&decode(
            "chat_message",
            json!({
                "content": "hello there",
                "sender_name": "Mira",
                "client_message_id": client_id
            }),
        ));
        let state = store.snapshot();
        assert_eq!(state.messages().len(), 1);
        assert!(!state.messages()[0].provisional);
    }

    #[test]
    fn another_players_identical_line_leaves_the_echo_pending() {
        let (store, _) = recording_store();
        store.send_chat("hi", false).unwrap();

        store.apply(&decode(
            "chat_message",
            json!({ "content": "hi", "sender_name": "Bob" }),
        ));
        let state = store.snapshot();
        assert_eq!(state.messages().len(), 2);
        assert!(state.messages()[0].provisional);
        assert_eq!(state.messages()[1].author, "Bob");

        store.apply(&decode(
            "chat_message",
            json!({ "content": "hi", "sender_name": "Mira" }),
        ));
        let state = store.snapshot();
        assert_eq!(state.messages().len(), 2);
        assert!(state.messages().iter().all(|m| !m.provisional));
        assert_eq!(state.messages()[0].author, "Mira");
    }

    #[test]
    fn failed_send_discards_the_echo() {
        let store = disconnected_store();
        let err = store.send_action("draws sword").unwrap_err();
        assert!(matches!(err, CommandError::Send(SendError::SendWhileDisconnected { .. })));
        assert!(store.snapshot().messages().is_empty());
    }

    #[test]
    fn blank_text_is_rejected_before_sending() {
        let (store, sent) = recording_store();
        assert!(matches!(store.send_chat("   ", true), Err(CommandError::Validation(_))));
        assert!(matches!(store.send_action(""), Err(CommandError::Validation(_))));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn dice_roll_sends_normalized_notation() {
        let (store, sent) = recording_store();
        let parsed = store
            .send_dice_roll_with_mode(" 1D20 + 5 ", Some(" stealth "), RollMode::Advantage)
            .unwrap();
        assert!(parsed.rejected.is_empty());

        let envelope = sent.lock().unwrap()[0].clone();
        assert_eq!(envelope.kind, "dice_roll");
        assert_eq!(envelope.data["notation"], "1d20+5");
        assert_eq!(envelope.data["purpose"], "stealth");
        assert_eq!(envelope.data["advantage"], true);
        assert_eq!(envelope.data["disadvantage"], false);
        assert!(store.snapshot().messages().is_empty());
    }

    #[test]
    fn bad_notation_is_not_sent() {
        let (store, sent) = recording_store();
        assert!(matches!(
            store.send_dice_roll("fireball", None),
            Err(CommandError::InvalidNotation(_))
        ));
        assert!(matches!(
            store.send_dice_roll("", None),
            Err(CommandError::InvalidNotation(_))
        ));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn initiative_roll_reports_roll_and_total() {
        let (store, sent) = recording_store();
        let result = store.roll_initiative(3).unwrap();
        assert!((4..=23).contains(&result.total));

        let envelope = sent.lock().unwrap()[0].clone();
        assert_eq!(envelope.kind, "initiative_roll");
        assert_eq!(envelope.data["modifier"], 3);
        assert_eq!(envelope.data["total"], result.total);
        assert_eq!(envelope.data["roll"], result.total - 3);
    }

    #[test]
    fn requests_use_their_wire_names() {
        let (store, sent) = recording_store();
        store.advance_turn().unwrap();
        store.request_game_state().unwrap();
        store.request_message_history(Some(25)).unwrap();
        store.request_scene_info().unwrap();

        let sent = sent.lock().unwrap();
        let kinds: Vec<&str> = sent.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(
            kinds,
            ["next_turn", "request_game_state", "request_message_history", "request_scene_info"]
        );
        assert_eq!(sent[2].data["limit"], 25);
    }

    #[test]
    fn initiative_update_sets_order_and_turn() {
        let (store, _) = recording_store();
        store.apply(&decode(
            "initiative_update",
            json!({
                "order": [
                    { "user_id": "u1", "name": "Aria", "initiative": 18 },
                    { "user_id": "u2", "name": "Brom", "initiative": 11 }
                ],
                "current_turn": "u1"
            }),
        ));
        let state = store.snapshot();
        assert_eq!(state.turn_order().len(), 2);
        assert_eq!(state.player("u2").unwrap().initiative, Some(11));
        assert_eq!(state.current_turn(), Some("u1"));
    }

    #[test]
    fn game_state_update_merges_roster_and_scene() {
        let (store, _) = recording_store();
        store.apply(&decode("player_joined", json!({ "user_id": "u1", "username": "ann" })));
        store.apply(&decode(
            "game_state_update",
            json!({
                "scene": "A windswept ridge",
                "players": [{ "user_id": "u1", "current_hp": 7 }],
                "turn_info": { "turn_number": 4 }
            }),
        ));

        let state = store.snapshot();
        assert_eq!(state.scene().description.as_deref(), Some("A windswept ridge"));
        let player = state.player("u1").unwrap();
        assert_eq!(player.label(), "ann");
        assert_eq!(player.current_hp, Some(7));
        assert_eq!(state.turn_number(), Some(4));
    }

    #[test]
    fn history_replaces_log_and_bad_history_is_dropped() {
        let (store, _) = recording_store();
        store.apply(&decode("system", json!({ "message": "stale" })));

        store.apply(&decode(
            "message_history",
            json!({ "messages": [
                { "type": "chat_message", "data": { "content": "one", "sender_name": "a" } },
                { "type": "player_action", "data": { "action": "two", "player_name": "b" } }
            ]}),
        ));
        let contents: Vec<String> = store
            .snapshot()
            .messages()
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, ["one", "two"]);

        let changed = store.apply(&decode(
            "message_history",
            json!({ "messages": [{ "type": "chat_message", "data": { "content": 5 } }] }),
        ));
        assert!(!changed);
        assert_eq!(store.snapshot().messages().len(), 2);
    }

    #[test]
    fn connection_events_update_status_and_log_errors() {
        let (store, _) = recording_store();
        store.apply(&SessionEvent::StateChanged(ConnectionState::Reconnecting));
        assert_eq!(store.snapshot().connection_status(), ConnectionStatus::Reconnecting);

        store.apply(&SessionEvent::Lifecycle(LifecycleEvent::Error {
            kind: crate::infrastructure::websocket::ErrorKind::ReconnectExhausted,
            message: "gave up after 5 attempts".into(),
            terminal: true,
        }));
        let state = store.snapshot();
        let last = state.messages().back().unwrap();
        assert_eq!(last.kind(), MessageKind::System);
        assert!(last.content.contains("gave up"));
    }

    #[test]
    fn attach_routes_dispatched_events() {
        let (store, _) = recording_store();
        let dispatcher = EventDispatcher::new();
        store.attach(&dispatcher);
        let mut rx = store.subscribe();

        dispatcher
            .dispatch_envelope(&Envelope::new("system", json!({ "message": "Welcome" })))
            .unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().messages()[0].content, "Welcome");
    }

    #[test]
    fn reset_keeps_capacity() {
        let (store, _) = recording_store();
        store.apply(&decode("system", json!({ "message": "hi" })));
        store.reset();
        let state = store.snapshot();
        assert!(state.messages().is_empty());
        assert_eq!(state.capacity(), 100);
    }
}
