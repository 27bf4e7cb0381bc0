//! Player entity - one roster entry, keyed by the server's user id

use serde::{Deserialize, Serialize};

/// A participant in the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Identity key; unique within the roster
    pub user_id: String,
    pub character_id: Option<String>,
    pub display_name: String,
    pub character_name: Option<String>,
    pub is_online: bool,
    pub initiative: Option<i32>,
    pub current_hp: Option<i32>,
    pub max_hp: Option<i32>,
}

impl Player {
    /// Create an online player with no character data
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            character_id: None,
            display_name: display_name.into(),
            character_name: None,
            is_online: true,
            initiative: None,
            current_hp: None,
            max_hp: None,
        }
    }

    /// Placeholder entry for an id seen before any roster data arrived.
    /// The display name falls back to the id.
    pub fn unknown_offline(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            display_name: user_id.clone(),
            is_online: false,
            ..Self::new(user_id, String::new())
        }
    }

    /// Build a new entry from an update, defaulting missing fields.
    pub fn from_update(user_id: impl Into<String>, update: &PlayerUpdate) -> Self {
        let mut player = Self::unknown_offline(user_id);
        player.is_online = update.is_online.unwrap_or(true);
        player.apply(update);
        player
    }

    /// Merge the fields present in `update`. Returns true if anything changed.
    pub fn apply(&mut self, update: &PlayerUpdate) -> bool {
        let before = self.clone();
        if let Some(name) = update.display_name.as_deref().filter(|n| !n.is_empty()) {
            self.display_name = name.to_string();
        }
        if let Some(id) = &update.character_id {
            self.character_id = Some(id.clone());
        }
        if let Some(name) = &update.character_name {
            self.character_name = Some(name.clone());
        }
        if let Some(online) = update.is_online {
            self.is_online = online;
        }
        if let Some(initiative) = update.initiative {
            self.initiative = Some(initiative);
        }
        if let Some(hp) = update.current_hp {
            self.current_hp = Some(hp);
        }
        if let Some(hp) = update.max_hp {
            self.max_hp = Some(hp);
        }
        *self != before
    }

    /// Name shown in logs: the character name when known
    pub fn label(&self) -> &str {
        self.character_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.display_name)
    }
}

/// Partial player data; `None` means "leave unchanged"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    pub display_name: Option<String>,
    pub character_id: Option<String>,
    pub character_name: Option<String>,
    pub is_online: Option<bool>,
    pub initiative: Option<i32>,
    pub current_hp: Option<i32>,
    pub max_hp: Option<i32>,
}

impl PlayerUpdate {
    pub fn online(is_online: bool) -> Self {
        Self {
            is_online: Some(is_online),
            ..Self::default()
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// One slot in the turn order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeEntry {
    pub user_id: String,
    pub name: String,
    pub initiative: i32,
}
