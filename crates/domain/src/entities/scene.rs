//! Scene entity - the current narrative setting

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The scene as last reported by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub image_url: Option<String>,
    /// Fields the client does not model, kept as display text
    pub extra: BTreeMap<String, String>,
}

/// Partial scene data; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub image_url: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl SceneUpdate {
    /// A bare text scene (the server sometimes sends the scene as one string)
    pub fn description(text: impl Into<String>) -> Self {
        Self {
            description: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.image_url.is_none()
            && self.extra.is_empty()
    }
}

impl Scene {
    /// Replace the fields present in `update`. Returns true if anything changed.
    pub fn apply(&mut self, update: &SceneUpdate) -> bool {
        let before = self.clone();
        let fields = [
            (&mut self.title, &update.title),
            (&mut self.description, &update.description),
            (&mut self.location, &update.location),
            (&mut self.image_url, &update.image_url),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                *field = Some(value.clone());
            }
        }
        for (key, value) in &update.extra {
            self.extra.insert(key.clone(), value.clone());
        }
        *self != before
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_keeps_absent_fields() {
        let mut scene = Scene {
            title: Some("The Crossroads".into()),
            description: Some("Fog rolls in.".into()),
            ..Scene::default()
        };

        let changed = scene.apply(&SceneUpdate {
            location: Some("Old Mill".into()),
            ..SceneUpdate::default()
        });

        assert!(changed);
        assert_eq!(scene.title.as_deref(), Some("The Crossroads"));
        assert_eq!(scene.description.as_deref(), Some("Fog rolls in."));
        assert_eq!(scene.location.as_deref(), Some("Old Mill"));
    }

    #[test]
    fn empty_update_is_a_no_op() {
        let mut scene = Scene::default();
        let update = SceneUpdate::default();
        assert!(update.is_empty());
        assert!(!scene.apply(&update));
        assert!(scene.is_empty());
    }

    #[test]
    fn extra_fields_merge() {
        let mut scene = Scene::default();
        let mut update = SceneUpdate::description("A dark cave");
        update.extra.insert("weather".into(), "rain".into());
        scene.apply(&update);
        assert_eq!(scene.extra.get("weather").map(String::as_str), Some("rain"));
        assert_eq!(scene.description.as_deref(), Some("A dark cave"));
    }
}
