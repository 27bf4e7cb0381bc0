//! Storage Port - persisted key/value strings (credentials live here)

/// Key/value storage abstraction
///
/// Values are opaque strings; callers own their encoding (usually JSON).
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait StorageProvider: Send + Sync {
    /// Save a string value with the given key
    fn save(&self, key: &str, value: &str);

    /// Load a string value by key, returns None if not found
    fn load(&self, key: &str) -> Option<String>;

    /// Remove a value by key
    fn remove(&self, key: &str);
}
