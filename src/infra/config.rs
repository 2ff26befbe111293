//! Per-operation configuration instance.
//!
//! One `Settings` value is created at call entry (or supplied by the caller
//! for controlled sharing across a batch) and travels through the pipeline
//! context. It is never a process-wide singleton: two operations running
//! concurrently each own their store and cannot observe each other's
//! mutations.

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::profile::Profile;

/// Isolated, mutable, insertion-ordered key/value store.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: IndexMap<String, serde_json::Value>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from a resolved profile so stages can read the policy
    /// that produced their input without re-resolving layers.
    pub fn from_profile(profile: &Profile) -> Self {
        let mut settings = Self::new();
        settings.set("profile", profile);
        settings
    }

    /// Store a serializable value under `key`, replacing any previous value.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(v) => {
                self.values.insert(key, v);
            }
            Err(err) => {
                tracing::warn!(key = %key, %err, "dropping unserializable setting");
            }
        }
    }

    /// Typed read; `None` when absent or the stored shape does not fit `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Typed read with a fallback.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        self.get(key).unwrap_or(fallback)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.values.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keys in insertion order (diagnostics).
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
