// src/store/mod.rs
//! Per-device, per-user durable store
//!
//! Every document is a JSON value addressed by a string key. Collections are
//! read whole, mutated in memory and written back whole. That is safe while a
//! single task drives the engine, but two processes sharing one store can lose
//! each other's writes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub mod file;

pub use file::FileStore;

/// Errors raised by a store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Document '{key}' has an unexpected shape: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Key namespace, scoped by owner name and peer username
pub mod keys {
    pub fn hangouts(owner: &str) -> String {
        format!("{}-hangouts", owner)
    }

    pub fn offline_hangouts(owner: &str) -> String {
        format!("{}-offline-hangouts", owner)
    }

    pub fn messages(owner: &str, peer: &str) -> String {
        format!("{}-{}-messages", owner, peer)
    }

    pub fn offline_messages(owner: &str, peer: &str) -> String {
        format!("{}-{}-offline-messages", owner, peer)
    }

    pub fn unread_hangouts(owner: &str) -> String {
        format!("{}-unread-hangouts", owner)
    }
}

/// Online records are live; offline records wait for the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Online,
    Offline,
}

impl Namespace {
    pub fn hangouts_key(self, owner: &str) -> String {
        match self {
            Namespace::Online => keys::hangouts(owner),
            Namespace::Offline => keys::offline_hangouts(owner),
        }
    }

    pub fn messages_key(self, owner: &str, peer: &str) -> String {
        match self {
            Namespace::Online => keys::messages(owner, peer),
            Namespace::Offline => keys::offline_messages(owner, peer),
        }
    }
}

pub trait PersistentStore: Send {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Typed, collection-aware access on top of any store
pub trait PersistentStoreExt: PersistentStore {
    /// Absent documents read as an empty collection
    fn load_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, StoreError> {
        match self.get(key)? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value).map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn save_list<T: Serialize>(&self, key: &str, items: &[T]) -> Result<(), StoreError> {
        self.set(key, serde_json::to_value(items)?)
    }
}

impl<S: PersistentStore + ?Sized> PersistentStoreExt for S {}

/// In-memory store; clones share the same documents
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    docs: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        match self.docs.lock() {
            Ok(docs) => {
                let mut keys: Vec<String> = docs.keys().cloned().collect();
                keys.sort();
                keys
            }
            Err(_) => Vec::new(),
        }
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let docs = self.docs.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(docs.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().map_err(|_| StoreError::Poisoned)?;
        docs.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().map_err(|_| StoreError::Poisoned)?;
        docs.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_namespace() {
        assert_eq!(keys::hangouts("alice"), "alice-hangouts");
        assert_eq!(keys::offline_hangouts("alice"), "alice-offline-hangouts");
        assert_eq!(keys::messages("alice", "bob"), "alice-bob-messages");
        assert_eq!(keys::offline_messages("alice", "bob"), "alice-bob-offline-messages");
        assert_eq!(keys::unread_hangouts("alice"), "alice-unread-hangouts");
        assert_eq!(Namespace::Offline.hangouts_key("alice"), "alice-offline-hangouts");
    }

    #[test]
    fn test_missing_collection_reads_empty() {
        let store = MemoryStore::new();
        let items: Vec<String> = store.load_list("nobody-hangouts").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_wrong_shape_is_reported() {
        let store = MemoryStore::new();
        store.set("alice-hangouts", serde_json::json!({"not": "a list"})).unwrap();
        let result: Result<Vec<String>, _> = store.load_list("alice-hangouts");
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_clones_share_documents() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.save_list("k", &["a".to_string(), "b".to_string()]).unwrap();
        let items: Vec<String> = other.load_list("k").unwrap();
        assert_eq!(items, vec!["a", "b"]);

        other.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }
}
