//! Persisted credentials
//!
//! The three tokens are written as one small JSON document:
//!
//! ```json
//! {"access_token": "...", "refresh_token": "...", "id_token": "..."}
//! ```
//!
//! A set is written whole or not at all, and a document missing any of the
//! three is treated as "no usable context". Expiry is not stored; a loaded
//! token is considered expired and gets refreshed before first use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::auth::Token;
use crate::error::StoreError;

/// Document key of the credential set
pub const CONTEXT_KEY: &str = "context";

/// Durable storage for small text documents (flash key-value, files)
pub trait DocumentStore {
    fn load(&mut self, key: &str) -> anyhow::Result<Option<String>>;
    fn save(&mut self, key: &str, document: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

/// Volatile document store. Clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn get(&self, key: &str) -> Option<String> {
        self.documents.lock().ok()?.get(key).cloned()
    }

    pub fn insert(&self, key: &str, document: &str) {
        if let Ok(mut documents) = self.documents.lock() {
            documents.insert(key.to_string(), document.to_string());
        }
    }
}

impl DocumentStore for MemoryStore {
    fn load(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        let documents = self
            .documents
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(documents.get(key).cloned())
    }

    fn save(&mut self, key: &str, document: &str) -> anyhow::Result<()> {
        self.documents
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?
            .insert(key.to_string(), document.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.documents
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?
            .remove(key);
        Ok(())
    }
}

/// A complete credential set as read back from storage
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct StoredCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
}

#[derive(Serialize)]
struct ContextDocument<'a> {
    access_token: &'a str,
    refresh_token: &'a str,
    id_token: &'a str,
}

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
struct PartialContextDocument {
    access_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
}

/// Loads and saves the credential set over a [`DocumentStore`]
pub struct CredentialStore<S> {
    documents: S,
}

impl<S: DocumentStore> CredentialStore<S> {
    pub fn new(documents: S) -> Self {
        Self { documents }
    }

    /// Read back a complete credential set, if one was saved
    pub fn load(&mut self) -> Result<Option<StoredCredentials>, StoreError> {
        let Some(raw) = self
            .documents
            .load(CONTEXT_KEY)
            .map_err(|e| StoreError::Storage(format!("{:#}", e)))?
        else {
            debug!("No stored context");
            return Ok(None);
        };

        let mut document: PartialContextDocument = match serde_json::from_str(&raw) {
            Ok(document) => document,
            Err(e) => {
                warn!("Stored context unreadable: {}", e);
                return Ok(None);
            }
        };

        match (
            document.access_token.take(),
            document.refresh_token.take(),
            document.id_token.take(),
        ) {
            (Some(access_token), Some(refresh_token), Some(id_token)) => {
                info!("Loaded stored context");
                Ok(Some(StoredCredentials {
                    access_token,
                    refresh_token,
                    id_token,
                }))
            }
            (access, refresh, id) => {
                let present = [access.is_some(), refresh.is_some(), id.is_some()]
                    .iter()
                    .filter(|known| **known)
                    .count();
                warn!("Stored context has {} of 3 tokens, ignoring", present);
                Ok(None)
            }
        }
    }

    /// Persist the token set; refuses sets with an unknown token
    pub fn save(&mut self, token: &Token) -> Result<(), StoreError> {
        if !token.is_complete() {
            return Err(StoreError::Incomplete);
        }
        let mut document = serde_json::to_string(&ContextDocument {
            access_token: token.access_token(),
            refresh_token: token.refresh_token(),
            id_token: token.id_token(),
        })
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let result = self
            .documents
            .save(CONTEXT_KEY, &document)
            .map_err(|e| StoreError::Storage(format!("{:#}", e)));
        document.zeroize();
        result?;
        debug!("Saved context");
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.documents
            .remove(CONTEXT_KEY)
            .map_err(|e| StoreError::Storage(format!("{:#}", e)))?;
        info!("Removed stored context");
        Ok(())
    }

    /// Underlying storage, for documents other than credentials
    pub fn documents_mut(&mut self) -> &mut S {
        &mut self.documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> Token {
        Token::new("A1".into(), "R1".into(), "I1".into(), 5_000)
    }

    #[test]
    fn test_round_trip_keeps_strings() {
        let memory = MemoryStore::default();
        let mut store = CredentialStore::new(memory.clone());
        store.save(&token()).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, "A1");
        assert_eq!(loaded.refresh_token, "R1");
        assert_eq!(loaded.id_token, "I1");

        // exactly the three string fields, no expiry
        let raw: serde_json::Value = serde_json::from_str(&memory.get(CONTEXT_KEY).unwrap()).unwrap();
        assert_eq!(raw.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_incomplete_token_never_written() {
        let memory = MemoryStore::default();
        let mut store = CredentialStore::new(memory.clone());
        let partial = Token::new("A1".into(), "R1".into(), String::new(), 5_000);

        assert_eq!(store.save(&partial), Err(StoreError::Incomplete));
        assert!(memory.get(CONTEXT_KEY).is_none());
    }

    #[test]
    fn test_two_of_three_is_no_context() {
        let memory = MemoryStore::default();
        memory.insert(CONTEXT_KEY, r#"{"access_token":"A","refresh_token":"R","id_token":null}"#);
        let mut store = CredentialStore::new(memory);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_garbage_is_no_context() {
        let memory = MemoryStore::default();
        memory.insert(CONTEXT_KEY, "not json");
        let mut store = CredentialStore::new(memory);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_clear_removes_document() {
        let memory = MemoryStore::default();
        let mut store = CredentialStore::new(memory.clone());
        store.save(&token()).unwrap();
        store.clear().unwrap();
        assert!(memory.get(CONTEXT_KEY).is_none());
        assert_eq!(store.load().unwrap(), None);
    }
}
