//! Durable-store contract.
//!
//! The core only relies on get/put/conditional-insert/delete over JSON
//! values; the engine behind it is a deployment choice. The
//! conditional insert must be atomic with respect to concurrent
//! callers on the same key — it backs both transaction uniqueness and
//! webhook dedup.

pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::Provider;
use crate::error::CoreError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        CoreError::Store(err.to_string())
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Inserts only if the key is absent; returns whether the insert
    /// won. Single atomic operation, never a read-then-write.
    async fn conditional_insert(&self, key: &str, value: Value) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Key layout shared by every component that touches the store.
pub mod keys {
    use super::*;

    pub fn transaction(external_reference: &str) -> String {
        format!("tx:{}", external_reference)
    }

    pub fn transaction_id(id: &Uuid) -> String {
        format!("txid:{}", id)
    }

    pub fn provider_transaction(provider: Provider, provider_transaction_id: &str) -> String {
        format!("ptid:{}:{}", provider, provider_transaction_id)
    }

    pub fn webhook_event(provider: Provider, event_id: &str) -> String {
        format!("wh:{}:{}", provider, event_id)
    }

    pub fn lease(external_reference: &str) -> String {
        format!("lease:{}", external_reference)
    }

    pub fn audit(id: &Uuid) -> String {
        format!("audit:{}", id)
    }
}

/// In-process store for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn conditional_insert(&self, key: &str, value: Value) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
