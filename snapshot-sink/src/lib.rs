// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Idempotent snapshot persistence: upsert-by-natural-key over a document
//! store. This is the sole write path; repeated delivery of the same logical
//! record never creates duplicates, and concurrent writers converge to one
//! stored document per key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique-index violation raised when a concurrent writer inserted the
    /// same key first. Proves the uniqueness invariant held.
    #[error("duplicate key {key:?} in collection {collection:?}")]
    DuplicateKey { collection: String, key: String },
    /// Any other write fault; not retried within a run.
    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The stored payload already matched (or a concurrent writer won an
    /// insert race). Success either way.
    Unchanged,
}

/// One document per distinct natural key per collection. `inserted_at` is
/// stamped once; `updated_at` reflects the most recent successful upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub natural_key: String,
    pub payload: Value,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable-store seam. Backends must enforce uniqueness on the natural key
/// so racing upserts surface as `DuplicateKey` rather than duplicates.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Atomic update-or-insert keyed on `key_field == key` in `collection`.
    /// Updates merge object fields into the existing payload.
    async fn upsert(
        &self,
        collection: &str,
        key_field: &str,
        key: &str,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn find(&self, collection: &str, key: &str) -> Result<Option<StoredRecord>, StoreError>;
}

/// In-memory backend used by tests and as the standalone default.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, HashMap<String, StoredRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map(|col| col.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(
        &self,
        collection: &str,
        key_field: &str,
        key: &str,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut collections = self.collections.lock();
        let col = collections.entry(collection.to_string()).or_default();
        match col.get_mut(key) {
            Some(existing) => {
                let merged = merge_payload(&existing.payload, &payload);
                let outcome = if merged == existing.payload {
                    UpsertOutcome::Unchanged
                } else {
                    UpsertOutcome::Updated
                };
                existing.payload = merged;
                existing.updated_at = now;
                Ok(outcome)
            }
            None => {
                let mut doc = payload;
                if let Value::Object(map) = &mut doc {
                    map.entry(key_field.to_string())
                        .or_insert_with(|| Value::String(key.to_string()));
                }
                col.insert(
                    key.to_string(),
                    StoredRecord {
                        natural_key: key.to_string(),
                        payload: doc,
                        inserted_at: now,
                        updated_at: now,
                    },
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn find(&self, collection: &str, key: &str) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self
            .collections
            .lock()
            .get(collection)
            .and_then(|col| col.get(key))
            .cloned())
    }
}

fn merge_payload(existing: &Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(new)) => {
            let mut merged = current.clone();
            for (field, value) in new {
                merged.insert(field.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => incoming.clone(),
    }
}

/// The write path a collector job uses: one sink per (collection, key field)
/// pair, wrapping whatever store backs it.
#[derive(Clone)]
pub struct SnapshotSink {
    store: Arc<dyn DocumentStore>,
    collection: String,
    key_field: String,
}

impl SnapshotSink {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str, key_field: &str) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            key_field: key_field.to_string(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Upserts one record. A duplicate-key race from a concurrent run is
    /// mapped to `Unchanged`; the invariant it guards held.
    pub async fn upsert(
        &self,
        key: &str,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        match self
            .store
            .upsert(&self.collection, &self.key_field, key, payload, now)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(StoreError::DuplicateKey { collection, key }) => {
                debug!("{collection}: concurrent insert won for key {key}");
                Ok(UpsertOutcome::Unchanged)
            }
            Err(err) => Err(err),
        }
    }

    /// Upserts a multi-record payload, grouping items by key first so each
    /// key is written at most once per run even when the source delivered it
    /// several times in one response. Later duplicates merge over earlier
    /// ones; first-seen order is preserved.
    pub async fn upsert_grouped(
        &self,
        items: Vec<(String, Value)>,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, UpsertOutcome)>, StoreError> {
        let mut grouped: Vec<(String, Value)> = Vec::with_capacity(items.len());
        for (key, payload) in items {
            if let Some(slot) = grouped.iter_mut().find(|(existing, _)| *existing == key) {
                slot.1 = merge_payload(&slot.1, &payload);
            } else {
                grouped.push((key, payload));
            }
        }
        let mut outcomes = Vec::with_capacity(grouped.len());
        for (key, payload) in grouped {
            let outcome = self.upsert(&key, payload, now).await?;
            outcomes.push((key, outcome));
        }
        Ok(outcomes)
    }
}
