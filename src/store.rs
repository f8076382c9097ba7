//! Device key/value storage for the conversation
//!
//! The conversation lives under one versioned JSON record. Older installs
//! kept four independent keys; those are still read when no record exists.

mod memory;
pub mod schema;
mod sqlite;

pub use memory::MemoryKvStore;
pub use schema::{LoadOutcome, LoadSource, COUNTER_KEY, RECORD_KEY, SCHEMA_VERSION};
pub use sqlite::SqliteKvStore;

use crate::state_machine::ConversationState;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to encode conversation: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable string key/value storage scoped to the device
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Removing a missing key is not an error
    fn remove(&self, key: &str) -> StoreResult<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        (**self).remove(key)
    }
}

/// Read the conversation back, defaulting field by field
pub fn load_conversation(store: &dyn KeyValueStore, now: &str) -> LoadOutcome {
    let mut outcome = load_record_or_legacy(store, now);

    match store.get(COUNTER_KEY) {
        Ok(Some(raw)) => schema::apply_counter(&mut outcome, &raw),
        Ok(None) => {}
        Err(err) => outcome
            .warnings
            .push(format!("failed to read {COUNTER_KEY}: {err}")),
    }
    outcome
}

fn load_record_or_legacy(store: &dyn KeyValueStore, now: &str) -> LoadOutcome {
    let mut warnings = Vec::new();

    match store.get(RECORD_KEY) {
        Ok(Some(raw)) => match schema::decode_record(&raw, now) {
            Ok(mut outcome) => {
                outcome.warnings.splice(0..0, warnings);
                return outcome;
            }
            Err(err) => warnings.push(err),
        },
        Ok(None) => {}
        Err(err) => warnings.push(format!("failed to read {RECORD_KEY}: {err}")),
    }

    let mut outcome = schema::decode_legacy(|key| store.get(key), now);
    outcome.warnings.splice(0..0, warnings);
    outcome
}

/// Write the persisted part of `state` as one record
pub fn save_conversation(store: &dyn KeyValueStore, state: &ConversationState) -> StoreResult<()> {
    let record = schema::ConversationRecord::from_state(state);
    let encoded = serde_json::to_string(&record)?;
    store.set(RECORD_KEY, &encoded)
}

/// Remove the record and every legacy key, keeping only the id counter
pub fn purge_conversation(store: &dyn KeyValueStore, next_message_id: u64) -> StoreResult<()> {
    store.set(COUNTER_KEY, &next_message_id.to_string())?;
    store.remove(RECORD_KEY)?;
    remove_legacy_keys(store)
}

pub fn remove_legacy_keys(store: &dyn KeyValueStore) -> StoreResult<()> {
    for key in schema::LEGACY_KEYS {
        store.remove(key)?;
    }
    Ok(())
}
