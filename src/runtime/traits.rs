//! Seams between the runtime and the outside world
//!
//! Storage and time sit behind traits so tests can swap in doubles.

use crate::state_machine::ConversationState;
use crate::store::{self, KeyValueStore, LoadOutcome, LoadSource, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Storage for conversation state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the persisted conversation; never fails, falls back per field
    async fn load_state(&self, now: &str) -> LoadOutcome;

    /// Mirror the persisted part of the state
    async fn save_state(&self, state: &ConversationState) -> Result<(), StoreError>;

    /// Erase the conversation, keeping only the id counter of `state`
    async fn purge(&self, state: &ConversationState) -> Result<(), StoreError>;
}

/// Source of wall-clock time for message timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    /// `HH:MM`, the way messages display their time
    fn display_time(&self) -> String {
        self.now().format("%H:%M").to_string()
    }
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    async fn load_state(&self, now: &str) -> LoadOutcome {
        (**self).load_state(now).await
    }

    async fn save_state(&self, state: &ConversationState) -> Result<(), StoreError> {
        (**self).save_state(state).await
    }

    async fn purge(&self, state: &ConversationState) -> Result<(), StoreError> {
        (**self).purge(state).await
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> DateTime<Local> {
        (**self).now()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use any key/value store as `StateStore`
pub struct KvStateStore<K> {
    kv: K,
    /// Set when the last load came from the four-key layout
    legacy_loaded: AtomicBool,
}

impl<K: KeyValueStore> KvStateStore<K> {
    pub fn new(kv: K) -> Self {
        Self {
            kv,
            legacy_loaded: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &K {
        &self.kv
    }
}

#[async_trait]
impl<K: KeyValueStore> StateStore for KvStateStore<K> {
    async fn load_state(&self, now: &str) -> LoadOutcome {
        let outcome = store::load_conversation(&self.kv, now);
        self.legacy_loaded
            .store(outcome.source == LoadSource::Legacy, Ordering::SeqCst);
        outcome
    }

    async fn save_state(&self, state: &ConversationState) -> Result<(), StoreError> {
        store::save_conversation(&self.kv, state)?;
        // The record now supersedes the old keys
        if self.legacy_loaded.swap(false, Ordering::SeqCst) {
            tracing::info!("Migrated conversation from legacy keys");
            store::remove_legacy_keys(&self.kv)?;
        }
        Ok(())
    }

    async fn purge(&self, state: &ConversationState) -> Result<(), StoreError> {
        self.legacy_loaded.store(false, Ordering::SeqCst);
        store::purge_conversation(&self.kv, state.next_message_id)
    }
}

/// Local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}
