//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryParameterStore`, which satisfies the `ParameterStore`
//! contract without any external dependencies. The CLI also uses it for the
//! `memory` backend.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory parameter store backed by a `HashMap<name, Vec<SlotRecord>>`.
///
/// Each slot maps to its full write history (newest last internally).
#[derive(Debug, Default)]
pub struct MemoryParameterStore {
    slots: Mutex<HashMap<String, Vec<SlotRecord>>>,
}

impl MemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct slots currently held.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ParameterStore for MemoryParameterStore {
    async fn get(&self, name: &SlotName) -> StorageResult<Option<SlotRecord>> {
        let slots = self.slots.lock().unwrap();
        Ok(slots.get(name.as_str()).and_then(|h| h.last().cloned()))
    }

    async fn put(
        &self,
        name: &SlotName,
        value: &str,
        metadata: WriteMetadata,
        overwrite: bool,
    ) -> StorageResult<SlotRecord> {
        validate_value(name, value)?;

        let mut slots = self.slots.lock().unwrap();
        let history = slots.entry(name.as_str().to_string()).or_default();
        if !overwrite && !history.is_empty() {
            return Err(StorageError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let version = history.last().map(|r| r.version + 1).unwrap_or(1);
        let record = SlotRecord {
            name: name.clone(),
            value: value.to_string(),
            version,
            metadata,
            written_at: Utc::now(),
        };
        history.push(record.clone());
        Ok(record)
    }

    async fn history(&self, name: &SlotName) -> StorageResult<Vec<SlotRecord>> {
        let slots = self.slots.lock().unwrap();
        let mut history = slots.get(name.as_str()).cloned().unwrap_or_default();
        history.reverse(); // newest first
        Ok(history)
    }

    async fn delete(&self, name: &SlotName) -> StorageResult<()> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .remove(name.as_str())
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound {
                name: name.to_string(),
            })
    }
}
