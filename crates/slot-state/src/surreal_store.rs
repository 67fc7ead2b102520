use std::sync::Arc;

use async_trait::async_trait;

use crate::storage_traits::{ParameterStore, SlotName, SlotRecord, StorageResult, WriteMetadata};
use crate::SurrealHandle;

/// SurrealDB-backed implementation of the ParameterStore trait.
#[derive(Clone)]
pub struct SurrealParameterStore {
    handle: Arc<SurrealHandle>,
}

impl SurrealParameterStore {
    pub fn new(handle: Arc<SurrealHandle>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl ParameterStore for SurrealParameterStore {
    async fn get(&self, name: &SlotName) -> StorageResult<Option<SlotRecord>> {
        self.handle.param_get(name).await
    }

    async fn put(
        &self,
        name: &SlotName,
        value: &str,
        metadata: WriteMetadata,
        overwrite: bool,
    ) -> StorageResult<SlotRecord> {
        self.handle.param_put(name, value, metadata, overwrite).await
    }

    async fn history(&self, name: &SlotName) -> StorageResult<Vec<SlotRecord>> {
        self.handle.param_history(name).await
    }

    async fn delete(&self, name: &SlotName) -> StorageResult<()> {
        self.handle.param_delete(name).await
    }
}
