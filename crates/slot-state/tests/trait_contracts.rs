//! Trait contract tests for ParameterStore.
//!
//! Every case is written against `&dyn ParameterStore` and run against each
//! backend: the in-memory fake and SurrealDB (`mem://`).

use std::sync::Arc;

use slot_state::fakes::MemoryParameterStore;
use slot_state::storage_traits::*;
use slot_state::{StorageError, SurrealHandle, SurrealParameterStore};

fn slot(name: &str) -> SlotName {
    SlotName::parse(name).unwrap()
}

async fn surreal_store() -> SurrealParameterStore {
    let handle = SurrealHandle::setup_db().await.unwrap();
    SurrealParameterStore::new(Arc::new(handle))
}

mod contract {
    use super::*;

    pub async fn get_unknown_slot_is_none(store: &dyn ParameterStore) {
        let value = store.get(&slot("/app/dev/EcrTag")).await.unwrap();
        assert!(value.is_none());
    }

    pub async fn first_put_is_version_one(store: &dyn ParameterStore) {
        let name = slot("/app/dev/EcrTag");

        let record = store
            .put(&name, "none", WriteMetadata::by("provision"), false)
            .await
            .unwrap();

        assert_eq!(record.version, 1);
        assert_eq!(record.value, "none");
        assert_eq!(record.name, name);
    }

    pub async fn overwrite_bumps_version_and_get_returns_latest(store: &dyn ParameterStore) {
        let name = slot("/app/dev/EcrTag");

        store
            .put(&name, "none", WriteMetadata::by("provision"), false)
            .await
            .unwrap();
        let second = store
            .put(
                &name,
                "abc1234",
                WriteMetadata::by("build").with_source_version("abc1234def"),
                true,
            )
            .await
            .unwrap();

        assert_eq!(second.version, 2);
        let current = store.get(&name).await.unwrap().unwrap();
        assert_eq!(current.value, "abc1234");
        assert_eq!(current.metadata.source_version.as_deref(), Some("abc1234def"));
    }

    pub async fn put_without_overwrite_fails_on_existing_slot(store: &dyn ParameterStore) {
        let name = slot("/app/dev/EcrTag");

        store
            .put(&name, "none", WriteMetadata::by("provision"), false)
            .await
            .unwrap();
        let err = store
            .put(&name, "abc1234", WriteMetadata::by("build"), false)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        let current = store.get(&name).await.unwrap().unwrap();
        assert_eq!(current.value, "none");
    }

    pub async fn empty_value_is_rejected(store: &dyn ParameterStore) {
        let name = slot("/app/dev/EcrTag");

        let err = store
            .put(&name, "", WriteMetadata::by("build"), true)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Backend(_)));
        assert!(store.get(&name).await.unwrap().is_none());
    }

    pub async fn absent_metadata_fields_round_trip(store: &dyn ParameterStore) {
        let name = slot("/app/dev/EcrTag");

        store
            .put(&name, "none", WriteMetadata::default(), false)
            .await
            .unwrap();

        let current = store.get(&name).await.unwrap().unwrap();
        assert_eq!(current.metadata, WriteMetadata::default());
        assert!(current.metadata.source_version.is_none());
        assert!(current.metadata.note.is_none());
    }

    pub async fn history_is_newest_first(store: &dyn ParameterStore) {
        let name = slot("/app/dev/EcrTag");

        for value in ["none", "aaaaaaa", "bbbbbbb"] {
            store
                .put(&name, value, WriteMetadata::by("ci"), true)
                .await
                .unwrap();
        }

        let history = store.history(&name).await.unwrap();
        let values: Vec<&str> = history.iter().map(|r| r.value.as_str()).collect();
        assert_eq!(values, vec!["bbbbbbb", "aaaaaaa", "none"]);
        let versions: Vec<u64> = history.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![3, 2, 1]);
    }

    pub async fn history_of_unknown_slot_is_empty(store: &dyn ParameterStore) {
        let history = store.history(&slot("/missing")).await.unwrap();
        assert!(history.is_empty());
    }

    pub async fn slots_are_independent(store: &dyn ParameterStore) {
        let dev = slot("/app/dev/EcrTag");
        let prod = slot("/app/prod/EcrTag");

        store
            .put(&dev, "devtag1", WriteMetadata::by("ci"), true)
            .await
            .unwrap();

        assert!(store.get(&prod).await.unwrap().is_none());
        assert!(store.history(&prod).await.unwrap().is_empty());
    }

    pub async fn delete_removes_slot_and_history(store: &dyn ParameterStore) {
        let name = slot("/app/dev/EcrTag");

        store
            .put(&name, "none", WriteMetadata::by("provision"), false)
            .await
            .unwrap();
        store.delete(&name).await.unwrap();

        assert!(store.get(&name).await.unwrap().is_none());
        assert!(store.history(&name).await.unwrap().is_empty());

        // A re-created slot starts over at version 1.
        let record = store
            .put(&name, "none", WriteMetadata::by("provision"), false)
            .await
            .unwrap();
        assert_eq!(record.version, 1);
    }

    pub async fn delete_unknown_slot_is_not_found(store: &dyn ParameterStore) {
        let err = store.delete(&slot("/missing")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }
}

macro_rules! contract_suite {
    ($backend:ident, $store:expr) => {
        mod $backend {
            use super::*;

            contract_suite!(@cases $store;
                get_unknown_slot_is_none,
                first_put_is_version_one,
                overwrite_bumps_version_and_get_returns_latest,
                put_without_overwrite_fails_on_existing_slot,
                empty_value_is_rejected,
                absent_metadata_fields_round_trip,
                history_is_newest_first,
                history_of_unknown_slot_is_empty,
                slots_are_independent,
                delete_removes_slot_and_history,
                delete_unknown_slot_is_not_found,
            );
        }
    };
    (@cases $store:expr; $($case:ident),+ $(,)?) => {
        $(
            #[tokio::test]
            async fn $case() {
                let store = $store;
                contract::$case(&store).await;
            }
        )+
    };
}

contract_suite!(memory, MemoryParameterStore::new());
contract_suite!(surreal, surreal_store().await);
