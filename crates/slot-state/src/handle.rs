//! SurrealDB Handle - Connection and Operations
//!
//! Manages the connection and provides the slot operations backing
//! [`crate::SurrealParameterStore`]:
//! - param_get / param_put
//! - param_history / param_delete
//!
//! Supports in-memory (`mem://`) and any URL SurrealDB's `any` engine accepts.

use crate::error::StateError;
use crate::storage_traits::{validate_value, SlotName, SlotRecord, StorageResult, WriteMetadata};
use crate::Result;
use crate::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

const NAMESPACE: &str = "tagrelay";

/// Directory of the embedded database used when no URL is configured.
pub const DEFAULT_LOCAL_PATH: &str = ".tagrelay/slots";
const DATABASE: &str = "slots";

/// SurrealDB connection handle
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbSlotRecord {
    name: String,
    value: String,
    version: u64,
    metadata: WriteMetadata,
    written_at: SurrealDatetime,
}

impl DbSlotRecord {
    fn into_slot_record(self) -> StorageResult<SlotRecord> {
        Ok(SlotRecord {
            name: SlotName::parse(self.name)?,
            value: self.value,
            version: self.version,
            metadata: self.metadata,
            written_at: DateTime::<Utc>::from(self.written_at),
        })
    }
}

impl SurrealHandle {
    /// Connect to SurrealDB in-memory and set up schema
    #[instrument(skip_all)]
    pub async fn setup_db() -> Result<Self> {
        info!("Connecting to SurrealDB (in-memory)");
        Self::connect("mem://").await
    }

    /// Connect to the given endpoint and set up schema
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let db = surrealdb::engine::any::connect(endpoint)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {endpoint}: {e}")))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        let handle = SurrealHandle { db };
        handle.init_schema().await?;

        info!("SurrealDB connected and schema initialized");
        Ok(handle)
    }

    /// Connect to an embedded SurrealKV database under `path`, creating the
    /// directory if needed. Survives the process, so a publisher and a later
    /// waiter on the same host see the same slots.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn setup_local(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {}: {e}",
                path.display()
            ))
        })?;
        Self::connect(&format!("surrealkv://{}", path.display())).await
    }

    /// Connect using environment variables
    ///
    /// If SURREALDB_URL is set, connects to that URL (e.g. `ws://localhost:8000`).
    /// Otherwise uses local persistence in [`DEFAULT_LOCAL_PATH`].
    #[instrument(skip_all)]
    pub async fn setup_from_env() -> Result<Self> {
        match std::env::var("SURREALDB_URL") {
            Ok(url) if !url.trim().is_empty() => {
                info!("SURREALDB_URL found, connecting to {}", url);
                Self::connect(&url).await
            }
            _ => {
                info!("No SURREALDB_URL set, using local persistence in {DEFAULT_LOCAL_PATH}");
                Self::setup_local(Path::new(DEFAULT_LOCAL_PATH)).await
            }
        }
    }

    /// Initialize the database schema
    async fn init_schema(&self) -> Result<()> {
        debug!("Initializing slot schema");

        let schema = r#"
            -- Parameter slots (append-only, one row per write)
            DEFINE TABLE parameters SCHEMAFULL;
            DEFINE FIELD name ON parameters TYPE string;
            DEFINE FIELD value ON parameters TYPE string;
            DEFINE FIELD version ON parameters TYPE int;
            DEFINE FIELD metadata ON parameters FLEXIBLE TYPE object;
            DEFINE FIELD written_at ON parameters TYPE datetime;
            DEFINE INDEX idx_parameter_name ON parameters FIELDS name;
            DEFINE INDEX idx_parameter_name_version ON parameters FIELDS name, version UNIQUE;
        "#;

        self.db
            .query(schema)
            .await
            .map_err(|e| StateError::SchemaSetup(e.to_string()))?;

        debug!("Schema initialized successfully");
        Ok(())
    }

    // ========== Slot Operations ==========

    /// Latest write to a slot.
    #[instrument(skip(self), fields(name = %name))]
    pub async fn param_get(&self, name: &SlotName) -> StorageResult<Option<SlotRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM parameters WHERE name = $name ORDER BY version DESC LIMIT 1")
            .bind(("name", name.as_str().to_string()))
            .await?;

        let rows: Vec<DbSlotRecord> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(DbSlotRecord::into_slot_record)
            .transpose()
    }

    /// Append a write to a slot.
    ///
    /// The unique `(name, version)` index turns a concurrent writer racing for
    /// the same version into a backend error instead of a duplicate version.
    #[instrument(skip(self, value, metadata), fields(name = %name, overwrite))]
    pub async fn param_put(
        &self,
        name: &SlotName,
        value: &str,
        metadata: WriteMetadata,
        overwrite: bool,
    ) -> StorageResult<SlotRecord> {
        validate_value(name, value)?;

        let current = self.param_get(name).await?;
        if !overwrite && current.is_some() {
            return Err(StorageError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let record = DbSlotRecord {
            name: name.as_str().to_string(),
            value: value.to_string(),
            version: current.map(|r| r.version + 1).unwrap_or(1),
            metadata,
            written_at: SurrealDatetime::from(Utc::now()),
        };

        let created: Option<DbSlotRecord> =
            self.db.create("parameters").content(record).await?;

        let created = created
            .ok_or_else(|| StorageError::Backend("failed to create parameter record".to_string()))?;
        debug!(version = created.version, "Parameter written");
        created.into_slot_record()
    }

    /// Full write history (newest first).
    #[instrument(skip(self), fields(name = %name))]
    pub async fn param_history(&self, name: &SlotName) -> StorageResult<Vec<SlotRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM parameters WHERE name = $name ORDER BY version DESC")
            .bind(("name", name.as_str().to_string()))
            .await?;

        let rows: Vec<DbSlotRecord> = result.take(0)?;
        rows.into_iter().map(DbSlotRecord::into_slot_record).collect()
    }

    /// Remove every write to a slot.
    #[instrument(skip(self), fields(name = %name))]
    pub async fn param_delete(&self, name: &SlotName) -> StorageResult<()> {
        if self.param_get(name).await?.is_none() {
            return Err(StorageError::NotFound {
                name: name.to_string(),
            });
        }

        self.db
            .query("DELETE parameters WHERE name = $name")
            .bind(("name", name.as_str().to_string()))
            .await?
            .check()?;

        info!("Parameter deleted");
        Ok(())
    }
}
