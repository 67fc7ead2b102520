//! Slot-State: named parameter slots for tagrelay
//!
//! This crate is the persistence layer of the promotion handshake. A *slot*
//! is a named string parameter: build pipelines write an image tag into it,
//! deploy pipelines poll it until the tag shows up.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: versioned writes, append-only history, backend independence.
//!
//! ## Key Components
//!
//! - `ParameterStore`: the async storage trait every backend implements
//! - `MemoryParameterStore`: in-process fake (tests, `memory` backend)
//! - `SurrealHandle` / `SurrealParameterStore`: SurrealDB-backed slots

mod error;
pub mod fakes;
mod handle;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{SurrealHandle, DEFAULT_LOCAL_PATH};
pub use storage_traits::{
    validate_value, ParameterStore, SlotName, SlotRecord, StorageResult, WriteMetadata,
};
pub use surreal_store::SurrealParameterStore;

/// Result type for slot-state connection operations
pub type Result<T> = std::result::Result<T, StateError>;
