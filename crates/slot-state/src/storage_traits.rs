//! Storage trait definitions for tagrelay
//!
//! A slot is a named, versioned string parameter:
//! - `SlotName`: validated hierarchical name (`/pipeline/dev/SubPipes/Api/EcrTag`)
//! - `SlotRecord`: one write to a slot
//! - `ParameterStore`: get/put/history/delete over slots
//!
//! The trait is async and backend-agnostic. An in-memory fake lives in the
//! `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Longest name accepted by hierarchical parameter stores.
const MAX_NAME_LEN: usize = 1011;

// ---------------------------------------------------------------------------
// SlotName
// ---------------------------------------------------------------------------

/// Validated slot name.
///
/// The inner field is private so every `SlotName` has passed [`SlotName::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotName(String);

impl SlotName {
    /// Validate and wrap a slot name.
    pub fn parse(name: impl Into<String>) -> StorageResult<Self> {
        let name = name.into();
        let invalid = |reason: &str| StorageError::InvalidName {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if !name.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(invalid("longer than 1011 characters"));
        }
        if name.ends_with('/') {
            return Err(invalid("must not end with '/'"));
        }
        if name.contains("//") {
            return Err(invalid("contains an empty path segment"));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '.' | '-')))
        {
            return Err(invalid(&format!("character '{c}' is not allowed")));
        }

        Ok(SlotName(name))
    }

    /// Return the full name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment (`EcrTag` for `/app/dev/EcrTag`).
    pub fn leaf(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl TryFrom<String> for SlotName {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        SlotName::parse(s)
    }
}

impl From<SlotName> for String {
    fn from(name: SlotName) -> Self {
        name.0
    }
}

impl std::str::FromStr for SlotName {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SlotName::parse(s)
    }
}

impl std::fmt::Display for SlotName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Metadata attached to every write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteMetadata {
    /// Who or what wrote the value (pipeline name, user)
    pub written_by: String,
    /// Source revision the value was derived from, if any
    pub source_version: Option<String>,
    /// Free-form note
    pub note: Option<String>,
}

impl WriteMetadata {
    pub fn by(written_by: impl Into<String>) -> Self {
        Self {
            written_by: written_by.into(),
            ..Self::default()
        }
    }

    pub fn with_source_version(mut self, source_version: impl Into<String>) -> Self {
        self.source_version = Some(source_version.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// A single write to a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    /// Slot this write belongs to
    pub name: SlotName,
    /// Value written
    pub value: String,
    /// 1 for the first write, +1 for each later one
    pub version: u64,
    /// Write metadata
    pub metadata: WriteMetadata,
    /// When the write happened
    pub written_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ParameterStore
// ---------------------------------------------------------------------------

/// Named parameter store.
///
/// Semantics:
/// - `put` creates the slot at version 1 or bumps the version by one.
/// - `put` with `overwrite == false` fails with `AlreadyExists` on an
///   existing slot.
/// - Empty values are rejected.
/// - `history` returns every write, newest first.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Current value of a slot, `None` if it was never written.
    async fn get(&self, name: &SlotName) -> StorageResult<Option<SlotRecord>>;

    /// Write a value.
    async fn put(
        &self,
        name: &SlotName,
        value: &str,
        metadata: WriteMetadata,
        overwrite: bool,
    ) -> StorageResult<SlotRecord>;

    /// All writes to a slot (newest first). Empty for unknown slots.
    async fn history(&self, name: &SlotName) -> StorageResult<Vec<SlotRecord>>;

    /// Remove a slot and its history. Fails with `NotFound` if absent.
    async fn delete(&self, name: &SlotName) -> StorageResult<()>;
}

/// Reject values a parameter store would refuse.
pub fn validate_value(name: &SlotName, value: &str) -> StorageResult<()> {
    if value.is_empty() {
        return Err(StorageError::Backend(format!(
            "refusing to write empty value to {name}"
        )));
    }
    Ok(())
}
