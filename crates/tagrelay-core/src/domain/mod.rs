//! Domain models for tagrelay.
//!
//! Canonical definitions for the core entities:
//! - `Stage`: deployment environment (`dev`, `prod`)
//! - `GithubRepository`: source repository of an image pipeline
//! - `ImageTag`: the value a build publishes into its tag slot

pub mod error;
pub mod repository;
pub mod stage;
pub mod tag;

pub use error::{RelayError, Result};
pub use repository::GithubRepository;
pub use stage::Stage;
pub use tag::{slot_name_for, ImageTag, DRY_RUN_TAG, TAG_SLOT_LEAF};
