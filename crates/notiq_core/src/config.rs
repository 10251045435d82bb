//! Record store configuration.
//!
//! # Responsibility
//! - Describe where and how the record store persists notes.
//! - Fix the cloud replica identifier and merge policy at construction time.
//!
//! # Invariants
//! - A description is immutable once handed to `RecordStore::open`.

use crate::store::MergePolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_CONTAINER_NAME: &str = "NotesContainer";

/// Backing location for the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreLocation {
    /// SQLite file at `path`, created on first open.
    File { path: PathBuf },
    /// Private in-memory database, discarded with the store.
    InMemory,
}

/// Persistent store description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDescription {
    #[serde(default = "default_container_name")]
    pub container_name: String,
    /// Cloud replica container identifier, e.g. `iCloud.NotiqTeam.notiq`.
    #[serde(default)]
    pub cloud_container_id: Option<String>,
    pub location: StoreLocation,
    #[serde(default)]
    pub merge_policy: MergePolicy,
}

impl StoreDescription {
    /// File-backed description with default container name and merge policy.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            container_name: default_container_name(),
            cloud_container_id: None,
            location: StoreLocation::File { path: path.into() },
            merge_policy: MergePolicy::default(),
        }
    }

    /// In-memory description used by tests and previews.
    pub fn in_memory() -> Self {
        Self {
            container_name: default_container_name(),
            cloud_container_id: None,
            location: StoreLocation::InMemory,
            merge_policy: MergePolicy::default(),
        }
    }

    pub fn with_cloud_container(mut self, container_id: impl Into<String>) -> Self {
        self.cloud_container_id = Some(container_id.into());
        self
    }

    pub fn with_merge_policy(mut self, merge_policy: MergePolicy) -> Self {
        self.merge_policy = merge_policy;
        self
    }

    /// Parses a description from its JSON form.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.location, StoreLocation::InMemory)
    }
}

fn default_container_name() -> String {
    DEFAULT_CONTAINER_NAME.to_string()
}
