//! Cloud replica plumbing: remote change records and the merge bridge.
//!
//! # Responsibility
//! - Describe changes the cloud mirror downloaded for this store.
//! - Deliver remote-change notifications into the view context.
//!
//! # Invariants
//! - The transport is external; this module never talks to the network.
//! - Remote merges never republish the notes snapshot by themselves.

mod bridge;

pub use bridge::{ChangeNotificationBridge, MergeHook};

use crate::model::note::{Note, NoteField, NoteId};
use crate::store::ChangeSet;

/// One record-level change downloaded from the cloud replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRecordChange {
    /// Insert `note`, or overwrite only `fields` of the existing row.
    Upsert { note: Note, fields: Vec<NoteField> },
    Delete { id: NoteId },
}

impl RemoteRecordChange {
    /// Upsert that replaces every property of the row.
    pub fn full(note: Note) -> Self {
        Self::Upsert {
            note,
            fields: NoteField::ALL.to_vec(),
        }
    }

    /// Upsert that only overwrites `fields` when the row already exists.
    pub fn partial(note: Note, fields: impl IntoIterator<Item = NoteField>) -> Self {
        Self::Upsert {
            note,
            fields: fields.into_iter().collect(),
        }
    }

    pub fn delete(id: NoteId) -> Self {
        Self::Delete { id }
    }
}

/// Posted by the record store after a remote import commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChangeNotification {
    pub container_name: String,
    pub cloud_container_id: Option<String>,
    pub change_set: ChangeSet,
}
