//! Record store: the single source of truth for note records.
//!
//! # Responsibility
//! - Own the SQLite backing store and its description (location, cloud
//!   replica id, merge policy).
//! - Hand out the primary (view) context and short-lived background contexts.
//! - Fan out committed change sets to auto-merging contexts.
//! - Accept already-downloaded cloud replica changes and post remote-change
//!   notifications for them.
//!
//! # Invariants
//! - The connection is only reached through `StoreShared::with_conn`.
//! - Change sets are broadcast after the saving context's lock is released.
//! - Remote imports never merge into contexts on their own; subscribers do.

mod context;
mod fetch;
mod merge;
mod rows;

pub use context::{ContextId, ContextRole, ContextSession, ManagedContext, MergeSummary};
pub use fetch::{FetchRequest, NotePredicate, SortDescriptor, SortKey};
pub use merge::MergePolicy;

use crate::config::{StoreDescription, StoreLocation};
use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::note::{Note, NoteField, NoteId};
use crate::sync::{RemoteChangeNotification, RemoteRecordChange};
use context::ContextShared;
use log::{error, info};
use rusqlite::{Connection, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

pub type StoreResult<T> = Result<T, StoreError>;

/// Record store error.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    NotFound(NoteId),
    DuplicateId(NoteId),
    /// Raised by `MergePolicy::Error` when the stored row moved underneath
    /// the saving context. `fields` lists the properties changed elsewhere.
    MergeConflict {
        id: NoteId,
        fields: Vec<NoteField>,
    },
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "note not found: {id}"),
            Self::DuplicateId(id) => write!(f, "note id already exists: {id}"),
            Self::MergeConflict { id, fields } => {
                let names = fields
                    .iter()
                    .map(|field| field.column())
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "merge conflict on note {id}: [{names}]")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted note data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Result of saving a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The context had no pending changes; nothing was written.
    NoChanges,
    Saved {
        inserted: usize,
        updated: usize,
        deleted: usize,
    },
    /// The save failed and every pending change was discarded.
    RolledBack,
}

/// A committed row together with its store version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedNote {
    pub note: Note,
    pub version: u64,
}

/// Who produced a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Context(ContextId),
    Remote,
}

/// Rows touched by one committed save or remote import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub origin: ChangeOrigin,
    pub inserted: Vec<PersistedNote>,
    pub updated: Vec<PersistedNote>,
    pub deleted: Vec<NoteId>,
}

impl ChangeSet {
    pub fn new(origin: ChangeOrigin) -> Self {
        Self {
            origin,
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

/// Handle for one remote-change subscription.
pub struct RemoteChangeSubscription {
    pub id: u64,
    pub receiver: Receiver<RemoteChangeNotification>,
}

/// Notes record store.
///
/// Cloning is cheap and every clone shares the same backing store and view
/// context.
#[derive(Clone)]
pub struct RecordStore {
    shared: Arc<StoreShared>,
    view_context: ManagedContext,
}

pub(crate) struct StoreShared {
    description: StoreDescription,
    conn: Mutex<Connection>,
    contexts: Mutex<Vec<Weak<ContextShared>>>,
    next_context_id: AtomicU64,
    remote_subscribers: Mutex<Vec<(u64, Sender<RemoteChangeNotification>)>>,
    next_subscription_id: AtomicU64,
}

impl RecordStore {
    /// Opens the backing store described by `description`.
    ///
    /// Fails when the database cannot be opened or its schema is newer than
    /// this binary supports.
    pub fn open(description: StoreDescription) -> StoreResult<Self> {
        let conn = match &description.location {
            StoreLocation::File { path } => open_db(path)?,
            StoreLocation::InMemory => open_db_in_memory()?,
        };

        info!(
            "event=store_open module=store status=ok container={} cloud_container={} in_memory={} merge_policy={}",
            description.container_name,
            description.cloud_container_id.as_deref().unwrap_or("none"),
            description.is_in_memory(),
            description.merge_policy
        );

        let shared = Arc::new(StoreShared {
            description,
            conn: Mutex::new(conn),
            contexts: Mutex::new(Vec::new()),
            next_context_id: AtomicU64::new(1),
            remote_subscribers: Mutex::new(Vec::new()),
            next_subscription_id: AtomicU64::new(1),
        });
        let view_context = ManagedContext::new(Arc::clone(&shared), ContextRole::View);

        Ok(Self {
            shared,
            view_context,
        })
    }

    pub fn description(&self) -> &StoreDescription {
        &self.shared.description
    }

    /// Primary UI-bound context. Auto-merges saves from every other context.
    pub fn view_context(&self) -> &ManagedContext {
        &self.view_context
    }

    /// Creates a new background context sharing the view context's policy.
    pub fn new_background_context(&self) -> ManagedContext {
        ManagedContext::new(Arc::clone(&self.shared), ContextRole::Background)
    }

    /// Saves the view context, rolling it back on failure.
    ///
    /// Never returns an error: failures are logged by the context and
    /// reported as `SaveOutcome::RolledBack`.
    pub fn save_context(&self) -> SaveOutcome {
        self.view_context
            .save()
            .unwrap_or(SaveOutcome::RolledBack)
    }

    /// Number of persisted note rows.
    pub fn record_count(&self) -> StoreResult<usize> {
        self.shared.with_conn(|conn| rows::count_rows(conn))
    }

    /// Registers a remote-change listener.
    pub fn subscribe_remote_changes(&self) -> RemoteChangeSubscription {
        let (sender, receiver) = mpsc::channel();
        let id = self
            .shared
            .next_subscription_id
            .fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.remote_subscribers).push((id, sender));
        RemoteChangeSubscription { id, receiver }
    }

    /// Drops a remote-change listener; its receiver disconnects.
    pub fn unsubscribe_remote_changes(&self, subscription_id: u64) {
        lock(&self.shared.remote_subscribers).retain(|(id, _)| *id != subscription_id);
    }

    /// Applies changes downloaded by the cloud replica mirror.
    ///
    /// Upserts overwrite only the fields they name. Deletes remove the row
    /// when present. The committed change set is posted to remote-change
    /// subscribers and returned. No context is merged here.
    pub fn import_remote_changes(&self, changes: &[RemoteRecordChange]) -> StoreResult<ChangeSet> {
        let started_at = Instant::now();
        let result = self.shared.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut change_set = ChangeSet::new(ChangeOrigin::Remote);
            for change in changes {
                apply_remote_change(&tx, change, &mut change_set)?;
            }
            tx.commit()?;
            Ok(change_set)
        });

        let change_set = match result {
            Ok(change_set) => change_set,
            Err(err) => {
                error!(
                    "event=remote_import module=store status=error duration_ms={} changes={} error={}",
                    started_at.elapsed().as_millis(),
                    changes.len(),
                    err
                );
                return Err(err);
            }
        };

        info!(
            "event=remote_import module=store status=ok duration_ms={} inserted={} updated={} deleted={}",
            started_at.elapsed().as_millis(),
            change_set.inserted.len(),
            change_set.updated.len(),
            change_set.deleted.len()
        );

        if !change_set.is_empty() {
            self.shared.post_remote_change(RemoteChangeNotification {
                container_name: self.shared.description.container_name.clone(),
                cloud_container_id: self.shared.description.cloud_container_id.clone(),
                change_set: change_set.clone(),
            });
        }
        Ok(change_set)
    }
}

fn apply_remote_change(
    conn: &Connection,
    change: &RemoteRecordChange,
    change_set: &mut ChangeSet,
) -> StoreResult<()> {
    match change {
        RemoteRecordChange::Upsert { note, fields } => match rows::load_row(conn, note.id)? {
            None => change_set.inserted.push(rows::insert_row(conn, note)?),
            Some(stored) => {
                let mut merged = stored.note.clone();
                for field in fields {
                    merged.copy_field(note, *field);
                }
                if merged != stored.note {
                    let version = stored.version + 1;
                    rows::update_row(conn, &merged, version)?;
                    change_set.updated.push(PersistedNote {
                        note: merged,
                        version,
                    });
                }
            }
        },
        RemoteRecordChange::Delete { id } => {
            if rows::delete_row(conn, *id)? {
                change_set.deleted.push(*id);
            }
        }
    }
    Ok(())
}

impl StoreShared {
    pub(crate) fn merge_policy(&self) -> MergePolicy {
        self.description.merge_policy
    }

    pub(crate) fn with_conn<T>(
        &self,
        work: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = lock(&self.conn);
        work(&mut conn)
    }

    pub(crate) fn next_context_id(&self) -> ContextId {
        ContextId::new(self.next_context_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, context: &Arc<ContextShared>) {
        let mut contexts = lock(&self.contexts);
        contexts.retain(|weak| weak.strong_count() > 0);
        contexts.push(Arc::downgrade(context));
    }

    /// Merges `change_set` into every other live auto-merging context.
    pub(crate) fn broadcast(&self, origin: ContextId, change_set: &ChangeSet) {
        let targets = {
            let mut contexts = lock(&self.contexts);
            contexts.retain(|weak| weak.strong_count() > 0);
            contexts
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|context| {
                    context.id() != origin && context.automatically_merges_changes()
                })
                .collect::<Vec<_>>()
        };

        for target in targets {
            target.merge(change_set);
        }
    }

    fn post_remote_change(&self, notification: RemoteChangeNotification) {
        let mut subscribers = lock(&self.remote_subscribers);
        subscribers.retain(|(_, sender)| sender.send(notification.clone()).is_ok());
    }
}

/// Locks `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{ChangeOrigin, ChangeSet, StoreError};
    use crate::model::note::NoteField;
    use uuid::Uuid;

    #[test]
    fn merge_conflict_message_lists_column_names() {
        let id = Uuid::new_v4();
        let err = StoreError::MergeConflict {
            id,
            fields: vec![NoteField::Title, NoteField::IsFavorite],
        };
        assert_eq!(
            err.to_string(),
            format!("merge conflict on note {id}: [title,is_favorite]")
        );
    }

    #[test]
    fn empty_change_set_reports_zero_len() {
        let change_set = ChangeSet::new(ChangeOrigin::Remote);
        assert!(change_set.is_empty());
        assert_eq!(change_set.len(), 0);
    }
}
