//! Managed contexts: in-memory object graphs over the record store.
//!
//! # Responsibility
//! - Track registered objects, pending inserts/deletes and per-field edits.
//! - Commit pending changes atomically through the store's merge policy.
//! - Merge change sets committed elsewhere without losing pending edits.
//!
//! # Invariants
//! - All state access goes through `perform`, the context's serial queue.
//! - `perform` must not be re-entered on the same context from inside `work`.
//! - A failed save leaves the context rolled back, never partially committed.
//! - Merges ignore rows whose version is not newer than the registered one.

use super::fetch::FetchRequest;
use super::merge::{self, MergePolicy, PendingEdit};
use super::rows;
use super::{
    lock, ChangeOrigin, ChangeSet, PersistedNote, SaveOutcome, StoreError, StoreResult,
    StoreShared,
};
use crate::model::note::{Note, NoteField, NoteId};
use log::{debug, error, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Process-unique context identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    /// Primary, UI-bound context.
    View,
    /// Secondary write context for off-main-thread work.
    Background,
}

impl ContextRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Background => "background",
        }
    }
}

/// What a merge did to the receiving context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Registered objects refreshed to a newer version.
    pub refreshed: usize,
    /// Registered or pending-delete objects dropped because the row is gone.
    pub invalidated: usize,
}

#[derive(Debug, Clone)]
struct ManagedObject {
    persisted: Note,
    version: u64,
    current: Note,
    changed: BTreeSet<NoteField>,
}

impl ManagedObject {
    fn from_persisted(row: PersistedNote) -> Self {
        Self {
            current: row.note.clone(),
            persisted: row.note,
            version: row.version,
            changed: BTreeSet::new(),
        }
    }

    fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Adopts a newer committed row, keeping locally changed fields.
    fn refresh_from(&mut self, row: &PersistedNote) {
        for field in NoteField::ALL {
            if !self.changed.contains(&field) {
                self.current.copy_field(&row.note, field);
            }
        }
        self.persisted = row.note.clone();
        self.version = row.version;
    }

    fn reset_to(&mut self, row: PersistedNote) {
        self.current = row.note.clone();
        self.persisted = row.note;
        self.version = row.version;
        self.changed.clear();
    }

    fn pending_edit(&self) -> PendingEdit<'_> {
        PendingEdit {
            persisted: &self.persisted,
            version: self.version,
            current: &self.current,
            changed: &self.changed,
        }
    }
}

#[derive(Debug, Default)]
struct ContextState {
    objects: BTreeMap<NoteId, ManagedObject>,
    inserted: Vec<Note>,
    deleted: BTreeSet<NoteId>,
}

impl ContextState {
    fn has_changes(&self) -> bool {
        !self.inserted.is_empty()
            || !self.deleted.is_empty()
            || self.objects.values().any(ManagedObject::has_changes)
    }

    fn rollback(&mut self) {
        self.inserted.clear();
        self.deleted.clear();
        for object in self.objects.values_mut() {
            object.current = object.persisted.clone();
            object.changed.clear();
        }
    }
}

pub(crate) struct ContextShared {
    id: ContextId,
    role: ContextRole,
    merge_policy: MergePolicy,
    automatically_merges_changes: AtomicBool,
    store: Arc<StoreShared>,
    state: Mutex<ContextState>,
}

impl ContextShared {
    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn automatically_merges_changes(&self) -> bool {
        self.automatically_merges_changes.load(Ordering::Acquire)
    }

    pub(crate) fn merge(&self, change_set: &ChangeSet) -> MergeSummary {
        let mut state = lock(&self.state);
        merge_into(self, &mut state, change_set)
    }
}

/// Handle to a managed context. Clones share the same object graph.
#[derive(Clone)]
pub struct ManagedContext {
    shared: Arc<ContextShared>,
}

impl ManagedContext {
    pub(crate) fn new(store: Arc<StoreShared>, role: ContextRole) -> Self {
        let id = store.next_context_id();
        let shared = Arc::new(ContextShared {
            id,
            role,
            merge_policy: store.merge_policy(),
            automatically_merges_changes: AtomicBool::new(true),
            store: Arc::clone(&store),
            state: Mutex::new(ContextState::default()),
        });
        store.register(&shared);
        debug!(
            "event=context_create module=store status=ok context_id={} role={}",
            id,
            role.as_str()
        );
        Self { shared }
    }

    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    pub fn role(&self) -> ContextRole {
        self.shared.role
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.shared.merge_policy
    }

    pub fn automatically_merges_changes(&self) -> bool {
        self.shared.automatically_merges_changes()
    }

    pub fn set_automatically_merges_changes(&self, enabled: bool) {
        self.shared
            .automatically_merges_changes
            .store(enabled, Ordering::Release);
    }

    /// Runs `work` on this context's serial queue.
    ///
    /// Change sets committed inside `work` are broadcast to other contexts
    /// after the queue is released.
    pub fn perform<R>(&self, work: impl FnOnce(&mut ContextSession<'_>) -> R) -> R {
        let (result, outbox) = {
            let mut session = ContextSession {
                shared: &self.shared,
                state: lock(&self.shared.state),
                outbox: Vec::new(),
            };
            let result = work(&mut session);
            (result, std::mem::take(&mut session.outbox))
        };

        for change_set in &outbox {
            self.shared.store.broadcast(self.shared.id, change_set);
        }
        result
    }

    pub fn insert(&self, note: Note) -> StoreResult<()> {
        self.perform(|session| session.insert(note))
    }

    pub fn object(&self, id: NoteId) -> StoreResult<Option<Note>> {
        self.perform(|session| session.object(id))
    }

    pub fn modify(&self, id: NoteId, edit: impl FnOnce(&mut Note)) -> StoreResult<Note> {
        self.perform(|session| session.modify(id, edit))
    }

    pub fn delete(&self, id: NoteId) -> StoreResult<()> {
        self.perform(|session| session.delete(id))
    }

    pub fn fetch(&self, request: &FetchRequest) -> StoreResult<Vec<Note>> {
        self.perform(|session| session.fetch(request))
    }

    pub fn has_changes(&self) -> bool {
        self.perform(|session| session.has_changes())
    }

    pub fn save(&self) -> StoreResult<SaveOutcome> {
        self.perform(|session| session.save())
    }

    pub fn rollback(&self) {
        self.perform(|session| session.rollback())
    }

    pub fn merge_changes(&self, change_set: &ChangeSet) -> MergeSummary {
        self.perform(|session| session.merge_changes(change_set))
    }

    pub fn registered_count(&self) -> usize {
        self.perform(|session| session.registered_count())
    }
}

/// Exclusive access to a context's state for one unit of work.
pub struct ContextSession<'a> {
    shared: &'a ContextShared,
    state: MutexGuard<'a, ContextState>,
    outbox: Vec<ChangeSet>,
}

impl ContextSession<'_> {
    pub fn context_id(&self) -> ContextId {
        self.shared.id
    }

    /// Stages a new note for insertion.
    pub fn insert(&mut self, note: Note) -> StoreResult<()> {
        let id = note.id;
        if self.state.objects.contains_key(&id)
            || self.state.inserted.iter().any(|pending| pending.id == id)
        {
            return Err(StoreError::DuplicateId(id));
        }
        self.state.deleted.remove(&id);
        self.state.inserted.push(note);
        Ok(())
    }

    /// Returns the in-context value of `id`, registering it on first access.
    pub fn object(&mut self, id: NoteId) -> StoreResult<Option<Note>> {
        if self.state.deleted.contains(&id) {
            return Ok(None);
        }
        if let Some(pending) = self.state.inserted.iter().find(|pending| pending.id == id) {
            return Ok(Some(pending.clone()));
        }
        Ok(self.register(id)?.map(|object| object.current.clone()))
    }

    /// Applies `edit` to `id` and records which fields it changed.
    ///
    /// The note id is restored if `edit` rewrites it.
    pub fn modify(&mut self, id: NoteId, edit: impl FnOnce(&mut Note)) -> StoreResult<Note> {
        if self.state.deleted.contains(&id) {
            return Err(StoreError::NotFound(id));
        }

        if let Some(pending) = self
            .state
            .inserted
            .iter_mut()
            .find(|pending| pending.id == id)
        {
            edit(pending);
            pending.id = id;
            return Ok(pending.clone());
        }

        let object = self.register(id)?.ok_or(StoreError::NotFound(id))?;
        let mut edited = object.current.clone();
        edit(&mut edited);
        edited.id = id;
        object.changed.extend(object.current.diff(&edited));
        object.current = edited;
        Ok(object.current.clone())
    }

    /// Stages `id` for removal. Pending inserts are simply dropped.
    pub fn delete(&mut self, id: NoteId) -> StoreResult<()> {
        let before = self.state.inserted.len();
        self.state.inserted.retain(|pending| pending.id != id);
        if self.state.inserted.len() != before || self.state.deleted.contains(&id) {
            return Ok(());
        }

        if self.register(id)?.is_none() {
            return Err(StoreError::NotFound(id));
        }
        self.state.objects.remove(&id);
        self.state.deleted.insert(id);
        Ok(())
    }

    /// Executes `request` against the store, overlaid with pending changes.
    pub fn fetch(&mut self, request: &FetchRequest) -> StoreResult<Vec<Note>> {
        let started_at = Instant::now();
        let stored = self
            .shared
            .store
            .with_conn(|conn| rows::select_rows(conn, request))?;

        let state = &mut *self.state;
        let mut seen = HashSet::new();
        let mut notes = Vec::with_capacity(stored.len());
        for row in stored {
            let id = row.note.id;
            if state.deleted.contains(&id) {
                continue;
            }
            let object = state
                .objects
                .entry(id)
                .or_insert_with(|| ManagedObject::from_persisted(row.clone()));
            if !object.has_changes() && row.version > object.version {
                object.reset_to(row);
            }
            seen.insert(id);
            notes.push(object.current.clone());
        }

        // Edited objects whose stored values did not match the pushed-down filter.
        for (id, object) in &state.objects {
            if object.has_changes() && !seen.contains(id) {
                notes.push(object.current.clone());
            }
        }
        notes.extend(state.inserted.iter().cloned());

        notes.retain(|note| request.matches(note));
        notes.sort_by(|left, right| request.compare(left, right));
        if let Some(limit) = request.limit {
            notes.truncate(limit);
        }

        debug!(
            "event=notes_fetch module=store status=ok context_id={} duration_ms={} count={}",
            self.shared.id,
            started_at.elapsed().as_millis(),
            notes.len()
        );
        Ok(notes)
    }

    pub fn has_changes(&self) -> bool {
        self.state.has_changes()
    }

    /// Discards every pending change.
    pub fn rollback(&mut self) {
        self.state.rollback();
        info!(
            "event=context_rollback module=store status=ok context_id={}",
            self.shared.id
        );
    }

    /// Commits pending changes in one transaction.
    ///
    /// On failure the context is rolled back and the error is logged and
    /// returned.
    pub fn save(&mut self) -> StoreResult<SaveOutcome> {
        if !self.state.has_changes() {
            return Ok(SaveOutcome::NoChanges);
        }

        let started_at = Instant::now();
        let policy = self.shared.merge_policy;
        let origin = ChangeOrigin::Context(self.shared.id);
        let result = {
            let state = &*self.state;
            self.shared
                .store
                .with_conn(|conn| commit(conn, state, policy, origin))
        };

        let committed = match result {
            Ok(committed) => committed,
            Err(err) => {
                error!(
                    "event=context_save module=store status=error context_id={} role={} duration_ms={} error={}",
                    self.shared.id,
                    self.shared.role.as_str(),
                    started_at.elapsed().as_millis(),
                    err
                );
                self.rollback();
                return Err(err);
            }
        };

        let outcome = SaveOutcome::Saved {
            inserted: committed.change_set.inserted.len(),
            updated: committed.change_set.updated.len(),
            deleted: committed.change_set.deleted.len(),
        };
        self.apply_commit(&committed);
        info!(
            "event=context_save module=store status=ok context_id={} role={} duration_ms={} inserted={} updated={} deleted={} dropped={}",
            self.shared.id,
            self.shared.role.as_str(),
            started_at.elapsed().as_millis(),
            committed.change_set.inserted.len(),
            committed.change_set.updated.len(),
            committed.change_set.deleted.len(),
            committed.dropped.len()
        );

        if !committed.change_set.is_empty() {
            self.outbox.push(committed.change_set);
        }
        Ok(outcome)
    }

    /// Merges a change set committed by another context or the cloud mirror.
    pub fn merge_changes(&mut self, change_set: &ChangeSet) -> MergeSummary {
        merge_into(self.shared, &mut self.state, change_set)
    }

    pub fn registered_count(&self) -> usize {
        self.state.objects.len()
    }

    fn register(&mut self, id: NoteId) -> StoreResult<Option<&mut ManagedObject>> {
        if !self.state.objects.contains_key(&id) {
            let Some(row) = self
                .shared
                .store
                .with_conn(|conn| rows::load_row(conn, id))?
            else {
                return Ok(None);
            };
            self.state
                .objects
                .insert(id, ManagedObject::from_persisted(row));
        }
        Ok(self.state.objects.get_mut(&id))
    }

    fn apply_commit(&mut self, committed: &Commit) {
        let state = &mut *self.state;
        for row in &committed.change_set.inserted {
            state
                .objects
                .insert(row.note.id, ManagedObject::from_persisted(row.clone()));
        }
        for row in committed
            .change_set
            .updated
            .iter()
            .chain(committed.unchanged.iter())
        {
            if let Some(object) = state.objects.get_mut(&row.note.id) {
                object.reset_to(row.clone());
            }
        }
        for id in &committed.dropped {
            state.objects.remove(id);
        }
        state.inserted.clear();
        state.deleted.clear();
    }
}

struct Commit {
    change_set: ChangeSet,
    /// Edited rows whose resolution matched the stored row; nothing written.
    unchanged: Vec<PersistedNote>,
    /// Edited objects whose row was deleted elsewhere.
    dropped: Vec<NoteId>,
}

fn commit(
    conn: &mut Connection,
    state: &ContextState,
    policy: MergePolicy,
    origin: ChangeOrigin,
) -> StoreResult<Commit> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut committed = Commit {
        change_set: ChangeSet::new(origin),
        unchanged: Vec::new(),
        dropped: Vec::new(),
    };

    for note in &state.inserted {
        committed.change_set.inserted.push(rows::insert_row(&tx, note)?);
    }

    for (id, object) in state.objects.iter().filter(|(_, object)| object.has_changes()) {
        let Some(stored) = rows::load_row(&tx, *id)? else {
            if policy == MergePolicy::Error {
                return Err(StoreError::MergeConflict {
                    id: *id,
                    fields: object.changed.iter().copied().collect(),
                });
            }
            warn!(
                "event=context_save module=store status=dropped note_id={} reason=deleted_elsewhere",
                id
            );
            committed.dropped.push(*id);
            continue;
        };

        let resolved = merge::resolve(policy, &object.pending_edit(), &stored)?;
        if resolved == stored.note {
            committed.unchanged.push(stored);
            continue;
        }
        let version = stored.version + 1;
        rows::update_row(&tx, &resolved, version)?;
        committed.change_set.updated.push(PersistedNote {
            note: resolved,
            version,
        });
    }

    for id in &state.deleted {
        if rows::delete_row(&tx, *id)? {
            committed.change_set.deleted.push(*id);
        }
    }

    tx.commit()?;
    Ok(committed)
}

fn merge_into(
    context: &ContextShared,
    state: &mut ContextState,
    change_set: &ChangeSet,
) -> MergeSummary {
    let mut summary = MergeSummary::default();

    for id in &change_set.deleted {
        let was_registered = state.objects.remove(id).is_some();
        let was_pending = state.deleted.remove(id);
        if was_registered || was_pending {
            summary.invalidated += 1;
        }
    }

    for row in change_set.inserted.iter().chain(change_set.updated.iter()) {
        if let Some(object) = state.objects.get_mut(&row.note.id) {
            if row.version > object.version {
                object.refresh_from(row);
                summary.refreshed += 1;
            }
        }
    }

    debug!(
        "event=context_merge module=store status=ok context_id={} origin={:?} refreshed={} invalidated={}",
        context.id, change_set.origin, summary.refreshed, summary.invalidated
    );
    summary
}
