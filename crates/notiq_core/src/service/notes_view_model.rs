//! Notes view model: UI intents over the record store's view context.
//!
//! # Responsibility
//! - Apply create/edit/flag/delete intents to the view context and save.
//! - Re-query and publish the canonical notes snapshot after every write.
//! - Track the selected note and notify snapshot observers.
//!
//! # Invariants
//! - `notes` is always ordered pinned first, then newest first, then by id.
//! - Title/content edits strictly increase a note's timestamp; flag toggles
//!   leave it untouched.
//! - No error crosses this boundary: failed saves are rolled back and logged,
//!   failed fetches publish an empty snapshot.

use super::filters::{filter_notes, NoteFilter};
use crate::clock::{Clock, SystemClock};
use crate::model::note::{Note, NoteId, UNTITLED};
use crate::store::{FetchRequest, NotePredicate, RecordStore, SaveOutcome, StoreResult};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Callback invoked with every newly published snapshot.
pub type SnapshotObserver = Box<dyn Fn(&[Note]) + Send + 'static>;

pub struct NotesViewModel {
    store: RecordStore,
    clock: Arc<dyn Clock>,
    notes: Vec<Note>,
    selected_note: Option<NoteId>,
    observers: Vec<SnapshotObserver>,
}

impl NotesViewModel {
    /// Creates a view model over `store` and publishes the initial snapshot.
    pub fn new(store: RecordStore) -> Self {
        Self::with_clock(store, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(store: RecordStore, clock: Arc<dyn Clock>) -> Self {
        let mut view_model = Self {
            store,
            clock,
            notes: Vec::new(),
            selected_note: None,
            observers: Vec::new(),
        };
        view_model.refresh();
        view_model
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Last published snapshot.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Snapshot notes in `filter` whose title contains `search_text`.
    pub fn filtered(&self, filter: NoteFilter, search_text: &str) -> Vec<&Note> {
        filter_notes(&self.notes, filter, search_text)
    }

    pub fn subscribe(&mut self, observer: impl Fn(&[Note]) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Selects `id`, or clears the selection with `None`.
    ///
    /// Returns `false` and keeps the previous selection when `id` is not in
    /// the snapshot.
    pub fn select(&mut self, id: Option<NoteId>) -> bool {
        match id {
            None => {
                self.selected_note = None;
                true
            }
            Some(id) if self.notes.iter().any(|note| note.id == id) => {
                self.selected_note = Some(id);
                true
            }
            Some(_) => false,
        }
    }

    pub fn selected_note(&self) -> Option<&Note> {
        let id = self.selected_note?;
        self.notes.iter().find(|note| note.id == id)
    }

    /// Creates and saves a new note, defaulting to `Untitled` and empty content.
    pub fn create(&mut self, title: Option<&str>, content: Option<&str>) -> Note {
        let note = Note::new(
            Some(title.unwrap_or(UNTITLED).to_string()),
            Some(content.unwrap_or_default().to_string()),
            self.clock.now_ms(),
        );

        match self.store.view_context().insert(note.clone()) {
            Ok(()) => self.save("create", note.id),
            Err(err) => log_mutation_error("create", note.id, &err),
        }
        self.refresh();
        note
    }

    /// Creates a new note copying `note`'s title and content.
    pub fn duplicate(&mut self, note: &Note) -> Note {
        self.create(note.title.as_deref(), note.content.as_deref())
    }

    /// Replaces title and content and bumps the timestamp.
    pub fn update(&mut self, note: &Note, title: &str, content: &str) -> &[Note] {
        let now_ms = self.clock.now_ms();
        self.mutate("update", note.id, |note| {
            note.title = Some(title.to_string());
            note.content = Some(content.to_string());
            note.timestamp_ms = now_ms.max(note.timestamp_ms.saturating_add(1));
        })
    }

    pub fn toggle_pin(&mut self, note: &Note) -> &[Note] {
        self.mutate("toggle_pin", note.id, |note| note.is_pinned = !note.is_pinned)
    }

    pub fn toggle_favorite(&mut self, note: &Note) -> &[Note] {
        self.mutate("toggle_favorite", note.id, |note| {
            note.is_favorite = !note.is_favorite
        })
    }

    pub fn move_to_trash(&mut self, note: &Note) -> &[Note] {
        self.mutate("move_to_trash", note.id, |note| note.is_trashed = true)
    }

    pub fn restore(&mut self, note: &Note) -> &[Note] {
        self.mutate("restore", note.id, |note| note.is_trashed = false)
    }

    /// Permanently removes `note`.
    pub fn delete(&mut self, note: &Note) -> &[Note] {
        match self.store.view_context().delete(note.id) {
            Ok(()) => self.save("delete", note.id),
            Err(err) => log_mutation_error("delete", note.id, &err),
        }
        if self.selected_note == Some(note.id) {
            self.selected_note = None;
        }
        self.refresh()
    }

    /// Permanently removes every trashed note.
    pub fn empty_trash(&mut self) -> &[Note] {
        self.delete_matching(
            "empty_trash",
            FetchRequest::new().with_predicate(NotePredicate::IsTrashed(true)),
        )
    }

    /// Permanently removes every note and clears the selection.
    pub fn delete_all(&mut self) -> &[Note] {
        self.delete_matching("delete_all", FetchRequest::new())
    }

    /// Re-queries the canonical snapshot and publishes it.
    pub fn refresh(&mut self) -> &[Note] {
        let notes = match self.store.view_context().fetch(&FetchRequest::all_notes()) {
            Ok(notes) => notes,
            Err(err) => {
                error!(
                    "event=notes_fetch module=service status=error error={}",
                    err
                );
                Vec::new()
            }
        };
        self.publish(notes);
        &self.notes
    }

    fn delete_matching(&mut self, action: &'static str, request: FetchRequest) -> &[Note] {
        let staged = self
            .store
            .view_context()
            .perform(|session| -> StoreResult<Vec<NoteId>> {
                let matched = session.fetch(&request)?;
                for note in &matched {
                    session.delete(note.id)?;
                }
                Ok(matched.into_iter().map(|note| note.id).collect())
            });

        match staged {
            Ok(ids) => {
                match self.store.save_context() {
                    SaveOutcome::RolledBack => error!(
                        "event=notes_mutation module=service status=error action={} count={}",
                        action,
                        ids.len()
                    ),
                    _ => info!(
                        "event=notes_mutation module=service status=ok action={} count={}",
                        action,
                        ids.len()
                    ),
                }
                if self.selected_note.is_some_and(|id| ids.contains(&id)) {
                    self.selected_note = None;
                }
            }
            Err(err) => {
                self.store.view_context().rollback();
                error!(
                    "event=notes_mutation module=service status=error action={} error={}",
                    action, err
                );
            }
        }
        self.refresh()
    }

    fn mutate(&mut self, action: &'static str, id: NoteId, edit: impl FnOnce(&mut Note)) -> &[Note] {
        match self.store.view_context().modify(id, edit) {
            Ok(_) => self.save(action, id),
            Err(err) => log_mutation_error(action, id, &err),
        }
        self.refresh()
    }

    fn save(&self, action: &'static str, id: NoteId) {
        match self.store.save_context() {
            SaveOutcome::Saved { .. } => info!(
                "event=notes_mutation module=service status=ok action={} note_id={}",
                action, id
            ),
            SaveOutcome::NoChanges => debug!(
                "event=notes_mutation module=service status=noop action={} note_id={}",
                action, id
            ),
            SaveOutcome::RolledBack => error!(
                "event=notes_mutation module=service status=error action={} note_id={} error=rolled_back",
                action, id
            ),
        }
    }

    fn publish(&mut self, notes: Vec<Note>) {
        self.notes = notes;
        for observer in &self.observers {
            observer(&self.notes);
        }
    }
}

fn log_mutation_error(action: &str, id: NoteId, err: &dyn std::error::Error) {
    warn!(
        "event=notes_mutation module=service status=error action={} note_id={} error={}",
        action, id, err
    );
}

#[cfg(test)]
mod tests {
    use super::NotesViewModel;
    use crate::clock::ManualClock;
    use crate::config::StoreDescription;
    use crate::store::RecordStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn view_model() -> NotesViewModel {
        let store = RecordStore::open(StoreDescription::in_memory()).unwrap();
        NotesViewModel::with_clock(store, Arc::new(ManualClock::new(1_000)))
    }

    #[test]
    fn create_applies_defaults() {
        let mut vm = view_model();
        let note = vm.create(None, None);
        assert_eq!(note.title.as_deref(), Some("Untitled"));
        assert_eq!(note.content.as_deref(), Some(""));
        assert_eq!(note.timestamp_ms, 1_000);
        assert!(!note.is_pinned && !note.is_favorite && !note.is_trashed);
        assert_eq!(vm.notes(), std::slice::from_ref(&note));
    }

    #[test]
    fn select_rejects_unknown_ids_and_delete_clears_selection() {
        let mut vm = view_model();
        let note = vm.create(Some("A"), None);

        assert!(!vm.select(Some(uuid::Uuid::new_v4())));
        assert!(vm.selected_note().is_none());

        assert!(vm.select(Some(note.id)));
        assert_eq!(vm.selected_note().map(|n| n.id), Some(note.id));

        vm.delete(&note);
        assert!(vm.selected_note().is_none());
    }

    #[test]
    fn observers_receive_each_published_snapshot() {
        let mut vm = view_model();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        vm.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let note = vm.create(Some("A"), None);
        vm.toggle_pin(&note);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn mutating_a_missing_note_keeps_snapshot() {
        let mut vm = view_model();
        let kept = vm.create(Some("kept"), None);
        let ghost = crate::model::note::Note::new(Some("ghost".to_string()), None, 0);

        let snapshot = vm.toggle_pin(&ghost).to_vec();
        assert_eq!(snapshot, vec![kept]);
    }
}
