//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose the notes view model to Dart via FRB as sync, string-keyed calls.
//! - Own the single process-wide record store and its remote-merge bridge.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - The store is opened at most once per process; an open failure is kept
//!   and reported to every later call.
//! - Every notes call returns the snapshot as of right after its write.

use chrono::FixedOffset;
use log::warn;
use notiq_core::{
    core_version as core_version_inner, default_log_level, group_by_day,
    init_logging as init_logging_inner, ping as ping_inner, ChangeNotificationBridge, Note,
    NoteField, NoteFilter, NoteId, NotesViewModel, RecordStore, RemoteRecordChange,
    StoreDescription,
};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock, PoisonError};

const NOTES_DB_FILE_NAME: &str = "notiq.sqlite3";
const NOTES_DB_PATH_ENV: &str = "NOTIQ_DB_PATH";
const PREVIEW_MAX_CHARS: usize = 120;

static NOTES_SESSION: OnceLock<Result<Mutex<NotesSession>, String>> = OnceLock::new();

struct NotesSession {
    view_model: NotesViewModel,
    _bridge: ChangeNotificationBridge,
}

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive); blank
///   selects the build default (`debug` or `info`).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir` (idempotent).
/// - Reconfiguration attempts with different level or directory return error.
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    let level = match level.trim() {
        "" => default_log_level(),
        explicit => explicit,
    };
    match init_logging_inner(level, log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    }
}

/// Note projection for list, grid and detail views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteItem {
    /// Stable note ID in string form.
    pub note_id: String,
    /// Display title (`Untitled` when blank).
    pub title: String,
    pub content: String,
    /// Whitespace-collapsed content excerpt.
    pub preview: String,
    pub timestamp_ms: i64,
    pub is_pinned: bool,
    pub is_favorite: bool,
    pub is_trashed: bool,
}

/// Response envelope for every notes call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotesResponse {
    /// Whether operation succeeded.
    pub ok: bool,
    /// Note the call acted on or created, when there is one.
    pub note_id: Option<String>,
    /// Published snapshot, or the requested subset of it.
    pub items: Vec<NoteItem>,
    /// Human-readable response message for diagnostics/UI.
    pub message: String,
}

impl NotesResponse {
    fn success(message: impl Into<String>, note_id: Option<NoteId>, items: Vec<NoteItem>) -> Self {
        Self {
            ok: true,
            note_id: note_id.map(|id| id.to_string()),
            items,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            note_id: None,
            items: Vec::new(),
            message: message.into(),
        }
    }
}

/// One calendar day of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteDaySection {
    /// Day in `YYYY-MM-DD` form.
    pub day: String,
    pub items: Vec<NoteItem>,
}

/// Snapshot grouped by calendar day, newest day first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotesByDayResponse {
    pub ok: bool,
    pub sections: Vec<NoteDaySection>,
    pub message: String,
}

/// Record change downloaded by the cloud mirror.
///
/// Only the `Some` properties overwrite an existing row. A new row takes
/// defaults for the missing ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteNoteChange {
    pub note_id: String,
    /// Removes the row; every other property is ignored.
    pub deleted: bool,
    pub title: Option<String>,
    pub content: Option<String>,
    pub timestamp_ms: Option<i64>,
    pub is_pinned: Option<bool>,
    pub is_favorite: Option<bool>,
    pub is_trashed: Option<bool>,
}

/// Opens the process-wide notes store and starts remote-change merging.
///
/// Input semantics:
/// - `db_path`: SQLite file path; empty or `None` falls back to
///   `NOTIQ_DB_PATH`, then to a file in the system temp directory.
/// - `cloud_container_id`: cloud replica identifier, e.g.
///   `iCloud.NotiqTeam.notiq`.
///
/// # FFI contract
/// - Only the first call opens the store; later calls report the outcome of
///   that first call and ignore their arguments.
/// - An open failure is fatal for the session: every notes call fails after it.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_init(db_path: Option<String>, cloud_container_id: Option<String>) -> NotesResponse {
    let mut opened_now = false;
    let session = NOTES_SESSION.get_or_init(|| {
        opened_now = true;
        open_session(db_path, cloud_container_id)
    });

    match session {
        Ok(session) => {
            let items = to_items(lock(session).view_model.notes());
            let message = if opened_now {
                "Notes store opened."
            } else {
                "Notes store already initialized."
            };
            NotesResponse::success(message, None, items)
        }
        Err(err) if opened_now => {
            warn!("event=ffi_call module=ffi status=error fn=notes_init error={err}");
            NotesResponse::failure(format!("notes_init failed: {err}"))
        }
        Err(err) => NotesResponse::failure(format!("notes store unavailable: {err}")),
    }
}

/// Returns the last published snapshot, pinned first then newest first.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_list() -> NotesResponse {
    respond("notes_list", |view_model| {
        Ok(NotesResponse::success(
            "Notes listed.",
            None,
            to_items(view_model.notes()),
        ))
    })
}

/// Lists one sidebar section (`all_notes|favorites|trash`) filtered by a
/// case-insensitive title search. An empty search matches every note.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_filtered(filter: String, search_text: String) -> NotesResponse {
    let filter = match filter.parse::<NoteFilter>() {
        Ok(filter) => filter,
        Err(err) => return NotesResponse::failure(format!("notes_filtered failed: {err}")),
    };
    respond("notes_filtered", |view_model| {
        let items = view_model
            .filtered(filter, search_text.trim())
            .into_iter()
            .map(to_item)
            .collect::<Vec<_>>();
        let message = if items.is_empty() {
            "No notes.".to_string()
        } else {
            format!("Found {} note(s).", items.len())
        };
        Ok(NotesResponse::success(message, None, items))
    })
}

/// Creates a note; missing title and content default to `Untitled` and empty.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_create(title: Option<String>, content: Option<String>) -> NotesResponse {
    respond("notes_create", |view_model| {
        let note = view_model.create(title.as_deref(), content.as_deref());
        Ok(NotesResponse::success(
            "Note created.",
            Some(note.id),
            to_items(view_model.notes()),
        ))
    })
}

/// Replaces a note's title and content and bumps its timestamp.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_update(note_id: String, title: String, content: String) -> NotesResponse {
    with_note("notes_update", &note_id, "Note updated.", |view_model, note| {
        view_model.update(note, &title, &content);
    })
}

/// Permanently deletes a note.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_delete(note_id: String) -> NotesResponse {
    with_note("notes_delete", &note_id, "Note deleted.", |view_model, note| {
        view_model.delete(note);
    })
}

#[flutter_rust_bridge::frb(sync)]
pub fn notes_toggle_pin(note_id: String) -> NotesResponse {
    with_note("notes_toggle_pin", &note_id, "Pin toggled.", |view_model, note| {
        view_model.toggle_pin(note);
    })
}

#[flutter_rust_bridge::frb(sync)]
pub fn notes_toggle_favorite(note_id: String) -> NotesResponse {
    with_note(
        "notes_toggle_favorite",
        &note_id,
        "Favorite toggled.",
        |view_model, note| {
            view_model.toggle_favorite(note);
        },
    )
}

#[flutter_rust_bridge::frb(sync)]
pub fn notes_move_to_trash(note_id: String) -> NotesResponse {
    with_note(
        "notes_move_to_trash",
        &note_id,
        "Note moved to trash.",
        |view_model, note| {
            view_model.move_to_trash(note);
        },
    )
}

#[flutter_rust_bridge::frb(sync)]
pub fn notes_restore(note_id: String) -> NotesResponse {
    with_note("notes_restore", &note_id, "Note restored.", |view_model, note| {
        view_model.restore(note);
    })
}

/// Creates a copy of a note's title and content.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_duplicate(note_id: String) -> NotesResponse {
    respond("notes_duplicate", |view_model| {
        let original = find_note(view_model, &note_id)?;
        let copy = view_model.duplicate(&original);
        Ok(NotesResponse::success(
            "Note duplicated.",
            Some(copy.id),
            to_items(view_model.notes()),
        ))
    })
}

/// Permanently deletes every trashed note.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_empty_trash() -> NotesResponse {
    respond("notes_empty_trash", |view_model| {
        let items = to_items(view_model.empty_trash());
        Ok(NotesResponse::success("Trash emptied.", None, items))
    })
}

/// Re-queries the store. Needed to surface remote changes in the snapshot.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_refresh() -> NotesResponse {
    respond("notes_refresh", |view_model| {
        let items = to_items(view_model.refresh());
        Ok(NotesResponse::success("Notes refreshed.", None, items))
    })
}

/// Selects a note, or clears the selection when `note_id` is `None`.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_select(note_id: Option<String>) -> NotesResponse {
    respond("notes_select", |view_model| {
        let id = note_id.as_deref().map(parse_note_id).transpose()?;
        if !view_model.select(id) {
            return Err(format!("note not found: {}", note_id.unwrap_or_default()));
        }
        Ok(NotesResponse::success(
            "Selection updated.",
            id,
            selected_items(view_model),
        ))
    })
}

/// Returns the selected note as the single item, or no items.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_selected() -> NotesResponse {
    respond("notes_selected", |view_model| {
        let id = view_model.selected_note().map(|note| note.id);
        Ok(NotesResponse::success(
            "Selection listed.",
            id,
            selected_items(view_model),
        ))
    })
}

/// Permanently deletes every note and clears the selection.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_reset() -> NotesResponse {
    respond("notes_reset", |view_model| {
        let items = to_items(view_model.delete_all());
        Ok(NotesResponse::success("All notes deleted.", None, items))
    })
}

/// Applies record changes downloaded by the cloud mirror.
///
/// # FFI contract
/// - All changes commit in one transaction or none do.
/// - The returned snapshot is not refreshed; remote changes show up after
///   `notes_refresh`.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_import_remote(changes: Vec<RemoteNoteChange>) -> NotesResponse {
    respond("notes_import_remote", |view_model| {
        let changes = changes
            .iter()
            .map(to_remote_change)
            .collect::<Result<Vec<_>, _>>()?;
        let change_set = view_model
            .store()
            .import_remote_changes(&changes)
            .map_err(|err| err.to_string())?;
        Ok(NotesResponse::success(
            format!("Imported {} remote change(s).", change_set.len()),
            None,
            to_items(view_model.notes()),
        ))
    })
}

/// Groups the snapshot by calendar day at `utc_offset_minutes` east of UTC.
///
/// # FFI contract
/// - Sections are ordered newest day first; items keep snapshot order.
/// - Offsets outside +/-24h are rejected.
#[flutter_rust_bridge::frb(sync)]
pub fn notes_by_day(utc_offset_minutes: i32) -> NotesByDayResponse {
    let grouped = with_view_model("notes_by_day", |view_model| {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| format!("invalid utc offset {utc_offset_minutes} minutes"))?;
        Ok(group_by_day(view_model.notes(), &offset)
            .into_iter()
            .map(|(day, notes)| NoteDaySection {
                day: day.format("%Y-%m-%d").to_string(),
                items: notes.into_iter().map(to_item).collect(),
            })
            .collect::<Vec<_>>())
    });

    match grouped {
        Ok(sections) => NotesByDayResponse {
            ok: true,
            message: format!("Grouped into {} day(s).", sections.len()),
            sections,
        },
        Err(message) => NotesByDayResponse {
            ok: false,
            sections: Vec::new(),
            message,
        },
    }
}

fn open_session(
    db_path: Option<String>,
    cloud_container_id: Option<String>,
) -> Result<Mutex<NotesSession>, String> {
    let mut description = StoreDescription::file(resolve_db_path(db_path));
    if let Some(container_id) = cloud_container_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        description = description.with_cloud_container(container_id);
    }

    let store = RecordStore::open(description).map_err(|err| err.to_string())?;
    let bridge = ChangeNotificationBridge::start(&store)
        .map_err(|err| format!("remote merge bridge failed to start: {err}"))?;
    Ok(Mutex::new(NotesSession {
        view_model: NotesViewModel::new(store),
        _bridge: bridge,
    }))
}

fn resolve_db_path(db_path: Option<String>) -> PathBuf {
    let explicit = db_path
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty());
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }
    if let Ok(raw) = std::env::var(NOTES_DB_PATH_ENV) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    std::env::temp_dir().join(NOTES_DB_FILE_NAME)
}

fn respond(
    call: &'static str,
    f: impl FnOnce(&mut NotesViewModel) -> Result<NotesResponse, String>,
) -> NotesResponse {
    with_view_model(call, f).unwrap_or_else(|message| NotesResponse::failure(message))
}

fn with_view_model<T>(
    call: &'static str,
    f: impl FnOnce(&mut NotesViewModel) -> Result<T, String>,
) -> Result<T, String> {
    let session = match NOTES_SESSION.get() {
        Some(Ok(session)) => session,
        Some(Err(err)) => return Err(format!("notes store unavailable: {err}")),
        None => return Err("notes store not initialized; call notes_init first".to_string()),
    };

    let mut session = lock(session);
    f(&mut session.view_model).map_err(|err| {
        warn!("event=ffi_call module=ffi status=error fn={call} error={err}");
        format!("{call} failed: {err}")
    })
}

fn with_note(
    call: &'static str,
    note_id: &str,
    message: &'static str,
    f: impl FnOnce(&mut NotesViewModel, &Note),
) -> NotesResponse {
    respond(call, |view_model| {
        let note = find_note(view_model, note_id)?;
        f(view_model, &note);
        Ok(NotesResponse::success(
            message,
            Some(note.id),
            to_items(view_model.notes()),
        ))
    })
}

fn find_note(view_model: &NotesViewModel, note_id: &str) -> Result<Note, String> {
    let id = parse_note_id(note_id)?;
    view_model
        .notes()
        .iter()
        .find(|note| note.id == id)
        .cloned()
        .ok_or_else(|| format!("note not found: {id}"))
}

fn parse_note_id(raw: &str) -> Result<NoteId, String> {
    uuid::Uuid::parse_str(raw.trim()).map_err(|_| format!("invalid note id `{raw}`"))
}

fn to_remote_change(change: &RemoteNoteChange) -> Result<RemoteRecordChange, String> {
    let id = parse_note_id(&change.note_id)?;
    if change.deleted {
        return Ok(RemoteRecordChange::delete(id));
    }

    let mut note = Note::with_id(
        id,
        change.title.clone(),
        change.content.clone(),
        change.timestamp_ms.unwrap_or_default(),
    );
    note.is_pinned = change.is_pinned.unwrap_or_default();
    note.is_favorite = change.is_favorite.unwrap_or_default();
    note.is_trashed = change.is_trashed.unwrap_or_default();

    let fields: Vec<NoteField> = [
        (NoteField::Title, change.title.is_some()),
        (NoteField::Content, change.content.is_some()),
        (NoteField::Timestamp, change.timestamp_ms.is_some()),
        (NoteField::IsPinned, change.is_pinned.is_some()),
        (NoteField::IsFavorite, change.is_favorite.is_some()),
        (NoteField::IsTrashed, change.is_trashed.is_some()),
    ]
    .into_iter()
    .filter_map(|(field, present)| present.then_some(field))
    .collect();
    if fields.is_empty() {
        return Err(format!("remote change for {id} carries no properties"));
    }
    Ok(RemoteRecordChange::partial(note, fields))
}

fn selected_items(view_model: &NotesViewModel) -> Vec<NoteItem> {
    view_model.selected_note().map(to_item).into_iter().collect()
}

fn to_items(notes: &[Note]) -> Vec<NoteItem> {
    notes.iter().map(to_item).collect()
}

fn to_item(note: &Note) -> NoteItem {
    NoteItem {
        note_id: note.id.to_string(),
        title: note.display_title().to_string(),
        content: note.content.clone().unwrap_or_default(),
        preview: note.preview(PREVIEW_MAX_CHARS),
        timestamp_ms: note.timestamp_ms,
        is_pinned: note.is_pinned,
        is_favorite: note.is_favorite,
        is_trashed: note.is_trashed,
    }
}

fn lock(session: &Mutex<NotesSession>) -> std::sync::MutexGuard<'_, NotesSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{
        core_version, init_logging, notes_by_day, notes_create, notes_delete, notes_duplicate,
        notes_filtered, notes_import_remote, notes_init, notes_list, notes_move_to_trash,
        notes_refresh, notes_reset, notes_restore, notes_select, notes_selected,
        notes_toggle_favorite, notes_toggle_pin, notes_update, ping, NoteItem, NotesResponse,
        RemoteNoteChange,
    };
    use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn init_logging_rejects_empty_log_dir() {
        let error = init_logging("info".to_string(), String::new());
        assert!(!error.is_empty());
    }

    #[test]
    fn init_logging_blank_level_uses_build_default() {
        let error = init_logging("  ".to_string(), String::new());
        assert!(error.starts_with("invalid log_dir"), "{error}");
    }

    #[test]
    fn init_logging_rejects_unsupported_level() {
        let error = init_logging("verbose".to_string(), "tmp/logs".to_string());
        assert!(!error.is_empty());
    }

    #[test]
    fn init_is_idempotent() {
        let _store = init_store();
        let again = notes_init(None, None);
        assert!(again.ok, "{}", again.message);
        assert_eq!(again.message, "Notes store already initialized.");
    }

    #[test]
    fn create_update_and_delete_round_trip() {
        let _store = init_store();
        let title = unique_token("create");
        let created = notes_create(Some(title.clone()), None);
        assert!(created.ok, "{}", created.message);
        let note_id = created.note_id.clone().unwrap();
        let fresh = item(&created, &note_id).unwrap();
        assert_eq!(fresh.title, title);
        assert_eq!(fresh.content, "");

        let updated = notes_update(note_id.clone(), "renamed".to_string(), "line\n  two".to_string());
        assert!(updated.ok, "{}", updated.message);
        let renamed = item(&updated, &note_id).unwrap();
        assert_eq!(renamed.title, "renamed");
        assert_eq!(renamed.preview, "line two");
        assert!(renamed.timestamp_ms > created_timestamp(&created, &note_id));

        let deleted = notes_delete(note_id.clone());
        assert!(deleted.ok, "{}", deleted.message);
        assert!(item(&notes_list(), &note_id).is_none());
    }

    #[test]
    fn flags_toggle_and_trash_filters() {
        let _store = init_store();
        let title = unique_token("flags");
        let note_id = notes_create(Some(title.clone()), Some("body".to_string()))
            .note_id
            .unwrap();

        let pinned = notes_toggle_pin(note_id.clone());
        assert!(item(&pinned, &note_id).unwrap().is_pinned);
        let favorite = notes_toggle_favorite(note_id.clone());
        assert!(item(&favorite, &note_id).unwrap().is_favorite);

        let favorites = notes_filtered("favorites".to_string(), title.to_uppercase());
        assert!(item(&favorites, &note_id).is_some());

        notes_move_to_trash(note_id.clone());
        assert!(item(&notes_filtered("trash".to_string(), title.clone()), &note_id).is_some());
        assert!(item(&notes_filtered("all_notes".to_string(), title.clone()), &note_id).is_none());

        notes_restore(note_id.clone());
        assert!(item(&notes_filtered("all_notes".to_string(), title), &note_id).is_some());
    }

    #[test]
    fn duplicate_creates_a_distinct_note() {
        let _store = init_store();
        let title = unique_token("duplicate");
        let original = notes_create(Some(title.clone()), Some("copy me".to_string()))
            .note_id
            .unwrap();

        let copy = notes_duplicate(original.clone());
        assert!(copy.ok, "{}", copy.message);
        let copy_id = copy.note_id.clone().unwrap();
        assert_ne!(copy_id, original);
        assert_eq!(item(&copy, &copy_id).unwrap().content, "copy me");
        assert_eq!(notes_filtered("all_notes".to_string(), title).items.len(), 2);
    }

    #[test]
    fn selection_round_trip() {
        let _store = init_store();
        let note_id = notes_create(Some(unique_token("select")), None)
            .note_id
            .unwrap();

        let selected = notes_select(Some(note_id.clone()));
        assert!(selected.ok, "{}", selected.message);
        assert_eq!(notes_selected().items[0].note_id, note_id);

        assert!(notes_select(None).ok);
        assert!(notes_selected().items.is_empty());
    }

    #[test]
    fn unknown_and_malformed_ids_fail_without_panicking() {
        let _store = init_store();
        let missing = notes_toggle_pin(uuid::Uuid::new_v4().to_string());
        assert!(!missing.ok);
        assert!(missing.message.contains("note not found"));

        let malformed = notes_delete("not-a-uuid".to_string());
        assert!(!malformed.ok);
        assert!(malformed.message.contains("invalid note id"));

        let bad_filter = notes_filtered("archive".to_string(), String::new());
        assert!(!bad_filter.ok);
    }

    #[test]
    fn reset_deletes_every_note_and_clears_selection() {
        let _store = init_store();
        let note_id = notes_create(Some(unique_token("reset")), None)
            .note_id
            .unwrap();
        notes_create(Some(unique_token("reset")), None);
        assert!(notes_select(Some(note_id)).ok);

        let reset = notes_reset();
        assert!(reset.ok, "{}", reset.message);
        assert!(reset.items.is_empty());
        assert!(notes_list().items.is_empty());
        assert!(notes_selected().items.is_empty());
    }

    #[test]
    fn remote_import_shows_after_refresh() {
        let _store = init_store();
        let title = unique_token("remote");
        let note_id = notes_create(Some(title.clone()), Some("local body".to_string()))
            .note_id
            .unwrap();

        let imported = notes_import_remote(vec![RemoteNoteChange {
            note_id: note_id.clone(),
            title: Some("from cloud".to_string()),
            ..RemoteNoteChange::default()
        }]);
        assert!(imported.ok, "{}", imported.message);
        assert_eq!(item(&imported, &note_id).unwrap().title, title);

        let refreshed = notes_refresh();
        let merged = item(&refreshed, &note_id).unwrap();
        assert_eq!(merged.title, "from cloud");
        assert_eq!(merged.content, "local body");

        let removed = notes_import_remote(vec![RemoteNoteChange {
            note_id: note_id.clone(),
            deleted: true,
            ..RemoteNoteChange::default()
        }]);
        assert!(removed.ok, "{}", removed.message);
        assert!(item(&notes_refresh(), &note_id).is_none());
    }

    #[test]
    fn remote_import_rejects_changes_without_properties() {
        let _store = init_store();
        let empty = notes_import_remote(vec![RemoteNoteChange {
            note_id: uuid::Uuid::new_v4().to_string(),
            ..RemoteNoteChange::default()
        }]);
        assert!(!empty.ok);
        assert!(empty.message.contains("carries no properties"));
    }

    #[test]
    fn by_day_sections_are_newest_first() {
        let _store = init_store();
        let note_id = notes_create(Some(unique_token("day")), None).note_id.unwrap();

        let grouped = notes_by_day(120);
        assert!(grouped.ok, "{}", grouped.message);
        let days: Vec<&str> = grouped.sections.iter().map(|s| s.day.as_str()).collect();
        assert!(days.windows(2).all(|pair| pair[0] > pair[1]), "{days:?}");
        assert!(grouped
            .sections
            .iter()
            .any(|section| section.items.iter().any(|item| item.note_id == note_id)));

        let invalid = notes_by_day(24 * 60);
        assert!(!invalid.ok);
        assert!(invalid.sections.is_empty());
    }

    /// Serializes tests that share the process-wide store.
    fn init_store() -> MutexGuard<'static, ()> {
        static STORE_LOCK: Mutex<()> = Mutex::new(());
        let guard = STORE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        static DB_PATH: OnceLock<String> = OnceLock::new();
        let path = DB_PATH.get_or_init(|| {
            std::env::temp_dir()
                .join(format!("{}.sqlite3", unique_token("notiq-ffi")))
                .to_string_lossy()
                .into_owned()
        });
        let response = notes_init(Some(path.clone()), Some("iCloud.NotiqTeam.notiq".to_string()));
        assert!(response.ok, "{}", response.message);
        guard
    }

    fn item(response: &NotesResponse, note_id: &str) -> Option<NoteItem> {
        response
            .items
            .iter()
            .find(|item| item.note_id == note_id)
            .cloned()
    }

    fn created_timestamp(response: &NotesResponse, note_id: &str) -> i64 {
        item(response, note_id).unwrap().timestamp_ms
    }

    fn unique_token(prefix: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time went backwards")
            .as_nanos();
        format!("{prefix}-{nanos}")
    }
}
