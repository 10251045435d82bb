//! SQL access for the `notes` table.
//!
//! # Invariants
//! - Every write sets `version` explicitly; inserts start at 1.
//! - Read paths reject invalid persisted state instead of masking it.

use super::fetch::FetchRequest;
use super::{PersistedNote, StoreError, StoreResult};
use crate::model::note::{Note, NoteId};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use uuid::Uuid;

const NOTE_SELECT_SQL: &str = "SELECT
    id,
    title,
    content,
    timestamp_ms,
    is_pinned,
    is_favorite,
    is_trashed,
    version
FROM notes";

pub(crate) fn load_row(conn: &Connection, id: NoteId) -> StoreResult<Option<PersistedNote>> {
    let mut stmt = conn.prepare(&format!("{NOTE_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_note_row(row)?)),
        None => Ok(None),
    }
}

pub(crate) fn insert_row(conn: &Connection, note: &Note) -> StoreResult<PersistedNote> {
    if load_row(conn, note.id)?.is_some() {
        return Err(StoreError::DuplicateId(note.id));
    }

    conn.execute(
        "INSERT INTO notes (
            id,
            title,
            content,
            timestamp_ms,
            is_pinned,
            is_favorite,
            is_trashed,
            version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1);",
        params![
            note.id.to_string(),
            note.title.as_deref(),
            note.content.as_deref(),
            note.timestamp_ms,
            bool_to_int(note.is_pinned),
            bool_to_int(note.is_favorite),
            bool_to_int(note.is_trashed),
        ],
    )?;

    Ok(PersistedNote {
        note: note.clone(),
        version: 1,
    })
}

pub(crate) fn update_row(conn: &Connection, note: &Note, version: u64) -> StoreResult<()> {
    let version = i64::try_from(version)
        .map_err(|_| StoreError::InvalidData(format!("version {version} overflows i64")))?;
    let changed = conn.execute(
        "UPDATE notes
         SET
            title = ?1,
            content = ?2,
            timestamp_ms = ?3,
            is_pinned = ?4,
            is_favorite = ?5,
            is_trashed = ?6,
            version = ?7
         WHERE id = ?8;",
        params![
            note.title.as_deref(),
            note.content.as_deref(),
            note.timestamp_ms,
            bool_to_int(note.is_pinned),
            bool_to_int(note.is_favorite),
            bool_to_int(note.is_trashed),
            version,
            note.id.to_string(),
        ],
    )?;

    if changed == 0 {
        return Err(StoreError::NotFound(note.id));
    }
    Ok(())
}

/// Removes one row. Returns `false` when it was already gone.
pub(crate) fn delete_row(conn: &Connection, id: NoteId) -> StoreResult<bool> {
    let changed = conn.execute("DELETE FROM notes WHERE id = ?1;", [id.to_string()])?;
    Ok(changed > 0)
}

/// Selects rows matching the request's flag filters, in request order.
///
/// Title matching, pending-change overlay and limits are applied by the
/// calling context, so only flag filters are pushed down.
pub(crate) fn select_rows(
    conn: &Connection,
    request: &FetchRequest,
) -> StoreResult<Vec<PersistedNote>> {
    let mut sql = format!("{NOTE_SELECT_SQL} WHERE 1 = 1");
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(predicate) = request.predicate.as_ref() {
        for (field, expected) in predicate.flag_filters() {
            sql.push_str(&format!(" AND {} = ?", field.column()));
            bind_values.push(Value::Integer(bool_to_int(expected)));
        }
    }

    sql.push_str(&request.order_by_sql());

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut notes = Vec::new();
    while let Some(row) = rows.next()? {
        notes.push(parse_note_row(row)?);
    }
    Ok(notes)
}

pub(crate) fn count_rows(conn: &Connection) -> StoreResult<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM notes;", [], |row| row.get(0))?;
    usize::try_from(count)
        .map_err(|_| StoreError::InvalidData(format!("negative row count {count}")))
}

fn parse_note_row(row: &Row<'_>) -> StoreResult<PersistedNote> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid value `{id_text}` in notes.id")))?;

    let version = match row.get::<_, i64>("version")? {
        value if value >= 1 => value as u64,
        other => {
            return Err(StoreError::InvalidData(format!(
                "invalid version `{other}` in notes.version"
            )));
        }
    };

    let note = Note {
        id,
        title: row.get("title")?,
        content: row.get("content")?,
        timestamp_ms: row.get("timestamp_ms")?,
        is_pinned: parse_flag(row, "is_pinned")?,
        is_favorite: parse_flag(row, "is_favorite")?,
        is_trashed: parse_flag(row, "is_trashed")?,
    };
    Ok(PersistedNote { note, version })
}

fn parse_flag(row: &Row<'_>, column: &str) -> StoreResult<bool> {
    match row.get::<_, i64>(column)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::InvalidData(format!(
            "invalid flag value `{other}` in notes.{column}"
        ))),
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
