//! Note record and per-property field helpers.
//!
//! # Responsibility
//! - Define the single persisted entity of the notes store.
//! - Provide field-level compare/copy used by context merge resolution.
//! - Derive list/grid presentation helpers (display title, preview, share text,
//!   day sections).
//!
//! # Invariants
//! - `id` is assigned once at creation and never reassigned.
//! - Flags default to `false`.

use chrono::{DateTime, NaiveDate, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of a note record.
pub type NoteId = Uuid;

/// Title shown for notes without a usable title.
pub const UNTITLED: &str = "Untitled";

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// The single entity of the notes store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: Option<String>,
    pub content: Option<String>,
    /// Unix epoch milliseconds. Refreshed on every title/content edit.
    pub timestamp_ms: i64,
    pub is_pinned: bool,
    pub is_favorite: bool,
    /// Soft-delete marker. Trashed notes stay in the store until deleted.
    pub is_trashed: bool,
}

impl Note {
    /// Creates a note with a fresh v4 id and all flags cleared.
    pub fn new(
        title: Option<String>,
        content: Option<String>,
        timestamp_ms: i64,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), title, content, timestamp_ms)
    }

    /// Creates a note with a caller-provided id.
    ///
    /// Used by the remote import path where identity already exists upstream.
    pub fn with_id(
        id: NoteId,
        title: Option<String>,
        content: Option<String>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            id,
            title,
            content,
            timestamp_ms,
            is_pinned: false,
            is_favorite: false,
            is_trashed: false,
        }
    }

    /// Title for display, falling back to `Untitled`.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title,
            _ => UNTITLED,
        }
    }

    /// Whitespace-normalized content truncated to `max_chars` characters.
    pub fn preview(&self, max_chars: usize) -> String {
        let content = self.content.as_deref().unwrap_or_default();
        let normalized = WHITESPACE_RE.replace_all(content.trim(), " ");
        normalized.chars().take(max_chars).collect()
    }

    /// Payload handed to a platform share sheet.
    pub fn share_text(&self) -> String {
        format!(
            "{}\n\n{}",
            self.display_title(),
            self.content.as_deref().unwrap_or_default()
        )
    }

    /// Returns whether `field` holds the same value on both notes.
    pub fn field_eq(&self, other: &Note, field: NoteField) -> bool {
        match field {
            NoteField::Title => self.title == other.title,
            NoteField::Content => self.content == other.content,
            NoteField::Timestamp => self.timestamp_ms == other.timestamp_ms,
            NoteField::IsPinned => self.is_pinned == other.is_pinned,
            NoteField::IsFavorite => self.is_favorite == other.is_favorite,
            NoteField::IsTrashed => self.is_trashed == other.is_trashed,
        }
    }

    /// Copies `field` from `source` into `self`.
    pub fn copy_field(&mut self, source: &Note, field: NoteField) {
        match field {
            NoteField::Title => self.title = source.title.clone(),
            NoteField::Content => self.content = source.content.clone(),
            NoteField::Timestamp => self.timestamp_ms = source.timestamp_ms,
            NoteField::IsPinned => self.is_pinned = source.is_pinned,
            NoteField::IsFavorite => self.is_favorite = source.is_favorite,
            NoteField::IsTrashed => self.is_trashed = source.is_trashed,
        }
    }

    /// Fields whose values differ between `self` and `other`.
    pub fn diff(&self, other: &Note) -> Vec<NoteField> {
        NoteField::ALL
            .into_iter()
            .filter(|field| !self.field_eq(other, *field))
            .collect()
    }
}

/// Groups `notes` into calendar-day sections in `tz`, newest day first.
///
/// Notes keep their relative order inside each section.
pub fn group_by_day<'a, Tz: TimeZone>(notes: &'a [Note], tz: &Tz) -> Vec<(NaiveDate, Vec<&'a Note>)> {
    let mut sections: BTreeMap<NaiveDate, Vec<&'a Note>> = BTreeMap::new();
    for note in notes {
        let day = DateTime::from_timestamp_millis(note.timestamp_ms)
            .unwrap_or_default()
            .with_timezone(tz)
            .date_naive();
        sections.entry(day).or_default().push(note);
    }
    sections.into_iter().rev().collect()
}

/// Mutable properties of a note. `id` is deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteField {
    Title,
    Content,
    Timestamp,
    IsPinned,
    IsFavorite,
    IsTrashed,
}

impl NoteField {
    pub const ALL: [NoteField; 6] = [
        NoteField::Title,
        NoteField::Content,
        NoteField::Timestamp,
        NoteField::IsPinned,
        NoteField::IsFavorite,
        NoteField::IsTrashed,
    ];

    /// Column name in the `notes` table.
    pub fn column(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Content => "content",
            Self::Timestamp => "timestamp_ms",
            Self::IsPinned => "is_pinned",
            Self::IsFavorite => "is_favorite",
            Self::IsTrashed => "is_trashed",
        }
    }
}

impl Display for NoteField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}
