//! Fetch requests: predicates and sort descriptors over notes.
//!
//! # Invariants
//! - In-memory ordering (`FetchRequest::compare`) and SQL ordering
//!   (`order_by_sql`) agree, both ending with `id ASC` as tiebreak.
//! - `TitleContains` is case-insensitive; an empty needle matches every note.

use crate::model::note::{Note, NoteField};
use std::cmp::Ordering;

/// Filter over note properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotePredicate {
    IsPinned(bool),
    IsFavorite(bool),
    IsTrashed(bool),
    TitleContains(String),
    And(Vec<NotePredicate>),
}

impl NotePredicate {
    pub fn matches(&self, note: &Note) -> bool {
        match self {
            Self::IsPinned(expected) => note.is_pinned == *expected,
            Self::IsFavorite(expected) => note.is_favorite == *expected,
            Self::IsTrashed(expected) => note.is_trashed == *expected,
            Self::TitleContains(needle) => {
                if needle.is_empty() {
                    return true;
                }
                let needle = needle.to_lowercase();
                note.title
                    .as_deref()
                    .is_some_and(|title| title.to_lowercase().contains(&needle))
            }
            Self::And(predicates) => predicates.iter().all(|predicate| predicate.matches(note)),
        }
    }

    /// Boolean equality filters that can be pushed down to SQL.
    pub(crate) fn flag_filters(&self) -> Vec<(NoteField, bool)> {
        match self {
            Self::IsPinned(expected) => vec![(NoteField::IsPinned, *expected)],
            Self::IsFavorite(expected) => vec![(NoteField::IsFavorite, *expected)],
            Self::IsTrashed(expected) => vec![(NoteField::IsTrashed, *expected)],
            Self::TitleContains(_) => Vec::new(),
            Self::And(predicates) => predicates
                .iter()
                .flat_map(NotePredicate::flag_filters)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    IsPinned,
    Timestamp,
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortDescriptor {
    pub key: SortKey,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(key: SortKey) -> Self {
        Self {
            key,
            ascending: true,
        }
    }

    pub fn descending(key: SortKey) -> Self {
        Self {
            key,
            ascending: false,
        }
    }

    pub fn compare(&self, left: &Note, right: &Note) -> Ordering {
        let ordering = match self.key {
            SortKey::IsPinned => left.is_pinned.cmp(&right.is_pinned),
            SortKey::Timestamp => left.timestamp_ms.cmp(&right.timestamp_ms),
            SortKey::Title => title_key(left).cmp(&title_key(right)),
        };
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }

    fn sql(&self) -> String {
        let column = match self.key {
            SortKey::IsPinned => "is_pinned",
            SortKey::Timestamp => "timestamp_ms",
            SortKey::Title => "title COLLATE NOCASE",
        };
        let direction = if self.ascending { "ASC" } else { "DESC" };
        format!("{column} {direction}")
    }
}

fn title_key(note: &Note) -> Option<String> {
    note.title.as_deref().map(str::to_lowercase)
}

/// Query over the notes entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub predicate: Option<NotePredicate>,
    pub sort: Vec<SortDescriptor>,
    pub limit: Option<usize>,
}

impl FetchRequest {
    /// Unfiltered, unsorted request (id order).
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical snapshot query: pinned first, then newest first.
    pub fn all_notes() -> Self {
        Self::new()
            .sorted_by(SortDescriptor::descending(SortKey::IsPinned))
            .sorted_by(SortDescriptor::descending(SortKey::Timestamp))
    }

    pub fn with_predicate(mut self, predicate: NotePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Appends a sort descriptor; earlier descriptors take precedence.
    pub fn sorted_by(mut self, descriptor: SortDescriptor) -> Self {
        self.sort.push(descriptor);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, note: &Note) -> bool {
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate.matches(note))
    }

    pub fn compare(&self, left: &Note, right: &Note) -> Ordering {
        self.sort
            .iter()
            .map(|descriptor| descriptor.compare(left, right))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| left.id.cmp(&right.id))
    }

    pub(crate) fn order_by_sql(&self) -> String {
        let mut terms = self
            .sort
            .iter()
            .map(SortDescriptor::sql)
            .collect::<Vec<_>>();
        terms.push("id ASC".to_string());
        format!(" ORDER BY {}", terms.join(", "))
    }
}
