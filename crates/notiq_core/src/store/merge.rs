//! Conflict resolution between a context's pending edits and the stored row.
//!
//! # Invariants
//! - A conflict exists only when the stored version differs from the version
//!   the context last observed.
//! - Property-level policies never touch fields neither side changed.

use super::{PersistedNote, StoreError, StoreResult};
use crate::model::note::{Note, NoteField};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// How a save resolves rows that changed since the context last saw them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Field-level last writer wins: the saving context's changed fields
    /// overwrite, fields changed only elsewhere survive.
    #[default]
    PropertyObjectTrump,
    /// Field-level, store wins: fields changed on both sides keep the stored
    /// value, the saving context's other changed fields are applied.
    PropertyStoreTrump,
    /// Record-level: the saving context's whole object replaces the row.
    Overwrite,
    /// Any conflict aborts the save.
    Error,
}

impl MergePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PropertyObjectTrump => "property_object_trump",
            Self::PropertyStoreTrump => "property_store_trump",
            Self::Overwrite => "overwrite",
            Self::Error => "error",
        }
    }
}

impl Display for MergePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A context object with unsaved edits.
pub(crate) struct PendingEdit<'a> {
    /// Row values as of `version`, the last state this context observed.
    pub persisted: &'a Note,
    pub version: u64,
    pub current: &'a Note,
    pub changed: &'a BTreeSet<NoteField>,
}

/// Computes the row to write for `edit` against `stored`.
pub(crate) fn resolve(
    policy: MergePolicy,
    edit: &PendingEdit<'_>,
    stored: &PersistedNote,
) -> StoreResult<Note> {
    if stored.version == edit.version {
        return Ok(apply_fields(
            &stored.note,
            edit.current,
            edit.changed.iter().copied(),
        ));
    }

    let external = edit
        .persisted
        .diff(&stored.note)
        .into_iter()
        .collect::<BTreeSet<_>>();
    debug!(
        "event=merge_conflict module=store policy={} note_id={} observed_version={} stored_version={} local_fields={} external_fields={}",
        policy,
        stored.note.id,
        edit.version,
        stored.version,
        edit.changed.len(),
        external.len()
    );

    match policy {
        MergePolicy::PropertyObjectTrump => Ok(apply_fields(
            &stored.note,
            edit.current,
            edit.changed.iter().copied(),
        )),
        MergePolicy::PropertyStoreTrump => Ok(apply_fields(
            &stored.note,
            edit.current,
            edit.changed
                .iter()
                .copied()
                .filter(|field| !external.contains(field)),
        )),
        MergePolicy::Overwrite => Ok(edit.current.clone()),
        MergePolicy::Error => Err(StoreError::MergeConflict {
            id: stored.note.id,
            fields: external.into_iter().collect(),
        }),
    }
}

fn apply_fields(base: &Note, source: &Note, fields: impl Iterator<Item = NoteField>) -> Note {
    let mut merged = base.clone();
    for field in fields {
        merged.copy_field(source, field);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::{resolve, MergePolicy, PendingEdit};
    use crate::model::note::{Note, NoteField};
    use crate::store::{PersistedNote, StoreError};
    use std::collections::BTreeSet;

    struct Fixture {
        persisted: Note,
        current: Note,
        changed: BTreeSet<NoteField>,
        stored: PersistedNote,
    }

    // Local edit: title + pin. External edit (version 2): title + favorite.
    fn conflicting() -> Fixture {
        let persisted = Note::new(Some("base".to_string()), Some("body".to_string()), 100);

        let mut current = persisted.clone();
        current.title = Some("local".to_string());
        current.is_pinned = true;

        let mut external = persisted.clone();
        external.title = Some("remote".to_string());
        external.is_favorite = true;

        Fixture {
            persisted,
            current,
            changed: [NoteField::Title, NoteField::IsPinned].into_iter().collect(),
            stored: PersistedNote {
                note: external,
                version: 2,
            },
        }
    }

    fn edit(fixture: &Fixture) -> PendingEdit<'_> {
        PendingEdit {
            persisted: &fixture.persisted,
            version: 1,
            current: &fixture.current,
            changed: &fixture.changed,
        }
    }

    #[test]
    fn property_object_trump_keeps_both_sides_and_local_wins_overlap() {
        let fixture = conflicting();
        let resolved = resolve(
            MergePolicy::PropertyObjectTrump,
            &edit(&fixture),
            &fixture.stored,
        )
        .unwrap();
        assert_eq!(resolved.title.as_deref(), Some("local"));
        assert!(resolved.is_pinned);
        assert!(resolved.is_favorite);
    }

    #[test]
    fn property_store_trump_keeps_stored_value_on_overlap() {
        let fixture = conflicting();
        let resolved = resolve(
            MergePolicy::PropertyStoreTrump,
            &edit(&fixture),
            &fixture.stored,
        )
        .unwrap();
        assert_eq!(resolved.title.as_deref(), Some("remote"));
        assert!(resolved.is_pinned);
        assert!(resolved.is_favorite);
    }

    #[test]
    fn overwrite_replaces_whole_record() {
        let fixture = conflicting();
        let resolved =
            resolve(MergePolicy::Overwrite, &edit(&fixture), &fixture.stored).unwrap();
        assert_eq!(resolved, fixture.current);
        assert!(!resolved.is_favorite);
    }

    #[test]
    fn error_policy_reports_externally_changed_fields() {
        let fixture = conflicting();
        let err = resolve(MergePolicy::Error, &edit(&fixture), &fixture.stored).unwrap_err();
        match err {
            StoreError::MergeConflict { fields, .. } => {
                assert_eq!(fields, vec![NoteField::Title, NoteField::IsFavorite]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn matching_version_is_not_a_conflict_even_for_error_policy() {
        let fixture = conflicting();
        let stored = PersistedNote {
            note: fixture.persisted.clone(),
            version: 1,
        };
        let resolved = resolve(MergePolicy::Error, &edit(&fixture), &stored).unwrap();
        assert_eq!(resolved, fixture.current);
    }
}
