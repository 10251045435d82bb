//! Sidebar sections and title search over the published snapshot.

use crate::model::note::Note;
use crate::store::NotePredicate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Sidebar section of the notes UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteFilter {
    /// Every note that is not in the trash.
    #[default]
    AllNotes,
    /// Favorite notes that are not in the trash.
    Favorites,
    Trash,
}

impl NoteFilter {
    /// Predicate for this section combined with a title search.
    pub fn predicate(self, search_text: &str) -> NotePredicate {
        let section = match self {
            Self::AllNotes => NotePredicate::IsTrashed(false),
            Self::Favorites => NotePredicate::And(vec![
                NotePredicate::IsFavorite(true),
                NotePredicate::IsTrashed(false),
            ]),
            Self::Trash => NotePredicate::IsTrashed(true),
        };
        NotePredicate::And(vec![
            section,
            NotePredicate::TitleContains(search_text.to_string()),
        ])
    }
}

impl FromStr for NoteFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" | "all_notes" => Ok(Self::AllNotes),
            "favorites" => Ok(Self::Favorites),
            "trash" => Ok(Self::Trash),
            other => Err(format!(
                "unknown note filter `{other}`; expected all_notes|favorites|trash"
            )),
        }
    }
}

/// Notes of `snapshot` in `filter`, matching `search_text`, in snapshot order.
pub fn filter_notes<'a>(snapshot: &'a [Note], filter: NoteFilter, search_text: &str) -> Vec<&'a Note> {
    let predicate = filter.predicate(search_text);
    snapshot
        .iter()
        .filter(|note| predicate.matches(note))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{filter_notes, NoteFilter};
    use crate::model::note::Note;

    fn note(title: &str, is_favorite: bool, is_trashed: bool) -> Note {
        let mut note = Note::new(Some(title.to_string()), None, 0);
        note.is_favorite = is_favorite;
        note.is_trashed = is_trashed;
        note
    }

    #[test]
    fn sections_partition_trash_from_the_rest() {
        let snapshot = vec![
            note("plain", false, false),
            note("starred", true, false),
            note("starred-trashed", true, true),
            note("trashed", false, true),
        ];

        let titles = |filter| {
            filter_notes(&snapshot, filter, "")
                .into_iter()
                .map(|note| note.display_title().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(titles(NoteFilter::AllNotes), vec!["plain", "starred"]);
        assert_eq!(titles(NoteFilter::Favorites), vec!["starred"]);
        assert_eq!(
            titles(NoteFilter::Trash),
            vec!["starred-trashed", "trashed"]
        );
    }

    #[test]
    fn search_matches_title_case_insensitively() {
        let snapshot = vec![note("Meeting notes", false, false), note("Recipes", false, false)];
        let found = filter_notes(&snapshot, NoteFilter::AllNotes, "MEET");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].display_title(), "Meeting notes");
    }

    #[test]
    fn filter_names_parse() {
        assert_eq!("Favorites".parse::<NoteFilter>().unwrap(), NoteFilter::Favorites);
        assert_eq!("all".parse::<NoteFilter>().unwrap(), NoteFilter::AllNotes);
        assert!("archive".parse::<NoteFilter>().is_err());
    }
}
