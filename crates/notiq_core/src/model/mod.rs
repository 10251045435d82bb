//! Note domain model.
//!
//! # Invariants
//! - Every note is identified by a stable `NoteId`.
//! - `NoteField` is the unit of change tracking and merge resolution.

pub mod note;
