//! Use-case layer between UI intents and the record store.
//!
//! # Responsibility
//! - Turn UI intents into view-context mutations, saves and re-queries.
//! - Publish the sorted notes snapshot and derived sidebar views.

pub mod filters;
pub mod notes_view_model;
