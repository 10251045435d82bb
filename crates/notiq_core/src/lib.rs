//! Core persistence and sync-merge layer for Notiq.
//! This crate owns the notes store, its contexts and the view-model snapshot.

pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;
pub mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{StoreDescription, StoreLocation};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::note::{group_by_day, Note, NoteField, NoteId};
pub use service::filters::NoteFilter;
pub use service::notes_view_model::NotesViewModel;
pub use store::{
    ChangeSet, FetchRequest, ManagedContext, MergePolicy, RecordStore, SaveOutcome, StoreError,
    StoreResult,
};
pub use sync::{ChangeNotificationBridge, RemoteChangeNotification, RemoteRecordChange};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
