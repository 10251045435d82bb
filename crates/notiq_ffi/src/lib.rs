//! Flutter-facing bridge crate for Notiq core.

pub mod api;
