//! Core data models for the upload service.
//!
//! Session and part types are shared by the coordinator and every store
//! backend. Row types map to the local store's SQLite tables via
//! `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod multipart;
pub mod object;
