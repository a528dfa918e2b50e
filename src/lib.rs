//! Chunked multipart upload service for the EduNews24 media bucket.
//!
//! The [`services::upload_coordinator::UploadCoordinator`] sequences the
//! create / upload-part / complete / abort protocol against any
//! [`services::object_store::ObjectStore`]; the HTTP layer in [`routes`]
//! exposes it together with a streaming video upload endpoint.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
