//! Multipart upload sessions, their parts, and the records exchanged with callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Record returned for every successfully uploaded chunk.
///
/// The full ordered set of these is required to finalize a session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    /// One-based part number (`index + 1`).
    pub part_number: u32,

    /// Opaque integrity tag assigned by the store.
    pub e_tag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, e_tag: impl Into<String>) -> Self {
        Self {
            part_number,
            e_tag: e_tag.into(),
        }
    }
}

/// Lifecycle of an upload session. `Completed` and `Aborted` are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
        }
    }
}

/// Coordinator-side view of one in-progress multipart transfer.
#[derive(Clone, Debug)]
pub struct UploadSession {
    pub object_key: String,
    pub upload_id: String,

    /// Completed parts keyed by part number; a re-upload replaces the entry.
    pub parts: BTreeMap<u32, CompletedPart>,
}

impl UploadSession {
    pub fn new(object_key: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            upload_id: upload_id.into(),
            parts: BTreeMap::new(),
        }
    }

    /// Parts in part-number order.
    pub fn ordered_parts(&self) -> Vec<CompletedPart> {
        self.parts.values().cloned().collect()
    }
}

/// Per-session metadata applied to the final object.
#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
}

/// A multipart upload row in the local store's metadata database.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartUpload {
    /// Upload ID handed back to the client.
    pub upload_id: String,

    pub bucket: String,

    /// Object key being uploaded.
    pub key: String,

    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,

    /// `active`, `completed` or `aborted`.
    pub state: String,

    pub initiated_at: DateTime<Utc>,
}

/// A single stored part of a multipart upload.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartPart {
    pub upload_id: String,

    /// Part number (1-based).
    pub part_number: i64,

    pub size_bytes: i64,

    /// Hex MD5 of the part payload.
    pub etag: String,

    pub uploaded_at: DateTime<Utc>,
}
