//! Represents an object assembled from a completed multipart upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata of a durably stored object.
///
/// Does not carry the payload; readers obtain a byte stream separately.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub bucket: String,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,

    pub size_bytes: i64,

    /// Multipart ETag: `md5(concat(part digests))-N`.
    pub etag: String,

    pub last_modified: DateTime<Utc>,
}
