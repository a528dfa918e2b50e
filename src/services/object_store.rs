//! The object-store collaborator consumed by the upload coordinator.
//!
//! Every backend speaks the same four multipart procedures (create, upload
//! part, complete, abort) plus read access to finished objects. Wire details
//! belong to the backend; callers only see [`UploadError`].

use crate::models::{
    multipart::{CompletedPart, UploadOptions},
    object::ObjectInfo,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::{io, pin::Pin};
use thiserror::Error;

pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("object store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("not authorized: {0}")]
    Authorization(String),
    #[error("part {part_number} is {size} bytes, above the {max} byte limit")]
    PartTooLarge {
        part_number: u32,
        size: usize,
        max: usize,
    },
    #[error("part {part_number} is {size} bytes, below the {min} byte minimum")]
    PartTooSmall {
        part_number: u32,
        size: usize,
        min: usize,
    },
    #[error("incomplete upload: {0}")]
    IncompleteUpload(String),
    #[error("upload session `{0}` not found")]
    SessionNotFound(String),
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("content digest mismatch for part {0}")]
    BadDigest(u32),
    #[error("failed to read upload body: {0}")]
    SourceUnreadable(String),
}

impl UploadError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::StoreUnavailable(_))
    }
}

impl From<sqlx::Error> for UploadError {
    fn from(err: sqlx::Error) -> Self {
        UploadError::StoreUnavailable(err.to_string())
    }
}

impl From<io::Error> for UploadError {
    fn from(err: io::Error) -> Self {
        UploadError::StoreUnavailable(err.to_string())
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Store-side part size policy. The minimum applies to every part except the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLimits {
    pub min_part_size: usize,
    pub max_part_size: usize,
}

impl Default for PartLimits {
    fn default() -> Self {
        Self {
            min_part_size: 5 * 1024 * 1024,
            max_part_size: 5 * 1024 * 1024 * 1024,
        }
    }
}

impl PartLimits {
    /// Size check applied when a part is uploaded.
    pub fn check_upload(&self, part_number: u32, size: usize) -> UploadResult<()> {
        if size == 0 {
            return Err(UploadError::PartTooSmall {
                part_number,
                size,
                min: 1,
            });
        }
        if size > self.max_part_size {
            return Err(UploadError::PartTooLarge {
                part_number,
                size,
                max: self.max_part_size,
            });
        }
        Ok(())
    }

    /// Size check applied at completion, once the final part is known.
    pub fn check_assembled(&self, part_number: u32, size: usize, is_last: bool) -> UploadResult<()> {
        if !is_last && size < self.min_part_size {
            return Err(UploadError::PartTooSmall {
                part_number,
                size,
                min: self.min_part_size,
            });
        }
        Ok(())
    }
}

/// Outcome of one readiness check performed by a backend.
#[derive(Serialize, Debug, Clone)]
pub struct HealthCheck {
    pub name: &'static str,
    pub ok: bool,
    pub error: Option<String>,
}

impl HealthCheck {
    pub fn from_result(name: &'static str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                name,
                ok: true,
                error: None,
            },
            Err(error) => Self {
                name,
                ok: false,
                error: Some(error),
            },
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open a multipart session and return its upload id.
    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        options: &UploadOptions,
    ) -> UploadResult<String>;

    /// Store `data` as `part_number`, replacing any earlier attempt. Returns the part ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> UploadResult<String>;

    /// Assemble the referenced parts, in request order, into the final object.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> UploadResult<ObjectInfo>;

    /// Discard the session and reclaim its parts.
    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str)
    -> UploadResult<()>;

    async fn head_object(&self, bucket: &str, key: &str) -> UploadResult<Option<ObjectInfo>>;

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> UploadResult<Option<(ObjectInfo, ByteStream)>>;

    async fn readiness(&self) -> Vec<HealthCheck>;
}

/// Multipart ETag as S3 computes it: MD5 over the concatenated binary part
/// digests, suffixed with the part count.
pub fn multipart_etag<'a>(part_etags: impl IntoIterator<Item = &'a str>) -> String {
    let mut ctx = md5::Context::new();
    let mut count = 0usize;
    for etag in part_etags {
        count += 1;
        match decode_hex(etag) {
            Some(raw) => ctx.consume(raw),
            None => ctx.consume(etag.as_bytes()),
        }
    }
    format!("{:x}-{}", ctx.compute(), count)
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(value.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Reject keys that are empty, overly long, absolute, or traverse upwards.
pub fn ensure_key_safe(key: &str) -> UploadResult<()> {
    const MAX_OBJECT_KEY_LEN: usize = 1024;

    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(UploadError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(UploadError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(UploadError::InvalidObjectKey);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_etag_matches_s3_layout() {
        let a = format!("{:x}", md5::compute(b"hello "));
        let b = format!("{:x}", md5::compute(b"world"));

        let mut raw = Vec::new();
        raw.extend_from_slice(&md5::compute(b"hello ").0);
        raw.extend_from_slice(&md5::compute(b"world").0);
        let expected = format!("{:x}-2", md5::compute(raw));

        assert_eq!(multipart_etag([a.as_str(), b.as_str()]), expected);
    }

    #[test]
    fn unsafe_keys_are_rejected() {
        assert_eq!(ensure_key_safe(""), Err(UploadError::InvalidObjectKey));
        assert_eq!(ensure_key_safe("/abs"), Err(UploadError::InvalidObjectKey));
        assert_eq!(
            ensure_key_safe("video/../etc"),
            Err(UploadError::InvalidObjectKey)
        );
        assert_eq!(
            ensure_key_safe("bad\nkey"),
            Err(UploadError::InvalidObjectKey)
        );
        assert!(ensure_key_safe("video/a.mp4").is_ok());
    }

    #[test]
    fn only_outages_are_retryable() {
        assert!(UploadError::StoreUnavailable("down".into()).is_retryable());
        assert!(!UploadError::Authorization("denied".into()).is_retryable());
        assert!(!UploadError::SessionNotFound("x".into()).is_retryable());
    }
}
