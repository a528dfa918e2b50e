//! src/services/upload_coordinator.rs
//!
//! UploadCoordinator drives an [`ObjectStore`] through the
//! create → upload parts → complete (or abort) protocol for one logical file
//! at a time, tracking every session it opened.
//!
//! Sessions move `Active → Completed` or `Active → Aborted`. Only active
//! sessions are registered: a session leaves the registry once it completes
//! or aborts, so any later call with that upload id fails with
//! `SessionNotFound`. The coordinator never retries and never aborts on the
//! caller's behalf: wrap the store in `RetryingStore` for resilience and call
//! [`UploadCoordinator::abort`] explicitly to reclaim a failed session.

use crate::{
    models::{
        multipart::{CompletedPart, UploadOptions, UploadSession},
        object::ObjectInfo,
    },
    services::object_store::{ObjectStore, UploadError, UploadResult, ensure_key_safe},
};
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    bucket: String,

    /// Active sessions opened through this coordinator, keyed by upload id.
    /// The lock is never held across a store call.
    sessions: Arc<Mutex<HashMap<String, UploadSession>>>,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            sessions: Arc::default(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, UploadSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of an active session opened by this coordinator.
    pub fn session(&self, upload_id: &str) -> Option<UploadSession> {
        self.sessions().get(upload_id).cloned()
    }

    /// Confirm `upload_id` names an active session for `object_key`.
    fn ensure_active(&self, object_key: &str, upload_id: &str) -> UploadResult<()> {
        match self.sessions().get(upload_id) {
            Some(session) if session.object_key == object_key => Ok(()),
            _ => Err(UploadError::SessionNotFound(upload_id.to_string())),
        }
    }

    /// Open a session for `object_key` with default object metadata.
    pub async fn begin(&self, object_key: &str) -> UploadResult<String> {
        self.begin_with(object_key, UploadOptions::default()).await
    }

    /// Open a session for `object_key`; `options` apply to the final object.
    #[instrument(skip(self, options), fields(bucket = %self.bucket))]
    pub async fn begin_with(&self, object_key: &str, options: UploadOptions) -> UploadResult<String> {
        ensure_key_safe(object_key)?;

        let upload_id = self
            .store
            .create_multipart(&self.bucket, object_key, &options)
            .await?;

        self.sessions().insert(
            upload_id.clone(),
            UploadSession::new(object_key, upload_id.clone()),
        );
        info!(upload_id = %upload_id, "multipart session started");
        Ok(upload_id)
    }

    /// Upload `chunk` as part `index + 1`.
    ///
    /// Calls for the same session may run concurrently. Re-uploading an index
    /// replaces the earlier record for that part number.
    #[instrument(skip(self, chunk), fields(size = chunk.len()))]
    pub async fn upload_part(
        &self,
        object_key: &str,
        upload_id: &str,
        chunk: Bytes,
        index: u32,
    ) -> UploadResult<CompletedPart> {
        self.ensure_active(object_key, upload_id)?;
        let part_number = index.checked_add(1).ok_or_else(|| {
            UploadError::IncompleteUpload(format!("part index {} is out of range", index))
        })?;

        let e_tag = self
            .store
            .upload_part(&self.bucket, object_key, upload_id, part_number, chunk)
            .await?;
        let record = CompletedPart::new(part_number, e_tag);

        // The session may have ended while the part was in flight.
        match self.sessions().get_mut(upload_id) {
            Some(session) => {
                session.parts.insert(part_number, record.clone());
            }
            None => return Err(UploadError::SessionNotFound(upload_id.to_string())),
        }
        debug!(part_number, "part uploaded");
        Ok(record)
    }

    /// Finalize the session from `parts`.
    ///
    /// `parts` must list every uploaded part exactly once, numbered `1..=N`
    /// in order, each carrying the ETag returned for it. On failure the
    /// session stays active.
    #[instrument(skip(self, parts), fields(parts = parts.len()))]
    pub async fn complete(
        &self,
        object_key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> UploadResult<ObjectInfo> {
        {
            let sessions = self.sessions();
            let session = match sessions.get(upload_id) {
                Some(session) if session.object_key == object_key => session,
                _ => return Err(UploadError::SessionNotFound(upload_id.to_string())),
            };
            validate_parts(session, parts)?;
        }

        let object = self
            .store
            .complete_multipart(&self.bucket, object_key, upload_id, parts)
            .await?;

        self.sessions().remove(upload_id);
        info!(etag = %object.etag, size = object.size_bytes, "multipart session completed");
        Ok(object)
    }

    /// Discard the session and have the store reclaim its parts.
    ///
    /// If the store call fails the session stays active so the abort can be
    /// retried.
    #[instrument(skip(self))]
    pub async fn abort(&self, object_key: &str, upload_id: &str) -> UploadResult<()> {
        self.ensure_active(object_key, upload_id)?;

        if let Err(err) = self
            .store
            .abort_multipart(&self.bucket, object_key, upload_id)
            .await
        {
            warn!("abort failed, session left active: {}", err);
            return Err(err);
        }

        self.sessions().remove(upload_id);
        info!("multipart session aborted");
        Ok(())
    }
}

/// Check `parts` against what the session has actually uploaded.
///
/// Part numbers must be exactly `1..=N` in sequence order, so the position
/// of a record and the number it claims always agree. ETags may be quoted,
/// as they appear in an HTTP `ETag` header.
fn validate_parts(session: &UploadSession, parts: &[CompletedPart]) -> UploadResult<()> {
    if parts.len() != session.parts.len() {
        return Err(UploadError::IncompleteUpload(format!(
            "{} parts listed but {} uploaded",
            parts.len(),
            session.parts.len()
        )));
    }

    for (position, part) in parts.iter().enumerate() {
        let expected = position as u32 + 1;
        if part.part_number != expected {
            return Err(UploadError::IncompleteUpload(format!(
                "part at position {} is numbered {}, expected {}",
                position, part.part_number, expected
            )));
        }
        match session.parts.get(&expected) {
            Some(uploaded) if uploaded.e_tag == part.e_tag.trim_matches('"') => {}
            Some(_) => {
                return Err(UploadError::IncompleteUpload(format!(
                    "part {} etag does not match the uploaded part",
                    expected
                )));
            }
            None => {
                return Err(UploadError::IncompleteUpload(format!(
                    "part {} was never uploaded",
                    expected
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        memory_store::{MemoryStore, StoreOp},
        object_store::PartLimits,
    };

    fn coordinator() -> (UploadCoordinator, MemoryStore) {
        let store = MemoryStore::new(PartLimits {
            min_part_size: 1,
            max_part_size: 1024,
        });
        let coordinator = UploadCoordinator::new(Arc::new(store.clone()), "edunews-media");
        (coordinator, store)
    }

    #[tokio::test]
    async fn indices_map_to_contiguous_part_numbers() {
        let (coordinator, _) = coordinator();
        let id = coordinator.begin("video/a.mp4").await.unwrap();

        let mut numbers = Vec::new();
        for index in 0..5 {
            let record = coordinator
                .upload_part("video/a.mp4", &id, Bytes::from(vec![index as u8; 4]), index)
                .await
                .unwrap();
            numbers.push(record.part_number);
        }
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn reupload_overwrites_record() {
        let (coordinator, _) = coordinator();
        let id = coordinator.begin("k").await.unwrap();

        coordinator
            .upload_part("k", &id, Bytes::from_static(b"first"), 0)
            .await
            .unwrap();
        let second = coordinator
            .upload_part("k", &id, Bytes::from_static(b"second"), 0)
            .await
            .unwrap();

        let session = coordinator.session(&id).unwrap();
        assert_eq!(session.ordered_parts(), vec![second.clone()]);

        let object = coordinator.complete("k", &id, &[second]).await.unwrap();
        assert_eq!(object.size_bytes, 6);
    }

    #[tokio::test]
    async fn complete_requires_every_uploaded_part() {
        let (coordinator, store) = coordinator();
        let id = coordinator.begin("k").await.unwrap();
        let first = coordinator
            .upload_part("k", &id, Bytes::from_static(b"aa"), 0)
            .await
            .unwrap();
        coordinator
            .upload_part("k", &id, Bytes::from_static(b"bb"), 1)
            .await
            .unwrap();

        let err = coordinator.complete("k", &id, &[first]).await.unwrap_err();
        assert!(matches!(err, UploadError::IncompleteUpload(_)));
        assert_eq!(store.calls(StoreOp::Complete), 0);
        assert!(coordinator.session(&id).is_some());
    }

    #[tokio::test]
    async fn complete_rejects_reordered_parts() {
        let (coordinator, _) = coordinator();
        let id = coordinator.begin("k").await.unwrap();
        let a = coordinator
            .upload_part("k", &id, Bytes::from_static(b"aa"), 0)
            .await
            .unwrap();
        let b = coordinator
            .upload_part("k", &id, Bytes::from_static(b"bb"), 1)
            .await
            .unwrap();

        let err = coordinator.complete("k", &id, &[b, a]).await.unwrap_err();
        assert!(matches!(err, UploadError::IncompleteUpload(_)));
    }

    #[tokio::test]
    async fn unknown_upload_id_never_reaches_store() {
        let (coordinator, store) = coordinator();
        let err = coordinator
            .upload_part("k", "never-issued", Bytes::from_static(b"x"), 0)
            .await
            .unwrap_err();
        assert_eq!(err, UploadError::SessionNotFound("never-issued".into()));
        assert_eq!(store.calls(StoreOp::UploadPart), 0);
    }

    #[tokio::test]
    async fn terminal_sessions_reject_further_calls() {
        let (coordinator, _) = coordinator();
        let id = coordinator.begin("k").await.unwrap();
        let part = coordinator
            .upload_part("k", &id, Bytes::from_static(b"x"), 0)
            .await
            .unwrap();
        coordinator.complete("k", &id, &[part.clone()]).await.unwrap();

        assert!(coordinator.session(&id).is_none());
        let err = coordinator.complete("k", &id, &[part]).await.unwrap_err();
        assert!(matches!(err, UploadError::SessionNotFound(_)));
        let err = coordinator.abort("k", &id).await.unwrap_err();
        assert!(matches!(err, UploadError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn failed_begin_leaves_nothing_behind() {
        let (coordinator, store) = coordinator();
        store.fail_next(StoreOp::Create, UploadError::Authorization("denied".into()));

        let err = coordinator.begin("k").await.unwrap_err();
        assert!(matches!(err, UploadError::Authorization(_)));
        assert!(coordinator.sessions().is_empty());
    }

    #[tokio::test]
    async fn failed_abort_keeps_session_active() {
        let (coordinator, store) = coordinator();
        let id = coordinator.begin("k").await.unwrap();
        store.fail_next(StoreOp::Abort, UploadError::StoreUnavailable("down".into()));

        let err = coordinator.abort("k", &id).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(coordinator.session(&id).is_some());

        coordinator.abort("k", &id).await.unwrap();
        let err = coordinator.abort("k", &id).await.unwrap_err();
        assert_eq!(err, UploadError::SessionNotFound(id));
    }

    #[tokio::test]
    async fn rejects_unsafe_keys_before_contacting_store() {
        let (coordinator, store) = coordinator();
        let err = coordinator.begin("").await.unwrap_err();
        assert_eq!(err, UploadError::InvalidObjectKey);
        assert_eq!(store.calls(StoreOp::Create), 0);
    }

    #[tokio::test]
    async fn quoted_etags_are_accepted_on_complete() {
        let (coordinator, _) = coordinator();
        let id = coordinator.begin("k").await.unwrap();
        let part = coordinator
            .upload_part("k", &id, Bytes::from_static(b"data"), 0)
            .await
            .unwrap();

        let quoted = CompletedPart::new(1, format!("\"{}\"", part.e_tag));
        let object = coordinator.complete("k", &id, &[quoted]).await.unwrap();
        assert_eq!(object.size_bytes, 4);
    }

    #[tokio::test]
    async fn finished_sessions_leave_the_registry() {
        let (coordinator, _) = coordinator();
        for _ in 0..100 {
            let id = coordinator.begin("k").await.unwrap();
            coordinator.abort("k", &id).await.unwrap();
        }
        let id = coordinator.begin("k").await.unwrap();
        let part = coordinator
            .upload_part("k", &id, Bytes::from_static(b"x"), 0)
            .await
            .unwrap();
        coordinator.complete("k", &id, &[part]).await.unwrap();

        assert!(coordinator.sessions().is_empty());
    }
}
