//! In-memory object store.
//!
//! Keeps sessions, parts and assembled objects in process memory. Used for
//! tests and for running the service without a disk backend. Supports
//! one-shot failure injection per operation and counts every call it receives.

use crate::{
    models::{
        multipart::{CompletedPart, SessionState, UploadOptions},
        object::ObjectInfo,
    },
    services::object_store::{
        ByteStream, HealthCheck, ObjectStore, PartLimits, UploadError, UploadResult,
        ensure_key_safe, multipart_etag,
    },
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};
use uuid::Uuid;

/// The store procedures, for failure injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    UploadPart,
    Complete,
    Abort,
    Read,
}

struct StoredSession {
    bucket: String,
    key: String,
    options: UploadOptions,
    state: SessionState,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, StoredSession>,
    objects: HashMap<(String, String), (ObjectInfo, Bytes)>,
    failures: HashMap<StoreOp, VecDeque<UploadError>>,
    calls: HashMap<StoreOp, usize>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    limits: PartLimits,
}

impl MemoryStore {
    pub fn new(limits: PartLimits) -> Self {
        Self {
            inner: Arc::default(),
            limits,
        }
    }

    /// Make the next call to `op` fail with `err`. Queued failures are consumed in order.
    pub fn fail_next(&self, op: StoreOp, err: UploadError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Number of calls the store has received for `op`, including failed ones.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of sessions that still hold uploaded part data.
    pub fn sessions_with_parts(&self) -> usize {
        self.lock()
            .sessions
            .values()
            .filter(|s| !s.parts.is_empty())
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and pop a queued failure, if any.
    fn enter(&self, op: StoreOp) -> UploadResult<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        *inner.calls.entry(op).or_default() += 1;
        if let Some(err) = inner.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(inner)
    }
}

fn active_session<'a>(
    inner: &'a mut Inner,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> UploadResult<&'a mut StoredSession> {
    match inner.sessions.get_mut(upload_id) {
        Some(session)
            if session.state == SessionState::Active
                && session.bucket == bucket
                && session.key == key =>
        {
            Ok(session)
        }
        _ => Err(UploadError::SessionNotFound(upload_id.to_string())),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        options: &UploadOptions,
    ) -> UploadResult<String> {
        let mut inner = self.enter(StoreOp::Create)?;
        ensure_key_safe(key)?;

        let upload_id = Uuid::new_v4().simple().to_string();
        inner.sessions.insert(
            upload_id.clone(),
            StoredSession {
                bucket: bucket.to_string(),
                key: key.to_string(),
                options: options.clone(),
                state: SessionState::Active,
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> UploadResult<String> {
        let mut inner = self.enter(StoreOp::UploadPart)?;
        self.limits.check_upload(part_number, data.len())?;
        let session = active_session(&mut inner, bucket, key, upload_id)?;

        let etag = format!("{:x}", md5::compute(&data));
        session.parts.insert(part_number, (etag.clone(), data));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> UploadResult<ObjectInfo> {
        let mut inner = self.enter(StoreOp::Complete)?;
        let session = active_session(&mut inner, bucket, key, upload_id)?;

        if parts.is_empty() {
            return Err(UploadError::IncompleteUpload(
                "at least one part is required".into(),
            ));
        }

        let mut body = BytesMut::new();
        let mut previous = 0u32;
        for (pos, part) in parts.iter().enumerate() {
            if part.part_number <= previous {
                return Err(UploadError::IncompleteUpload(format!(
                    "part {} is out of order",
                    part.part_number
                )));
            }
            previous = part.part_number;

            let (etag, data) = session.parts.get(&part.part_number).ok_or_else(|| {
                UploadError::IncompleteUpload(format!("part {} was never uploaded", part.part_number))
            })?;
            if etag != part.e_tag.trim_matches('"') {
                return Err(UploadError::IncompleteUpload(format!(
                    "part {} etag does not match",
                    part.part_number
                )));
            }
            self.limits
                .check_assembled(part.part_number, data.len(), pos + 1 == parts.len())?;
            body.extend_from_slice(data);
        }

        let object = ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: session.options.content_type.clone(),
            cache_control: session.options.cache_control.clone(),
            content_disposition: session.options.content_disposition.clone(),
            size_bytes: body.len() as i64,
            etag: multipart_etag(parts.iter().map(|p| p.e_tag.trim_matches('"'))),
            last_modified: Utc::now(),
        };

        session.state = SessionState::Completed;
        session.parts.clear();
        inner.objects.insert(
            (bucket.to_string(), key.to_string()),
            (object.clone(), body.freeze()),
        );
        Ok(object)
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> UploadResult<()> {
        let mut inner = self.enter(StoreOp::Abort)?;
        let session = active_session(&mut inner, bucket, key, upload_id)?;
        session.state = SessionState::Aborted;
        session.parts.clear();
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> UploadResult<Option<ObjectInfo>> {
        let inner = self.enter(StoreOp::Read)?;
        Ok(inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(info, _)| info.clone()))
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> UploadResult<Option<(ObjectInfo, ByteStream)>> {
        let inner = self.enter(StoreOp::Read)?;
        Ok(inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(info, data)| {
                let stream: ByteStream = Box::pin(futures::stream::iter([Ok(data.clone())]));
                (info.clone(), stream)
            }))
    }

    async fn readiness(&self) -> Vec<HealthCheck> {
        vec![HealthCheck::from_result("memory", Ok(()))]
    }
}
