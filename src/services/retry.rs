//! Retry decorator for any [`ObjectStore`].
//!
//! Transient failures (`StoreUnavailable`) are retried with exponential
//! backoff; every other error is returned on the first attempt. The wrapped
//! store and the coordinator stay retry-free.

use crate::{
    models::{
        multipart::{CompletedPart, UploadOptions},
        object::ObjectInfo,
    },
    services::object_store::{ByteStream, HealthCheck, ObjectStore, UploadResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::warn;

/// Upper bound on the wait between two attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    async fn run<T, F, Fut>(&self, op: &str, mut call: F) -> UploadResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = UploadResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        op,
                        attempt + 1,
                        attempts,
                        err
                    );
                    tokio::time::sleep(self.delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Clone)]
pub struct RetryingStore {
    inner: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn ObjectStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ObjectStore for RetryingStore {
    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        options: &UploadOptions,
    ) -> UploadResult<String> {
        self.policy
            .run("create_multipart", move || {
                self.inner.create_multipart(bucket, key, options)
            })
            .await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> UploadResult<String> {
        self.policy
            .run("upload_part", move || {
                self.inner
                    .upload_part(bucket, key, upload_id, part_number, data.clone())
            })
            .await
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> UploadResult<ObjectInfo> {
        self.policy
            .run("complete_multipart", move || {
                self.inner.complete_multipart(bucket, key, upload_id, parts)
            })
            .await
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> UploadResult<()> {
        self.policy
            .run("abort_multipart", move || {
                self.inner.abort_multipart(bucket, key, upload_id)
            })
            .await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> UploadResult<Option<ObjectInfo>> {
        self.policy
            .run("head_object", move || self.inner.head_object(bucket, key))
            .await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> UploadResult<Option<(ObjectInfo, ByteStream)>> {
        self.policy
            .run("get_object", move || self.inner.get_object(bucket, key))
            .await
    }

    async fn readiness(&self) -> Vec<HealthCheck> {
        self.inner.readiness().await
    }
}
