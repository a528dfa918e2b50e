//! Whole-file transfer on top of the coordinator.
//!
//! Splits an incoming byte stream into fixed-size parts, uploads them with a
//! bounded fan-out and finalizes the object. Any failure after the session
//! was opened aborts it so no orphaned parts are left in the store.

use crate::{
    models::{
        multipart::{CompletedPart, UploadOptions},
        object::ObjectInfo,
    },
    services::{
        object_store::{UploadError, UploadResult},
        upload_coordinator::UploadCoordinator,
    },
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt, stream};
use std::io;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    /// Size of every part except the last.
    pub part_size: usize,

    /// Parts in flight at once.
    pub concurrency: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            part_size: 8 * 1024 * 1024,
            concurrency: 4,
        }
    }
}

/// Upload everything `body` yields to `object_key`.
pub async fn transfer<S>(
    coordinator: &UploadCoordinator,
    object_key: &str,
    options: UploadOptions,
    body: S,
    settings: TransferSettings,
) -> UploadResult<ObjectInfo>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let upload_id = coordinator.begin_with(object_key, options).await?;

    match upload_all(coordinator, object_key, &upload_id, body, settings).await {
        Ok(object) => {
            info!(key = object_key, size = object.size_bytes, "transfer finished");
            Ok(object)
        }
        Err(err) => {
            warn!(key = object_key, upload_id = %upload_id, "transfer failed: {}", err);
            if let Err(abort_err) = coordinator.abort(object_key, &upload_id).await {
                warn!(
                    upload_id = %upload_id,
                    "could not abort failed transfer: {}",
                    abort_err
                );
            }
            Err(err)
        }
    }
}

async fn upload_all<S>(
    coordinator: &UploadCoordinator,
    object_key: &str,
    upload_id: &str,
    body: S,
    settings: TransferSettings,
) -> UploadResult<ObjectInfo>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut parts: Vec<CompletedPart> = rechunk(body, settings.part_size)
        .enumerate()
        .map(move |(index, chunk)| async move {
            let chunk = chunk.map_err(|err| UploadError::SourceUnreadable(err.to_string()))?;
            coordinator
                .upload_part(object_key, upload_id, chunk, index as u32)
                .await
        })
        .buffer_unordered(settings.concurrency.max(1))
        .try_collect()
        .await?;

    if parts.is_empty() {
        return Err(UploadError::IncompleteUpload("upload body is empty".into()));
    }

    // Fan-out finishes parts in any order.
    parts.sort_by_key(|part| part.part_number);
    coordinator.complete(object_key, upload_id, &parts).await
}

/// Regroup `body` into chunks of exactly `part_size` bytes; the last one may be shorter.
pub fn rechunk<S>(body: S, part_size: usize) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let part_size = part_size.max(1);
    stream::unfold(
        (Box::pin(body), BytesMut::new(), false),
        move |(mut body, mut buf, mut done)| async move {
            loop {
                if buf.len() >= part_size {
                    let part = buf.split_to(part_size).freeze();
                    return Some((Ok(part), (body, buf, done)));
                }
                if done {
                    if buf.is_empty() {
                        return None;
                    }
                    let part = buf.split().freeze();
                    return Some((Ok(part), (body, buf, done)));
                }
                match body.next().await {
                    Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                    Some(Err(err)) => {
                        buf.clear();
                        return Some((Err(err), (body, buf, true)));
                    }
                    None => done = true,
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        memory_store::{MemoryStore, StoreOp},
        object_store::{ObjectStore, PartLimits},
    };
    use std::sync::Arc;

    fn body(chunks: &[&'static [u8]]) -> impl Stream<Item = io::Result<Bytes>> + Send + use<> {
        let items: Vec<io::Result<Bytes>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(*c)))
            .collect();
        stream::iter(items)
    }

    #[tokio::test]
    async fn rechunk_produces_fixed_size_parts() {
        let parts: Vec<Bytes> = rechunk(body(&[b"abc", b"defgh", b"ij"]), 4)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            parts,
            vec![
                Bytes::from_static(b"abcd"),
                Bytes::from_static(b"efgh"),
                Bytes::from_static(b"ij"),
            ]
        );
    }

    #[tokio::test]
    async fn transfer_assembles_object() {
        let store = MemoryStore::new(PartLimits {
            min_part_size: 4,
            max_part_size: 4,
        });
        let coordinator = UploadCoordinator::new(Arc::new(store.clone()), "edunews-media");
        let settings = TransferSettings {
            part_size: 4,
            concurrency: 3,
        };

        let object = transfer(
            &coordinator,
            "audios/clip.mp4",
            UploadOptions::default(),
            body(&[b"0123456789"]),
            settings,
        )
        .await
        .unwrap();

        assert_eq!(object.size_bytes, 10);
        assert!(object.etag.ends_with("-3"));
        assert_eq!(store.calls(StoreOp::UploadPart), 3);
    }

    #[tokio::test]
    async fn failed_part_aborts_session() {
        let store = MemoryStore::new(PartLimits {
            min_part_size: 1,
            max_part_size: 1024,
        });
        store.fail_next(
            StoreOp::UploadPart,
            UploadError::StoreUnavailable("outage".into()),
        );
        let coordinator = UploadCoordinator::new(Arc::new(store.clone()), "edunews-media");

        let err = transfer(
            &coordinator,
            "audios/clip.mp4",
            UploadOptions::default(),
            body(&[b"abcdef"]),
            TransferSettings {
                part_size: 2,
                concurrency: 1,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, UploadError::StoreUnavailable(_)));
        assert_eq!(store.calls(StoreOp::Abort), 1);
        assert_eq!(store.sessions_with_parts(), 0);
        assert!(
            store
                .head_object("edunews-media", "audios/clip.mp4")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn empty_body_is_rejected_and_aborted() {
        let store = MemoryStore::new(PartLimits::default());
        let coordinator = UploadCoordinator::new(Arc::new(store.clone()), "edunews-media");

        let err = transfer(
            &coordinator,
            "audios/empty.mp4",
            UploadOptions::default(),
            body(&[]),
            TransferSettings::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, UploadError::IncompleteUpload(_)));
        assert_eq!(store.calls(StoreOp::Abort), 1);
    }
}
