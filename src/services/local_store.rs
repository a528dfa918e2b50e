//! src/services/local_store.rs
//!
//! LocalStore: S3-like multipart semantics backed by SQLite for metadata and
//! local disk for payloads. Parts live beneath `base_path/.multipart/{upload_id}/`
//! until completion; assembled objects are sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::{
    models::{
        multipart::{CompletedPart, MultipartPart, MultipartUpload, SessionState, UploadOptions},
        object::ObjectInfo,
    },
    services::object_store::{
        ByteStream, HealthCheck, ObjectStore, PartLimits, UploadError, UploadResult,
        ensure_key_safe, multipart_etag,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

/// Schema for the metadata database, applied by [`LocalStore::migrate`].
pub const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const MULTIPART_DIR: &str = ".multipart";

#[derive(Clone)]
pub struct LocalStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where parts and objects are stored.
    pub base_path: PathBuf,

    pub limits: PartLimits,
}

impl LocalStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, limits: PartLimits) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            limits,
        }
    }

    /// Apply the embedded schema, one statement at a time.
    pub async fn migrate(&self) -> UploadResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    fn ensure_bucket(&self, bucket: &str) -> UploadResult<()> {
        validate_bucket_name(bucket).map_err(|reason| UploadError::InvalidBucketName {
            name: bucket.to_string(),
            reason,
        })
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard identifiers from MD5(bucket/key).
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn parts_dir(&self, upload_id: &str) -> PathBuf {
        self.base_path.join(MULTIPART_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.parts_dir(upload_id)
            .join(format!("{:05}.part", part_number))
    }

    /// Load an active session that belongs to `bucket`/`key`.
    ///
    /// Unknown ids, terminated sessions and key mismatches all surface as
    /// `SessionNotFound`, like S3's `NoSuchUpload`.
    async fn fetch_active_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> UploadResult<MultipartUpload> {
        let upload = sqlx::query_as::<_, MultipartUpload>(
            "SELECT upload_id, bucket, key, content_type, cache_control,
                    content_disposition, state, initiated_at
             FROM multipart_uploads WHERE upload_id = ?",
        )
        .bind(upload_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| UploadError::SessionNotFound(upload_id.to_string()))?;

        if upload.state != SessionState::Active.as_str()
            || upload.bucket != bucket
            || upload.key != key
        {
            return Err(UploadError::SessionNotFound(upload_id.to_string()));
        }
        Ok(upload)
    }

    /// Write `data` to a temporary sibling, fsync, then rename over `path`.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> UploadResult<()> {
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "payload path missing parent directory")
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, path).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Concatenate part files, in order, into the object's final location.
    /// Returns the assembled size.
    async fn assemble(&self, upload_id: &str, parts: &[CompletedPart], target: &Path) -> UploadResult<i64> {
        let parent = target.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "object path missing parent directory")
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let result = async {
            let mut out = File::create(&tmp_path).await?;
            let mut size: u64 = 0;
            for part in parts {
                let mut input = File::open(self.part_path(upload_id, part.part_number)).await?;
                size += tokio::io::copy(&mut input, &mut out).await?;
            }
            out.flush().await?;
            out.sync_all().await?;
            Ok::<u64, io::Error>(size)
        }
        .await;

        let size = match result {
            Ok(size) => size,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        };

        if let Err(err) = fs::rename(&tmp_path, target).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(target).await?;
                fs::rename(&tmp_path, target).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        }
        Ok(size as i64)
    }

    /// Remove a session's part directory, tolerating one that is already gone.
    async fn reclaim_parts(&self, upload_id: &str) -> UploadResult<()> {
        let dir = self.parts_dir(upload_id);
        match fs::remove_dir_all(&dir).await {
            Ok(_) => {
                debug!("reclaimed parts directory {}", dir.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Write a part file, then record it only if the session is still active.
    ///
    /// A session that ended while the file was being written gets its part
    /// directory reclaimed and the call fails with `SessionNotFound`.
    async fn store_part(&self, upload_id: &str, part_number: u32, data: &[u8]) -> UploadResult<String> {
        let etag = format!("{:x}", md5::compute(data));
        self.write_atomic(&self.part_path(upload_id, part_number), data)
            .await?;

        let recorded = sqlx::query(
            "INSERT INTO multipart_parts (upload_id, part_number, size_bytes, etag, uploaded_at)
             SELECT ?, ?, ?, ?, ?
             WHERE EXISTS (
                SELECT 1 FROM multipart_uploads WHERE upload_id = ? AND state = ?
             )
             ON CONFLICT(upload_id, part_number) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                uploaded_at = excluded.uploaded_at",
        )
        .bind(upload_id)
        .bind(i64::from(part_number))
        .bind(data.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .bind(upload_id)
        .bind(SessionState::Active.as_str())
        .execute(&*self.db)
        .await?
        .rows_affected();

        if recorded == 0 {
            self.reclaim_parts(upload_id).await?;
            return Err(UploadError::SessionNotFound(upload_id.to_string()));
        }
        Ok(etag)
    }

    /// Abort every active session initiated more than `max_age` ago.
    ///
    /// Coordinator sessions do not survive a restart, so sessions left active
    /// in the database can no longer be completed or aborted through the API.
    /// Run at startup to reclaim their parts. Returns the number aborted.
    pub async fn abort_stale(&self, max_age: Duration) -> UploadResult<usize> {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let stale: Vec<MultipartUpload> = sqlx::query_as::<_, MultipartUpload>(
            "SELECT upload_id, bucket, key, content_type, cache_control,
                    content_disposition, state, initiated_at
             FROM multipart_uploads WHERE state = ?",
        )
        .bind(SessionState::Active.as_str())
        .fetch_all(&*self.db)
        .await?
        .into_iter()
        .filter(|upload| upload.initiated_at < cutoff)
        .collect();

        for upload in &stale {
            self.abort_multipart(&upload.bucket, &upload.key, &upload.upload_id)
                .await?;
            info!(upload_id = %upload.upload_id, key = %upload.key, "aborted stale multipart session");
        }
        Ok(stale.len())
    }

    async fn check_sqlite(&self) -> Result<(), String> {
        match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => Ok(()),
            Ok(v) => Err(format!("unexpected result: {}", v)),
            Err(e) => Err(format!("error: {}", e)),
        }
    }

    async fn check_disk(&self) -> Result<(), String> {
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz")
            .await
            .map_err(|e| format!("could not write tmp file: {}", e))?;

        let read = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        match read {
            Ok(bytes) if bytes == b"readyz" => Ok(()),
            Ok(_) => Err("file content mismatch".to_string()),
            Err(e) => Err(format!("could not read tmp file: {}", e)),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        options: &UploadOptions,
    ) -> UploadResult<String> {
        self.ensure_bucket(bucket)?;
        ensure_key_safe(key)?;

        let upload_id = Uuid::new_v4().simple().to_string();
        sqlx::query(
            "INSERT INTO multipart_uploads (
                upload_id, bucket, key, content_type, cache_control,
                content_disposition, state, initiated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&upload_id)
        .bind(bucket)
        .bind(key)
        .bind(options.content_type.as_deref())
        .bind(options.cache_control.as_deref())
        .bind(options.content_disposition.as_deref())
        .bind(SessionState::Active.as_str())
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        fs::create_dir_all(self.parts_dir(&upload_id)).await?;
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
        self.ensure_bucket(bucket)?;
        ensure_key_safe(key)?;
        self.limits.check_upload(part_number, data.len())?;
        self.fetch_active_upload(bucket, key, upload_id).await?;
        self.store_part(upload_id, part_number, &data).await
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> UploadResult<ObjectInfo> {
        self.ensure_bucket(bucket)?;
        ensure_key_safe(key)?;
        let upload = self.fetch_active_upload(bucket, key, upload_id).await?;

        if parts.is_empty() {
            return Err(UploadError::IncompleteUpload(
                "at least one part is required".into(),
            ));
        }

        let stored: HashMap<u32, MultipartPart> = sqlx::query_as::<_, MultipartPart>(
            "SELECT upload_id, part_number, size_bytes, etag, uploaded_at
             FROM multipart_parts WHERE upload_id = ?",
        )
        .bind(upload_id)
        .fetch_all(&*self.db)
        .await?
        .into_iter()
        .map(|p| (p.part_number as u32, p))
        .collect();

        let mut previous = 0u32;
        for (pos, part) in parts.iter().enumerate() {
            if part.part_number <= previous {
                return Err(UploadError::IncompleteUpload(format!(
                    "part {} is out of order",
                    part.part_number
                )));
            }
            previous = part.part_number;

            let record = stored.get(&part.part_number).ok_or_else(|| {
                UploadError::IncompleteUpload(format!("part {} was never uploaded", part.part_number))
            })?;
            if record.etag != part.e_tag.trim_matches('"') {
                return Err(UploadError::IncompleteUpload(format!(
                    "part {} etag does not match",
                    part.part_number
                )));
            }
            self.limits.check_assembled(
                part.part_number,
                record.size_bytes as usize,
                pos + 1 == parts.len(),
            )?;
        }

        let target = self.object_path(bucket, key);
        let size_bytes = self.assemble(upload_id, parts, &target).await?;

        let object = ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: upload.content_type,
            cache_control: upload.cache_control,
            content_disposition: upload.content_disposition,
            size_bytes,
            etag: multipart_etag(parts.iter().map(|p| p.e_tag.trim_matches('"'))),
            last_modified: Utc::now(),
        };

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO objects (
                bucket, key, content_type, cache_control, content_disposition,
                size_bytes, etag, last_modified
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                cache_control = excluded.cache_control,
                content_disposition = excluded.content_disposition,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified",
        )
        .bind(&object.bucket)
        .bind(&object.key)
        .bind(object.content_type.as_deref())
        .bind(object.cache_control.as_deref())
        .bind(object.content_disposition.as_deref())
        .bind(object.size_bytes)
        .bind(&object.etag)
        .bind(object.last_modified)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE multipart_uploads SET state = ? WHERE upload_id = ?")
            .bind(SessionState::Completed.as_str())
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if let Err(err) = self.reclaim_parts(upload_id).await {
            debug!("failed to reclaim parts of {}: {}", upload_id, err);
        }

        Ok(object)
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> UploadResult<()> {
        self.ensure_bucket(bucket)?;
        self.fetch_active_upload(bucket, key, upload_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE multipart_uploads SET state = ? WHERE upload_id = ?")
            .bind(SessionState::Aborted.as_str())
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.reclaim_parts(upload_id).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> UploadResult<Option<ObjectInfo>> {
        self.ensure_bucket(bucket)?;
        ensure_key_safe(key)?;
        let object = sqlx::query_as::<_, ObjectInfo>(
            "SELECT bucket, key, content_type, cache_control, content_disposition,
                    size_bytes, etag, last_modified
             FROM objects WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(object)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> UploadResult<Option<(ObjectInfo, ByteStream)>> {
        let Some(object) = self.head_object(bucket, key).await? else {
            return Ok(None);
        };

        let file = match File::open(self.object_path(bucket, key)).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let stream: ByteStream = Box::pin(ReaderStream::new(file));
        Ok(Some((object, stream)))
    }

    async fn readiness(&self) -> Vec<HealthCheck> {
        vec![
            HealthCheck::from_result("sqlite", self.check_sqlite().await),
            HealthCheck::from_result("disk", self.check_disk().await),
        ]
    }
}

/// Validate a bucket name against S3 naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - no consecutive dots or dot-hyphen pairs
/// - cannot look like an IPv4 address
pub fn validate_bucket_name(name: &str) -> Result<(), String> {
    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err("must be between 3 and 63 characters".into());
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(
            "allowed characters are lowercase letters, digits, dots, and hyphens".into(),
        );
    }

    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err("must start and end with a lowercase letter or digit".into());
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err("cannot contain consecutive dots or dot-hyphen combinations".into());
    }

    if is_ipv4_like(name) {
        return Err("must not be formatted like an IP address".into());
    }

    Ok(())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use tempfile::TempDir;

    const BUCKET: &str = "edunews-media";

    async fn store(limits: PartLimits) -> (LocalStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("meta.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        let store = LocalStore::new(Arc::new(pool), dir.path().join("objects"), limits);
        fs::create_dir_all(&store.base_path).await.unwrap();
        store.migrate().await.unwrap();
        (store, dir)
    }

    fn small_limits() -> PartLimits {
        PartLimits {
            min_part_size: 4,
            max_part_size: 16,
        }
    }

    #[tokio::test]
    async fn parts_are_assembled_in_order() {
        let (store, _dir) = store(small_limits()).await;
        let id = store
            .create_multipart(BUCKET, "video/a.mp4", &UploadOptions::default())
            .await
            .unwrap();

        let e1 = store
            .upload_part(BUCKET, "video/a.mp4", &id, 1, Bytes::from_static(b"abcd"))
            .await
            .unwrap();
        let e2 = store
            .upload_part(BUCKET, "video/a.mp4", &id, 2, Bytes::from_static(b"ef"))
            .await
            .unwrap();
        assert_eq!(e1, format!("{:x}", md5::compute(b"abcd")));

        let parts = vec![CompletedPart::new(1, e1.clone()), CompletedPart::new(2, e2.clone())];
        let object = store
            .complete_multipart(BUCKET, "video/a.mp4", &id, &parts)
            .await
            .unwrap();
        assert_eq!(object.size_bytes, 6);
        assert_eq!(object.etag, multipart_etag([e1.as_str(), e2.as_str()]));

        let (_, stream) = store.get_object(BUCKET, "video/a.mp4").await.unwrap().unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"abcdef");
        assert!(!store.parts_dir(&id).exists());
    }

    #[tokio::test]
    async fn reupload_replaces_previous_part() {
        let (store, _dir) = store(small_limits()).await;
        let id = store
            .create_multipart(BUCKET, "k", &UploadOptions::default())
            .await
            .unwrap();
        store
            .upload_part(BUCKET, "k", &id, 1, Bytes::from_static(b"old!"))
            .await
            .unwrap();
        let etag = store
            .upload_part(BUCKET, "k", &id, 1, Bytes::from_static(b"new!"))
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM multipart_parts WHERE upload_id = ?")
            .bind(&id)
            .fetch_one(&*store.db)
            .await
            .unwrap();
        assert_eq!(count, 1);

        store
            .complete_multipart(BUCKET, "k", &id, &[CompletedPart::new(1, etag)])
            .await
            .unwrap();
        let (_, stream) = store.get_object(BUCKET, "k").await.unwrap().unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"new!");
    }

    #[tokio::test]
    async fn size_limits_are_enforced() {
        let (store, _dir) = store(small_limits()).await;
        let id = store
            .create_multipart(BUCKET, "k", &UploadOptions::default())
            .await
            .unwrap();

        let err = store
            .upload_part(BUCKET, "k", &id, 1, Bytes::from(vec![0u8; 17]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PartTooLarge { part_number: 1, .. }));

        let err = store
            .upload_part(BUCKET, "k", &id, 1, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PartTooSmall { .. }));

        let e1 = store
            .upload_part(BUCKET, "k", &id, 1, Bytes::from_static(b"ab"))
            .await
            .unwrap();
        let e2 = store
            .upload_part(BUCKET, "k", &id, 2, Bytes::from_static(b"cd"))
            .await
            .unwrap();
        let err = store
            .complete_multipart(
                BUCKET,
                "k",
                &id,
                &[CompletedPart::new(1, e1), CompletedPart::new(2, e2)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PartTooSmall { part_number: 1, min: 4, .. }));
    }

    #[tokio::test]
    async fn completion_rejects_unknown_parts() {
        let (store, _dir) = store(small_limits()).await;
        let id = store
            .create_multipart(BUCKET, "k", &UploadOptions::default())
            .await
            .unwrap();
        let e1 = store
            .upload_part(BUCKET, "k", &id, 1, Bytes::from_static(b"abcd"))
            .await
            .unwrap();

        let err = store
            .complete_multipart(
                BUCKET,
                "k",
                &id,
                &[CompletedPart::new(1, e1.clone()), CompletedPart::new(2, "missing")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::IncompleteUpload(_)));

        let err = store
            .complete_multipart(BUCKET, "k", &id, &[CompletedPart::new(1, "wrong")])
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::IncompleteUpload(_)));

        // Failed completions leave the session usable.
        store
            .complete_multipart(BUCKET, "k", &id, &[CompletedPart::new(1, e1)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn abort_reclaims_parts_and_ends_session() {
        let (store, _dir) = store(small_limits()).await;
        let id = store
            .create_multipart(BUCKET, "video/b.mp4", &UploadOptions::default())
            .await
            .unwrap();
        store
            .upload_part(BUCKET, "video/b.mp4", &id, 1, Bytes::from_static(b"abcd"))
            .await
            .unwrap();

        store.abort_multipart(BUCKET, "video/b.mp4", &id).await.unwrap();
        assert!(!store.parts_dir(&id).exists());
        assert!(store.head_object(BUCKET, "video/b.mp4").await.unwrap().is_none());

        let err = store
            .upload_part(BUCKET, "video/b.mp4", &id, 2, Bytes::from_static(b"abcd"))
            .await
            .unwrap_err();
        assert_eq!(err, UploadError::SessionNotFound(id.clone()));
        let err = store.abort_multipart(BUCKET, "video/b.mp4", &id).await.unwrap_err();
        assert_eq!(err, UploadError::SessionNotFound(id));
    }

    #[tokio::test]
    async fn session_is_bound_to_its_key() {
        let (store, _dir) = store(small_limits()).await;
        let id = store
            .create_multipart(BUCKET, "a", &UploadOptions::default())
            .await
            .unwrap();
        let err = store
            .upload_part(BUCKET, "b", &id, 1, Bytes::from_static(b"abcd"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn late_part_for_ended_session_is_discarded() {
        let (store, _dir) = store(small_limits()).await;
        let id = store
            .create_multipart(BUCKET, "k", &UploadOptions::default())
            .await
            .unwrap();
        store.abort_multipart(BUCKET, "k", &id).await.unwrap();

        // A part whose write finishes after the abort.
        let err = store.store_part(&id, 1, b"late").await.unwrap_err();
        assert_eq!(err, UploadError::SessionNotFound(id.clone()));
        assert!(!store.parts_dir(&id).exists());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM multipart_parts WHERE upload_id = ?")
            .bind(&id)
            .fetch_one(&*store.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn stale_sessions_are_aborted() {
        let (store, _dir) = store(small_limits()).await;
        let old = store
            .create_multipart(BUCKET, "old", &UploadOptions::default())
            .await
            .unwrap();
        store
            .upload_part(BUCKET, "old", &old, 1, Bytes::from_static(b"abcd"))
            .await
            .unwrap();
        let fresh = store
            .create_multipart(BUCKET, "fresh", &UploadOptions::default())
            .await
            .unwrap();

        sqlx::query("UPDATE multipart_uploads SET initiated_at = ? WHERE upload_id = ?")
            .bind(Utc::now() - chrono::Duration::hours(2))
            .bind(&old)
            .execute(&*store.db)
            .await
            .unwrap();

        let aborted = store.abort_stale(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(aborted, 1);
        assert!(!store.parts_dir(&old).exists());
        let err = store
            .upload_part(BUCKET, "old", &old, 2, Bytes::from_static(b"abcd"))
            .await
            .unwrap_err();
        assert_eq!(err, UploadError::SessionNotFound(old));

        store
            .upload_part(BUCKET, "fresh", &fresh, 1, Bytes::from_static(b"abcd"))
            .await
            .unwrap();
        assert_eq!(store.abort_stale(Duration::from_secs(3600)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn readiness_reports_both_checks() {
        let (store, _dir) = store(small_limits()).await;
        let checks = store.readiness().await;
        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(|c| c.ok));
    }

    #[test]
    fn bucket_names_follow_s3_rules() {
        assert!(validate_bucket_name("edunews-media").is_ok());
        assert!(validate_bucket_name("ab").is_err());
        assert!(validate_bucket_name("Upper").is_err());
        assert!(validate_bucket_name("-edge").is_err());
        assert!(validate_bucket_name("a..b").is_err());
        assert!(validate_bucket_name("192.168.1.1").is_err());
    }
}
