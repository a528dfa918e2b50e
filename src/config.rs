use crate::services::{
    local_store::validate_bucket_name, object_store::PartLimits, retry::RetryPolicy,
    transfer::TransferSettings,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

/// Which object store backs the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// SQLite metadata plus on-disk payloads.
    Local,
    /// Process memory; nothing survives a restart.
    Memory,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(Backend::Local),
            "memory" => Ok(Backend::Memory),
            other => bail!("unknown backend `{}` (expected `local` or `memory`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub backend: Backend,
    pub bucket: String,
    pub region: String,
    pub key_prefix: String,
    pub api_secret_key: Option<String>,
    pub part_size: usize,
    pub min_part_size: usize,
    pub max_part_size: usize,
    pub upload_concurrency: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub max_body_bytes: usize,
    pub stale_upload_ttl_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Chunked multipart upload service")]
pub struct Args {
    /// Host to bind to (overrides UPLOADS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOADS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where parts and objects are stored (overrides UPLOADS_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides UPLOADS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Object store backend (overrides UPLOADS_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Destination bucket (overrides UPLOADS_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Region used in public object URLs (overrides UPLOADS_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Part size in bytes for whole-file transfers (overrides UPLOADS_PART_SIZE)
    #[arg(long)]
    pub part_size: Option<usize>,

    /// Parts uploaded in parallel per transfer (overrides UPLOADS_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge parsed CLI args over environment values and defaults.
    pub fn from_args(args: Args) -> Result<Self> {
        let max_part_size =
            env_parse("UPLOADS_MAX_PART_SIZE", PartLimits::default().max_part_size)?;
        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| env_or("UPLOADS_HOST", "0.0.0.0")),
            port: match args.port {
                Some(port) => port,
                None => env_parse("UPLOADS_PORT", 3000)?,
            },
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_or("UPLOADS_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.unwrap_or_else(|| {
                env_or("UPLOADS_DATABASE_URL", "sqlite://./data/meta/uploads.db")
            }),
            backend: match args.backend {
                Some(backend) => backend,
                None => env_parse("UPLOADS_BACKEND", Backend::Local)?,
            },
            bucket: args
                .bucket
                .unwrap_or_else(|| env_or("UPLOADS_BUCKET", "edunews-media")),
            region: args
                .region
                .unwrap_or_else(|| env_or("UPLOADS_REGION", "eu-south-1")),
            key_prefix: env_or("UPLOADS_KEY_PREFIX", "audios"),
            api_secret_key: env::var("API_SECRET_KEY").ok().filter(|k| !k.is_empty()),
            part_size: match args.part_size {
                Some(size) => size,
                None => env_parse("UPLOADS_PART_SIZE", TransferSettings::default().part_size)?,
            },
            min_part_size: env_parse("UPLOADS_MIN_PART_SIZE", PartLimits::default().min_part_size)?,
            max_part_size,
            upload_concurrency: match args.concurrency {
                Some(n) => n,
                None => env_parse("UPLOADS_CONCURRENCY", TransferSettings::default().concurrency)?,
            },
            retry_attempts: env_parse("UPLOADS_RETRY_ATTEMPTS", RetryPolicy::default().max_attempts)?,
            retry_base_delay_ms: env_parse("UPLOADS_RETRY_BASE_DELAY_MS", 100)?,
            max_body_bytes: env_parse("UPLOADS_MAX_BODY_BYTES", max_part_size)?,
            stale_upload_ttl_secs: env_parse("UPLOADS_STALE_UPLOAD_TTL_SECS", 24 * 60 * 60)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if let Err(reason) = validate_bucket_name(&self.bucket) {
            bail!("bucket `{}` invalid: {}", self.bucket, reason);
        }
        if self.min_part_size > self.max_part_size {
            bail!(
                "minimum part size {} exceeds maximum {}",
                self.min_part_size,
                self.max_part_size
            );
        }
        if self.part_size < self.min_part_size || self.part_size > self.max_part_size {
            bail!(
                "part size {} must lie between {} and {}",
                self.part_size,
                self.min_part_size,
                self.max_part_size
            );
        }
        if self.max_body_bytes < self.max_part_size {
            bail!(
                "request body limit {} is below the maximum part size {}",
                self.max_body_bytes,
                self.max_part_size
            );
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn part_limits(&self) -> PartLimits {
        PartLimits {
            min_part_size: self.min_part_size,
            max_part_size: self.max_part_size,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    /// Age after which an unfinished session is aborted at startup.
    pub fn stale_upload_ttl(&self) -> Duration {
        Duration::from_secs(self.stale_upload_ttl_secs)
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            part_size: self.part_size,
            concurrency: self.upload_concurrency,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
