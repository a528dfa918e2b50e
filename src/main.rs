use anyhow::Result;
use axum::Router;
use edunews_uploads::{
    config::{AppConfig, Backend},
    routes::routes::routes,
    services::{
        local_store::LocalStore, memory_store::MemoryStore, object_store::ObjectStore,
        retry::RetryingStore, upload_coordinator::UploadCoordinator,
    },
    state::AppState,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting uploads service: backend={:?} bucket={} addr={}",
        cfg.backend,
        cfg.bucket,
        cfg.addr()
    );
    if cfg.api_secret_key.is_none() {
        tracing::warn!("API_SECRET_KEY is not set; write endpoints accept any caller");
    }

    let backend: Arc<dyn ObjectStore> = match cfg.backend {
        Backend::Local => {
            let store = open_local_store(&cfg).await?;
            // The schema is idempotent, so it is applied on every start.
            store.migrate().await?;
            if migrate {
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            let swept = store.abort_stale(cfg.stale_upload_ttl()).await?;
            if swept > 0 {
                tracing::info!("Aborted {} stale multipart sessions", swept);
            }
            Arc::new(store)
        }
        Backend::Memory => {
            if migrate {
                anyhow::bail!("--migrate requires the local backend");
            }
            Arc::new(MemoryStore::new(cfg.part_limits()))
        }
    };

    // --- Compose retries around the backend; the coordinator stays retry-free ---
    let store: Arc<dyn ObjectStore> = Arc::new(RetryingStore::new(backend, cfg.retry_policy()));
    let coordinator = UploadCoordinator::new(store, cfg.bucket.clone());

    // --- Build router ---
    let addr = cfg.addr();
    let port = cfg.port;
    let host = cfg.host.clone();
    let app: Router = routes(cfg.max_body_bytes).with_state(AppState::new(coordinator, cfg));

    // --- Start server ---
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Prepare directories and the SQLite pool for the local backend.
async fn open_local_store(cfg: &AppConfig) -> Result<LocalStore> {
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let options = SqliteConnectOptions::from_str(&cfg.database_url)?.create_if_missing(true);
    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    tracing::debug!("Connecting to metadata database at {}", cfg.database_url);

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(LocalStore::new(
        Arc::new(db),
        cfg.storage_dir.clone(),
        cfg.part_limits(),
    ))
}
