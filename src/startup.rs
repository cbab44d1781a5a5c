use crate::config::{ServiceConfig, StorageBackend};
use crate::error::AppError;
use crate::handlers;
use crate::services::broker::{EventPublisher, EventStream, InMemoryBroker, RedisBroker};
use crate::services::ingest::UploadCoordinator;
use crate::services::metadata::{InMemoryMetadataStore, MetadataStore, MongoMetadataStore};
use crate::services::storage::{BlobStore, InMemoryBlobStore, LocalBlobStore};
use crate::workers::{default_registry, Reconciler, WorkerPool};
use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    pub store: Arc<dyn MetadataStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub coordinator: Arc<UploadCoordinator>,
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
    pool: Arc<WorkerPool>,
    shutdown: CancellationToken,
}

impl Application {
    pub async fn build(config: ServiceConfig) -> Result<Self, AppError> {
        let (store, blobs, publisher, stream) = build_adapters(&config).await?;

        let coordinator = Arc::new(UploadCoordinator::new(
            store.clone(),
            blobs.clone(),
            publisher.clone(),
            config.upload.clone(),
        ));

        let registry = Arc::new(default_registry(
            config.worker.processing_timeout(),
            std::env::temp_dir(),
        ));
        let pool = Arc::new(WorkerPool::new(
            config.worker.clone(),
            store.clone(),
            blobs.clone(),
            publisher.clone(),
            stream,
            registry,
        ));
        pool.start();

        let shutdown = CancellationToken::new();
        let reconciler = Reconciler::new(
            store.clone(),
            publisher.clone(),
            config.reconcile.clone(),
            shutdown.clone(),
        );
        tokio::spawn(reconciler.run());

        let state = AppState {
            config: config.clone(),
            store,
            blobs,
            publisher,
            coordinator,
        };

        let app = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/metrics", get(handlers::metrics_endpoint))
            .route(
                "/documents",
                get(handlers::list_documents).post(handlers::upload_document),
            )
            .route(
                "/documents/:id",
                get(handlers::get_document).delete(handlers::delete_document),
            )
            .route("/documents/:id/download", get(handlers::download_document))
            // Leave size-limit errors to the coordinator's validation; the
            // transport limit only needs headroom for multipart framing.
            .layer(DefaultBodyLimit::max(config.upload.max_file_size + 64 * 1024))
            .layer(TraceLayer::new_for_http())
            .with_state(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::Internal(anyhow::anyhow!("Failed to bind listener: {}", e))
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
            pool,
            shutdown,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn worker_pool(&self) -> Arc<WorkerPool> {
        self.pool.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn build_adapters(
    config: &ServiceConfig,
) -> Result<
    (
        Arc<dyn MetadataStore>,
        Arc<dyn BlobStore>,
        Arc<dyn EventPublisher>,
        Arc<dyn EventStream>,
    ),
    AppError,
> {
    if config.disable_external_connections {
        tracing::info!("External connections disabled, using in-memory adapters");
        let broker = Arc::new(InMemoryBroker::new(config.worker.poll_interval()));
        return Ok((
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(InMemoryBlobStore::new()),
            broker.clone(),
            broker,
        ));
    }

    let mongo = MongoMetadataStore::connect(&config.mongodb.uri, &config.mongodb.database)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            e
        })?;
    mongo.initialize_indexes().await.map_err(|e| {
        tracing::error!("Failed to initialize database indexes: {}", e);
        e
    })?;

    let blobs: Arc<dyn BlobStore> = match config.storage.backend {
        StorageBackend::Local => Arc::new(
            LocalBlobStore::new(&config.storage.local_path)
                .await
                .map_err(|e| {
                    tracing::error!(
                        "Failed to initialize local blob store at {}: {}",
                        config.storage.local_path,
                        e
                    );
                    e
                })?,
        ),
        StorageBackend::Memory => Arc::new(InMemoryBlobStore::new()),
    };

    let broker = Arc::new(
        RedisBroker::connect(&config.broker, config.worker.poll_interval())
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to broker: {}", e);
                e
            })?,
    );

    Ok((Arc::new(mongo), blobs, broker.clone(), broker))
}
