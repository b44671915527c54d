// Router assembly, request middleware and the serve loop.

use std::{sync::Arc, time::Instant};

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::{
    api::{self, AppState},
    auth::jwt::TokenService,
    config::ServerConfig,
    cors::cors_layer,
    db::{
        migrations::run_migrations,
        pool::{check_pool_health, create_pg_pool},
    },
    error::{
        attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
        ApiError, ErrorCode,
    },
    lock::{sweep::start_lease_sweep, LockManager},
    session::SessionConfig,
    store::VersionStore,
};

pub const MAX_REQUEST_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Full application router: health check, `/v1` API and session sockets.
pub fn build_router(state: AppState, cors_origins: Option<&str>) -> Router {
    apply_middleware(
        Router::new().route("/healthz", get(healthz)).merge(api::router(state)),
        cors_origins,
    )
}

fn apply_middleware(router: Router, cors_origins: Option<&str>) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(cors_layer(cors_origins))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Connect backends, start the lease sweep and serve until a shutdown
/// signal arrives.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    config.validate()?;

    let tokens =
        Arc::new(TokenService::new(&config.jwt_secret).context("invalid INKWELL_JWT_SECRET")?);

    let (locks, store) = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = create_pg_pool(database_url, config.pool.clone()).await?;
            check_pool_health(&pool).await?;
            run_migrations(&pool).await?;
            info!(
                max_connections = config.pool.max_connections,
                "using postgres lease and version backends"
            );
            (LockManager::postgres(pool.clone(), config.lease_ttl), VersionStore::postgres(pool))
        }
        None => {
            warn!("INKWELL_DATABASE_URL not set; leases and versions are kept in memory");
            (LockManager::memory(config.lease_ttl), VersionStore::memory())
        }
    };
    let store = store.with_timeout(config.storage_timeout);

    let sweep = config.sweep_interval.map(|interval| start_lease_sweep(locks.clone(), interval));

    let state = AppState::new(
        locks,
        store,
        tokens,
        SessionConfig { heartbeat_interval: config.heartbeat_interval },
    );
    let app = build_router(state, config.cors_origins.as_deref());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(
        listen_addr = %config.listen_addr,
        lease_ttl_secs = config.lease_ttl.as_secs(),
        heartbeat_interval_secs = config.heartbeat_interval.as_secs(),
        "starting inkwell server"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("inkwell server exited unexpectedly");

    if let Some(sweep) = sweep {
        sweep.shutdown().await;
    }
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(signal_error) = tokio::signal::ctrl_c().await {
            error!(error = %signal_error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(signal_error) => {
                error!(error = %signal_error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            ApiError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
