//! Binary entrypoint for the apiserver.
use std::{sync::Arc, time::Instant};

use anyhow::Context;
use apiserver::{
    build_router,
    config::{Config, StoreBackend},
    control_plane::KubeControlPlane,
    logging::init_logging,
    services::Services,
    store::{postgres::PgStore, Store},
    telemetry::{normalize_path, HTTP_REQUESTS, HTTP_REQUEST_DURATION},
    watch,
    webhook::WebhookRegistry,
    AppState,
};
use axum::{body::Body, http::{HeaderValue, Request}, middleware::{self, Next}, response::Response};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

const MAX_BODY_BYTES: usize = 1024 * 1024;

async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path_label = normalize_path(req.uri().path());
    let start = Instant::now();
    let mut resp = next.run(req).await;
    let status = resp.status().as_u16().to_string();
    HTTP_REQUESTS.with_label_values(&[method.as_str(), path_label.as_str(), status.as_str()]).inc();
    HTTP_REQUEST_DURATION.with_label_values(&[method.as_str(), path_label.as_str()]).observe(start.elapsed().as_secs_f64());
    if let Ok(id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
        resp.headers_mut().insert("x-request-id", id);
    }
    resp
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;
    init_logging(&cfg.log_level, cfg.log_format);

    let store = match cfg.store {
        StoreBackend::Memory => {
            warn!("using the in-memory store; state is lost on restart");
            Store::memory()
        }
        StoreBackend::Postgres => {
            let url = cfg.database_url.as_deref().context("store = postgres requires DATABASE_URL")?;
            Store::new(Arc::new(PgStore::connect(url).await.context("connect postgres")?))
        }
    };
    let cluster = KubeControlPlane::try_default().await.context("connect to the cluster control plane")?;
    let client = cluster.client().clone();
    let services = Services::new(store, Arc::new(cluster));

    let shutdown = CancellationToken::new();
    let tasks = watch::spawn(&services, cfg.watch.then_some(client), cfg.sync_interval, &shutdown);

    let app = build_router(AppState::new(services, WebhookRegistry::builtin()))
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(track_metrics));

    info!(addr=%cfg.listen_addr, "apiserver listening");
    let listener = tokio::net::TcpListener::bind(cfg.listen_addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await { warn!(error=%e, "install ctrl_c handler"); }
            info!(target: "shutdown.signal", "received Ctrl+C");
            signal.cancel();
        })
        .await?;
    shutdown.cancel();
    for t in tasks {
        if let Err(e) = t.await { warn!(error=%e, "background task panicked"); }
    }
    Ok(())
}
