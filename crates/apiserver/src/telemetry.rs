//! Prometheus metrics for the HTTP surface and the reconciliation engine.

use prometheus::{TextEncoder, Encoder, Registry, IntCounterVec, HistogramVec, opts, histogram_opts};
use once_cell::sync::Lazy;
use axum::{response::IntoResponse, http::StatusCode};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("http_requests_total", "HTTP request count"), &["method", "path", "status"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    let h = HistogramVec::new(histogram_opts!("http_request_duration_seconds", "HTTP request latency"), &["method", "path"]).unwrap();
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

/// Deploy attempts by outcome: `success`, `conflict`, `apply_failed`, `error`.
pub static DEPLOYS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("deploys_total", "Deploy attempts by outcome"), &["outcome"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static REVISION_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("revision_transitions_total", "Revision status transitions by target status"), &["to"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Workflow record sync outcomes: `updated`, `finished`, `terminated`, `error`.
pub static WORKFLOW_SYNC: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("workflow_sync_total", "Workflow record sync outcomes"), &["result"]).unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Collapse path parameters so metric label cardinality stays bounded.
pub fn normalize_path(path: &str) -> String {
    let segs: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segs.as_slice() {
        ["applications", _, "revisions", _] => "/applications/:app/revisions/:version".into(),
        ["applications", _, "records", _, action] => format!("/applications/:app/records/:record/{action}"),
        ["applications", _, "workflows", _, "records"] => "/applications/:app/workflows/:workflow/records".into(),
        ["applications", _, rest] => format!("/applications/:app/{rest}"),
        ["webhooks", _] => "/webhooks/:token".into(),
        _ => path.to_string(),
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&metric_families, &mut buf).is_err() { return StatusCode::INTERNAL_SERVER_ERROR.into_response(); }
    ([("Content-Type","text/plain; version=0.0.4")], buf).into_response()
}

#[cfg(test)]
mod tests {
    use super::normalize_path;

    #[test]
    fn path_params_collapse() {
        assert_eq!(normalize_path("/applications/demo/deploy"), "/applications/:app/deploy");
        assert_eq!(normalize_path("/applications/demo/revisions/demo-v1"), "/applications/:app/revisions/:version");
        assert_eq!(normalize_path("/applications/demo/records/workflow-dev-1/terminate"), "/applications/:app/records/:record/terminate");
        assert_eq!(normalize_path("/webhooks/abc123"), "/webhooks/:token");
        assert_eq!(normalize_path("/health"), "/health");
    }
}
