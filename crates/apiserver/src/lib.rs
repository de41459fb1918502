//! Application deployment and revision reconciliation engine.
//!
//! Fragments (applications, components, policies, workflows, environments) live in a keyed
//! document [`store`]; [`services`] render them into `Application` manifests, apply those to
//! the cluster [`control_plane`] and keep revision and workflow-record history in step with
//! what the control plane reports. [`handlers`] is a thin axum surface over the services.

pub mod config;
pub mod context;
pub mod control_plane;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod services;
pub mod store;
pub mod telemetry;
pub mod test_support;
pub mod watch;
pub mod webhook;

use std::sync::Arc;

use axum::{response::Html, routing::{get, post}, Router};
use utoipa::OpenApi;

use crate::{services::Services, telemetry::metrics_handler, webhook::WebhookRegistry};

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub webhooks: Arc<WebhookRegistry>,
}

impl AppState {
    pub fn new(services: Services, webhooks: WebhookRegistry) -> Self { Self { services, webhooks: Arc::new(webhooks) } }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::readiness::readiness,
        handlers::applications::deploy_app,
        handlers::applications::list_revisions,
        handlers::applications::detail_revision,
        handlers::applications::compare_app,
        handlers::applications::reset_app,
        handlers::applications::dry_run_app,
        handlers::applications::list_records,
        handlers::applications::terminate_record,
        handlers::applications::resume_record,
        handlers::applications::rollback_record,
        handlers::webhooks::trigger_webhook,
    ),
    components(schemas(
        error::ApiErrorBody,
        handlers::health::HealthResponse,
        handlers::readiness::ReadinessResponse,
        handlers::applications::RevisionList,
        handlers::applications::RecordList,
        handlers::applications::RollbackRequest,
        handlers::applications::RollbackResponse,
        models::ApplicationRevision,
        models::RevisionStatus,
        models::CodeInfo,
        models::ImageInfo,
        models::WorkflowRecord,
        models::RecordStepStatus,
        services::deploy::DeployRequest,
        services::compare::CompareRequest,
        services::compare::CompareResponse,
        services::compare::EnvRef,
        services::compare::RevisionRef,
        services::compare::DiffEntry,
        services::compare::DiffKind,
        services::compare::DryRunRequest,
        services::compare::DryRunResponse,
        services::compare::DryRunSource,
        services::reset::ResetResponse,
        webhook::WebhookResponse,
    )),
    tags( (name = "apiserver", description = "Application deployment and revision API") )
)]
pub struct ApiDoc;

async fn swagger_ui() -> Html<&'static str> {
    Html(r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"/><title>apiserver API</title>
<link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
<div id="swagger-ui"></div>
<script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
<script>
window.onload = () => { SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' }); };
</script>
</body></html>"#)
}

pub fn build_router(state: AppState) -> Router {
    use handlers::applications as apps;
    let openapi = ApiDoc::openapi();
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/readyz", get(handlers::readiness::readiness))
        .route("/metrics", get(metrics_handler))
        .route("/applications/:app/deploy", post(apps::deploy_app))
        .route("/applications/:app/revisions", get(apps::list_revisions))
        .route("/applications/:app/revisions/:version", get(apps::detail_revision))
        .route("/applications/:app/compare", post(apps::compare_app))
        .route("/applications/:app/reset", post(apps::reset_app))
        .route("/applications/:app/dry-run", post(apps::dry_run_app))
        .route("/applications/:app/workflows/:workflow/records", get(apps::list_records))
        .route("/applications/:app/records/:record/terminate", post(apps::terminate_record))
        .route("/applications/:app/records/:record/resume", post(apps::resume_record))
        .route("/applications/:app/records/:record/rollback", post(apps::rollback_record))
        .route("/webhooks/:token", post(handlers::webhooks::trigger_webhook))
        .route("/openapi.json", get(|| async move { axum::Json(openapi.clone()) }))
        .route("/swagger", get(swagger_ui))
        .with_state(state)
}
