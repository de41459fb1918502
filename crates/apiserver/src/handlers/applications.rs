//! Deployment, revision history, comparison and workflow record routes under `/applications/:app`.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::ApiResult,
    models::{ApplicationRevision, WorkflowRecord},
    services::{
        compare::{self, CompareRequest, CompareResponse, DryRunRequest, DryRunResponse},
        deploy::{self, DeployRequest},
        reset::{self, ResetResponse},
        revision::{self, ListRevisionsQuery},
        workflow,
    },
    AppState,
};

use super::request_context;

#[derive(Serialize, ToSchema)]
pub struct RevisionList {
    pub revisions: Vec<ApplicationRevision>,
    pub total: u64,
}

#[derive(Serialize, ToSchema)]
pub struct RecordList {
    pub records: Vec<WorkflowRecord>,
    pub total: u64,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    /// Revision to restore; the newest complete revision of the record's workflow when absent.
    #[serde(default)]
    pub revision: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct RollbackResponse {
    pub record: WorkflowRecord,
    pub revision: ApplicationRevision,
}

/// Deploy the application's current fragments
#[utoipa::path(post, path = "/applications/{app}/deploy", params(("app" = String, Path, description = "Application name")), request_body = DeployRequest,
    responses( (status = 201, body = ApplicationRevision), (status = 409, description = "an unsettled revision blocks the deploy"), (status = 404, description = "application, workflow or environment missing") ))]
#[tracing::instrument(level = "info", skip(state, headers, req))]
pub async fn deploy_app(
    State(state): State<AppState>,
    Path(app): Path<String>,
    headers: HeaderMap,
    Json(req): Json<DeployRequest>,
) -> ApiResult<(StatusCode, Json<ApplicationRevision>)> {
    let ctx = request_context(&headers);
    let rev = deploy::deploy(&state.services, &ctx, &app, req).await?;
    Ok((StatusCode::CREATED, Json(rev)))
}

/// List revisions, newest first
#[utoipa::path(get, path = "/applications/{app}/revisions", params(("app" = String, Path, description = "Application name"), ListRevisionsQuery),
    responses( (status = 200, body = RevisionList) ))]
#[tracing::instrument(level = "debug", skip(state, headers))]
pub async fn list_revisions(
    State(state): State<AppState>,
    Path(app): Path<String>,
    Query(q): Query<ListRevisionsQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<RevisionList>> {
    let ctx = request_context(&headers);
    let (revisions, total) = revision::list_revisions(&state.services, &ctx, &app, &q).await?;
    Ok(Json(RevisionList { revisions, total }))
}

/// One revision
#[utoipa::path(get, path = "/applications/{app}/revisions/{version}", params(("app" = String, Path, description = "Application name"), ("version" = String, Path, description = "Revision version")),
    responses( (status = 200, body = ApplicationRevision), (status = 404, description = "revision not found") ))]
pub async fn detail_revision(
    State(state): State<AppState>,
    Path((app, version)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<ApplicationRevision>> {
    let ctx = request_context(&headers);
    Ok(Json(revision::detail_revision(&state.services, &ctx, &app, &version).await?))
}

/// Structural diff between two of: latest fragments, a stored revision, the running manifest
#[utoipa::path(post, path = "/applications/{app}/compare", params(("app" = String, Path, description = "Application name")), request_body = CompareRequest,
    responses( (status = 200, body = CompareResponse) ))]
#[tracing::instrument(level = "debug", skip(state, headers, req))]
pub async fn compare_app(
    State(state): State<AppState>,
    Path(app): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CompareRequest>,
) -> ApiResult<Json<CompareResponse>> {
    let ctx = request_context(&headers);
    Ok(Json(compare::compare_app(&state.services, &ctx, &app, &req).await?))
}

/// Reset the component fragments to the newest revision
#[utoipa::path(post, path = "/applications/{app}/reset", params(("app" = String, Path, description = "Application name")),
    responses( (status = 200, body = ResetResponse), (status = 404, description = "no revision") ))]
#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn reset_app(State(state): State<AppState>, Path(app): Path<String>, headers: HeaderMap) -> ApiResult<Json<ResetResponse>> {
    let ctx = request_context(&headers);
    Ok(Json(reset::reset_app_to_latest_revision(&state.services, &ctx, &app).await?))
}

/// Expand the application or a revision through the control plane without applying it
#[utoipa::path(post, path = "/applications/{app}/dry-run", params(("app" = String, Path, description = "Application name")), request_body = DryRunRequest,
    responses( (status = 200, body = DryRunResponse) ))]
#[tracing::instrument(level = "debug", skip(state, headers, req))]
pub async fn dry_run_app(
    State(state): State<AppState>,
    Path(app): Path<String>,
    headers: HeaderMap,
    Json(req): Json<DryRunRequest>,
) -> ApiResult<Json<DryRunResponse>> {
    let ctx = request_context(&headers);
    Ok(Json(compare::dry_run_app_or_revision(&state.services, &ctx, &app, &req).await?))
}

/// Runs of one workflow, newest first
#[utoipa::path(get, path = "/applications/{app}/workflows/{workflow}/records", params(("app" = String, Path, description = "Application name"), ("workflow" = String, Path, description = "Workflow name"), PageQuery),
    responses( (status = 200, body = RecordList) ))]
pub async fn list_records(
    State(state): State<AppState>,
    Path((app, wf)): Path<(String, String)>,
    Query(q): Query<PageQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<RecordList>> {
    let ctx = request_context(&headers);
    let (records, total) = workflow::list_records(&state.services, &ctx, &app, &wf, q.page, q.page_size).await?;
    Ok(Json(RecordList { records, total }))
}

/// Stop a running workflow
#[utoipa::path(post, path = "/applications/{app}/records/{record}/terminate", params(("app" = String, Path, description = "Application name"), ("record" = String, Path, description = "Workflow record name")),
    responses( (status = 200, body = WorkflowRecord), (status = 409, description = "already finished") ))]
#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn terminate_record(
    State(state): State<AppState>,
    Path((app, record)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<WorkflowRecord>> {
    let ctx = request_context(&headers);
    Ok(Json(workflow::terminate_record(&state.services, &ctx, &app, &record).await?))
}

/// Continue a suspended workflow
#[utoipa::path(post, path = "/applications/{app}/records/{record}/resume", params(("app" = String, Path, description = "Application name"), ("record" = String, Path, description = "Workflow record name")),
    responses( (status = 200, body = WorkflowRecord) ))]
#[tracing::instrument(level = "info", skip(state, headers))]
pub async fn resume_record(
    State(state): State<AppState>,
    Path((app, record)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<WorkflowRecord>> {
    let ctx = request_context(&headers);
    Ok(Json(workflow::resume_record(&state.services, &ctx, &app, &record).await?))
}

/// Re-apply an earlier revision in place of a record's run
#[utoipa::path(post, path = "/applications/{app}/records/{record}/rollback", params(("app" = String, Path, description = "Application name"), ("record" = String, Path, description = "Workflow record name")),
    request_body = RollbackRequest,
    responses( (status = 200, body = RollbackResponse), (status = 400, description = "no complete revision to return to"), (status = 409, description = "workflow still running") ))]
#[tracing::instrument(level = "info", skip(state, headers, req))]
pub async fn rollback_record(
    State(state): State<AppState>,
    Path((app, record)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<RollbackRequest>,
) -> ApiResult<Json<RollbackResponse>> {
    let ctx = request_context(&headers);
    let out = workflow::rollback_record(&state.services, &ctx, &app, &record, req.revision.as_deref()).await?;
    Ok(Json(RollbackResponse { record: out.record, revision: out.revision }))
}
