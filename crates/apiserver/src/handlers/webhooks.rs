use std::collections::BTreeMap;

use axum::{extract::{Path, State}, http::HeaderMap, Json};
use serde_json::Value;

use crate::{
    error::ApiResult,
    webhook::{handle_webhook, WebhookEvent, WebhookResponse},
    AppState,
};

use super::request_context;

/// Run the trigger identified by `token` with the posted payload
#[utoipa::path(post, path = "/webhooks/{token}", params(("token" = String, Path, description = "Trigger token")),
    request_body = Object,
    responses( (status = 200, body = WebhookResponse), (status = 404, description = "unknown token"), (status = 400, description = "invalid payload") ))]
#[tracing::instrument(level = "info", skip_all)]
pub async fn trigger_webhook(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Json<WebhookResponse>> {
    let ctx = request_context(&headers);
    let headers: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_ascii_lowercase(), v.to_string())))
        .collect();
    let resp = handle_webhook(&state.services, &ctx, &state.webhooks, &token, WebhookEvent { body, headers }).await?;
    Ok(Json(resp))
}
