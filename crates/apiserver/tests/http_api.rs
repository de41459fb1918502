use apiserver::{
    build_router,
    services::fragments::{self, CreateTriggerRequest},
    test_support::{demo_app, fixture, Fixture, DEV_NAMESPACE, DEV_WORKFLOW},
    webhook::WebhookRegistry,
    AppState,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use oam_types::WorkflowRunPhase;
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn router(fx: &Fixture) -> Router { build_router(AppState::new(fx.svc.clone(), WebhookRegistry::builtin())) }

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-user", "alice")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

#[tokio::test]
async fn deploy_conflict_and_revision_listing() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    let app = router(&fx);

    let (status, rev) = call(&app, "POST", "/applications/demo/deploy", Some(json!({"note": "first"}))).await;
    assert_eq!(status, StatusCode::CREATED, "{rev}");
    assert_eq!(rev["status"], "running");
    assert_eq!(rev["deployUser"], "alice");
    assert_eq!(rev["triggerType"], "api");
    let version = rev["version"].as_str().unwrap().to_string();

    let (status, err) = call(&app, "POST", "/applications/demo/deploy", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "deploy_conflict");

    let (status, list) = call(&app, "GET", "/applications/demo/revisions?status=running", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);
    assert_eq!(list["revisions"][0]["version"], version.as_str());

    let (status, err) = call(&app, "GET", "/applications/demo/revisions?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "invalid_properties");

    let (status, one) = call(&app, "GET", &format!("/applications/demo/revisions/{version}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(one["note"], "first");

    let (status, _) = call(&app, "GET", "/applications/demo/revisions/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn records_terminate_and_rollback_routes() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    let app = router(&fx);
    call(&app, "POST", "/applications/demo/deploy", Some(json!({}))).await;

    let (status, list) = call(&app, "GET", &format!("/applications/demo/workflows/{DEV_WORKFLOW}/records"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);
    let record = list["records"][0]["name"].as_str().unwrap().to_string();

    let (status, err) = call(&app, "POST", &format!("/applications/demo/records/{record}/rollback"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "workflow_running");

    let (status, rec) = call(&app, "POST", &format!("/applications/demo/records/{record}/terminate"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rec["finished"], true);

    let (status, err) = call(&app, "POST", &format!("/applications/demo/records/{record}/rollback"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "no_ready_revision");
}

#[tokio::test]
async fn compare_reset_and_dry_run_routes() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    let app = router(&fx);

    let (status, err) = call(&app, "POST", "/applications/demo/reset", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "revision_not_exist");

    call(&app, "POST", "/applications/demo/deploy", Some(json!({}))).await;
    let (status, diff) = call(&app, "POST", "/applications/demo/compare", Some(json!({"compareLatestWithRunning": {"env": "dev"}}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(diff["isDiff"], false);

    let (status, reset) = call(&app, "POST", "/applications/demo/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reset["isReset"], true);

    let (status, dry) = call(&app, "POST", "/applications/demo/dry-run", Some(json!({"dryRunType": "APP", "env": "dev"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dry["success"], true);
    assert!(dry["yaml"].as_str().unwrap().contains("Application(demo)"));
}

#[tokio::test]
async fn custom_webhook_patches_and_deploys() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    let trigger = fragments::create_trigger(&fx.svc, &fx.ctx, "demo", CreateTriggerRequest { name: "ci".into(), payload_type: "custom".into(), ..Default::default() })
        .await
        .unwrap();
    let app = router(&fx);

    let body = json!({"upgrade": {"c1": {"image": "nginx:1.27"}}, "codeInfo": {"commit": "abc123", "branch": "main"}});
    let (status, resp) = call(&app, "POST", &format!("/webhooks/{}", trigger.token), Some(body)).await;
    assert_eq!(status, StatusCode::OK, "{resp}");
    assert_eq!(resp["state"], "success");
    assert_eq!(resp["revision"]["triggerType"], "webhook");
    assert_eq!(resp["revision"]["codeInfo"]["commit"], "abc123");
    let live = fx.cp.live(DEV_NAMESPACE, "demo").unwrap();
    assert_eq!(live.spec.components[0].properties, Some(json!({"image": "nginx:1.27"})));

    // webhook deploys are forced, so an unsettled run does not block them
    fx.cp.update_workflow(DEV_NAMESPACE, "demo", |wf| wf.phase = WorkflowRunPhase::Executing);
    let (status, _) = call(&app, "POST", &format!("/webhooks/{}", trigger.token), Some(json!({"upgrade": {}}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, err) = call(&app, "POST", "/webhooks/unknown-token", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "trigger_not_exist");
}

#[tokio::test]
async fn metrics_endpoint_exposes_deploy_counter() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    let app = router(&fx);
    call(&app, "POST", "/applications/demo/deploy", Some(json!({}))).await;
    let res = app.oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let text = String::from_utf8(axum::body::to_bytes(res.into_body(), 1 << 20).await.unwrap().to_vec()).unwrap();
    assert!(text.contains("deploys_total"));
}
