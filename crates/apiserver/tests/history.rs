use std::sync::atomic::Ordering;

use apiserver::{
    error::Error,
    services::{
        compare::{compare_app, diff_manifests, dry_run_app_or_revision, CompareRequest, DryRunRequest, DryRunSource, EnvRef, RevisionRef},
        deploy::{deploy, DeployRequest},
        fragments::{self, CreateComponentRequest, UpdateComponentRequest},
        repository,
        render::{render_manifest, RenderOptions, WorkflowPolicy},
        reset::{reset_app, reset_app_to_latest_revision},
    },
    test_support::{demo_app, fixture, Fixture, DEV_ENV},
};
use oam_types::Application as Manifest;
use serde_json::json;

async fn drift(fx: &Fixture) {
    fragments::update_component(&fx.svc, &fx.ctx, "demo", "c1", UpdateComponentRequest { properties: Some(r#"{"image":"nginx:1.26"}"#.into()), ..Default::default() })
        .await
        .unwrap();
    let c2 = CreateComponentRequest { name: "c2".into(), component_type: "worker".into(), ..Default::default() };
    fragments::create_component(&fx.svc, &fx.ctx, "demo", c2).await.unwrap();
}

#[tokio::test]
async fn compare_detects_drift_between_revision_and_fragments() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    let v1 = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap();

    let in_sync = compare_app(&fx.svc, &fx.ctx, "demo", &CompareRequest { compare_latest_with_running: Some(EnvRef { env: DEV_ENV.into() }), ..Default::default() })
        .await
        .unwrap();
    assert!(!in_sync.is_diff, "{}", in_sync.diff_report);

    drift(&fx).await;
    let res = compare_app(&fx.svc, &fx.ctx, "demo", &CompareRequest { compare_revision_with_latest: Some(RevisionRef { revision: v1.version.clone() }), ..Default::default() })
        .await
        .unwrap();
    assert!(res.is_diff);
    assert!(res.diffs.iter().any(|d| d.path.contains("image")), "{:?}", res.diffs);
    assert!(res.diffs.iter().any(|d| d.path.contains("c2")), "{:?}", res.diffs);
    assert!(res.diff_report.contains("nginx:1.26"));
    assert!(res.base_app_yaml.contains("nginx:1.25"));
    assert!(res.target_app_yaml.contains("nginx:1.26"));

    let running = compare_app(&fx.svc, &fx.ctx, "demo", &CompareRequest { compare_revision_with_running: Some(RevisionRef { revision: v1.version }), ..Default::default() })
        .await
        .unwrap();
    assert!(!running.is_diff, "{}", running.diff_report);
}

#[tokio::test]
async fn compare_with_a_missing_side_reports_no_diff() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    let res = compare_app(&fx.svc, &fx.ctx, "demo", &CompareRequest { compare_latest_with_running: Some(EnvRef { env: DEV_ENV.into() }), ..Default::default() })
        .await
        .unwrap();
    assert!(!res.is_diff);
    assert!(res.base_app_yaml.contains("nginx:1.25"));
    assert!(res.target_app_yaml.is_empty());

    let res = compare_app(&fx.svc, &fx.ctx, "demo", &CompareRequest { compare_revision_with_running: Some(RevisionRef { revision: "nope".into() }), ..Default::default() })
        .await
        .unwrap();
    assert!(!res.is_diff && res.base_app_yaml.is_empty());

    let err = compare_app(&fx.svc, &fx.ctx, "demo", &CompareRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidProperties(_)));
}

#[tokio::test]
async fn reset_restores_components_from_latest_revision() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    let err = reset_app_to_latest_revision(&fx.svc, &fx.ctx, "demo").await.unwrap_err();
    assert!(matches!(err, Error::RevisionNotExist(_)));

    deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap();
    drift(&fx).await;

    let res = reset_app_to_latest_revision(&fx.svc, &fx.ctx, "demo").await.unwrap();
    assert!(res.is_reset);
    assert!(res.added.is_empty());
    assert_eq!(res.updated, ["c1"]);
    assert_eq!(res.deleted, ["c2"]);

    let comps = repository::list_components(&fx.svc, &fx.ctx, "demo").await.unwrap();
    assert_eq!(comps.len(), 1);
    assert!(comps[0].main);
    assert_eq!(comps[0].properties, Some(json!({"image": "nginx:1.25"})));
    assert_eq!(comps[0].traits[0].alias, "Set Replicas");

    let again = reset_app_to_latest_revision(&fx.svc, &fx.ctx, "demo").await.unwrap();
    assert!(again.updated.is_empty() && again.deleted.is_empty() && again.added.is_empty());
}

async fn render_current(fx: &Fixture) -> Manifest {
    let app = repository::get_application(&fx.svc, &fx.ctx, "demo").await.unwrap();
    let opts = RenderOptions { workflow_name: None, env_name: Some(DEV_ENV), version: "20240101000000000", policy: WorkflowPolicy::Tolerate };
    render_manifest(&fx.svc, &fx.ctx, &app, opts).await.unwrap().manifest
}

#[tokio::test]
async fn render_reset_render_converges() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    let c3 = CreateComponentRequest { name: "c3".into(), component_type: "worker".into(), properties: r#"{"cmd":["run"]}"#.into(), ..Default::default() };
    fragments::create_component(&fx.svc, &fx.ctx, "demo", c3).await.unwrap();

    let before = render_current(&fx).await;
    let res = reset_app(&fx.svc, &fx.ctx, "demo", &before).await.unwrap();
    assert!(res.added.is_empty() && res.updated.is_empty() && res.deleted.is_empty(), "{res:?}");
    let after = render_current(&fx).await;
    assert!(diff_manifests(&before, &after).unwrap().is_empty());

    // Resetting a drifted fragment set back to the first render reproduces it.
    drift(&fx).await;
    assert!(!diff_manifests(&before, &render_current(&fx).await).unwrap().is_empty());
    reset_app(&fx.svc, &fx.ctx, "demo", &before).await.unwrap();
    let restored = render_current(&fx).await;
    assert_eq!(diff_manifests(&before, &restored).unwrap(), Vec::new());
}

#[tokio::test]
async fn dry_run_app_and_revision() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    let res = dry_run_app_or_revision(&fx.svc, &fx.ctx, "demo", &DryRunRequest { env: DEV_ENV.into(), ..Default::default() }).await.unwrap();
    assert!(res.success);
    assert!(res.yaml.starts_with("---\n# Application(demo) \n---\n\n"), "{}", res.yaml);
    assert_eq!(fx.cp.apply_count(), 0);

    let v1 = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap();
    drift(&fx).await;
    let req = DryRunRequest { dry_run_type: DryRunSource::Revision, version: v1.version, ..Default::default() };
    let res = dry_run_app_or_revision(&fx.svc, &fx.ctx, "demo", &req).await.unwrap();
    assert!(res.yaml.contains("nginx:1.25"));
    assert!(!res.yaml.contains("c2"));

    fx.cp.fail_dry_run.store(true, Ordering::SeqCst);
    let res = dry_run_app_or_revision(&fx.svc, &fx.ctx, "demo", &DryRunRequest { env: DEV_ENV.into(), ..Default::default() }).await.unwrap();
    assert!(!res.success);
    assert!(res.message.contains("component type not found"));
}
