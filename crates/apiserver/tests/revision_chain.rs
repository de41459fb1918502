use apiserver::{
    error::Error,
    models::{ApplicationRevision, RevisionStatus},
    services::{
        deploy::{deploy, DeployRequest},
        revision,
    },
    test_support::{demo_app, fixture, Fixture, DEV_ENV, DEV_WORKFLOW},
};
use chrono::{Duration, Utc};

/// Store a revision directly, `minutes_ago` old, optionally pointing back at `rollback_to`.
async fn seed(fx: &Fixture, version: &str, status: RevisionStatus, rollback_to: Option<&str>, minutes_ago: i64) -> ApplicationRevision {
    let at = Utc::now() - Duration::minutes(minutes_ago);
    let rev = ApplicationRevision {
        app_primary_key: "demo".into(),
        version: version.into(),
        apply_app_config: "{}".into(),
        status,
        reason: String::new(),
        deploy_user: "tester".into(),
        note: String::new(),
        trigger_type: "api".into(),
        workflow_name: DEV_WORKFLOW.into(),
        env_name: DEV_ENV.into(),
        code_info: None,
        image_info: None,
        rollback_version: rollback_to.map(str::to_string),
        create_time: at,
        update_time: at,
    };
    fx.svc.store.add(&rev).await.unwrap();
    rev
}

#[tokio::test]
async fn effective_status_follows_several_rollback_hops() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    seed(&fx, "v1", RevisionStatus::Complete, None, 40).await;
    seed(&fx, "v2", RevisionStatus::Rollback, Some("v1"), 30).await;
    seed(&fx, "v3", RevisionStatus::Rollback, Some("v2"), 20).await;
    let v4 = seed(&fx, "v4", RevisionStatus::Rollback, Some("v3"), 10).await;

    assert_eq!(revision::effective_status(&fx.svc, &fx.ctx, &v4).await.unwrap(), RevisionStatus::Complete);
}

#[tokio::test]
async fn cyclic_or_dangling_chain_stays_unsettled() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    seed(&fx, "v1", RevisionStatus::Rollback, Some("v2"), 30).await;
    let v2 = seed(&fx, "v2", RevisionStatus::Rollback, Some("v1"), 20).await;
    let status = revision::effective_status(&fx.svc, &fx.ctx, &v2).await.unwrap();
    assert_eq!(status, RevisionStatus::Rollback);
    assert!(!status.is_settled());

    let dangling = seed(&fx, "v3", RevisionStatus::Rollback, Some("gone"), 10).await;
    assert_eq!(revision::effective_status(&fx.svc, &fx.ctx, &dangling).await.unwrap(), RevisionStatus::Rollback);

    let err = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::DeployConflict(_)), "{err:?}");
}

#[tokio::test]
async fn deploy_after_rollback_to_complete_revision() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    seed(&fx, "v1", RevisionStatus::Complete, None, 30).await;
    seed(&fx, "v2", RevisionStatus::Rollback, Some("v1"), 20).await;

    let next = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap();
    assert_eq!(next.status, RevisionStatus::Running);
    let latest = revision::latest_revision(&fx.svc, &fx.ctx, "demo", Some(DEV_ENV)).await.unwrap().unwrap();
    assert_eq!(latest.version, next.version);
}

#[tokio::test]
async fn deploy_after_rollback_to_running_revision_conflicts() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    seed(&fx, "v1", RevisionStatus::Running, None, 30).await;
    seed(&fx, "v2", RevisionStatus::Rollback, Some("v1"), 20).await;

    let err = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::DeployConflict(ref env) if env == DEV_ENV), "{err:?}");
}
