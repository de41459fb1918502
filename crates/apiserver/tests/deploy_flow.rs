use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use apiserver::{
    error::Error,
    models::{ApplicationRevision, RevisionStatus},
    services::{deploy::{deploy, DeployRequest}, revision, workflow},
    store::{DocumentStore, Entity, Filter, ListOptions, MemoryStore, Row, Store, StoreError},
    test_support::{demo_app, fixture, fixture_with_store, DEV_ENV, DEV_NAMESPACE, DEV_WORKFLOW},
};
use async_trait::async_trait;
use oam_types::{keys, WorkflowRunPhase};
use serde_json::Value;

#[tokio::test]
async fn deploy_conflict_settle_and_redeploy() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;

    let v1 = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap();
    assert_eq!(v1.status, RevisionStatus::Running);
    assert_eq!(v1.env_name, DEV_ENV);
    assert_eq!(v1.workflow_name, DEV_WORKFLOW);
    assert_eq!(v1.deploy_user, "tester");
    assert!(fx.cp.has_namespace(DEV_NAMESPACE));
    let live = fx.cp.live(DEV_NAMESPACE, "demo").expect("manifest applied");
    assert_eq!(live.annotation(keys::ANNOTATION_DEPLOY_VERSION), Some(v1.version.as_str()));
    assert_eq!(live.label(keys::LABEL_SOURCE_OF_TRUTH), Some(keys::FROM_UX));

    let err = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::DeployConflict(ref env) if env == DEV_ENV), "{err:?}");

    fx.cp.finish_workflow(DEV_NAMESPACE, "demo", WorkflowRunPhase::Succeeded);
    let report = workflow::sync_workflow_records(&fx.svc, &fx.ctx).await.unwrap();
    assert_eq!(report.finished, 1);
    let settled = revision::detail_revision(&fx.svc, &fx.ctx, "demo", &v1.version).await.unwrap();
    assert_eq!(settled.status, RevisionStatus::Complete);

    let v2 = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap();
    assert!(v2.version > v1.version);
    assert_eq!(v2.status, RevisionStatus::Running);
}

#[tokio::test]
async fn forced_deploy_supersedes_running_revision_and_record() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    let v1 = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap();
    let v2 = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest { force: true, note: "hotfix".into(), ..Default::default() }).await.unwrap();
    assert_eq!(v2.note, "hotfix");

    let old = revision::detail_revision(&fx.svc, &fx.ctx, "demo", &v1.version).await.unwrap();
    assert_eq!(old.status, RevisionStatus::Terminated);

    let (records, total) = workflow::list_records(&fx.svc, &fx.ctx, "demo", DEV_WORKFLOW, None, None).await.unwrap();
    assert_eq!(total, 2);
    let old_record = records.iter().find(|r| r.revision_primary_key == v1.version).unwrap();
    assert!(old_record.finished);
    assert_eq!(old_record.status, WorkflowRunPhase::Terminated);
    let new_record = records.iter().find(|r| r.revision_primary_key == v2.version).unwrap();
    assert!(!new_record.finished);
    assert_eq!(new_record.steps.len(), 1);
}

#[tokio::test]
async fn apply_failure_keeps_failed_revision() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    fx.cp.fail_apply.store(true, Ordering::SeqCst);

    let err = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::DeployApplyFail(_)), "{err:?}");
    let latest = revision::latest_revision(&fx.svc, &fx.ctx, "demo", Some(DEV_ENV)).await.unwrap().unwrap();
    assert_eq!(latest.status, RevisionStatus::Fail);
    assert!(latest.reason.contains("admission webhook denied"));
    let (records, _) = workflow::list_records(&fx.svc, &fx.ctx, "demo", DEV_WORKFLOW, None, None).await.unwrap();
    assert!(records.is_empty());

    // A failed revision is not settled; only a forced deploy gets past it.
    fx.cp.fail_apply.store(false, Ordering::SeqCst);
    let err = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::DeployConflict(_)));
    deploy(&fx.svc, &fx.ctx, "demo", DeployRequest { force: true, ..Default::default() }).await.unwrap();
}

#[tokio::test]
async fn namespace_failure_aborts_before_apply() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    fx.cp.fail_namespace.store(true, Ordering::SeqCst);

    let err = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::CreateNamespace { ref namespace, .. } if namespace == DEV_NAMESPACE), "{err:?}");
    assert_eq!(fx.cp.apply_count(), 0);
    let latest = revision::latest_revision(&fx.svc, &fx.ctx, "demo", Some(DEV_ENV)).await.unwrap().unwrap();
    assert_eq!(latest.status, RevisionStatus::Fail);
}

#[tokio::test]
async fn webservice_components_sync_project_configs() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap();
    assert_eq!(fx.cp.synced_projects(), ["demo-project"]);
}

#[tokio::test]
async fn unknown_workflow_and_application() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    let err = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest { workflow_name: Some("nope".into()), ..Default::default() }).await.unwrap_err();
    assert!(matches!(err, Error::WorkflowNotExist(_)), "{err:?}");
    let err = deploy(&fx.svc, &fx.ctx, "ghost", DeployRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::ApplicationNotExist(_)));
}

#[tokio::test]
async fn cancelled_context_stops_deploy() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    fx.ctx.cancel.cancel();
    let err = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(fx.cp.apply_count(), 0);
}

#[tokio::test]
async fn cancellation_after_insert_leaves_failed_revision() {
    let fx = fixture().await;
    demo_app(&fx, "demo").await;
    *fx.cp.cancel_on_namespace_check.lock().unwrap() = Some(fx.ctx.cancel.clone());

    let err = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{err:?}");
    assert_eq!(fx.cp.apply_count(), 0);

    let ctx = apiserver::context::RequestContext::new("tester");
    let latest = revision::latest_revision(&fx.svc, &ctx, "demo", Some(DEV_ENV)).await.unwrap().unwrap();
    assert_eq!(latest.status, RevisionStatus::Fail);
    assert_eq!(latest.reason, "cancelled");

    // Nothing is left in flight, so a forced deploy goes through and settles normally.
    let next = deploy(&fx.svc, &ctx, "demo", DeployRequest { force: true, ..Default::default() }).await.unwrap();
    assert_eq!(next.status, RevisionStatus::Running);
}

/// Memory store whose revision updates fail on demand.
#[derive(Default)]
struct RevisionWritesFail {
    inner: MemoryStore,
    failing: AtomicBool,
}

#[async_trait]
impl DocumentStore for RevisionWritesFail {
    async fn add(&self, kind: &'static str, row: Row) -> Result<(), StoreError> { self.inner.add(kind, row).await }

    async fn add_guarded(&self, kind: &'static str, row: Row, guards: &[Filter]) -> Result<(), StoreError> {
        self.inner.add_guarded(kind, row, guards).await
    }

    async fn put(&self, kind: &'static str, key: &str, doc: Value) -> Result<(), StoreError> {
        if kind == ApplicationRevision::KIND && self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset".into()));
        }
        self.inner.put(kind, key, doc).await
    }

    async fn get(&self, kind: &'static str, key: &str) -> Result<Row, StoreError> { self.inner.get(kind, key).await }

    async fn delete(&self, kind: &'static str, key: &str) -> Result<(), StoreError> { self.inner.delete(kind, key).await }

    async fn list(&self, kind: &'static str, filter: &Filter, opts: &ListOptions) -> Result<Vec<Row>, StoreError> {
        self.inner.list(kind, filter, opts).await
    }

    async fn count(&self, kind: &'static str, filter: &Filter) -> Result<u64, StoreError> { self.inner.count(kind, filter).await }

    async fn ping(&self) -> Result<(), StoreError> { self.inner.ping().await }
}

#[tokio::test]
async fn apply_error_survives_failed_status_write() {
    let backend = Arc::new(RevisionWritesFail::default());
    let fx = fixture_with_store(Store::new(backend.clone())).await;
    demo_app(&fx, "demo").await;
    fx.cp.fail_namespace.store(true, Ordering::SeqCst);
    backend.failing.store(true, Ordering::SeqCst);

    let err = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest::default()).await.unwrap_err();
    assert!(matches!(err, Error::CreateNamespace { .. }), "{err:?}");

    fx.cp.fail_namespace.store(false, Ordering::SeqCst);
    fx.cp.fail_apply.store(true, Ordering::SeqCst);
    let err = deploy(&fx.svc, &fx.ctx, "demo", DeployRequest { force: true, ..Default::default() }).await.unwrap_err();
    assert!(matches!(err, Error::DeployApplyFail(_)), "{err:?}");
}
