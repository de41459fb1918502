//! Test harness: an in-memory control plane and fixtures shared by unit and integration tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use oam_types::{keys, AppStatus, Application as Manifest, WorkflowRunPhase, WorkflowStatus};
use tokio_util::sync::CancellationToken;

use crate::{
    context::RequestContext,
    control_plane::{ComponentDefinitionInfo, ControlPlane},
    models::{Application, ClusterTarget, Env, Target},
    services::{
        fragments::{self, CreateApplicationRequest, CreateComponentRequest},
        Services,
    },
    store::Store,
};

pub const DEV_ENV: &str = "dev";
pub const DEV_NAMESPACE: &str = "dev-ns";
pub const DEV_TARGET: &str = "dev-target";
pub const DEV_WORKFLOW: &str = "workflow-dev";

/// Control plane double. Applied manifests are kept per (namespace, name) and start a fresh
/// workflow run reporting the manifest's publish version.
#[derive(Default)]
pub struct FakeControlPlane {
    apps: Mutex<BTreeMap<(String, String), Manifest>>,
    namespaces: Mutex<BTreeSet<String>>,
    synced: Mutex<Vec<(String, Vec<ClusterTarget>)>>,
    revision: AtomicU64,
    pub fail_apply: AtomicBool,
    pub fail_namespace: AtomicBool,
    pub fail_dry_run: AtomicBool,
    /// Cancelled as soon as a namespace lookup reaches the control plane.
    pub cancel_on_namespace_check: Mutex<Option<CancellationToken>>,
}

fn identity(app: &Manifest) -> (String, String) {
    (app.metadata.namespace.clone().unwrap_or_default(), app.metadata.name.clone().unwrap_or_default())
}

impl FakeControlPlane {
    pub fn live(&self, namespace: &str, name: &str) -> Option<Manifest> {
        self.apps.lock().ok()?.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn apply_count(&self) -> u64 { self.revision.load(Ordering::SeqCst) }

    pub fn synced_projects(&self) -> Vec<String> {
        self.synced.lock().map(|s| s.iter().map(|(p, _)| p.clone()).collect()).unwrap_or_default()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.namespaces.lock().map(|n| n.contains(name)).unwrap_or(false)
    }

    /// Mutate the live workflow status, as the controller would.
    pub fn update_workflow(&self, namespace: &str, name: &str, f: impl FnOnce(&mut WorkflowStatus)) {
        let mut apps = self.apps.lock().expect("fake control plane lock");
        let app = apps.get_mut(&(namespace.to_string(), name.to_string())).expect("application applied");
        let status = app.status.get_or_insert_with(AppStatus::default);
        f(status.workflow.get_or_insert_with(WorkflowStatus::default));
    }

    /// Report the current run as finished with `phase`.
    pub fn finish_workflow(&self, namespace: &str, name: &str, phase: WorkflowRunPhase) {
        self.update_workflow(namespace, name, |wf| {
            wf.phase = phase;
            wf.finished = true;
            wf.end_time = Some(Utc::now());
        });
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        if let Ok(mut apps) = self.apps.lock() {
            apps.remove(&(namespace.to_string(), name.to_string()));
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn get_application(&self, namespace: &str, name: &str) -> Result<Option<Manifest>> { Ok(self.live(namespace, name)) }

    async fn list_applications(&self, label_selector: &str) -> Result<Vec<Manifest>> {
        let (key, value) = label_selector.split_once('=').unwrap_or((label_selector, ""));
        let apps = self.apps.lock().map_err(|_| anyhow!("poisoned"))?;
        Ok(apps.values().filter(|a| key.is_empty() || a.label(key) == Some(value)).cloned().collect())
    }

    async fn apply_application(&self, app: &Manifest) -> Result<Manifest> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(anyhow!("admission webhook denied the request"));
        }
        let rv = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = app.clone();
        stored.metadata.resource_version = Some(rv.to_string());
        let publish = app.annotation(keys::ANNOTATION_PUBLISH_VERSION).unwrap_or_default().to_string();
        stored.status = Some(AppStatus {
            workflow: Some(WorkflowStatus { app_revision: publish, phase: WorkflowRunPhase::Executing, start_time: Some(Utc::now()), ..Default::default() }),
            observed_generation: None,
        });
        self.apps.lock().map_err(|_| anyhow!("poisoned"))?.insert(identity(app), stored.clone());
        Ok(stored)
    }

    async fn delete_application(&self, namespace: &str, name: &str) -> Result<()> {
        self.remove(namespace, name);
        Ok(())
    }

    async fn patch_application_status(&self, app: &Manifest) -> Result<()> {
        let mut apps = self.apps.lock().map_err(|_| anyhow!("poisoned"))?;
        let live = apps.get_mut(&identity(app)).ok_or_else(|| anyhow!("application not found"))?;
        live.status = app.status.clone();
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        if let Some(token) = self.cancel_on_namespace_check.lock().map_err(|_| anyhow!("poisoned"))?.take() {
            token.cancel();
        }
        Ok(self.has_namespace(name))
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        if self.fail_namespace.load(Ordering::SeqCst) {
            return Err(anyhow!("namespaces is forbidden"));
        }
        self.namespaces.lock().map_err(|_| anyhow!("poisoned"))?.insert(name.to_string());
        Ok(())
    }

    async fn component_definition(&self, component_type: &str) -> Result<Option<ComponentDefinitionInfo>> {
        let terraform = match component_type {
            "webservice" | "worker" | "task" => false,
            "alibaba-rds" => true,
            _ => return Ok(None),
        };
        Ok(Some(ComponentDefinitionInfo { name: component_type.to_string(), terraform }))
    }

    async fn sync_configs(&self, project: &str, targets: &[ClusterTarget]) -> Result<()> {
        self.synced.lock().map_err(|_| anyhow!("poisoned"))?.push((project.to_string(), targets.to_vec()));
        Ok(())
    }

    async fn dry_run(&self, app: &Manifest) -> Result<Manifest> {
        if self.fail_dry_run.load(Ordering::SeqCst) {
            return Err(anyhow!("component type not found"));
        }
        Ok(app.clone())
    }
}

pub struct Fixture {
    pub svc: Services,
    pub cp: Arc<FakeControlPlane>,
    pub ctx: RequestContext,
}

/// Memory store, fake control plane and a `dev` environment with one cluster target.
pub async fn fixture() -> Fixture { fixture_with_store(Store::memory()).await }

pub async fn fixture_with_store(store: Store) -> Fixture {
    let cp = Arc::new(FakeControlPlane::default());
    let svc = Services::new(store, cp.clone());
    let ctx = RequestContext::new("tester");
    let now = Utc::now();
    fragments::create_target(
        &svc,
        &ctx,
        Target {
            name: DEV_TARGET.into(),
            alias: "Dev Cluster".into(),
            project: "demo-project".into(),
            cluster: Some(ClusterTarget { cluster_name: "local".into(), namespace: DEV_NAMESPACE.into() }),
            create_time: now,
        },
    )
    .await
    .expect("create target");
    fragments::create_env(
        &svc,
        &ctx,
        Env {
            name: DEV_ENV.into(),
            alias: "Development".into(),
            namespace: DEV_NAMESPACE.into(),
            project: "demo-project".into(),
            targets: vec![DEV_TARGET.into()],
            create_time: now,
        },
    )
    .await
    .expect("create env");
    Fixture { svc, cp, ctx }
}

/// Application `name` bound to `dev`, with main component `c1` of type `webservice`.
pub async fn demo_app(fx: &Fixture, name: &str) -> Application {
    let req = CreateApplicationRequest {
        name: name.into(),
        project: "demo-project".into(),
        env_bindings: vec![DEV_ENV.into()],
        component: Some(CreateComponentRequest {
            name: "c1".into(),
            component_type: "webservice".into(),
            properties: r#"{"image":"nginx:1.25"}"#.into(),
            ..Default::default()
        }),
        ..Default::default()
    };
    fragments::create_application(&fx.svc, &fx.ctx, req).await.expect("create application")
}
