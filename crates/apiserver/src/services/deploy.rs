//! Deployment orchestration: render, guard, record, apply.

use chrono::Utc;
use oam_types::Application as Manifest;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    context::RequestContext,
    error::{Error, Result},
    models::{Application, ApplicationRevision, ClusterTarget, CodeInfo, Env, ImageInfo, RevisionStatus},
    store::{Filter, StoreError},
    telemetry::DEPLOYS_TOTAL,
};

use super::{
    cp, generate_version,
    render::{render_manifest, RenderOptions, WorkflowPolicy},
    repository, revision, workflow, Services,
};

fn default_trigger() -> String { "api".into() }

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    /// Workflow to run; the application's default workflow when absent.
    #[serde(default)]
    pub workflow_name: Option<String>,
    /// Skip the check for an unsettled revision in the same environment.
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub note: String,
    #[serde(default = "default_trigger")]
    pub trigger_type: String,
    #[serde(default)]
    pub code_info: Option<CodeInfo>,
    #[serde(default)]
    pub image_info: Option<ImageInfo>,
}

impl Default for DeployRequest {
    fn default() -> Self {
        Self { workflow_name: None, force: false, note: String::new(), trigger_type: default_trigger(), code_info: None, image_info: None }
    }
}

/// Shared configuration is needed when any component type is backed by a non-terraform definition.
async fn needs_config_sync(svc: &Services, ctx: &RequestContext, manifest: &Manifest) -> Result<bool> {
    for comp in &manifest.spec.components {
        let def = cp(ctx, "get component definition", svc.control_plane.component_definition(&comp.component_type)).await?;
        if def.is_some_and(|d| !d.terraform) {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn sync_configs(svc: &Services, ctx: &RequestContext, app: &Application, env: &Env) -> Result<()> {
    let targets: Vec<ClusterTarget> = repository::targets_of(svc, ctx, env).await?.into_iter().filter_map(|t| t.cluster).collect();
    if targets.is_empty() {
        return Ok(());
    }
    let project = if app.project.is_empty() { env.project.as_str() } else { app.project.as_str() };
    cp(ctx, "sync configs", svc.control_plane.sync_configs(project, &targets)).await
}

/// Fail with `DeployConflict` unless the newest revision for (app, env) has settled.
async fn check_conflict(svc: &Services, ctx: &RequestContext, app: &str, env: &str) -> Result<()> {
    let Some(latest) = revision::latest_revision(svc, ctx, app, Some(env)).await? else { return Ok(()) };
    let status = revision::effective_status(svc, ctx, &latest).await?;
    if status.is_settled() {
        Ok(())
    } else {
        info!(app=%app, env=%env, version=%latest.version, status=%status, "deploy blocked by unsettled revision");
        Err(Error::DeployConflict(env.to_string()))
    }
}

fn in_flight_guards(app: &str, env: &str) -> [Filter; 2] {
    let base = repository::by_app(app).eq("envName", env);
    [base.clone().eq("status", RevisionStatus::Init.as_str()), base.eq("status", RevisionStatus::Running.as_str())]
}

async fn ensure_namespace(svc: &Services, ctx: &RequestContext, namespace: &str) -> Result<()> {
    let ensure = async {
        if !svc.control_plane.namespace_exists(namespace).await? {
            svc.control_plane.create_namespace(namespace).await?;
            info!(namespace=%namespace, "namespace created");
        }
        Ok::<_, anyhow::Error>(())
    };
    ctx.run(async { ensure.await.map_err(|source| Error::CreateNamespace { namespace: namespace.to_string(), source }) }).await
}

/// Deploy the application's current fragments and return the new revision.
#[instrument(skip(svc, ctx, req))]
pub async fn deploy(svc: &Services, ctx: &RequestContext, app_name: &str, req: DeployRequest) -> Result<ApplicationRevision> {
    let result = deploy_inner(svc, ctx, app_name, req).await;
    let outcome = match &result {
        Ok(_) => "success",
        Err(Error::DeployConflict(_)) => "conflict",
        Err(Error::DeployApplyFail(_)) => "apply_failed",
        Err(_) => "error",
    };
    DEPLOYS_TOTAL.with_label_values(&[outcome]).inc();
    result
}

/// Record why a deploy stopped after its revision was written. A failed write is logged so
/// the caller still sees the error that stopped the deploy.
async fn mark_failed(svc: &Services, ctx: &RequestContext, rev: &mut ApplicationRevision, cause: &Error) {
    let reason = match cause {
        Error::Cancelled => "cancelled".to_string(),
        e => e.to_string(),
    };
    if let Err(e) = revision::transition(svc, ctx, rev, RevisionStatus::Fail, Some(&reason)).await {
        warn!(app=%rev.app_primary_key, version=%rev.version, reason=%reason, error=%e, "failed to mark revision failed");
    }
}

async fn deploy_inner(svc: &Services, ctx: &RequestContext, app_name: &str, req: DeployRequest) -> Result<ApplicationRevision> {
    let app = repository::get_application(svc, ctx, app_name).await?;
    let version = generate_version("");
    let rendered = render_manifest(
        svc,
        ctx,
        &app,
        RenderOptions { workflow_name: req.workflow_name.as_deref(), env_name: None, version: &version, policy: WorkflowPolicy::Require },
    )
    .await?;
    let env = rendered.env;
    let manifest = rendered.manifest;
    let workflow = rendered.workflow.ok_or_else(|| Error::WorkflowNotExist(String::new()))?;

    if needs_config_sync(svc, ctx, &manifest).await? {
        sync_configs(svc, ctx, &app, &env).await?;
    }

    if !req.force {
        check_conflict(svc, ctx, &app.name, &env.name).await?;
    }

    let now = Utc::now();
    let mut rev = ApplicationRevision {
        app_primary_key: app.name.clone(),
        version: version.clone(),
        apply_app_config: revision::snapshot(&manifest)?,
        status: RevisionStatus::Init,
        reason: String::new(),
        deploy_user: ctx.user.clone(),
        note: req.note,
        trigger_type: req.trigger_type,
        workflow_name: workflow.name.clone(),
        env_name: env.name.clone(),
        code_info: req.code_info,
        image_info: req.image_info,
        rollback_version: None,
        create_time: now,
        update_time: now,
    };
    let guards = if req.force { Vec::new() } else { in_flight_guards(&app.name, &env.name).to_vec() };
    match ctx.run(svc.store.add_guarded(&rev, &guards)).await {
        Err(Error::Store(StoreError::Conflict { .. })) => return Err(Error::DeployConflict(env.name.clone())),
        other => other?,
    }

    // The revision row exists from here on; writes about it ignore caller cancellation.
    let detached = RequestContext::new(ctx.user.clone());

    if let Err(e) = ensure_namespace(svc, ctx, &env.namespace).await {
        mark_failed(svc, &detached, &mut rev, &e).await;
        return Err(e);
    }

    let applied = match ctx.run(async { svc.control_plane.apply_application(&manifest).await.map_err(Error::DeployApplyFail) }).await {
        Ok(applied) => applied,
        Err(e) => {
            warn!(app=%app.name, env=%env.name, version=%version, reason=%e, "apply failed");
            mark_failed(svc, &detached, &mut rev, &e).await;
            return Err(e);
        }
    };

    if let Err(e) = workflow::create_workflow_record(svc, &detached, &app.name, &applied, &workflow).await {
        warn!(app=%app.name, version=%version, error=%e, "failed to create workflow record");
    }
    if let Err(e) = revision::transition(svc, &detached, &mut rev, RevisionStatus::Running, None).await {
        warn!(app=%app.name, version=%version, error=%e, "failed to mark revision running");
    }
    info!(app=%app.name, env=%env.name, version=%version, workflow=%workflow.name, "deployed");
    Ok(rev)
}
