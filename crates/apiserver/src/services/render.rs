//! Assembles the `Application` manifest from stored fragments. Never writes to the store.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use oam_types::{
    keys, AppPolicy, Application as Manifest, ApplicationComponent as ManifestComponent, ApplicationSpec,
    ApplicationTrait as ManifestTrait, Workflow as ManifestWorkflow, WorkflowStep as ManifestStep, WorkflowSubStep,
};
use tracing::debug;

use crate::{
    context::RequestContext,
    error::{Error, Result},
    models::{Application, ApplicationComponent, ApplicationPolicy, Env, Workflow, WorkflowStep},
};

use super::{cp, generate_version, repository, Services};

/// What to do when neither an explicit nor a default workflow exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowPolicy {
    /// Fail with `WorkflowNotExist`.
    Require,
    /// Render without a workflow; the environment must then be given explicitly.
    Tolerate,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions<'a> {
    pub workflow_name: Option<&'a str>,
    pub env_name: Option<&'a str>,
    pub version: &'a str,
    pub policy: WorkflowPolicy,
}

#[derive(Debug, Clone)]
pub struct Rendered {
    pub manifest: Manifest,
    pub workflow: Option<Workflow>,
    pub env: Env,
}

async fn resolve_workflow(svc: &Services, ctx: &RequestContext, app: &str, opts: &RenderOptions<'_>) -> Result<Option<Workflow>> {
    if let Some(name) = opts.workflow_name.filter(|n| !n.is_empty()) {
        return repository::get_workflow(svc, ctx, app, name).await.map(Some);
    }
    match repository::default_workflow(svc, ctx, app).await {
        Ok(wf) => Ok(Some(wf)),
        Err(Error::WorkflowNoDefault) => match opts.policy {
            WorkflowPolicy::Require => Err(Error::WorkflowNotExist(String::new())),
            WorkflowPolicy::Tolerate => Ok(None),
        },
        Err(e) => Err(e),
    }
}

pub async fn render_manifest(svc: &Services, ctx: &RequestContext, app: &Application, opts: RenderOptions<'_>) -> Result<Rendered> {
    let workflow = resolve_workflow(svc, ctx, &app.name, &opts).await?;
    let env_name = match (&workflow, opts.env_name) {
        (Some(wf), _) if !wf.env_name.is_empty() => wf.env_name.clone(),
        (_, Some(env)) if !env.is_empty() => env.to_string(),
        _ => return Err(Error::EnvNotExist(String::new())),
    };
    let env = repository::get_env(svc, ctx, &env_name).await?;

    let components = repository::list_components(svc, ctx, &app.name).await?;
    if components.is_empty() {
        return Err(Error::NoComponent);
    }
    let policies = repository::policies_for_env(svc, ctx, &app.name, &env.name).await?;

    let (deploy_name, namespace) = repository::deploy_identity(svc, ctx, app, &env).await?;
    let mut labels = app.labels.clone();
    labels.insert(keys::ANNOTATION_APP_NAME.into(), app.name.clone());
    labels.insert(keys::LABEL_SOURCE_OF_TRUTH.into(), keys::FROM_UX.into());
    let publish_prefix = workflow.as_ref().map(|w| w.name.as_str()).unwrap_or_default();
    let mut annotations = BTreeMap::from([
        (keys::ANNOTATION_DEPLOY_VERSION.to_string(), opts.version.to_string()),
        (keys::ANNOTATION_PUBLISH_VERSION.to_string(), generate_version(publish_prefix)),
        (keys::ANNOTATION_APP_ALIAS.to_string(), app.alias.clone()),
    ]);
    if let Some(wf) = &workflow {
        annotations.insert(keys::ANNOTATION_WORKFLOW_NAME.into(), wf.name.clone());
    }

    let existing = cp(ctx, "get application", svc.control_plane.get_application(&namespace, &deploy_name)).await?;
    let resource_version = existing.and_then(|e| e.metadata.resource_version);

    let spec = ApplicationSpec {
        components: components.iter().map(to_manifest_component).collect(),
        policies: policies.iter().map(to_manifest_policy).collect(),
        workflow: workflow.as_ref().map(|wf| ManifestWorkflow { steps: wf.steps.iter().map(to_manifest_step).collect() }),
    };
    let mut manifest = Manifest::new(&deploy_name, spec);
    manifest.metadata = ObjectMeta {
        name: Some(deploy_name),
        namespace: Some(namespace),
        labels: Some(labels),
        annotations: Some(annotations),
        resource_version,
        ..Default::default()
    };
    debug!(app=%app.name, env=%env.name, version=%opts.version, "manifest rendered");
    Ok(Rendered { manifest, workflow, env })
}

pub fn to_manifest_component(c: &ApplicationComponent) -> ManifestComponent {
    ManifestComponent {
        name: c.name.clone(),
        component_type: c.component_type.clone(),
        external_revision: c.external_revision.clone(),
        properties: c.properties.clone(),
        depends_on: c.depends_on.clone(),
        inputs: c.inputs.clone(),
        outputs: c.outputs.clone(),
        traits: c.traits.iter().map(|t| ManifestTrait { trait_type: t.trait_type.clone(), properties: t.properties.clone() }).collect(),
    }
}

fn to_manifest_policy(p: &ApplicationPolicy) -> AppPolicy {
    AppPolicy { name: p.name.clone(), policy_type: p.policy_type.clone(), properties: p.properties.clone() }
}

fn to_manifest_step(s: &WorkflowStep) -> ManifestStep {
    ManifestStep {
        name: s.name.clone(),
        step_type: s.step_type.clone(),
        depends_on: s.depends_on.clone(),
        inputs: s.inputs.clone(),
        outputs: s.outputs.clone(),
        properties: s.properties.clone(),
        sub_steps: s
            .sub_steps
            .iter()
            .map(|sub| WorkflowSubStep {
                name: sub.name.clone(),
                step_type: sub.step_type.clone(),
                depends_on: sub.depends_on.clone(),
                inputs: sub.inputs.clone(),
                outputs: sub.outputs.clone(),
                properties: sub.properties.clone(),
            })
            .collect(),
    }
}
