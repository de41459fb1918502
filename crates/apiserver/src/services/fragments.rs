//! CRUD over the normalized fragments: applications, components and their traits, policies,
//! environment bindings, environments, targets and webhook triggers.
//!
//! Only the invariants live here (one main component, unique trait types, policy references
//! from workflow steps); the manifest is assembled elsewhere.

use std::collections::BTreeMap;

use chrono::Utc;
use oam_types::{StepInput, StepOutput};
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::{
    context::RequestContext,
    error::{Error, Result},
    models::{
        child_key, parse_properties, Application, ApplicationComponent, ApplicationPolicy, ApplicationRevision,
        ApplicationTrait, ApplicationTrigger, Env, EnvBinding, Target, Workflow, WorkflowRecord, WorkflowStep,
    },
    store::{Entity, ListOptions, StoreError},
    webhook,
};

use super::{cp, repository::{self, by_app}, workflow, Services};

pub const DEFAULT_SCALER_TRAIT: &str = "scaler";
pub const WEBSERVICE: &str = "webservice";
pub const DEPLOY_STEP: &str = "deploy";
pub const TOPOLOGY_POLICY: &str = "topology";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationRequest {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Environments to bind; the first one gets the default workflow.
    #[serde(default)]
    pub env_bindings: Vec<String>,
    /// Main component created together with the application.
    #[serde(default)]
    pub component: Option<CreateComponentRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApplicationRequest {
    pub alias: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateComponentRequest {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub component_type: String,
    /// Raw JSON object.
    #[serde(default)]
    pub properties: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<StepInput>,
    #[serde(default)]
    pub outputs: Vec<StepOutput>,
    #[serde(default)]
    pub traits: Vec<CreateTraitRequest>,
    #[serde(default)]
    pub main: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateComponentRequest {
    pub alias: Option<String>,
    pub description: Option<String>,
    pub properties: Option<String>,
    pub depends_on: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTraitRequest {
    #[serde(rename = "type")]
    pub trait_type: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTraitRequest {
    pub alias: Option<String>,
    pub description: Option<String>,
    pub properties: Option<String>,
}

/// Steps of one workflow that should reference a policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowPolicyBinding {
    /// Workflow name.
    pub name: String,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePolicyRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub policy_type: String,
    #[serde(default)]
    pub properties: String,
    #[serde(default)]
    pub env_name: String,
    #[serde(default)]
    pub workflow_policy_bindings: Vec<WorkflowPolicyBinding>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicyRequest {
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub policy_type: Option<String>,
    pub properties: Option<String>,
    pub env_name: Option<String>,
    pub workflow_policy_bindings: Option<Vec<WorkflowPolicyBinding>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTriggerRequest {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    pub payload_type: String,
    #[serde(default)]
    pub workflow_name: String,
    #[serde(default)]
    pub component_name: String,
}

// ---- applications ----

pub async fn create_application(svc: &Services, ctx: &RequestContext, req: CreateApplicationRequest) -> Result<Application> {
    if ctx.run(svc.store.exists::<Application>(&req.name)).await? {
        return Err(Error::ApplicationExist(req.name));
    }
    let mut app = Application::new(&req.name, &req.project);
    app.alias = req.alias;
    app.description = req.description;
    app.icon = req.icon;
    app.labels = req.labels;
    let envs = {
        let mut envs = Vec::with_capacity(req.env_bindings.len());
        for name in &req.env_bindings {
            envs.push(repository::get_env(svc, ctx, name).await?);
        }
        envs
    };
    match ctx.run(svc.store.add(&app)).await {
        Err(Error::Store(StoreError::AlreadyExists { .. })) => return Err(Error::ApplicationExist(app.name)),
        other => other?,
    }
    if let Some(mut comp) = req.component {
        comp.main = true;
        create_component(svc, ctx, &app.name, comp).await?;
    }
    for (i, env) in envs.iter().enumerate() {
        bind_env(svc, ctx, &app, env, i == 0).await?;
    }
    info!(app=%app.name, envs=envs.len(), "application created");
    Ok(app)
}

pub async fn update_application(svc: &Services, ctx: &RequestContext, name: &str, req: UpdateApplicationRequest) -> Result<Application> {
    let mut app = repository::get_application(svc, ctx, name).await?;
    if let Some(v) = req.alias { app.alias = v; }
    if let Some(v) = req.description { app.description = v; }
    if let Some(v) = req.icon { app.icon = v; }
    if let Some(v) = req.labels { app.labels = v; }
    app.update_time = Utc::now();
    ctx.run(svc.store.put(&app)).await?;
    Ok(app)
}

pub async fn list_applications(svc: &Services, ctx: &RequestContext, project: Option<&str>) -> Result<Vec<Application>> {
    let filter = match project {
        Some(p) => crate::store::Filter::new().eq("project", p),
        None => crate::store::Filter::new(),
    };
    ctx.run(svc.store.list(&filter, &ListOptions::default())).await
}

/// Refuses while the application still runs in any bound environment, then removes every
/// fragment, revision, record, trigger, workflow and binding of the application.
pub async fn delete_application(svc: &Services, ctx: &RequestContext, name: &str) -> Result<()> {
    let app = repository::get_application(svc, ctx, name).await?;
    let bindings = repository::list_env_bindings(svc, ctx, name).await?;
    for binding in &bindings {
        let env = match repository::get_env(svc, ctx, &binding.name).await {
            Ok(env) => env,
            Err(Error::EnvNotExist(_)) => continue,
            Err(e) => return Err(e),
        };
        let (deploy_name, namespace) = repository::deploy_identity(svc, ctx, &app, &env).await?;
        let live = cp(ctx, "get application", svc.control_plane.get_application(&namespace, &deploy_name)).await?;
        if live.is_some() {
            return Err(Error::ApplicationRefusedDelete(env.name));
        }
    }
    delete_all::<ApplicationComponent>(svc, ctx, name).await?;
    delete_all::<ApplicationPolicy>(svc, ctx, name).await?;
    delete_all::<ApplicationRevision>(svc, ctx, name).await?;
    delete_all::<WorkflowRecord>(svc, ctx, name).await?;
    delete_all::<ApplicationTrigger>(svc, ctx, name).await?;
    delete_all::<Workflow>(svc, ctx, name).await?;
    delete_all::<EnvBinding>(svc, ctx, name).await?;
    ctx.run(svc.store.delete::<Application>(name)).await?;
    info!(app=%name, "application deleted");
    Ok(())
}

async fn delete_all<T: Entity>(svc: &Services, ctx: &RequestContext, app: &str) -> Result<()> {
    let rows: Vec<T> = ctx.run(svc.store.list(&by_app(app), &ListOptions::default())).await?;
    for row in rows {
        match ctx.run(svc.store.delete::<T>(&row.primary_key())).await {
            Ok(()) | Err(Error::Store(StoreError::NotFound { .. })) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// ---- environments, targets and bindings ----

pub async fn create_env(svc: &Services, ctx: &RequestContext, env: Env) -> Result<Env> {
    match ctx.run(svc.store.add(&env)).await {
        Err(Error::Store(StoreError::AlreadyExists { .. })) => Err(Error::EnvExist(env.name)),
        other => other.map(|_| env),
    }
}

pub async fn create_target(svc: &Services, ctx: &RequestContext, target: Target) -> Result<Target> {
    match ctx.run(svc.store.add(&target)).await {
        Err(Error::Store(StoreError::AlreadyExists { .. })) => Err(Error::TargetExist(target.name)),
        other => other.map(|_| target),
    }
}

pub async fn create_env_binding(svc: &Services, ctx: &RequestContext, app_name: &str, env_name: &str) -> Result<EnvBinding> {
    let app = repository::get_application(svc, ctx, app_name).await?;
    let env = repository::get_env(svc, ctx, env_name).await?;
    let is_first = repository::list_env_bindings(svc, ctx, app_name).await?.is_empty();
    bind_env(svc, ctx, &app, &env, is_first).await
}

/// Binds `env` and generates its workflow: one deploy step and one topology policy per
/// cluster target of the environment.
async fn bind_env(svc: &Services, ctx: &RequestContext, app: &Application, env: &Env, default: bool) -> Result<EnvBinding> {
    let binding = EnvBinding { app_primary_key: app.name.clone(), name: env.name.clone(), app_deploy_name: None, create_time: Utc::now() };
    ctx.run(svc.store.add(&binding)).await?;
    let now = Utc::now();
    let mut steps = Vec::new();
    for target in repository::targets_of(svc, ctx, env).await? {
        let Some(cluster) = &target.cluster else { continue };
        steps.push(WorkflowStep {
            name: target.name.clone(),
            alias: target.alias.clone(),
            step_type: DEPLOY_STEP.into(),
            properties: Some(json!({ "policies": [target.name] })),
            ..Default::default()
        });
        let policy = ApplicationPolicy {
            app_primary_key: app.name.clone(),
            name: target.name.clone(),
            description: format!("auto generated by the target {}", target.name),
            policy_type: TOPOLOGY_POLICY.into(),
            properties: Some(json!({ "clusters": [cluster.cluster_name], "namespace": cluster.namespace })),
            env_name: env.name.clone(),
            creator: ctx.user.clone(),
            create_time: now,
            update_time: now,
        };
        match ctx.run(svc.store.add(&policy)).await {
            Ok(()) | Err(Error::Store(StoreError::AlreadyExists { .. })) => {}
            Err(e) => return Err(e),
        }
    }
    let wf = Workflow {
        app_primary_key: app.name.clone(),
        name: workflow::env_workflow_name(&env.name),
        alias: format!("{} Workflow", if env.alias.is_empty() { &env.name } else { &env.alias }),
        description: "Created automatically by envbinding.".into(),
        default,
        env_name: env.name.clone(),
        steps,
        create_time: now,
        update_time: now,
    };
    ctx.run(svc.store.add(&wf)).await?;
    Ok(binding)
}

/// Removes the live manifest of `env`, its binding, its generated workflow and the
/// policies scoped to it.
pub async fn delete_env_binding(svc: &Services, ctx: &RequestContext, app_name: &str, env_name: &str) -> Result<()> {
    let app = repository::get_application(svc, ctx, app_name).await?;
    let binding = repository::get_env_binding(svc, ctx, app_name, env_name).await?;
    if let Ok(env) = repository::get_env(svc, ctx, env_name).await {
        let (deploy_name, namespace) = repository::deploy_identity(svc, ctx, &app, &env).await?;
        cp(ctx, "delete application", svc.control_plane.delete_application(&namespace, &deploy_name)).await?;
    }
    let scoped: Vec<ApplicationPolicy> = ctx.run(svc.store.list(&by_app(app_name).eq("envName", env_name), &ListOptions::default())).await?;
    for p in scoped {
        ctx.run(svc.store.delete::<ApplicationPolicy>(&p.primary_key())).await?;
    }
    let wf_key = child_key(app_name, &workflow::env_workflow_name(env_name));
    match ctx.run(svc.store.delete::<Workflow>(&wf_key)).await {
        Ok(()) | Err(Error::Store(StoreError::NotFound { .. })) => {}
        Err(e) => return Err(e),
    }
    ctx.run(svc.store.delete::<EnvBinding>(&binding.primary_key())).await?;
    Ok(())
}

// ---- components and traits ----

fn default_traits(component_type: &str) -> Vec<ApplicationTrait> {
    if component_type != WEBSERVICE {
        return Vec::new();
    }
    let mut scaler = ApplicationTrait::new(DEFAULT_SCALER_TRAIT, Some(json!({ "replicas": 1 })));
    scaler.alias = "Set Replicas".into();
    vec![scaler]
}

fn build_traits(reqs: Vec<CreateTraitRequest>) -> Result<Vec<ApplicationTrait>> {
    let mut traits: Vec<ApplicationTrait> = Vec::with_capacity(reqs.len());
    for req in reqs {
        if traits.iter().any(|t| t.trait_type == req.trait_type) {
            return Err(Error::TraitAlreadyExist(req.trait_type));
        }
        let mut t = ApplicationTrait::new(req.trait_type, parse_properties(&req.properties)?);
        t.alias = req.alias;
        t.description = req.description;
        traits.push(t);
    }
    Ok(traits)
}

pub async fn create_component(svc: &Services, ctx: &RequestContext, app_name: &str, req: CreateComponentRequest) -> Result<ApplicationComponent> {
    repository::get_application(svc, ctx, app_name).await?;
    let def = cp(ctx, "get component definition", svc.control_plane.component_definition(&req.component_type)).await?;
    if def.is_none() {
        return Err(Error::ComponentTypeNotSupported(req.component_type));
    }
    let existing = repository::list_components(svc, ctx, app_name).await?;
    if existing.iter().any(|c| c.name == req.name) {
        return Err(Error::ComponentExist(req.name));
    }
    let has_main = existing.iter().any(|c| c.main);
    if req.main && has_main {
        return Err(Error::MainComponentExist(app_name.to_string()));
    }
    let mut comp = ApplicationComponent::new(app_name, &req.name, &req.component_type);
    comp.alias = req.alias;
    comp.description = req.description;
    comp.main = req.main || !has_main;
    comp.properties = parse_properties(&req.properties)?;
    comp.depends_on = req.depends_on;
    comp.inputs = req.inputs;
    comp.outputs = req.outputs;
    comp.creator = ctx.user.clone();
    comp.traits = build_traits(req.traits)?;
    if comp.traits.is_empty() {
        comp.traits = default_traits(&comp.component_type);
    }
    match ctx.run(svc.store.add(&comp)).await {
        Err(Error::Store(StoreError::AlreadyExists { .. })) => return Err(Error::ComponentExist(comp.name)),
        other => other?,
    }
    Ok(comp)
}

pub async fn update_component(svc: &Services, ctx: &RequestContext, app: &str, name: &str, req: UpdateComponentRequest) -> Result<ApplicationComponent> {
    let mut comp = repository::get_component(svc, ctx, app, name).await?;
    if let Some(v) = req.alias { comp.alias = v; }
    if let Some(v) = req.description { comp.description = v; }
    if let Some(v) = req.properties { comp.properties = parse_properties(&v)?; }
    if let Some(v) = req.depends_on { comp.depends_on = v; }
    comp.update_time = Utc::now();
    ctx.run(svc.store.put(&comp)).await?;
    Ok(comp)
}

pub async fn delete_component(svc: &Services, ctx: &RequestContext, app: &str, name: &str) -> Result<()> {
    let comp = repository::get_component(svc, ctx, app, name).await?;
    if comp.main {
        return Err(Error::ComponentNotAllowDelete);
    }
    ctx.run(svc.store.delete::<ApplicationComponent>(&comp.primary_key())).await?;
    Ok(())
}

pub async fn create_trait(svc: &Services, ctx: &RequestContext, app: &str, component: &str, req: CreateTraitRequest) -> Result<ApplicationTrait> {
    let mut comp = repository::get_component(svc, ctx, app, component).await?;
    if comp.traits.iter().any(|t| t.trait_type == req.trait_type) {
        return Err(Error::TraitAlreadyExist(req.trait_type));
    }
    let mut t = ApplicationTrait::new(req.trait_type, parse_properties(&req.properties)?);
    t.alias = req.alias;
    t.description = req.description;
    comp.traits.push(t.clone());
    comp.update_time = Utc::now();
    ctx.run(svc.store.put(&comp)).await?;
    Ok(t)
}

pub async fn update_trait(svc: &Services, ctx: &RequestContext, app: &str, component: &str, trait_type: &str, req: UpdateTraitRequest) -> Result<ApplicationTrait> {
    let mut comp = repository::get_component(svc, ctx, app, component).await?;
    let properties = req.properties.as_deref().map(parse_properties).transpose()?;
    let t = comp
        .traits
        .iter_mut()
        .find(|t| t.trait_type == trait_type)
        .ok_or_else(|| Error::TraitNotExist(trait_type.to_string()))?;
    if let Some(v) = req.alias { t.alias = v; }
    if let Some(v) = req.description { t.description = v; }
    if let Some(v) = properties { t.properties = v; }
    t.update_time = Utc::now();
    let updated = t.clone();
    ctx.run(svc.store.put(&comp)).await?;
    Ok(updated)
}

pub async fn delete_trait(svc: &Services, ctx: &RequestContext, app: &str, component: &str, trait_type: &str) -> Result<()> {
    let mut comp = repository::get_component(svc, ctx, app, component).await?;
    let before = comp.traits.len();
    comp.traits.retain(|t| t.trait_type != trait_type);
    if comp.traits.len() == before {
        return Err(Error::TraitNotExist(trait_type.to_string()));
    }
    ctx.run(svc.store.put(&comp)).await?;
    Ok(())
}

// ---- policies ----

pub async fn create_policy(svc: &Services, ctx: &RequestContext, app: &str, req: CreatePolicyRequest) -> Result<ApplicationPolicy> {
    repository::get_application(svc, ctx, app).await?;
    let now = Utc::now();
    let policy = ApplicationPolicy {
        app_primary_key: app.to_string(),
        name: req.name,
        description: req.description,
        policy_type: req.policy_type,
        properties: parse_properties(&req.properties)?,
        env_name: req.env_name,
        creator: ctx.user.clone(),
        create_time: now,
        update_time: now,
    };
    match ctx.run(svc.store.add(&policy)).await {
        Err(Error::Store(StoreError::AlreadyExists { .. })) => return Err(Error::PolicyExist(policy.name)),
        other => other?,
    }
    if !req.workflow_policy_bindings.is_empty() {
        bind_policy_to_steps(svc, ctx, app, &policy.name, &req.workflow_policy_bindings).await?;
    }
    Ok(policy)
}

pub async fn update_policy(svc: &Services, ctx: &RequestContext, app: &str, name: &str, req: UpdatePolicyRequest) -> Result<ApplicationPolicy> {
    let mut policy = repository::get_policy(svc, ctx, app, name).await?;
    if let Some(v) = req.description { policy.description = v; }
    if let Some(v) = req.policy_type { policy.policy_type = v; }
    if let Some(v) = req.properties { policy.properties = parse_properties(&v)?; }
    if let Some(v) = req.env_name { policy.env_name = v; }
    policy.update_time = Utc::now();
    ctx.run(svc.store.put(&policy)).await?;
    if let Some(bindings) = req.workflow_policy_bindings {
        bind_policy_to_steps(svc, ctx, app, name, &bindings).await?;
    }
    Ok(policy)
}

pub async fn delete_policy(svc: &Services, ctx: &RequestContext, app: &str, name: &str) -> Result<()> {
    let policy = repository::get_policy(svc, ctx, app, name).await?;
    if let Some(workflow) = workflow_using_policy(svc, ctx, app, name).await? {
        return Err(Error::PolicyIsBeingUsed { policy: name.to_string(), workflow });
    }
    ctx.run(svc.store.delete::<ApplicationPolicy>(&policy.primary_key())).await?;
    Ok(())
}

/// The `policies` list embedded in a step's properties.
pub fn step_policies(properties: &Option<Value>) -> Vec<String> {
    properties
        .as_ref()
        .and_then(|p| p.get("policies"))
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

async fn workflow_using_policy(svc: &Services, ctx: &RequestContext, app: &str, policy: &str) -> Result<Option<String>> {
    for wf in repository::list_workflows(svc, ctx, app).await? {
        let used = wf.steps.iter().any(|s| {
            step_policies(&s.properties).iter().any(|p| p == policy)
                || s.sub_steps.iter().any(|sub| step_policies(&sub.properties).iter().any(|p| p == policy))
        });
        if used {
            return Ok(Some(wf.name));
        }
    }
    Ok(None)
}

/// Make `policy` appear exactly in the bound steps' `policies` lists across all workflows of `app`.
async fn bind_policy_to_steps(svc: &Services, ctx: &RequestContext, app: &str, policy: &str, bindings: &[WorkflowPolicyBinding]) -> Result<()> {
    for mut wf in repository::list_workflows(svc, ctx, app).await? {
        let mut changed = false;
        for step in wf.steps.iter_mut() {
            let wanted = bindings.iter().any(|b| b.name == wf.name && b.steps.iter().any(|s| s == &step.name));
            let mut policies = step_policies(&step.properties);
            let present = policies.iter().any(|p| p == policy);
            if wanted == present {
                continue;
            }
            if wanted {
                policies.push(policy.to_string());
            } else {
                policies.retain(|p| p != policy);
            }
            let mut props = match step.properties.take() {
                Some(Value::Object(m)) => m,
                _ => Map::new(),
            };
            props.insert("policies".into(), json!(policies));
            step.properties = Some(Value::Object(props));
            changed = true;
        }
        if changed {
            wf.update_time = Utc::now();
            ctx.run(svc.store.put(&wf)).await?;
        }
    }
    Ok(())
}

// ---- triggers ----

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

pub async fn create_trigger(svc: &Services, ctx: &RequestContext, app: &str, req: CreateTriggerRequest) -> Result<ApplicationTrigger> {
    repository::get_application(svc, ctx, app).await?;
    if !webhook::is_supported(&req.payload_type) {
        return Err(Error::UnsupportedWebhookPayload(req.payload_type));
    }
    let existing = list_triggers(svc, ctx, app).await?;
    if existing.iter().any(|t| t.name == req.name) {
        return Err(Error::TriggerExist(req.name));
    }
    let workflow_name = if req.workflow_name.is_empty() {
        repository::default_workflow(svc, ctx, app).await?.name
    } else {
        req.workflow_name
    };
    let trigger = ApplicationTrigger {
        app_primary_key: app.to_string(),
        name: req.name,
        alias: req.alias,
        description: req.description,
        payload_type: req.payload_type,
        workflow_name,
        component_name: req.component_name,
        token: generate_token(),
        create_time: Utc::now(),
    };
    ctx.run(svc.store.add(&trigger)).await?;
    Ok(trigger)
}

pub async fn list_triggers(svc: &Services, ctx: &RequestContext, app: &str) -> Result<Vec<ApplicationTrigger>> {
    ctx.run(svc.store.list(&by_app(app), &ListOptions::default())).await
}

pub async fn get_trigger(svc: &Services, ctx: &RequestContext, token: &str) -> Result<ApplicationTrigger> {
    match ctx.run(svc.store.get::<ApplicationTrigger>(token)).await {
        Err(Error::Store(StoreError::NotFound { .. })) => Err(Error::TriggerNotExist(token.to_string())),
        other => other,
    }
}

pub async fn delete_trigger(svc: &Services, ctx: &RequestContext, app: &str, token: &str) -> Result<()> {
    let trigger = get_trigger(svc, ctx, token).await?;
    if trigger.app_primary_key != app {
        warn!(app=%app, "trigger token belongs to another application");
        return Err(Error::TriggerNotExist(token.to_string()));
    }
    ctx.run(svc.store.delete::<ApplicationTrigger>(token)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_lowercase_alphanumeric() {
        let t = generate_token();
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn step_policies_reads_embedded_list() {
        assert_eq!(step_policies(&Some(json!({"policies": ["a", "b"]}))), ["a", "b"]);
        assert!(step_policies(&Some(json!({"other": 1}))).is_empty());
        assert!(step_policies(&None).is_empty());
    }

    #[test]
    fn duplicate_trait_types_rejected() {
        let reqs = vec![
            CreateTraitRequest { trait_type: "scaler".into(), ..Default::default() },
            CreateTraitRequest { trait_type: "scaler".into(), ..Default::default() },
        ];
        assert!(matches!(build_traits(reqs), Err(Error::TraitAlreadyExist(t)) if t == "scaler"));
    }
}
