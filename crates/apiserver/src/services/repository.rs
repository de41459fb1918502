//! Typed lookups shared by the services, mapping absent rows onto the error taxonomy.

use crate::{
    context::RequestContext,
    error::{Error, Result},
    models::{
        child_key, Application, ApplicationComponent, ApplicationPolicy, ApplicationRevision, Env, EnvBinding, Target,
        Workflow, WorkflowRecord,
    },
    store::{Entity, Filter, ListOptions, StoreError},
};

use super::Services;

async fn get_or<T: Entity>(svc: &Services, ctx: &RequestContext, key: &str, missing: impl FnOnce() -> Error) -> Result<T> {
    match ctx.run(svc.store.get::<T>(key)).await {
        Err(Error::Store(StoreError::NotFound { .. })) => Err(missing()),
        other => other,
    }
}

pub fn by_app(app: &str) -> Filter { Filter::new().eq("appPrimaryKey", app) }

pub async fn get_application(svc: &Services, ctx: &RequestContext, name: &str) -> Result<Application> {
    get_or(svc, ctx, name, || Error::ApplicationNotExist(name.to_string())).await
}

/// Components of `app`, main component first, then in creation order.
pub async fn list_components(svc: &Services, ctx: &RequestContext, app: &str) -> Result<Vec<ApplicationComponent>> {
    let mut comps: Vec<ApplicationComponent> = ctx.run(svc.store.list(&by_app(app), &ListOptions::oldest_first())).await?;
    comps.sort_by_key(|c| !c.main);
    Ok(comps)
}

pub async fn get_component(svc: &Services, ctx: &RequestContext, app: &str, name: &str) -> Result<ApplicationComponent> {
    get_or(svc, ctx, &child_key(app, name), || Error::ComponentNotExist(name.to_string())).await
}

pub async fn get_policy(svc: &Services, ctx: &RequestContext, app: &str, name: &str) -> Result<ApplicationPolicy> {
    get_or(svc, ctx, &child_key(app, name), || Error::PolicyNotExist(name.to_string())).await
}

pub async fn list_policies(svc: &Services, ctx: &RequestContext, app: &str) -> Result<Vec<ApplicationPolicy>> {
    ctx.run(svc.store.list(&by_app(app), &ListOptions::oldest_first())).await
}

/// Common policies followed by those scoped to `env`.
pub async fn policies_for_env(svc: &Services, ctx: &RequestContext, app: &str, env: &str) -> Result<Vec<ApplicationPolicy>> {
    let opts = ListOptions::oldest_first();
    let mut policies: Vec<ApplicationPolicy> = ctx.run(svc.store.list(&by_app(app).eq("envName", ""), &opts)).await?;
    if !env.is_empty() {
        let scoped: Vec<ApplicationPolicy> = ctx.run(svc.store.list(&by_app(app).eq("envName", env), &opts)).await?;
        policies.extend(scoped);
    }
    Ok(policies)
}

pub async fn get_env(svc: &Services, ctx: &RequestContext, name: &str) -> Result<Env> {
    get_or(svc, ctx, name, || Error::EnvNotExist(name.to_string())).await
}

pub async fn get_target(svc: &Services, ctx: &RequestContext, name: &str) -> Result<Target> {
    get_or(svc, ctx, name, || Error::TargetNotExist(name.to_string())).await
}

pub async fn targets_of(svc: &Services, ctx: &RequestContext, env: &Env) -> Result<Vec<Target>> {
    let mut targets = Vec::with_capacity(env.targets.len());
    for name in &env.targets {
        match ctx.run(svc.store.find::<Target>(name)).await? {
            Some(t) => targets.push(t),
            None => tracing::warn!(env=%env.name, target=%name, "environment references a missing target"),
        }
    }
    Ok(targets)
}

pub async fn get_env_binding(svc: &Services, ctx: &RequestContext, app: &str, env: &str) -> Result<EnvBinding> {
    get_or(svc, ctx, &child_key(app, env), || Error::EnvBindingNotExist(env.to_string())).await
}

pub async fn list_env_bindings(svc: &Services, ctx: &RequestContext, app: &str) -> Result<Vec<EnvBinding>> {
    ctx.run(svc.store.list(&by_app(app), &ListOptions::oldest_first())).await
}

pub async fn get_workflow(svc: &Services, ctx: &RequestContext, app: &str, name: &str) -> Result<Workflow> {
    get_or(svc, ctx, &child_key(app, name), || Error::WorkflowNotExist(name.to_string())).await
}

pub async fn list_workflows(svc: &Services, ctx: &RequestContext, app: &str) -> Result<Vec<Workflow>> {
    ctx.run(svc.store.list(&by_app(app), &ListOptions::oldest_first())).await
}

pub async fn default_workflow(svc: &Services, ctx: &RequestContext, app: &str) -> Result<Workflow> {
    let found: Option<Workflow> = ctx.run(svc.store.first(&by_app(app).eq("default", true))).await?;
    found.ok_or(Error::WorkflowNoDefault)
}

pub async fn get_revision(svc: &Services, ctx: &RequestContext, app: &str, version: &str) -> Result<ApplicationRevision> {
    get_or(svc, ctx, &child_key(app, version), || Error::RevisionNotExist(version.to_string())).await
}

pub async fn get_record(svc: &Services, ctx: &RequestContext, app: &str, name: &str) -> Result<WorkflowRecord> {
    get_or(svc, ctx, &child_key(app, name), || Error::WorkflowRecordNotExist(name.to_string())).await
}

/// Manifest name and namespace of `app` in `env`.
pub async fn deploy_identity(svc: &Services, ctx: &RequestContext, app: &Application, env: &Env) -> Result<(String, String)> {
    let binding = ctx.run(svc.store.find::<EnvBinding>(&child_key(&app.name, &env.name))).await?;
    let name = binding.and_then(|b| b.app_deploy_name).filter(|n| !n.is_empty()).unwrap_or_else(|| app.name.clone());
    Ok((name, env.namespace.clone()))
}
