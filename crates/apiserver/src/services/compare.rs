//! Structural comparison and dry-run previews. Reads only; nothing here writes to the store
//! or applies to the control plane.

use oam_types::{keys, Application as Manifest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use utoipa::ToSchema;

use crate::{
    context::RequestContext,
    error::{Error, ErrorKind, Result},
    models::{Application, ApplicationRevision},
};

use super::{
    cp,
    render::{render_manifest, RenderOptions, WorkflowPolicy},
    repository, revision, Services,
};

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvRef {
    pub env: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRef {
    /// Revision version; empty means the newest revision.
    #[serde(default)]
    pub revision: String,
}

/// Exactly one of the three modes is expected; the first one set wins.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompareRequest {
    pub compare_latest_with_running: Option<EnvRef>,
    pub compare_revision_with_running: Option<RevisionRef>,
    pub compare_revision_with_latest: Option<RevisionRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    /// Dotted path; list entries carrying a `name` are addressed as `[name]`.
    pub path: String,
    pub kind: DiffKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub base: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub target: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompareResponse {
    pub is_diff: bool,
    pub diffs: Vec<DiffEntry>,
    pub diff_report: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub base_app_yaml: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target_app_yaml: String,
}

const DROPPED_METADATA: [&str; 6] = ["resourceVersion", "managedFields", "uid", "generation", "creationTimestamp", "selfLink"];
const DROPPED_ANNOTATIONS: [&str; 3] = [keys::ANNOTATION_DEPLOY_VERSION, keys::ANNOTATION_PUBLISH_VERSION, keys::ANNOTATION_LAST_APPLIED];

fn sort_by_name(list: Option<&mut Value>) {
    if let Some(Value::Array(items)) = list {
        items.sort_by(|a, b| {
            let name = |v: &Value| v.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            name(a).cmp(&name(b))
        });
    }
}

/// The comparable shape of a manifest: identity, labels, remaining annotations, components
/// and policies sorted by name. Status and the workflow are not part of the shape.
pub fn normalize(manifest: &Manifest) -> Result<Value> {
    let mut v = serde_json::to_value(manifest).map_err(|e| Error::Manifest(e.to_string()))?;
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    if let Some(meta) = v.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in DROPPED_METADATA {
            meta.remove(field);
        }
        if let Some(ann) = meta.get_mut("annotations").and_then(Value::as_object_mut) {
            for key in DROPPED_ANNOTATIONS {
                ann.remove(key);
            }
            if ann.is_empty() {
                meta.remove("annotations");
            }
        }
    }
    if let Some(spec) = v.get_mut("spec").and_then(Value::as_object_mut) {
        spec.remove("workflow");
        sort_by_name(spec.get_mut("components"));
        sort_by_name(spec.get_mut("policies"));
    }
    Ok(v)
}

fn named(items: &[Value]) -> Option<Vec<(&str, &Value)>> {
    items.iter().map(|v| v.get("name").and_then(Value::as_str).map(|n| (n, v))).collect()
}

fn join(path: &str, seg: &str) -> String {
    if path.is_empty() { seg.to_string() } else { format!("{path}.{seg}") }
}

fn diff_values(path: &str, base: &Value, target: &Value, out: &mut Vec<DiffEntry>) {
    match (base, target) {
        (Value::Object(a), Value::Object(b)) => diff_maps(path, a, b, out),
        (Value::Array(a), Value::Array(b)) => match (named(a), named(b)) {
            (Some(na), Some(nb)) => {
                let a: Map<String, Value> = na.into_iter().map(|(n, v)| (n.to_string(), v.clone())).collect();
                let b: Map<String, Value> = nb.into_iter().map(|(n, v)| (n.to_string(), v.clone())).collect();
                for name in a.keys().chain(b.keys().filter(|k| !a.contains_key(*k))) {
                    let p = format!("{path}[{name}]");
                    entry(&p, a.get(name), b.get(name), out);
                }
            }
            _ => {
                for i in 0..a.len().max(b.len()) {
                    entry(&format!("{path}[{i}]"), a.get(i), b.get(i), out);
                }
            }
        },
        (a, b) if a != b => out.push(DiffEntry { path: path.to_string(), kind: DiffKind::Changed, base: Some(a.clone()), target: Some(b.clone()) }),
        _ => {}
    }
}

fn entry(path: &str, base: Option<&Value>, target: Option<&Value>, out: &mut Vec<DiffEntry>) {
    match (base, target) {
        (Some(a), Some(b)) => diff_values(path, a, b, out),
        (Some(a), None) => out.push(DiffEntry { path: path.to_string(), kind: DiffKind::Removed, base: Some(a.clone()), target: None }),
        (None, Some(b)) => out.push(DiffEntry { path: path.to_string(), kind: DiffKind::Added, base: None, target: Some(b.clone()) }),
        (None, None) => {}
    }
}

fn diff_maps(path: &str, a: &Map<String, Value>, b: &Map<String, Value>, out: &mut Vec<DiffEntry>) {
    for key in a.keys().chain(b.keys().filter(|k| !a.contains_key(*k))) {
        entry(&join(path, key), a.get(key), b.get(key), out);
    }
}

/// Differences from `base` to `target` after normalization.
pub fn diff_manifests(base: &Manifest, target: &Manifest) -> Result<Vec<DiffEntry>> {
    let mut out = Vec::new();
    diff_values("", &normalize(base)?, &normalize(target)?, &mut out);
    Ok(out)
}

pub fn render_report(diffs: &[DiffEntry]) -> String {
    let show = |v: &Option<Value>| v.as_ref().map(Value::to_string).unwrap_or_default();
    diffs
        .iter()
        .map(|d| match d.kind {
            DiffKind::Added => format!("+ {}: {}\n", d.path, show(&d.target)),
            DiffKind::Removed => format!("- {}: {}\n", d.path, show(&d.base)),
            DiffKind::Changed => format!("~ {}: {} => {}\n", d.path, show(&d.base), show(&d.target)),
        })
        .collect()
}

fn to_yaml(manifest: &Manifest) -> Result<String> {
    serde_yaml::to_string(manifest).map_err(|e| Error::Manifest(e.to_string()))
}

/// Absent sides come back as `None`; every other failure propagates.
fn optional(res: Result<Manifest>) -> Result<Option<Manifest>> {
    match res {
        Ok(m) => Ok(Some(m)),
        Err(e) if e.kind() == ErrorKind::NotExist => Ok(None),
        Err(e) => Err(e),
    }
}

async fn render_latest(svc: &Services, ctx: &RequestContext, app: &Application, env: &str, workflow: Option<&str>) -> Result<Manifest> {
    let opts = RenderOptions { workflow_name: workflow, env_name: Some(env), version: "", policy: WorkflowPolicy::Tolerate };
    Ok(render_manifest(svc, ctx, app, opts).await?.manifest)
}

async fn running(svc: &Services, ctx: &RequestContext, app: &Application, env: &str) -> Result<Manifest> {
    let env = repository::get_env(svc, ctx, env).await?;
    let (name, namespace) = repository::deploy_identity(svc, ctx, app, &env).await?;
    cp(ctx, "get application", svc.control_plane.get_application(&namespace, &name))
        .await?
        .ok_or_else(|| Error::ApplicationNotExist(name))
}

async fn stored(svc: &Services, ctx: &RequestContext, app: &str, version: &str) -> Result<(Manifest, ApplicationRevision)> {
    revision::manifest_from_revision(svc, ctx, app, version).await
}

pub async fn compare_app(svc: &Services, ctx: &RequestContext, app_name: &str, req: &CompareRequest) -> Result<CompareResponse> {
    let app = repository::get_application(svc, ctx, app_name).await?;
    let (base, target) = if let Some(r) = &req.compare_latest_with_running {
        (optional(render_latest(svc, ctx, &app, &r.env, None).await)?, optional(running(svc, ctx, &app, &r.env).await)?)
    } else if let Some(r) = &req.compare_revision_with_running {
        match stored(svc, ctx, app_name, &r.revision).await {
            Ok((m, rev)) => (Some(m), optional(running(svc, ctx, &app, &rev.env_name).await)?),
            Err(e) if e.kind() == ErrorKind::NotExist => (None, None),
            Err(e) => return Err(e),
        }
    } else if let Some(r) = &req.compare_revision_with_latest {
        match stored(svc, ctx, app_name, &r.revision).await {
            Ok((m, rev)) => {
                let latest = render_latest(svc, ctx, &app, &rev.env_name, Some(rev.workflow_name.as_str()).filter(|w| !w.is_empty())).await;
                (Some(m), optional(latest)?)
            }
            Err(e) if e.kind() == ErrorKind::NotExist => (None, None),
            Err(e) => return Err(e),
        }
    } else {
        return Err(Error::InvalidProperties("no comparison mode given".into()));
    };

    match (base, target) {
        (Some(base), Some(target)) => {
            let diffs = diff_manifests(&base, &target)?;
            Ok(CompareResponse {
                is_diff: !diffs.is_empty(),
                diff_report: render_report(&diffs),
                diffs,
                base_app_yaml: to_yaml(&base)?,
                target_app_yaml: to_yaml(&target)?,
            })
        }
        (base, target) => Ok(CompareResponse {
            base_app_yaml: base.as_ref().map(to_yaml).transpose()?.unwrap_or_default(),
            target_app_yaml: target.as_ref().map(to_yaml).transpose()?.unwrap_or_default(),
            ..Default::default()
        }),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
pub enum DryRunSource {
    #[default]
    #[serde(rename = "APP")]
    App,
    #[serde(rename = "REVISION")]
    Revision,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DryRunRequest {
    #[serde(default)]
    pub dry_run_type: DryRunSource,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub workflow: String,
    /// Revision version for `REVISION`; empty means the newest revision.
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DryRunResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub yaml: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Expands the manifest through the control plane without persisting it. Evaluation
/// failures are reported in the response, not as errors.
pub async fn dry_run_app_or_revision(svc: &Services, ctx: &RequestContext, app_name: &str, req: &DryRunRequest) -> Result<DryRunResponse> {
    let app = repository::get_application(svc, ctx, app_name).await?;
    let manifest = match req.dry_run_type {
        DryRunSource::App => {
            let workflow = Some(req.workflow.as_str()).filter(|w| !w.is_empty());
            render_latest(svc, ctx, &app, &req.env, workflow).await?
        }
        DryRunSource::Revision => stored(svc, ctx, app_name, &req.version).await?.0,
    };
    let expanded = match ctx.run(async { svc.control_plane.dry_run(&manifest).await.map_err(|e| Error::control_plane("dry run", e)) }).await {
        Ok(m) => m,
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => {
            warn!(app=%app_name, error=%e, "dry run failed");
            return Ok(DryRunResponse { success: false, message: e.to_string(), ..Default::default() });
        }
    };
    let name = expanded.metadata.name.clone().unwrap_or_default();
    let yaml = format!("---\n# Application({name}) \n---\n\n{}", to_yaml(&expanded)?);
    Ok(DryRunResponse { success: true, yaml, message: String::new() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use oam_types::{AppPolicy, ApplicationComponent, ApplicationSpec};
    use proptest::prelude::*;
    use serde_json::json;

    fn comp(name: &str, image: &str) -> ApplicationComponent {
        ApplicationComponent { name: name.into(), component_type: "webservice".into(), properties: Some(json!({"image": image})), ..Default::default() }
    }

    fn manifest(components: Vec<ApplicationComponent>, policies: Vec<AppPolicy>) -> Manifest {
        let mut m = Manifest::new("demo", ApplicationSpec { components, policies, workflow: None });
        m.metadata.namespace = Some("default".into());
        m
    }

    #[test]
    fn incidental_fields_are_ignored() {
        let a = manifest(vec![comp("c1", "nginx")], vec![]);
        let mut b = a.clone();
        b.metadata.resource_version = Some("42".into());
        b.set_annotation(keys::ANNOTATION_PUBLISH_VERSION, "workflow-dev-1");
        b.set_annotation(keys::ANNOTATION_DEPLOY_VERSION, "1");
        b.spec.workflow = Some(Default::default());
        assert!(diff_manifests(&a, &b).unwrap().is_empty());
    }

    #[test]
    fn property_change_is_reported_by_component_name() {
        let a = manifest(vec![comp("c1", "nginx"), comp("c2", "redis")], vec![]);
        let b = manifest(vec![comp("c1", "nginx:2"), comp("c3", "redis")], vec![]);
        let diffs = diff_manifests(&a, &b).unwrap();
        let paths: Vec<_> = diffs.iter().map(|d| (d.path.as_str(), d.kind)).collect();
        assert_eq!(
            paths,
            [
                ("spec.components[c1].properties.image", DiffKind::Changed),
                ("spec.components[c2]", DiffKind::Removed),
                ("spec.components[c3]", DiffKind::Added),
            ]
        );
        let report = render_report(&diffs);
        assert!(report.contains("~ spec.components[c1].properties.image: \"nginx\" => \"nginx:2\""));
    }

    proptest! {
        #[test]
        fn order_does_not_matter(order in Just((0..6).collect::<Vec<usize>>()).prop_shuffle()) {
            let comps: Vec<_> = (0..6).map(|i| comp(&format!("c{i}"), &format!("img{i}"))).collect();
            let pols: Vec<_> = (0..6).map(|i| AppPolicy { name: format!("p{i}"), policy_type: "topology".into(), properties: None }).collect();
            let a = manifest(comps.clone(), pols.clone());
            let b = manifest(order.iter().map(|&i| comps[i].clone()).collect(), order.iter().rev().map(|&i| pols[i].clone()).collect());
            prop_assert!(diff_manifests(&a, &b).unwrap().is_empty());
        }
    }
}
