//! Rewrites the stored component fragments to match a manifest, the inverse of rendering.

use chrono::Utc;
use oam_types::{Application as Manifest, ApplicationComponent as ManifestComponent};
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    context::RequestContext,
    error::{Error, Result},
    models::{child_key, ApplicationComponent, ApplicationTrait},
    store::StoreError,
};

use super::{repository, revision, three_way_compare, Services};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub is_reset: bool,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

/// Fragment form of a manifest component. Display fields and the main flag come from the
/// stored fragment when there is one.
fn from_manifest(app: &str, mc: &ManifestComponent, existing: Option<&ApplicationComponent>) -> ApplicationComponent {
    let now = Utc::now();
    let mut comp = match existing {
        Some(e) => e.clone(),
        None => ApplicationComponent::new(app, &mc.name, &mc.component_type),
    };
    comp.component_type = mc.component_type.clone();
    comp.properties = mc.properties.clone();
    comp.depends_on = mc.depends_on.clone();
    comp.inputs = mc.inputs.clone();
    comp.outputs = mc.outputs.clone();
    comp.external_revision = mc.external_revision.clone();
    comp.traits = mc
        .traits
        .iter()
        .map(|t| {
            let mut tr = existing
                .and_then(|e| e.traits.iter().find(|old| old.trait_type == t.trait_type))
                .cloned()
                .unwrap_or_else(|| ApplicationTrait::new(&t.trait_type, None));
            tr.properties = t.properties.clone();
            tr
        })
        .collect();
    if existing.map_or(true, |e| *e != comp) {
        comp.update_time = now;
    }
    comp
}

pub async fn reset_app(svc: &Services, ctx: &RequestContext, app_name: &str, target: &Manifest) -> Result<ResetResponse> {
    let current = repository::list_components(svc, ctx, app_name).await?;
    let partition = three_way_compare(
        current.iter().map(|c| c.name.as_str()),
        target.spec.components.iter().map(|c| c.name.as_str()),
    );

    for name in &partition.delete {
        match ctx.run(svc.store.delete::<ApplicationComponent>(&child_key(app_name, name))).await {
            Ok(()) | Err(Error::Store(StoreError::NotFound { .. })) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => warn!(app=%app_name, component=%name, error=%e, "failed to delete component during reset"),
        }
    }

    let survivors_have_main = current.iter().any(|c| c.main && partition.both.contains(&c.name));
    let mut promoted = survivors_have_main;
    let mut updated = Vec::new();
    for mc in &target.spec.components {
        let existing = current.iter().find(|c| c.name == mc.name);
        let mut comp = from_manifest(app_name, mc, existing);
        if !promoted {
            comp.main = true;
            promoted = true;
        }
        if existing.is_some_and(|e| *e == comp) {
            continue;
        }
        match ctx.run(svc.store.add(&comp)).await {
            Err(Error::Store(StoreError::AlreadyExists { .. })) => ctx.run(svc.store.put(&comp)).await?,
            other => other?,
        }
        if existing.is_some() {
            updated.push(comp.name.clone());
        }
    }
    info!(app=%app_name, added=partition.add.len(), updated=updated.len(), deleted=partition.delete.len(), "components reset");
    Ok(ResetResponse { is_reset: true, added: partition.add, updated, deleted: partition.delete })
}

/// Reset the components to the snapshot of the newest revision.
pub async fn reset_app_to_latest_revision(svc: &Services, ctx: &RequestContext, app_name: &str) -> Result<ResetResponse> {
    repository::get_application(svc, ctx, app_name).await?;
    let (target, rev) = revision::manifest_from_revision(svc, ctx, app_name, "").await?;
    info!(app=%app_name, version=%rev.version, "resetting to revision");
    reset_app(svc, ctx, app_name, &target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use oam_types::ApplicationTrait as ManifestTrait;
    use serde_json::json;

    #[test]
    fn existing_display_fields_survive() {
        let mut stored = ApplicationComponent::new("demo", "c1", "webservice");
        stored.alias = "Frontend".into();
        stored.main = true;
        let mut scaler = ApplicationTrait::new("scaler", Some(json!({"replicas": 1})));
        scaler.alias = "Set Replicas".into();
        stored.traits = vec![scaler];

        let mc = ManifestComponent {
            name: "c1".into(),
            component_type: "webservice".into(),
            properties: Some(json!({"image": "nginx"})),
            traits: vec![ManifestTrait { trait_type: "scaler".into(), properties: Some(json!({"replicas": 3})) }],
            ..Default::default()
        };
        let comp = from_manifest("demo", &mc, Some(&stored));
        assert!(comp.main);
        assert_eq!(comp.alias, "Frontend");
        assert_eq!(comp.traits[0].alias, "Set Replicas");
        assert_eq!(comp.traits[0].properties, Some(json!({"replicas": 3})));
        assert_eq!(comp.properties, Some(json!({"image": "nginx"})));
    }

    #[test]
    fn unchanged_fragment_converts_to_itself() {
        let mut stored = ApplicationComponent::new("demo", "c1", "worker");
        stored.properties = Some(json!({"cmd": ["run"]}));
        let mc = crate::services::render::to_manifest_component(&stored);
        assert_eq!(from_manifest("demo", &mc, Some(&stored)), stored);
    }
}
