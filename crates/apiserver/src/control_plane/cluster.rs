use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::{api::core::v1::{Namespace, Secret}, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{
    api::{ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams},
    Api, Client, ResourceExt,
};
use oam_types::Application;
use serde_json::json;
use tracing::{debug, warn};

use super::{ComponentDefinitionInfo, ControlPlane, SYSTEM_NAMESPACE};
use crate::models::ClusterTarget;

const FIELD_MANAGER: &str = "apiserver";
const LOCAL_CLUSTER: &str = "local";
const PROJECT_CONFIG_LABEL: &str = "config.oam.dev/project";

#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self { Self { client } }

    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await.context("kube client init")?))
    }

    pub fn client(&self) -> &Client { &self.client }

    fn apps(&self, namespace: &str) -> Api<Application> { Api::namespaced(self.client.clone(), namespace) }

    fn definitions(&self) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk("core.oam.dev", "v1beta1", "ComponentDefinition");
        let ar = ApiResource::from_gvk_with_plural(&gvk, "componentdefinitions");
        Api::namespaced_with(self.client.clone(), SYSTEM_NAMESPACE, &ar)
    }
}

fn identity(app: &Application) -> Result<(String, String)> {
    let ns = app.namespace().context("application manifest has no namespace")?;
    Ok((ns, app.name_any()))
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get_application(&self, namespace: &str, name: &str) -> Result<Option<Application>> {
        Ok(self.apps(namespace).get_opt(name).await?)
    }

    async fn list_applications(&self, label_selector: &str) -> Result<Vec<Application>> {
        let api: Api<Application> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default().labels(label_selector)).await?.items)
    }

    async fn apply_application(&self, app: &Application) -> Result<Application> {
        let (ns, name) = identity(app)?;
        let mut desired = app.clone();
        desired.metadata.managed_fields = None;
        desired.status = None;
        let params = PatchParams::apply(FIELD_MANAGER).force();
        Ok(self.apps(&ns).patch(&name, &params, &Patch::Apply(&desired)).await?)
    }

    async fn delete_application(&self, namespace: &str, name: &str) -> Result<()> {
        match self.apps(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_application_status(&self, app: &Application) -> Result<()> {
        let (ns, name) = identity(app)?;
        let patch = json!({ "status": app.status });
        self.apps(&ns).patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace { metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() }, ..Default::default() };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn component_definition(&self, component_type: &str) -> Result<Option<ComponentDefinitionInfo>> {
        let Some(def) = self.definitions().get_opt(component_type).await? else { return Ok(None) };
        let terraform = def.data.pointer("/spec/schematic/terraform").is_some();
        Ok(Some(ComponentDefinitionInfo { name: def.name_any(), terraform }))
    }

    async fn sync_configs(&self, project: &str, targets: &[ClusterTarget]) -> Result<()> {
        let source: Api<Secret> = Api::namespaced(self.client.clone(), SYSTEM_NAMESPACE);
        let configs = source.list(&ListParams::default().labels(&format!("{PROJECT_CONFIG_LABEL}={project}"))).await?.items;
        if configs.is_empty() {
            return Ok(());
        }
        for target in targets {
            if target.cluster_name != LOCAL_CLUSTER {
                warn!(cluster=%target.cluster_name, "config sync to remote clusters is handled by the cluster gateway, skipping");
                continue;
            }
            let dest: Api<Secret> = Api::namespaced(self.client.clone(), &target.namespace);
            for cfg in &configs {
                let name = cfg.name_any();
                let copy = Secret {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(target.namespace.clone()),
                        labels: cfg.metadata.labels.clone(),
                        ..Default::default()
                    },
                    data: cfg.data.clone(),
                    string_data: cfg.string_data.clone(),
                    type_: cfg.type_.clone(),
                    ..Default::default()
                };
                dest.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&copy)).await
                    .with_context(|| format!("sync config {name} to {}", target.namespace))?;
                debug!(config=%name, namespace=%target.namespace, "config synced");
            }
        }
        Ok(())
    }

    async fn dry_run(&self, app: &Application) -> Result<Application> {
        let (ns, name) = identity(app)?;
        let mut desired = app.clone();
        desired.metadata.managed_fields = None;
        desired.metadata.resource_version = None;
        desired.status = None;
        let params = PatchParams::apply(FIELD_MANAGER).force().dry_run();
        Ok(self.apps(&ns).patch(&name, &params, &Patch::Apply(&desired)).await?)
    }
}
