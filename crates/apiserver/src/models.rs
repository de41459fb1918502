//! Normalized records kept in the fragment store.
//!
//! Child records are keyed `<app>/<name>`; top-level records (applications, envs, targets) by
//! name; triggers by token. Field names serialize camelCase and store filters use those names.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use oam_types::{StepInput, StepOutput, StepPhase, WorkflowRunPhase};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::{error::Error, store::Entity};

pub type Properties = Option<Value>;

/// Parse an opaque properties document. Empty input means "no properties".
pub fn parse_properties(raw: &str) -> Result<Properties, Error> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => Ok(Some(v)),
        Ok(other) => Err(Error::InvalidProperties(format!("expected a JSON object, got {other}"))),
        Err(e) => Err(Error::InvalidProperties(e.to_string())),
    }
}

pub fn child_key(app: &str, name: &str) -> String { format!("{app}/{name}") }

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Application {
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
    /// Set when the application was imported from a resource already running in the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_from: Option<ImportedFrom>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportedFrom {
    pub namespace: String,
    pub name: String,
}

impl Application {
    pub fn new(name: impl Into<String>, project: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            alias: String::new(),
            description: String::new(),
            icon: String::new(),
            project: project.into(),
            labels: BTreeMap::new(),
            imported_from: None,
            create_time: now,
            update_time: now,
        }
    }

    pub fn is_synced(&self) -> bool { self.imported_from.is_some() }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationComponent {
    pub app_primary_key: String,
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub main: bool,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<StepInput>,
    #[serde(default)]
    pub outputs: Vec<StepOutput>,
    #[serde(default)]
    pub traits: Vec<ApplicationTrait>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_revision: Option<String>,
    #[serde(default)]
    pub creator: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl ApplicationComponent {
    pub fn new(app: &str, name: impl Into<String>, component_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            app_primary_key: app.to_string(),
            name: name.into(),
            alias: String::new(),
            description: String::new(),
            component_type: component_type.into(),
            main: false,
            properties: None,
            depends_on: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            traits: Vec::new(),
            external_revision: None,
            creator: String::new(),
            create_time: now,
            update_time: now,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationTrait {
    #[serde(rename = "type")]
    pub trait_type: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: Properties,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl ApplicationTrait {
    pub fn new(trait_type: impl Into<String>, properties: Properties) -> Self {
        let now = Utc::now();
        Self { trait_type: trait_type.into(), alias: String::new(), description: String::new(), properties, create_time: now, update_time: now }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationPolicy {
    pub app_primary_key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub policy_type: String,
    #[serde(default)]
    pub properties: Properties,
    /// Empty means the policy applies to every environment.
    #[serde(default)]
    pub env_name: String,
    #[serde(default)]
    pub creator: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub app_primary_key: String,
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub env_name: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<StepInput>,
    #[serde(default)]
    pub outputs: Vec<StepOutput>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub sub_steps: Vec<WorkflowStep>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    pub app_primary_key: String,
    pub workflow_name: String,
    #[serde(default)]
    pub workflow_alias: String,
    /// Publish version of the run.
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Version of the revision the run belongs to.
    pub revision_primary_key: String,
    #[serde(default)]
    #[schema(value_type = String)]
    pub status: WorkflowRunPhase,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub steps: Vec<RecordStepStatus>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordStepStatus {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(rename = "type", default)]
    pub step_type: String,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub phase: Option<StepPhase>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub first_execute_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_execute_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sub_steps_status: Vec<RecordStepStatus>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, ToSchema)]
pub enum RevisionStatus {
    #[serde(rename = "init")]
    Init,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "failure")]
    Fail,
    #[serde(rename = "terminated")]
    Terminated,
    #[serde(rename = "rollback")]
    Rollback,
}

impl RevisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Fail => "failure",
            Self::Terminated => "terminated",
            Self::Rollback => "rollback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [Self::Init, Self::Running, Self::Complete, Self::Fail, Self::Terminated, Self::Rollback]
            .into_iter()
            .find(|st| st.as_str() == s)
    }
}

impl std::fmt::Display for RevisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRevision {
    pub app_primary_key: String,
    pub version: String,
    /// The rendered manifest, serialized as JSON.
    pub apply_app_config: String,
    pub status: RevisionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub deploy_user: String,
    #[serde(default)]
    pub note: String,
    /// `api`, `webhook` or `rollback`.
    #[serde(default)]
    pub trigger_type: String,
    #[serde(default)]
    pub workflow_name: String,
    #[serde(default)]
    pub env_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_info: Option<CodeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_info: Option<ImageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_version: Option<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CodeInfo {
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub user: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    /// Registry flavour that reported the image (`acr`, `dockerhub`, `harbor`, `jfrog`).
    #[serde(rename = "type", default)]
    pub registry_type: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvBinding {
    pub app_primary_key: String,
    /// Environment name.
    pub name: String,
    /// Manifest name in the cluster when it differs from the application name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_deploy_name: Option<String>,
    pub create_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Env {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    pub namespace: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub targets: Vec<String>,
    pub create_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterTarget>,
    pub create_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTarget {
    pub cluster_name: String,
    pub namespace: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationTrigger {
    pub app_primary_key: String,
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    /// Webhook payload flavour, see [`crate::webhook`].
    pub payload_type: String,
    #[serde(default)]
    pub workflow_name: String,
    #[serde(default)]
    pub component_name: String,
    pub token: String,
    pub create_time: DateTime<Utc>,
}

impl Entity for Application {
    const KIND: &'static str = "application";
    fn primary_key(&self) -> String { self.name.clone() }
    fn create_time(&self) -> DateTime<Utc> { self.create_time }
}

impl Entity for ApplicationComponent {
    const KIND: &'static str = "application_component";
    fn primary_key(&self) -> String { child_key(&self.app_primary_key, &self.name) }
    fn create_time(&self) -> DateTime<Utc> { self.create_time }
}

impl Entity for ApplicationPolicy {
    const KIND: &'static str = "application_policy";
    fn primary_key(&self) -> String { child_key(&self.app_primary_key, &self.name) }
    fn create_time(&self) -> DateTime<Utc> { self.create_time }
}

impl Entity for Workflow {
    const KIND: &'static str = "workflow";
    fn primary_key(&self) -> String { child_key(&self.app_primary_key, &self.name) }
    fn create_time(&self) -> DateTime<Utc> { self.create_time }
}

impl Entity for WorkflowRecord {
    const KIND: &'static str = "workflow_record";
    fn primary_key(&self) -> String { child_key(&self.app_primary_key, &self.name) }
    fn create_time(&self) -> DateTime<Utc> { self.create_time }
}

impl Entity for ApplicationRevision {
    const KIND: &'static str = "application_revision";
    fn primary_key(&self) -> String { child_key(&self.app_primary_key, &self.version) }
    fn create_time(&self) -> DateTime<Utc> { self.create_time }
}

impl Entity for EnvBinding {
    const KIND: &'static str = "env_binding";
    fn primary_key(&self) -> String { child_key(&self.app_primary_key, &self.name) }
    fn create_time(&self) -> DateTime<Utc> { self.create_time }
}

impl Entity for Env {
    const KIND: &'static str = "env";
    fn primary_key(&self) -> String { self.name.clone() }
    fn create_time(&self) -> DateTime<Utc> { self.create_time }
}

impl Entity for Target {
    const KIND: &'static str = "target";
    fn primary_key(&self) -> String { self.name.clone() }
    fn create_time(&self) -> DateTime<Utc> { self.create_time }
}

impl Entity for ApplicationTrigger {
    const KIND: &'static str = "application_trigger";
    fn primary_key(&self) -> String { self.token.clone() }
    fn create_time(&self) -> DateTime<Utc> { self.create_time }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn properties_must_be_objects() {
        assert_eq!(parse_properties("").unwrap(), None);
        assert_eq!(parse_properties(r#"{"image":"nginx"}"#).unwrap(), Some(json!({"image": "nginx"})));
        assert!(matches!(parse_properties("[1,2]"), Err(Error::InvalidProperties(_))));
        assert!(matches!(parse_properties("{oops"), Err(Error::InvalidProperties(_))));
    }

    #[test]
    fn revision_status_wire_names() {
        assert_eq!(serde_json::to_value(RevisionStatus::Fail).unwrap(), json!("failure"));
        assert_eq!(RevisionStatus::parse("rollback"), Some(RevisionStatus::Rollback));
        assert_eq!(RevisionStatus::parse("done"), None);
    }
}
