//! Seam to the cluster control plane that reconciles `Application` manifests.
//!
//! Adapters report failures as `anyhow::Error`; the services wrap them with operation context.

use anyhow::Result;
use async_trait::async_trait;
use oam_types::Application;

use crate::models::ClusterTarget;

mod cluster;

pub use cluster::KubeControlPlane;

/// Namespace holding type definitions and shared configuration.
pub const SYSTEM_NAMESPACE: &str = "vela-system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDefinitionInfo {
    pub name: String,
    /// The definition provisions infrastructure through a terraform schematic.
    pub terraform: bool,
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_application(&self, namespace: &str, name: &str) -> Result<Option<Application>>;
    async fn list_applications(&self, label_selector: &str) -> Result<Vec<Application>>;
    /// Create-or-update by identity; returns the object as stored by the control plane.
    async fn apply_application(&self, app: &Application) -> Result<Application>;
    /// Deleting an absent application is not an error.
    async fn delete_application(&self, namespace: &str, name: &str) -> Result<()>;
    async fn patch_application_status(&self, app: &Application) -> Result<()>;
    async fn namespace_exists(&self, name: &str) -> Result<bool>;
    async fn create_namespace(&self, name: &str) -> Result<()>;
    async fn component_definition(&self, component_type: &str) -> Result<Option<ComponentDefinitionInfo>>;
    /// Copy the project's shared configuration into every target namespace.
    async fn sync_configs(&self, project: &str, targets: &[ClusterTarget]) -> Result<()>;
    /// Server-side evaluation without persisting anything.
    async fn dry_run(&self, app: &Application) -> Result<Application>;
}
