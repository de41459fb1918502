use axum::{response::{IntoResponse, Response}, Json, http::StatusCode};
use serde::Serialize;
use utoipa::ToSchema;
use std::fmt::{Display, Formatter};
use thiserror::Error;

use crate::{models::RevisionStatus, store::StoreError};

/// Coarse error classes, each with one HTTP equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotExist,
    AlreadyExist,
    Conflict,
    InvalidInput,
    Precondition,
    SideEffect,
    Cancelled,
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("application `{0}` does not exist")]
    ApplicationNotExist(String),
    #[error("application `{0}` already exists")]
    ApplicationExist(String),
    #[error("component `{0}` does not exist")]
    ComponentNotExist(String),
    #[error("component `{0}` already exists")]
    ComponentExist(String),
    #[error("application `{0}` already has a main component")]
    MainComponentExist(String),
    #[error("the main component cannot be deleted")]
    ComponentNotAllowDelete,
    #[error("component type `{0}` is not supported")]
    ComponentTypeNotSupported(String),
    #[error("trait `{0}` already exists on the component")]
    TraitAlreadyExist(String),
    #[error("trait `{0}` does not exist on the component")]
    TraitNotExist(String),
    #[error("policy `{0}` does not exist")]
    PolicyNotExist(String),
    #[error("policy `{0}` already exists")]
    PolicyExist(String),
    #[error("policy `{policy}` is referenced by workflow `{workflow}`")]
    PolicyIsBeingUsed { policy: String, workflow: String },
    #[error("trigger `{0}` does not exist")]
    TriggerNotExist(String),
    #[error("trigger `{0}` already exists")]
    TriggerExist(String),
    #[error("revision `{0}` does not exist")]
    RevisionNotExist(String),
    #[error("application has no revision to roll back to")]
    NoReadyRevision,
    #[error("workflow `{0}` does not exist")]
    WorkflowNotExist(String),
    #[error("workflow `{0}` already exists")]
    WorkflowExist(String),
    #[error("application has no default workflow")]
    WorkflowNoDefault,
    #[error("workflow record `{0}` does not exist")]
    WorkflowRecordNotExist(String),
    #[error("workflow is still running")]
    WorkflowRunning,
    #[error("workflow has already finished")]
    WorkflowFinished,
    #[error("environment `{0}` does not exist")]
    EnvNotExist(String),
    #[error("environment `{0}` already exists")]
    EnvExist(String),
    #[error("application is not bound to environment `{0}`")]
    EnvBindingNotExist(String),
    #[error("target `{0}` does not exist")]
    TargetNotExist(String),
    #[error("target `{0}` already exists")]
    TargetExist(String),
    #[error("invalid properties: {0}")]
    InvalidProperties(String),
    #[error("application has no component")]
    NoComponent,
    #[error("an earlier deployment of this application to `{0}` has not settled")]
    DeployConflict(String),
    #[error("create namespace `{namespace}`: {source}")]
    CreateNamespace { namespace: String, #[source] source: anyhow::Error },
    #[error("apply application: {0}")]
    DeployApplyFail(#[source] anyhow::Error),
    #[error("application is still running in environment `{0}`")]
    ApplicationRefusedDelete(String),
    #[error("revision status cannot move from {from} to {to}")]
    InvalidTransition { from: RevisionStatus, to: RevisionStatus },
    #[error("unsupported webhook payload type `{0}`")]
    UnsupportedWebhookPayload(String),
    #[error("invalid webhook payload: {0}")]
    InvalidWebhookPayload(String),
    #[error("manifest: {0}")]
    Manifest(String),
    #[error("control plane {op}: {source}")]
    ControlPlane { op: &'static str, #[source] source: anyhow::Error },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn control_plane(op: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::ControlPlane { op, source: source.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            ApplicationNotExist(_) | ComponentNotExist(_) | TraitNotExist(_) | PolicyNotExist(_) | TriggerNotExist(_)
            | RevisionNotExist(_) | WorkflowNotExist(_) | WorkflowRecordNotExist(_) | EnvNotExist(_)
            | EnvBindingNotExist(_) | TargetNotExist(_) => ErrorKind::NotExist,
            Store(StoreError::NotFound { .. }) => ErrorKind::NotExist,
            ApplicationExist(_) | ComponentExist(_) | MainComponentExist(_) | TraitAlreadyExist(_) | PolicyExist(_)
            | TriggerExist(_) | WorkflowExist(_) | EnvExist(_) | TargetExist(_) => ErrorKind::AlreadyExist,
            Store(StoreError::AlreadyExists { .. }) => ErrorKind::AlreadyExist,
            DeployConflict(_) | WorkflowRunning | WorkflowFinished | PolicyIsBeingUsed { .. } | ComponentNotAllowDelete
            | ApplicationRefusedDelete(_) | InvalidTransition { .. } => ErrorKind::Conflict,
            Store(StoreError::Conflict { .. }) => ErrorKind::Conflict,
            InvalidProperties(_) | ComponentTypeNotSupported(_) | UnsupportedWebhookPayload(_) | InvalidWebhookPayload(_) => {
                ErrorKind::InvalidInput
            },
            NoComponent | WorkflowNoDefault | NoReadyRevision => ErrorKind::Precondition,
            CreateNamespace { .. } | DeployApplyFail(_) => ErrorKind::SideEffect,
            Cancelled => ErrorKind::Cancelled,
            Manifest(_) | ControlPlane { .. } | Store(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code carried in API error bodies.
    pub fn code(&self) -> &'static str {
        use Error::*;
        match self {
            ApplicationNotExist(_) => "application_not_exist",
            ApplicationExist(_) => "application_exist",
            ComponentNotExist(_) => "component_not_exist",
            ComponentExist(_) => "component_exist",
            MainComponentExist(_) => "main_component_exist",
            ComponentNotAllowDelete => "component_not_allow_delete",
            ComponentTypeNotSupported(_) => "component_type_not_supported",
            TraitAlreadyExist(_) => "trait_already_exist",
            TraitNotExist(_) => "trait_not_exist",
            PolicyNotExist(_) => "policy_not_exist",
            PolicyExist(_) => "policy_exist",
            PolicyIsBeingUsed { .. } => "policy_is_being_used",
            TriggerNotExist(_) => "trigger_not_exist",
            TriggerExist(_) => "trigger_exist",
            RevisionNotExist(_) => "revision_not_exist",
            NoReadyRevision => "no_ready_revision",
            WorkflowNotExist(_) => "workflow_not_exist",
            WorkflowExist(_) => "workflow_exist",
            WorkflowNoDefault => "workflow_no_default",
            WorkflowRecordNotExist(_) => "workflow_record_not_exist",
            WorkflowRunning => "workflow_running",
            WorkflowFinished => "workflow_finished",
            EnvNotExist(_) => "env_not_exist",
            EnvExist(_) => "env_exist",
            EnvBindingNotExist(_) => "env_binding_not_exist",
            TargetNotExist(_) => "target_not_exist",
            TargetExist(_) => "target_exist",
            InvalidProperties(_) => "invalid_properties",
            NoComponent => "no_component",
            DeployConflict(_) => "deploy_conflict",
            CreateNamespace { .. } => "create_namespace",
            DeployApplyFail(_) => "deploy_apply_fail",
            ApplicationRefusedDelete(_) => "application_refused_delete",
            InvalidTransition { .. } => "invalid_transition",
            UnsupportedWebhookPayload(_) => "unsupported_webhook_payload",
            InvalidWebhookPayload(_) => "invalid_webhook_payload",
            Manifest(_) => "manifest",
            ControlPlane { .. } => "control_plane",
            Store(StoreError::NotFound { .. }) => "not_found",
            Store(StoreError::AlreadyExists { .. }) => "already_exists",
            Store(StoreError::Conflict { .. }) => "conflict",
            Store(_) => "store",
            Cancelled => "cancelled",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotExist => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExist | ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidInput | ErrorKind::Precondition => StatusCode::BAD_REQUEST,
            ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::SideEffect | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_not_exist(&self) -> bool { self.kind() == ErrorKind::NotExist }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiErrorBody { pub code: &'static str, pub message: String }

#[derive(Debug, Clone)]
pub struct ApiError { pub status: StatusCode, pub code: &'static str, pub message: String }

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }
    pub fn bad_request(msg: impl Into<String>) -> Self { Self::new(StatusCode::BAD_REQUEST, "bad_request", msg) }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "{}: {}", self.code, self.message) }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = e.status();
        if status.is_server_error() { tracing::error!(error=?e, code=e.code(), "request failed"); }
        Self::new(status, e.code(), format!("{e:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody { code: self.code, message: self.message };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_http_equivalents() {
        assert_eq!(Error::ApplicationNotExist("a".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::DeployConflict("dev".into()).status(), StatusCode::CONFLICT);
        assert_eq!(Error::InvalidProperties("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::WorkflowNoDefault.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::DeployApplyFail(anyhow::anyhow!("boom")).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(Error::Cancelled.status(), StatusCode::REQUEST_TIMEOUT);
        let nf = Error::from(StoreError::NotFound { kind: "env", key: "dev".into() });
        assert!(nf.is_not_exist());
    }

    #[test]
    fn api_error_carries_code() {
        let api: ApiError = Error::ComponentNotAllowDelete.into();
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.code, "component_not_allow_delete");
    }
}
