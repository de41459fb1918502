//! Annotation and label keys written onto rendered manifests.

pub const ANNOTATION_DEPLOY_VERSION: &str = "app.oam.dev/deployVersion";
pub const ANNOTATION_PUBLISH_VERSION: &str = "app.oam.dev/publishVersion";
pub const ANNOTATION_APP_NAME: &str = "app.oam.dev/appName";
pub const ANNOTATION_APP_ALIAS: &str = "app.oam.dev/appAlias";
pub const ANNOTATION_WORKFLOW_NAME: &str = "app.oam.dev/workflowName";
pub const ANNOTATION_LAST_APPLIED: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Marks a manifest as owned by the apiserver's stored fragments.
pub const LABEL_SOURCE_OF_TRUTH: &str = "ux.oam.dev/source-of-truth";
pub const FROM_UX: &str = "from-UX";

pub const REASON_TERMINATE: &str = "Terminate";
pub const REASON_FAILED_AFTER_RETRIES: &str = "FailedAfterRetries";
pub const REASON_TIMEOUT: &str = "Timeout";

/// Step type whose running instances are completed by a resume.
pub const STEP_TYPE_SUSPEND: &str = "suspend";
