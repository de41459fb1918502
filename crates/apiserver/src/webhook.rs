//! Webhook triggers: dispatch by the trigger's payload type to a handler that patches
//! component properties and force-deploys.
//!
//! Handlers are registered explicitly when the router is assembled; [`WebhookRegistry::builtin`]
//! covers every payload type a trigger may be created with. Registry-specific push formats
//! plug in through [`WebhookRegistry::register`].

use std::{collections::{BTreeMap, HashMap}, sync::Arc};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    context::RequestContext,
    error::{Error, Result},
    models::{child_key, ApplicationComponent, ApplicationRevision, ApplicationTrigger, CodeInfo, ImageInfo},
    services::{
        deploy::{deploy, DeployRequest},
        fragments, repository, Services,
    },
};

pub const CUSTOM: &str = "custom";

/// Payload types a trigger may be created with.
pub const SUPPORTED: [&str; 1] = [CUSTOM];

pub fn is_supported(payload_type: &str) -> bool { SUPPORTED.contains(&payload_type) }

pub const TRIGGER_TYPE: &str = "webhook";

/// An inbound webhook call. Header names are lowercase.
#[derive(Debug, Clone, Default)]
pub struct WebhookEvent {
    pub body: Value,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub state: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<ApplicationRevision>,
}

impl WebhookResponse {
    fn deployed(rev: ApplicationRevision) -> Self {
        Self { state: "success".into(), description: format!("deployed revision {}", rev.version), revision: Some(rev) }
    }
}

#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, svc: &Services, ctx: &RequestContext, trigger: &ApplicationTrigger, event: WebhookEvent) -> Result<WebhookResponse>;
}

#[derive(Clone, Default)]
pub struct WebhookRegistry {
    handlers: HashMap<String, Arc<dyn WebhookHandler>>,
}

impl WebhookRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register(mut self, payload_type: &str, handler: impl WebhookHandler + 'static) -> Self {
        self.handlers.insert(payload_type.to_string(), Arc::new(handler));
        self
    }

    pub fn builtin() -> Self {
        Self::new().register(CUSTOM, CustomHandler)
    }

    pub fn get(&self, payload_type: &str) -> Option<Arc<dyn WebhookHandler>> { self.handlers.get(payload_type).cloned() }
}

impl std::fmt::Debug for WebhookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

/// Resolve the trigger by token and run its handler.
pub async fn handle_webhook(svc: &Services, ctx: &RequestContext, registry: &WebhookRegistry, token: &str, event: WebhookEvent) -> Result<WebhookResponse> {
    let trigger = fragments::get_trigger(svc, ctx, token).await?;
    repository::get_application(svc, ctx, &trigger.app_primary_key).await?;
    let handler = registry
        .get(&trigger.payload_type)
        .ok_or_else(|| Error::UnsupportedWebhookPayload(trigger.payload_type.clone()))?;
    info!(app=%trigger.app_primary_key, trigger=%trigger.name, payload_type=%trigger.payload_type, "webhook received");
    handler.handle(svc, ctx, &trigger, event).await
}

fn parse<T: DeserializeOwned>(body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| Error::InvalidWebhookPayload(e.to_string()))
}

/// Objects merge key by key; anything else in `patch` replaces the base value.
pub fn merge_properties(base: Option<Value>, patch: &Value) -> Value {
    match (base, patch) {
        (Some(Value::Object(mut b)), Value::Object(p)) => {
            for (k, v) in p {
                let merged = merge_properties(b.remove(k), v);
                b.insert(k.clone(), merged);
            }
            Value::Object(b)
        }
        (_, p) => p.clone(),
    }
}

async fn patch_component(svc: &Services, ctx: &RequestContext, mut comp: ApplicationComponent, patch: &Value) -> Result<()> {
    comp.properties = Some(merge_properties(comp.properties.take(), patch));
    comp.update_time = chrono::Utc::now();
    ctx.run(svc.store.put(&comp)).await
}

fn webhook_deploy(trigger: &ApplicationTrigger, payload_type: &str) -> DeployRequest {
    DeployRequest {
        workflow_name: Some(trigger.workflow_name.clone()).filter(|w| !w.is_empty()),
        force: true,
        note: format!("triggered by webhook {payload_type}"),
        trigger_type: TRIGGER_TYPE.into(),
        ..Default::default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomPayload {
    #[serde(default)]
    upgrade: BTreeMap<String, Value>,
    #[serde(default)]
    code_info: Option<CodeInfo>,
    #[serde(default)]
    image_info: Option<ImageInfo>,
}

/// Patches the named components with the given properties.
pub struct CustomHandler;

#[async_trait]
impl WebhookHandler for CustomHandler {
    async fn handle(&self, svc: &Services, ctx: &RequestContext, trigger: &ApplicationTrigger, event: WebhookEvent) -> Result<WebhookResponse> {
        let payload: CustomPayload = parse(event.body)?;
        for (name, props) in &payload.upgrade {
            let comp = match ctx.run(svc.store.find::<ApplicationComponent>(&child_key(&trigger.app_primary_key, name))).await? {
                Some(c) => c,
                None => return Err(Error::ComponentNotExist(name.clone())),
            };
            patch_component(svc, ctx, comp, props).await?;
        }
        let mut req = webhook_deploy(trigger, CUSTOM);
        req.code_info = payload.code_info;
        req.image_info = payload.image_info;
        deploy(svc, ctx, &trigger.app_primary_key, req).await.map(WebhookResponse::deployed)
    }
}
