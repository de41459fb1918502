pub mod applications;
pub mod health;
pub mod readiness;
pub mod webhooks;

use axum::http::HeaderMap;

use crate::context::RequestContext;

/// Header naming the acting user; recorded on revisions as the deploy user.
pub const USER_HEADER: &str = "x-user";

pub(crate) fn request_context(headers: &HeaderMap) -> RequestContext {
    let user = headers.get(USER_HEADER).and_then(|v| v.to_str().ok()).filter(|u| !u.is_empty()).unwrap_or("anonymous");
    RequestContext::new(user)
}
