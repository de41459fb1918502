//! Revision lifecycle and the read side of revision history.
//!
//! ```text
//! init ──> running ──> complete ──> rollback
//!   │         ├──────> terminated ─> rollback
//!   │         └──────> rollback
//!   └──> failure
//! ```
//! Statuses only move forward. A `rollback` revision reports the effective status of the
//! revision named by its `rollback_version`, transitively.

use std::collections::HashSet;

use chrono::Utc;
use oam_types::Application as Manifest;
use serde::Deserialize;
use tracing::info;
use utoipa::IntoParams;

use crate::{
    context::RequestContext,
    error::{Error, Result},
    models::{ApplicationRevision, RevisionStatus},
    store::ListOptions,
    telemetry::REVISION_TRANSITIONS,
};

use super::{repository::{self, by_app}, Services};

impl RevisionStatus {
    /// Settled revisions do not block a new deploy to the same environment.
    pub fn is_settled(&self) -> bool { matches!(self, Self::Complete | Self::Terminated) }

    pub fn can_transition_to(&self, to: RevisionStatus) -> bool {
        use RevisionStatus::*;
        matches!(
            (self, to),
            (Init, Running) | (Init, Fail)
                | (Running, Complete) | (Running, Terminated) | (Running, Rollback)
                | (Complete, Rollback) | (Terminated, Rollback)
        )
    }
}

/// Move `rev` to `to` and persist it. Re-applying the current status is a no-op.
pub async fn transition(svc: &Services, ctx: &RequestContext, rev: &mut ApplicationRevision, to: RevisionStatus, reason: Option<&str>) -> Result<()> {
    if rev.status == to {
        return Ok(());
    }
    if !rev.status.can_transition_to(to) {
        return Err(Error::InvalidTransition { from: rev.status, to });
    }
    let from = rev.status;
    rev.status = to;
    if let Some(reason) = reason {
        rev.reason = reason.to_string();
    }
    rev.update_time = Utc::now();
    ctx.run(svc.store.put(&*rev)).await?;
    REVISION_TRANSITIONS.with_label_values(&[to.as_str()]).inc();
    info!(app=%rev.app_primary_key, version=%rev.version, from=%from, to=%to, "revision status changed");
    Ok(())
}

/// Status of `rev` with rollback pointers followed. A dangling or cyclic chain resolves to
/// `Rollback`, which counts as unsettled.
pub async fn effective_status(svc: &Services, ctx: &RequestContext, rev: &ApplicationRevision) -> Result<RevisionStatus> {
    let mut seen = HashSet::from([rev.version.clone()]);
    let mut current = rev.clone();
    while current.status == RevisionStatus::Rollback {
        let Some(target) = current.rollback_version.clone().filter(|v| !v.is_empty()) else { break };
        if !seen.insert(target.clone()) {
            tracing::warn!(app=%rev.app_primary_key, version=%rev.version, "rollback chain forms a cycle");
            break;
        }
        match repository::get_revision(svc, ctx, &rev.app_primary_key, &target).await {
            Ok(next) => current = next,
            Err(Error::RevisionNotExist(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(current.status)
}

/// Newest revision of `app`, optionally restricted to one environment.
pub async fn latest_revision(svc: &Services, ctx: &RequestContext, app: &str, env: Option<&str>) -> Result<Option<ApplicationRevision>> {
    let mut filter = by_app(app);
    if let Some(env) = env {
        filter = filter.eq("envName", env);
    }
    ctx.run(svc.store.first(&filter)).await
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ListRevisionsQuery {
    pub env_name: Option<String>,
    /// One of `init`, `running`, `complete`, `failure`, `terminated`, `rollback`.
    pub status: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

/// Revisions newest first, plus the total number matching the filters.
pub async fn list_revisions(svc: &Services, ctx: &RequestContext, app: &str, q: &ListRevisionsQuery) -> Result<(Vec<ApplicationRevision>, u64)> {
    repository::get_application(svc, ctx, app).await?;
    let mut filter = by_app(app);
    if let Some(env) = q.env_name.as_deref().filter(|e| !e.is_empty()) {
        filter = filter.eq("envName", env);
    }
    if let Some(status) = q.status.as_deref().filter(|s| !s.is_empty()) {
        let status = RevisionStatus::parse(status).ok_or_else(|| Error::InvalidProperties(format!("unknown revision status `{status}`")))?;
        filter = filter.eq("status", status.as_str());
    }
    let opts = ListOptions { page: q.page, page_size: q.page_size, ..Default::default() };
    let items = ctx.run(svc.store.list(&filter, &opts)).await?;
    let total = ctx.run(svc.store.count::<ApplicationRevision>(&filter)).await?;
    Ok((items, total))
}

pub async fn detail_revision(svc: &Services, ctx: &RequestContext, app: &str, version: &str) -> Result<ApplicationRevision> {
    repository::get_application(svc, ctx, app).await?;
    repository::get_revision(svc, ctx, app, version).await
}

pub fn snapshot(manifest: &Manifest) -> Result<String> {
    serde_json::to_string(manifest).map_err(|e| Error::Manifest(format!("encode snapshot: {e}")))
}

pub fn decode_snapshot(rev: &ApplicationRevision) -> Result<Manifest> {
    serde_json::from_str(&rev.apply_app_config)
        .map_err(|e| Error::Manifest(format!("decode snapshot of revision {}: {e}", rev.version)))
}

/// The manifest stored with `version`, or with the newest revision when `version` is empty.
pub async fn manifest_from_revision(svc: &Services, ctx: &RequestContext, app: &str, version: &str) -> Result<(Manifest, ApplicationRevision)> {
    let rev = if version.is_empty() {
        latest_revision(svc, ctx, app, None).await?.ok_or_else(|| Error::RevisionNotExist(String::new()))?
    } else {
        repository::get_revision(svc, ctx, app, version).await?
    };
    Ok((decode_snapshot(&rev)?, rev))
}

#[cfg(test)]
mod tests {
    use super::*;
    use RevisionStatus::*;

    #[test]
    fn transitions_only_move_forward() {
        assert!(Init.can_transition_to(Running));
        assert!(Init.can_transition_to(Fail));
        assert!(Running.can_transition_to(Complete));
        assert!(Complete.can_transition_to(Rollback));
        assert!(!Complete.can_transition_to(Running));
        assert!(!Fail.can_transition_to(Running));
        assert!(!Running.can_transition_to(Init));
        assert!(!Rollback.can_transition_to(Complete));
        assert!(!Init.can_transition_to(Complete));
    }

    #[test]
    fn only_complete_and_terminated_are_settled() {
        let settled: Vec<_> = [Init, Running, Complete, Fail, Terminated, Rollback].into_iter().filter(|s| s.is_settled()).collect();
        assert_eq!(settled, [Complete, Terminated]);
    }
}
