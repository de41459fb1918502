//! The deployment and revision reconciliation engine.
//!
//! Operations are free functions over [`Services`], the composition root holding the store and
//! the control-plane client. Every store or control-plane await goes through the caller's
//! [`RequestContext`] so a cancelled caller aborts in-flight I/O.

use std::{
    collections::BTreeSet,
    future::Future,
    sync::{atomic::{AtomicI64, Ordering}, Arc},
};

use chrono::{TimeZone, Utc};

use crate::{context::RequestContext, control_plane::ControlPlane, error::{Error, Result}, store::Store};

pub mod compare;
pub mod deploy;
pub mod fragments;
pub mod render;
pub mod repository;
pub mod reset;
pub mod revision;
pub mod workflow;

#[derive(Clone)]
pub struct Services {
    pub store: Store,
    pub control_plane: Arc<dyn ControlPlane>,
}

impl Services {
    pub fn new(store: Store, control_plane: Arc<dyn ControlPlane>) -> Self { Self { store, control_plane } }
}

/// Await a control-plane call under `ctx`, tagging failures with `op`.
pub(crate) async fn cp<T, F>(ctx: &RequestContext, op: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    ctx.run(async move { fut.await.map_err(|e| Error::control_plane(op, e)) }).await
}

static LAST_VERSION_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Time-ordered version string `yyyyMMddHHmmssSSS`, optionally `<prefix>-` prefixed.
///
/// Versions are strictly increasing within the process even when called within the same millisecond.
pub fn generate_version(prefix: &str) -> String {
    let now = Utc::now().timestamp_millis();
    let prev = LAST_VERSION_MILLIS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
        .unwrap_or(now);
    let millis = now.max(prev + 1);
    let ts = Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now);
    let stamp = ts.format("%Y%m%d%H%M%S%3f").to_string();
    if prefix.is_empty() { stamp } else { format!("{prefix}-{stamp}") }
}

/// Name partition between a current and a target set.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Partition {
    pub add: Vec<String>,
    pub delete: Vec<String>,
    pub both: Vec<String>,
}

pub fn three_way_compare<'a>(
    current: impl IntoIterator<Item = &'a str>,
    target: impl IntoIterator<Item = &'a str>,
) -> Partition {
    let current: BTreeSet<&str> = current.into_iter().collect();
    let target: BTreeSet<&str> = target.into_iter().collect();
    Partition {
        add: target.difference(&current).map(|s| s.to_string()).collect(),
        delete: current.difference(&target).map(|s| s.to_string()).collect(),
        both: current.intersection(&target).map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_strictly_increasing() {
        let mut prev = generate_version("");
        assert_eq!(prev.len(), 17);
        for _ in 0..200 {
            let next = generate_version("");
            assert!(next > prev, "{next} <= {prev}");
            prev = next;
        }
        assert!(generate_version("workflow-dev").starts_with("workflow-dev-"));
    }

    #[test]
    fn partition_splits_names() {
        let p = three_way_compare(["a", "b", "c"], ["b", "c", "d"]);
        assert_eq!(p.add, ["d"]);
        assert_eq!(p.delete, ["a"]);
        assert_eq!(p.both, ["b", "c"]);
    }
}
