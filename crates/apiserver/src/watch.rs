//! Live status feed: a watch over owned `Application` resources plus a periodic sync pass.

use std::time::Duration;

use futures_util::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::watcher::{watcher, Config, Event};
use oam_types::{keys, Application as Manifest};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    context::RequestContext,
    error::Error,
    services::{workflow, Services},
};

async fn on_applied(svc: &Services, shutdown: &CancellationToken, app: &Manifest) {
    let ctx = RequestContext::background(shutdown);
    match workflow::sync_from_application(svc, &ctx, app).await {
        Ok(()) => {}
        Err(Error::Cancelled) => {}
        Err(e) => warn!(name=%app.name_any(), namespace=?app.namespace(), error=%e, "sync from watched application failed"),
    }
}

/// Feeds every applied owned `Application` into the record synchronizer until `shutdown`.
pub async fn run_application_watcher(svc: Services, client: Client, shutdown: CancellationToken) {
    let api: Api<Manifest> = Api::all(client);
    let selector = format!("{}={}", keys::LABEL_SOURCE_OF_TRUTH, keys::FROM_UX);
    let stream = watcher(api, Config::default().labels(&selector));
    futures_util::pin_mut!(stream);
    info!(selector=%selector, "application watcher started");
    loop {
        let ev = tokio::select! {
            _ = shutdown.cancelled() => break,
            ev = stream.next() => ev,
        };
        match ev {
            Some(Ok(Event::Applied(app))) => on_applied(&svc, &shutdown, &app).await,
            Some(Ok(Event::Restarted(apps))) => {
                debug!(count = apps.len(), "application watch restarted");
                for app in &apps {
                    on_applied(&svc, &shutdown, app).await;
                }
            }
            Some(Ok(Event::Deleted(app))) => debug!(name=%app.name_any(), "watched application deleted"),
            Some(Err(e)) => {
                warn!(error=%e, "application watch error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            None => break,
        }
    }
    info!("application watcher stopped");
}

/// Runs [`workflow::sync_workflow_records`] every `interval` until `shutdown`.
pub async fn run_sync_loop(svc: Services, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let ctx = RequestContext::background(&shutdown);
        match workflow::sync_workflow_records(&svc, &ctx).await {
            Ok(report) if report.updated + report.terminated + report.errors > 0 => {
                info!(updated = report.updated, finished = report.finished, terminated = report.terminated, errors = report.errors, "workflow records synced")
            }
            Ok(_) => {}
            Err(Error::Cancelled) => break,
            Err(e) => warn!(error=%e, "workflow record sync pass failed"),
        }
    }
    info!("workflow sync loop stopped");
}

/// Start the background tasks. The watcher only runs when a cluster client is available.
pub fn spawn(svc: &Services, client: Option<Client>, interval: Duration, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
    let mut tasks = vec![tokio::spawn(run_sync_loop(svc.clone(), interval, shutdown.clone()))];
    if let Some(client) = client {
        tasks.push(tokio::spawn(run_application_watcher(svc.clone(), client, shutdown.clone())));
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeControlPlane;
    use std::sync::Arc;

    #[tokio::test]
    async fn sync_loop_stops_on_shutdown() {
        let svc = Services::new(crate::store::Store::memory(), Arc::new(FakeControlPlane::default()));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_sync_loop(svc, Duration::from_millis(10), shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}
