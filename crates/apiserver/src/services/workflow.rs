//! Workflows, workflow records and the synchronizer that folds live execution status back
//! into records and revisions.

use chrono::Utc;
use oam_types::{
    keys, Application as Manifest, StepPhase, StepStatus, WorkflowRunPhase, WorkflowStatus, WorkflowStepStatus,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    context::RequestContext,
    error::{Error, Result},
    models::{child_key, ApplicationRevision, RecordStepStatus, RevisionStatus, Workflow, WorkflowRecord, WorkflowStep},
    store::{Entity, Filter, ListOptions},
    telemetry::WORKFLOW_SYNC,
};

use super::{cp, generate_version, repository::{self, by_app}, revision, Services};

pub fn env_workflow_name(env: &str) -> String { format!("workflow-{env}") }

// ---- workflows ----

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub env_name: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

/// Creates or replaces a workflow. Marking it default clears the flag on the others.
pub async fn create_or_update_workflow(svc: &Services, ctx: &RequestContext, app: &str, req: CreateWorkflowRequest) -> Result<Workflow> {
    repository::get_application(svc, ctx, app).await?;
    if !req.env_name.is_empty() {
        repository::get_env(svc, ctx, &req.env_name).await?;
    }
    let now = Utc::now();
    let existing = ctx.run(svc.store.find::<Workflow>(&child_key(app, &req.name))).await?;
    let wf = Workflow {
        app_primary_key: app.to_string(),
        name: req.name,
        alias: req.alias,
        description: req.description,
        default: req.default,
        env_name: req.env_name,
        steps: req.steps,
        create_time: existing.as_ref().map_or(now, |w| w.create_time),
        update_time: now,
    };
    if wf.default {
        for mut other in repository::list_workflows(svc, ctx, app).await? {
            if other.default && other.name != wf.name {
                other.default = false;
                ctx.run(svc.store.put(&other)).await?;
            }
        }
    }
    if existing.is_some() {
        ctx.run(svc.store.put(&wf)).await?;
    } else {
        ctx.run(svc.store.add(&wf)).await?;
    }
    Ok(wf)
}

pub async fn delete_workflow(svc: &Services, ctx: &RequestContext, app: &str, name: &str) -> Result<()> {
    let wf = repository::get_workflow(svc, ctx, app, name).await?;
    let records: Vec<WorkflowRecord> = ctx.run(svc.store.list(&by_app(app).eq("workflowName", name), &ListOptions::default())).await?;
    for r in records {
        ctx.run(svc.store.delete::<WorkflowRecord>(&r.primary_key())).await?;
    }
    ctx.run(svc.store.delete::<Workflow>(&wf.primary_key())).await?;
    Ok(())
}

// ---- records ----

pub async fn list_records(svc: &Services, ctx: &RequestContext, app: &str, workflow: &str, page: Option<usize>, page_size: Option<usize>) -> Result<(Vec<WorkflowRecord>, u64)> {
    let filter = by_app(app).eq("workflowName", workflow);
    let opts = ListOptions { page, page_size, ..Default::default() };
    let items = ctx.run(svc.store.list(&filter, &opts)).await?;
    let total = ctx.run(svc.store.count::<WorkflowRecord>(&filter)).await?;
    Ok((items, total))
}

pub async fn detail_record(svc: &Services, ctx: &RequestContext, app: &str, name: &str) -> Result<WorkflowRecord> {
    repository::get_record(svc, ctx, app, name).await
}

fn initial_steps(steps: &[WorkflowStep]) -> Vec<RecordStepStatus> {
    steps
        .iter()
        .map(|s| RecordStepStatus {
            name: s.name.clone(),
            alias: s.alias.clone(),
            step_type: s.step_type.clone(),
            sub_steps_status: initial_steps(&s.sub_steps),
            ..Default::default()
        })
        .collect()
}

/// Records one run of `workflow` for an applied manifest, then terminates older running
/// revisions and unfinished records of the same workflow.
pub async fn create_workflow_record(svc: &Services, ctx: &RequestContext, app: &str, manifest: &Manifest, workflow: &Workflow) -> Result<WorkflowRecord> {
    let publish_version = manifest
        .annotation(keys::ANNOTATION_PUBLISH_VERSION)
        .ok_or_else(|| Error::Manifest("missing publish version annotation".into()))?;
    let deploy_version = manifest
        .annotation(keys::ANNOTATION_DEPLOY_VERSION)
        .ok_or_else(|| Error::Manifest("missing deploy version annotation".into()))?;
    let now = Utc::now();
    let record = WorkflowRecord {
        app_primary_key: app.to_string(),
        workflow_name: workflow.name.clone(),
        workflow_alias: workflow.alias.clone(),
        name: publish_version.to_string(),
        namespace: manifest.metadata.namespace.clone().unwrap_or_default(),
        revision_primary_key: deploy_version.to_string(),
        status: WorkflowRunPhase::Initializing,
        message: String::new(),
        mode: String::new(),
        finished: false,
        steps: initial_steps(&workflow.steps),
        start_time: Some(now),
        end_time: None,
        create_time: now,
    };
    ctx.run(svc.store.add(&record)).await?;
    reset_revisions_and_records(svc, ctx, &record, &workflow.env_name).await?;
    Ok(record)
}

/// Move `rev` towards `to`, passing through `running` when it is still `init`.
/// Targets unreachable from the current status are left alone.
async fn advance(svc: &Services, ctx: &RequestContext, rev: &mut ApplicationRevision, to: RevisionStatus, reason: Option<&str>) -> Result<()> {
    if rev.status == RevisionStatus::Init && to != RevisionStatus::Running && to != RevisionStatus::Fail {
        revision::transition(svc, ctx, rev, RevisionStatus::Running, None).await?;
    }
    if rev.status == to || !rev.status.can_transition_to(to) {
        debug!(app=%rev.app_primary_key, version=%rev.version, status=%rev.status, target=%to, "revision left unchanged");
        return Ok(());
    }
    revision::transition(svc, ctx, rev, to, reason).await
}

async fn reset_revisions_and_records(svc: &Services, ctx: &RequestContext, current: &WorkflowRecord, env: &str) -> Result<()> {
    let app = &current.app_primary_key;
    let running = by_app(app).eq("envName", env).eq("status", RevisionStatus::Running.as_str());
    let revisions: Vec<ApplicationRevision> = ctx.run(svc.store.list(&running, &ListOptions::default())).await?;
    for mut rev in revisions.into_iter().filter(|r| r.version != current.revision_primary_key) {
        revision::transition(svc, ctx, &mut rev, RevisionStatus::Terminated, Some("superseded by a newer deployment")).await?;
    }
    let unfinished = by_app(app).eq("workflowName", current.workflow_name.as_str()).eq("finished", false);
    let records: Vec<WorkflowRecord> = ctx.run(svc.store.list(&unfinished, &ListOptions::default())).await?;
    for mut rec in records.into_iter().filter(|r| r.name != current.name) {
        for step in rec.steps.iter_mut() {
            stop_running(step);
        }
        rec.status = WorkflowRunPhase::Terminated;
        rec.finished = true;
        rec.end_time = Some(Utc::now());
        ctx.run(svc.store.put(&rec)).await?;
        info!(app=%app, record=%rec.name, "superseded workflow record terminated");
    }
    Ok(())
}

fn stop_running(step: &mut RecordStepStatus) {
    if step.phase == Some(StepPhase::Running) {
        step.phase = Some(StepPhase::Stopped);
    }
    for sub in step.sub_steps_status.iter_mut() {
        stop_running(sub);
    }
}

// ---- synchronizer ----

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub updated: usize,
    pub finished: usize,
    pub terminated: usize,
    pub errors: usize,
}

fn revision_status_for(status: &WorkflowStatus) -> (RevisionStatus, Option<String>) {
    if status.terminated || status.phase == WorkflowRunPhase::Terminated {
        return (RevisionStatus::Terminated, None);
    }
    match status.phase {
        WorkflowRunPhase::Failed => (RevisionStatus::Terminated, Some(format!("workflow failed: {}", status.message))),
        WorkflowRunPhase::Succeeded | WorkflowRunPhase::Skipped if status.finished => (RevisionStatus::Complete, None),
        _ if status.finished => (RevisionStatus::Complete, None),
        _ => (RevisionStatus::Running, None),
    }
}

fn record_step(live: &StepStatus, previous: Option<&RecordStepStatus>, subs: Vec<RecordStepStatus>) -> RecordStepStatus {
    RecordStepStatus {
        id: live.id.clone(),
        name: live.name.clone(),
        alias: previous.map(|p| p.alias.clone()).unwrap_or_default(),
        step_type: live.step_type.clone(),
        phase: live.phase,
        message: live.message.clone(),
        reason: live.reason.clone(),
        first_execute_time: live.first_execute_time,
        last_execute_time: live.last_execute_time,
        sub_steps_status: subs,
    }
}

/// Live step status merged over the record's steps; aliases survive, unknown steps are appended.
fn merge_steps(existing: &[RecordStepStatus], live: &[WorkflowStepStatus]) -> Vec<RecordStepStatus> {
    let mut merged: Vec<RecordStepStatus> = existing.to_vec();
    for ls in live {
        let prev = existing.iter().find(|s| s.name == ls.step.name);
        let subs = ls
            .sub_steps_status
            .iter()
            .map(|sub| record_step(sub, prev.and_then(|p| p.sub_steps_status.iter().find(|s| s.name == sub.name)), Vec::new()))
            .collect();
        let step = record_step(&ls.step, prev, subs);
        match merged.iter_mut().find(|s| s.name == step.name) {
            Some(slot) => *slot = step,
            None => merged.push(step),
        }
    }
    merged
}

/// Fold `live` into `record` and advance the record's revision. Finished records are never touched again.
async fn sync_workflow_status(svc: &Services, ctx: &RequestContext, record: &mut WorkflowRecord, live: &WorkflowStatus) -> Result<bool> {
    if record.finished {
        return Ok(false);
    }
    record.status = live.phase;
    record.message = live.message.clone();
    record.mode = live.mode.clone();
    record.steps = merge_steps(&record.steps, &live.steps);
    if live.start_time.is_some() {
        record.start_time = live.start_time;
    }
    record.finished = live.finished || live.terminated;
    if record.finished {
        record.end_time = live.end_time.or_else(|| Some(Utc::now()));
        if live.terminated {
            record.status = WorkflowRunPhase::Terminated;
        }
    }
    ctx.run(svc.store.put(&*record)).await?;

    let (to, reason) = revision_status_for(live);
    match repository::get_revision(svc, ctx, &record.app_primary_key, &record.revision_primary_key).await {
        Ok(mut rev) => advance(svc, ctx, &mut rev, to, reason.as_deref()).await?,
        Err(Error::RevisionNotExist(v)) => warn!(app=%record.app_primary_key, version=%v, "record points at a missing revision"),
        Err(e) => return Err(e),
    }
    Ok(record.finished)
}

async fn set_record_to_terminated(svc: &Services, ctx: &RequestContext, record: &mut WorkflowRecord, reason: &str) -> Result<()> {
    for step in record.steps.iter_mut() {
        stop_running(step);
    }
    record.status = WorkflowRunPhase::Terminated;
    record.finished = true;
    record.end_time = Some(Utc::now());
    ctx.run(svc.store.put(&*record)).await?;
    if let Ok(mut rev) = repository::get_revision(svc, ctx, &record.app_primary_key, &record.revision_primary_key).await {
        advance(svc, ctx, &mut rev, RevisionStatus::Terminated, Some(reason)).await?;
    }
    Ok(())
}

/// Manifest name for the environment `workflow` deploys to.
async fn deploy_name_for(svc: &Services, ctx: &RequestContext, app: &str, workflow: &Workflow) -> Result<String> {
    match repository::get_env_binding(svc, ctx, app, &workflow.env_name).await {
        Ok(b) => Ok(b.app_deploy_name.filter(|n| !n.is_empty()).unwrap_or_else(|| app.to_string())),
        Err(Error::EnvBindingNotExist(_)) => Ok(app.to_string()),
        Err(e) => Err(e),
    }
}

async fn live_for_record(svc: &Services, ctx: &RequestContext, record: &WorkflowRecord) -> Result<Option<Manifest>> {
    let wf = repository::get_workflow(svc, ctx, &record.app_primary_key, &record.workflow_name).await?;
    let name = deploy_name_for(svc, ctx, &record.app_primary_key, &wf).await?;
    cp(ctx, "get application", svc.control_plane.get_application(&record.namespace, &name)).await
}

async fn sync_one(svc: &Services, ctx: &RequestContext, record: &mut WorkflowRecord, report: &mut SyncReport) -> Result<()> {
    let Some(live) = live_for_record(svc, ctx, record).await? else {
        set_record_to_terminated(svc, ctx, record, "application no longer exists").await?;
        report.terminated += 1;
        return Ok(());
    };
    let Some(status) = live.workflow_status() else { return Ok(()) };
    if status.record_name() == record.name {
        let finished = sync_workflow_status(svc, ctx, record, status).await?;
        report.updated += 1;
        if finished {
            report.finished += 1;
        }
    } else if superseded_by(svc, ctx, record, status).await? {
        set_record_to_terminated(svc, ctx, record, "superseded by a newer run").await?;
        report.terminated += 1;
    } else {
        debug!(app=%record.app_primary_key, record=%record.name, live=%status.record_name(), "live run has not caught up, try next pass");
    }
    Ok(())
}

/// Whether the live run started after `record`. Right after a deploy the controller may still
/// report the previous run; that run is older and must not end the new record.
async fn superseded_by(svc: &Services, ctx: &RequestContext, record: &WorkflowRecord, live: &WorkflowStatus) -> Result<bool> {
    match repository::get_record(svc, ctx, &record.app_primary_key, &live.record_name()).await {
        Ok(other) => Ok(other.create_time > record.create_time),
        Err(Error::WorkflowRecordNotExist(_)) => Ok(live.start_time.is_some_and(|t| t > record.create_time)),
        Err(e) => Err(e),
    }
}

/// One polling pass over every unfinished record. Per-record failures are logged and counted;
/// cancellation aborts the pass.
pub async fn sync_workflow_records(svc: &Services, ctx: &RequestContext) -> Result<SyncReport> {
    let records: Vec<WorkflowRecord> = ctx.run(svc.store.list(&Filter::new().eq("finished", false), &ListOptions::oldest_first())).await?;
    let mut report = SyncReport::default();
    for mut record in records {
        match sync_one(svc, ctx, &mut record, &mut report).await {
            Ok(()) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                report.errors += 1;
                WORKFLOW_SYNC.with_label_values(&["error"]).inc();
                warn!(app=%record.app_primary_key, record=%record.name, error=%e, "workflow record sync failed");
            }
        }
    }
    WORKFLOW_SYNC.with_label_values(&["updated"]).inc_by(report.updated as u64);
    WORKFLOW_SYNC.with_label_values(&["finished"]).inc_by(report.finished as u64);
    WORKFLOW_SYNC.with_label_values(&["terminated"]).inc_by(report.terminated as u64);
    Ok(report)
}

/// Event-driven sync for one live manifest. Manifests not owned by this server, or whose run
/// has no record, are ignored.
pub async fn sync_from_application(svc: &Services, ctx: &RequestContext, live: &Manifest) -> Result<()> {
    if live.label(keys::LABEL_SOURCE_OF_TRUTH) != Some(keys::FROM_UX) {
        return Ok(());
    }
    let Some(app) = live.label(keys::ANNOTATION_APP_NAME) else { return Ok(()) };
    let Some(status) = live.workflow_status() else { return Ok(()) };
    let mut record = match repository::get_record(svc, ctx, app, &status.record_name()).await {
        Ok(r) => r,
        Err(Error::WorkflowRecordNotExist(_)) => return Ok(()),
        Err(e) => return Err(e),
    };
    if sync_workflow_status(svc, ctx, &mut record, status).await? {
        WORKFLOW_SYNC.with_label_values(&["finished"]).inc();
    } else {
        WORKFLOW_SYNC.with_label_values(&["updated"]).inc();
    }
    Ok(())
}

// ---- operator actions ----

async fn live_and_record(svc: &Services, ctx: &RequestContext, app: &str, record_name: &str) -> Result<(WorkflowRecord, Manifest, WorkflowStatus)> {
    let record = repository::get_record(svc, ctx, app, record_name).await?;
    if record.finished {
        return Err(Error::WorkflowFinished);
    }
    let live = live_for_record(svc, ctx, &record).await?.ok_or_else(|| Error::ApplicationNotExist(app.to_string()))?;
    let status = live.workflow_status().cloned().ok_or_else(|| Error::Manifest("live application has no workflow status".into()))?;
    Ok((record, live, status))
}

fn terminate_step(step: &mut StepStatus) {
    match step.phase {
        Some(StepPhase::Running) => {
            step.phase = Some(StepPhase::Failed);
            step.reason = keys::REASON_TERMINATE.into();
        }
        Some(StepPhase::Failed) if step.reason != keys::REASON_FAILED_AFTER_RETRIES && step.reason != keys::REASON_TIMEOUT => {
            step.reason = keys::REASON_TERMINATE.into();
        }
        _ => {}
    }
}

/// Running steps fail with the `Terminate` reason so operator stops stay distinguishable from
/// organic failures.
pub fn terminate_status(status: &mut WorkflowStatus) {
    status.terminated = true;
    status.suspend = false;
    for step in status.steps.iter_mut() {
        terminate_step(&mut step.step);
        for sub in step.sub_steps_status.iter_mut() {
            terminate_step(sub);
        }
    }
}

pub async fn terminate_record(svc: &Services, ctx: &RequestContext, app: &str, record_name: &str) -> Result<WorkflowRecord> {
    let (mut record, mut live, mut status) = live_and_record(svc, ctx, app, record_name).await?;
    terminate_status(&mut status);
    live.status.get_or_insert_with(Default::default).workflow = Some(status.clone());
    cp(ctx, "patch application status", svc.control_plane.patch_application_status(&live)).await?;
    sync_workflow_status(svc, ctx, &mut record, &status).await?;
    info!(app=%app, record=%record_name, "workflow terminated");
    Ok(record)
}

pub async fn resume_record(svc: &Services, ctx: &RequestContext, app: &str, record_name: &str) -> Result<WorkflowRecord> {
    let (mut record, mut live, mut status) = live_and_record(svc, ctx, app, record_name).await?;
    if !status.suspend {
        return Ok(record);
    }
    status.suspend = false;
    for step in status.steps.iter_mut() {
        if step.step.step_type == keys::STEP_TYPE_SUSPEND && step.step.phase == Some(StepPhase::Running) {
            step.step.phase = Some(StepPhase::Succeeded);
        }
    }
    live.status.get_or_insert_with(Default::default).workflow = Some(status.clone());
    cp(ctx, "patch application status", svc.control_plane.patch_application_status(&live)).await?;
    sync_workflow_status(svc, ctx, &mut record, &status).await?;
    info!(app=%app, record=%record_name, "workflow resumed");
    Ok(record)
}

fn is_running(status: &WorkflowStatus) -> bool { !status.finished && !status.suspend && !status.terminated }

#[derive(Debug, Clone)]
pub struct RollbackOutcome {
    pub record: WorkflowRecord,
    pub revision: ApplicationRevision,
}

/// Re-applies the snapshot of `target_version` (default: newest complete revision of the
/// record's workflow) as a new revision and run. The record's own revision is marked
/// `rollback` and defers to the target.
pub async fn rollback_record(svc: &Services, ctx: &RequestContext, app_name: &str, record_name: &str, target_version: Option<&str>) -> Result<RollbackOutcome> {
    let app = repository::get_application(svc, ctx, app_name).await?;
    let record = repository::get_record(svc, ctx, app_name, record_name).await?;
    let wf = repository::get_workflow(svc, ctx, app_name, &record.workflow_name).await?;
    let live = live_for_record(svc, ctx, &record).await?;
    if live.as_ref().and_then(|l| l.workflow_status()).is_some_and(is_running) {
        return Err(Error::WorkflowRunning);
    }
    let target = match target_version.filter(|v| !v.is_empty()) {
        Some(v) => repository::get_revision(svc, ctx, app_name, v).await?,
        None => {
            let filter = by_app(app_name)
                .eq("workflowName", wf.name.as_str())
                .eq("envName", wf.env_name.as_str())
                .eq("status", RevisionStatus::Complete.as_str());
            ctx.run(svc.store.first::<ApplicationRevision>(&filter)).await?.ok_or(Error::NoReadyRevision)?
        }
    };
    let snapshot = revision::decode_snapshot(&target)?;
    let mut manifest = match live {
        Some(mut live) => {
            live.spec.components = snapshot.spec.components;
            live.spec.policies = snapshot.spec.policies;
            live.status = None;
            live
        }
        None => snapshot,
    };
    let version = generate_version("");
    manifest.set_annotation(keys::ANNOTATION_DEPLOY_VERSION, version.clone());
    manifest.set_annotation(keys::ANNOTATION_PUBLISH_VERSION, generate_version(&wf.name));
    manifest.set_annotation(keys::ANNOTATION_WORKFLOW_NAME, wf.name.clone());

    let now = Utc::now();
    let mut rev = ApplicationRevision {
        app_primary_key: app.name.clone(),
        version: version.clone(),
        apply_app_config: revision::snapshot(&manifest)?,
        status: RevisionStatus::Init,
        reason: String::new(),
        deploy_user: ctx.user.clone(),
        note: format!("rollback to {}", target.version),
        trigger_type: "rollback".into(),
        workflow_name: wf.name.clone(),
        env_name: wf.env_name.clone(),
        code_info: target.code_info.clone(),
        image_info: target.image_info.clone(),
        rollback_version: None,
        create_time: now,
        update_time: now,
    };
    ctx.run(svc.store.add(&rev)).await?;

    let applied = match cp(ctx, "apply application", svc.control_plane.apply_application(&manifest)).await {
        Ok(applied) => applied,
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => {
            let reason = e.to_string();
            revision::transition(svc, ctx, &mut rev, RevisionStatus::Fail, Some(&reason)).await?;
            return Err(Error::DeployApplyFail(anyhow::anyhow!(reason)));
        }
    };

    match repository::get_revision(svc, ctx, app_name, &record.revision_primary_key).await {
        Ok(mut source) if source.version != target.version => {
            source.rollback_version = Some(target.version.clone());
            if let Err(e) = advance(svc, ctx, &mut source, RevisionStatus::Rollback, None).await {
                warn!(app=%app_name, version=%source.version, error=%e, "failed to mark rolled back revision");
            }
        }
        Ok(_) => {}
        Err(Error::RevisionNotExist(_)) => {}
        Err(e) => return Err(e),
    }
    let new_record = create_workflow_record(svc, ctx, app_name, &applied, &wf).await?;
    revision::transition(svc, ctx, &mut rev, RevisionStatus::Running, None).await?;
    info!(app=%app_name, from=%record.revision_primary_key, to=%target.version, version=%version, "rolled back");
    Ok(RollbackOutcome { record: new_record, revision: rev })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, phase: StepPhase, reason: &str) -> WorkflowStepStatus {
        WorkflowStepStatus {
            step: StepStatus { name: name.into(), phase: Some(phase), reason: reason.into(), ..Default::default() },
            sub_steps_status: vec![StepStatus { name: format!("{name}-sub"), phase: Some(StepPhase::Running), ..Default::default() }],
        }
    }

    #[test]
    fn terminate_marks_running_steps_failed_with_reason() {
        let mut st = WorkflowStatus {
            suspend: true,
            steps: vec![
                step("a", StepPhase::Running, ""),
                step("b", StepPhase::Failed, "Crashed"),
                step("c", StepPhase::Failed, keys::REASON_TIMEOUT),
                step("d", StepPhase::Succeeded, ""),
            ],
            ..Default::default()
        };
        terminate_status(&mut st);
        assert!(st.terminated && !st.suspend);
        assert_eq!(st.steps[0].step.phase, Some(StepPhase::Failed));
        assert_eq!(st.steps[0].step.reason, keys::REASON_TERMINATE);
        assert_eq!(st.steps[0].sub_steps_status[0].reason, keys::REASON_TERMINATE);
        assert_eq!(st.steps[1].step.reason, keys::REASON_TERMINATE);
        assert_eq!(st.steps[2].step.reason, keys::REASON_TIMEOUT);
        assert_eq!(st.steps[3].step.phase, Some(StepPhase::Succeeded));
        assert!(st.steps[3].step.reason.is_empty());
    }

    #[test]
    fn merge_keeps_aliases_and_appends_unknown_steps() {
        let existing = vec![RecordStepStatus { name: "a".into(), alias: "Deploy A".into(), ..Default::default() }];
        let merged = merge_steps(&existing, &[step("a", StepPhase::Running, ""), step("z", StepPhase::Pending, "")]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].alias, "Deploy A");
        assert_eq!(merged[0].phase, Some(StepPhase::Running));
        assert_eq!(merged[0].sub_steps_status.len(), 1);
        assert_eq!(merged[1].name, "z");
    }

    #[test]
    fn revision_status_follows_workflow_outcome() {
        let mut st = WorkflowStatus { phase: WorkflowRunPhase::Succeeded, finished: true, ..Default::default() };
        assert_eq!(revision_status_for(&st).0, RevisionStatus::Complete);
        st.phase = WorkflowRunPhase::Executing;
        st.finished = false;
        assert_eq!(revision_status_for(&st).0, RevisionStatus::Running);
        st.phase = WorkflowRunPhase::Failed;
        let (to, reason) = revision_status_for(&st);
        assert_eq!(to, RevisionStatus::Terminated);
        assert!(reason.is_some());
        st.phase = WorkflowRunPhase::Executing;
        st.terminated = true;
        assert_eq!(revision_status_for(&st).0, RevisionStatus::Terminated);
    }
}
