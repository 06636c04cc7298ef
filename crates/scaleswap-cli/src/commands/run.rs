//! `scaleswap run`: execute one task against a simulated cloud document.
//!
//! With `--state-dir`, a successful setup is persisted per owner and its
//! snapshot is supplied to later rollback tasks that carry none.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, info};

use scaleswap_core::{DeployerConfig, Scope};
use scaleswap_deploy::{Gateways, TaskExecutor, TaskParameters, TaskPayload, TaskResult};
use scaleswap_gateway::{CloudDocument, InMemoryCloud, TracingLogSink};
use scaleswap_state::{SetupRecord, StateStore};

pub async fn run(
    task: &Path,
    cloud: &Path,
    config: Option<&Path>,
    state_dir: Option<&Path>,
) -> Result<TaskResult> {
    let config = match config {
        Some(path) => DeployerConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => DeployerConfig::default(),
    };

    let raw = std::fs::read_to_string(task)
        .with_context(|| format!("failed to read task {}", task.display()))?;
    let mut params: TaskParameters = serde_json::from_str(&raw)
        .with_context(|| format!("invalid task parameters in {}", task.display()))?;

    let document = load_cloud(cloud)?;
    let sim = Arc::new(InMemoryCloud::from_document(document));

    let store = state_dir.map(StateStore::open_dir).transpose()?;
    if let Some(store) = &store {
        fill_snapshot(&mut params, store)?;
    }

    info!(task = params.kind(), activity = %params.meta().activity_id, "running task");
    let executor = TaskExecutor::new(Gateways::new(sim.clone(), sim.clone()), config);
    let log = TracingLogSink::new(&params.meta().activity_id);
    let outcome = executor.execute(&params, &log).await;

    // Partial changes from a failed task are kept, like the real provider would.
    save_cloud(cloud, &sim.document())?;
    let result = outcome?;

    if let Some(store) = &store {
        persist(&params, &result, store)?;
    }
    Ok(result)
}

fn load_cloud(path: &Path) -> Result<CloudDocument> {
    if !path.exists() {
        debug!(path = %path.display(), "no cloud document, starting empty");
        return Ok(CloudDocument::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read cloud document {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid cloud document in {}", path.display()))
}

fn save_cloud(path: &Path, document: &CloudDocument) -> Result<()> {
    let json = serde_json::to_string_pretty(document)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write cloud document {}", path.display()))
}

/// Supply the persisted snapshot to rollback tasks that carry none.
fn fill_snapshot(params: &mut TaskParameters, store: &StateStore) -> Result<()> {
    let (scope, new_scale_set, snapshot) = match params {
        TaskParameters::Rollback(p) => (
            Scope::new(&p.subscription_id, &p.resource_group),
            p.new_scale_set.clone(),
            &mut p.snapshot,
        ),
        TaskParameters::SwitchRoute(p) if p.rollback => (
            Scope::new(&p.subscription_id, &p.resource_group),
            p.new_scale_set.clone(),
            &mut p.snapshot,
        ),
        _ => return Ok(()),
    };
    if snapshot.is_some() {
        return Ok(());
    }
    if let Some(record) = store.find_by_scale_set(&scope, &new_scale_set)? {
        info!(owner = %record.owner_id, scale_set = %new_scale_set, "using persisted snapshot");
        *snapshot = record.snapshot().cloned();
    }
    Ok(())
}

fn persist(params: &TaskParameters, result: &TaskResult, store: &StateStore) -> Result<()> {
    if !result.is_success() {
        return Ok(());
    }
    match (params, &result.payload) {
        (TaskParameters::Setup(p), Some(TaskPayload::Setup(setup))) => {
            let record = SetupRecord::new(
                &p.context.owner_id,
                &p.context.scope(),
                epoch_secs(),
                setup.clone(),
            );
            store.put_setup(&record)?;
        }
        (TaskParameters::Rollback(p), _) => {
            let scope = Scope::new(&p.subscription_id, &p.resource_group);
            forget(store, &scope, &p.new_scale_set)?;
        }
        (TaskParameters::SwitchRoute(p), _) if p.rollback => {
            let scope = Scope::new(&p.subscription_id, &p.resource_group);
            forget(store, &scope, &p.new_scale_set)?;
        }
        _ => {}
    }
    Ok(())
}

/// Drop the setup record of a revision the task has deleted.
fn forget(store: &StateStore, scope: &Scope, new_scale_set: &str) -> Result<()> {
    if let Some(record) = store.find_by_scale_set(scope, new_scale_set)? {
        debug!(owner = %record.owner_id, scale_set = %new_scale_set, "dropping setup record");
        store.delete_setup(&record.owner_id)?;
    }
    Ok(())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
