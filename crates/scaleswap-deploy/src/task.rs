//! Task parameters and the execution envelope.
//!
//! Every invocation arrives as one [`TaskParameters`] value. Synchronous
//! queries propagate their errors to the caller. Workflow tasks never
//! fail outward: errors are logged on the `scaleswap::task_errors` target
//! and returned as a [`TaskStatus::Failure`] result.

use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, Instrument};

use scaleswap_core::{
    DeployerConfig, DeploymentContext, InstanceInfo, LoadBalancerRouteDetail,
    PreDeploymentSnapshot, ScaleSetRevision, Scope,
};
use scaleswap_gateway::{CommandStatus, ExecutionLogSink, LogLevel};

use crate::error::{DeployError, Result};
use crate::resize::{DeployResult, ResizeOrchestrator, ResizeOrder, ResizeTarget};
use crate::retention::{RetentionManager, RetentionPolicy};
use crate::revision::list_owned;
use crate::rollback::RollbackOrchestrator;
use crate::setup::{SetupOrchestrator, SetupResult};
use crate::steady::SteadyStateWaiter;
use crate::switch::{SwitchRouteResult, TrafficSwitchOrchestrator};
use crate::{units, Gateways};

/// Tracing target for workflow task errors and the success marker.
pub const TASK_ERRORS_TARGET: &str = "scaleswap::task_errors";

/// Marker logged when a workflow task finishes without error.
pub const NO_ERROR_MARKER: &str = "No error";

/// Logging metadata carried by every task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub account_id: String,
    pub app_id: String,
    pub activity_id: String,
    #[serde(default)]
    pub command_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskParameters {
    Setup(SetupParams),
    Deploy(DeployParams),
    Rollback(RollbackParams),
    SwitchRoute(SwitchRouteParams),
    SyncQuery(SyncQueryParams),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupParams {
    pub meta: TaskMeta,
    pub context: DeploymentContext,
    #[serde(default)]
    pub route: Option<LoadBalancerRouteDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployParams {
    pub meta: TaskMeta,
    pub subscription_id: String,
    pub resource_group: String,
    #[serde(default)]
    pub timeout_minutes: i32,
    pub new: ResizeTarget,
    #[serde(default)]
    pub old: Option<ResizeTarget>,
    /// Overrides the configured order when set.
    #[serde(default)]
    pub resize_new_first: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackParams {
    pub meta: TaskMeta,
    pub subscription_id: String,
    pub resource_group: String,
    #[serde(default)]
    pub timeout_minutes: i32,
    pub new_scale_set: String,
    #[serde(default)]
    pub snapshot: Option<PreDeploymentSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchRouteParams {
    pub meta: TaskMeta,
    pub subscription_id: String,
    pub resource_group: String,
    #[serde(default)]
    pub timeout_minutes: i32,
    pub new_scale_set: String,
    pub old_scale_set: String,
    #[serde(default)]
    pub route: Option<LoadBalancerRouteDetail>,
    #[serde(default)]
    pub downscale_old: bool,
    /// Reverse a previous swap instead of performing one.
    #[serde(default)]
    pub rollback: bool,
    #[serde(default)]
    pub snapshot: Option<PreDeploymentSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueryParams {
    pub meta: TaskMeta,
    pub subscription_id: String,
    pub resource_group: String,
    pub query: SyncQuery,
}

/// Read-only lookups answered synchronously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncQuery {
    ListScaleSets,
    GetScaleSet { name: String },
    ListOwnedRevisions { owner_id: String },
    ListInstances { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SyncResult {
    ScaleSets(Vec<ScaleSetRevision>),
    ScaleSet(Option<ScaleSetRevision>),
    Instances(Vec<InstanceInfo>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TaskPayload {
    Setup(SetupResult),
    Deploy(DeployResult),
    SwitchRoute(SwitchRouteResult),
    Sync(SyncResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    #[serde(default)]
    pub payload: Option<TaskPayload>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TaskResult {
    pub fn success(payload: TaskPayload) -> Self {
        Self {
            status: TaskStatus::Success,
            payload: Some(payload),
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failure,
            payload: None,
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

impl TaskParameters {
    pub fn meta(&self) -> &TaskMeta {
        match self {
            TaskParameters::Setup(p) => &p.meta,
            TaskParameters::Deploy(p) => &p.meta,
            TaskParameters::Rollback(p) => &p.meta,
            TaskParameters::SwitchRoute(p) => &p.meta,
            TaskParameters::SyncQuery(p) => &p.meta,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TaskParameters::Setup(_) => "setup",
            TaskParameters::Deploy(_) => "deploy",
            TaskParameters::Rollback(_) => "rollback",
            TaskParameters::SwitchRoute(_) => "switch_route",
            TaskParameters::SyncQuery(_) => "sync_query",
        }
    }

    /// Synchronous tasks propagate errors instead of returning a failure.
    pub fn is_sync(&self) -> bool {
        matches!(self, TaskParameters::SyncQuery(_))
    }
}

/// Runs tasks against one pair of gateways.
#[derive(Clone)]
pub struct TaskExecutor {
    gateways: Gateways,
    config: DeployerConfig,
}

impl TaskExecutor {
    pub fn new(gateways: Gateways, config: DeployerConfig) -> Self {
        Self { gateways, config }
    }

    /// Run one task.
    ///
    /// Only synchronous queries return `Err`. Workflow tasks always come
    /// back as `Ok`, with failures carried in the [`TaskResult`].
    pub async fn execute(
        &self,
        params: &TaskParameters,
        log: &dyn ExecutionLogSink,
    ) -> Result<TaskResult> {
        let meta = params.meta();
        let span = info_span!(
            "task",
            kind = params.kind(),
            account = %meta.account_id,
            app = %meta.app_id,
            activity = %meta.activity_id,
        );

        self.run(params, log).instrument(span).await
    }

    async fn run(&self, params: &TaskParameters, log: &dyn ExecutionLogSink) -> Result<TaskResult> {
        if params.is_sync() {
            let payload = self.dispatch(params, log).await?;
            return Ok(TaskResult::success(payload));
        }
        Ok(self.run_workflow(params, log).await)
    }

    async fn run_workflow(&self, params: &TaskParameters, log: &dyn ExecutionLogSink) -> TaskResult {
        let activity = &params.meta().activity_id;
        match self.dispatch(params, log).await {
            Ok(payload) => {
                info!(target: TASK_ERRORS_TARGET, activity = %activity, "{}", NO_ERROR_MARKER);
                log.done(units::EXECUTE, NO_ERROR_MARKER);
                TaskResult::success(payload)
            }
            Err(e) => {
                error!(
                    target: TASK_ERRORS_TARGET,
                    activity = %activity,
                    task = params.kind(),
                    error = %e,
                    "task failed"
                );
                let message = e.to_string();
                log.log(units::EXECUTE, &message, LogLevel::Error, CommandStatus::Failure);
                TaskResult::failure(message)
            }
        }
    }

    async fn dispatch(
        &self,
        params: &TaskParameters,
        log: &dyn ExecutionLogSink,
    ) -> Result<TaskPayload> {
        match params {
            TaskParameters::Setup(p) => self.setup(p, log).await.map(TaskPayload::Setup),
            TaskParameters::Deploy(p) => self.deploy(p, log).await.map(TaskPayload::Deploy),
            TaskParameters::Rollback(p) => self.rollback(p, log).await.map(TaskPayload::Deploy),
            TaskParameters::SwitchRoute(p) => {
                self.switch_route(p, log).await.map(TaskPayload::SwitchRoute)
            }
            TaskParameters::SyncQuery(p) => self.sync_query(p).await.map(TaskPayload::Sync),
        }
    }

    fn waiter(&self, timeout_minutes: i32) -> SteadyStateWaiter {
        SteadyStateWaiter::new(
            self.config.steady_state_timeout(timeout_minutes),
            self.config.poll_interval(),
        )
    }

    fn resizer(&self, waiter: SteadyStateWaiter) -> ResizeOrchestrator {
        ResizeOrchestrator::new(self.gateways.clone(), waiter)
    }

    async fn setup(&self, p: &SetupParams, log: &dyn ExecutionLogSink) -> Result<SetupResult> {
        require("owner id", &p.context.owner_id)?;
        require("name prefix", &p.context.name_prefix)?;
        require("base scale set name", &p.context.base_scale_set_name)?;

        let waiter = self.waiter(p.context.timeout_minutes);
        let retention = RetentionManager::new(self.gateways.clone(), self.resizer(waiter));
        SetupOrchestrator::new(
            self.gateways.clone(),
            retention,
            RetentionPolicy::new(self.config.keep_count()),
            waiter,
            self.config.default_bounds(),
        )
        .setup(&p.context, p.route.as_ref(), log)
        .await
    }

    async fn deploy(&self, p: &DeployParams, log: &dyn ExecutionLogSink) -> Result<DeployResult> {
        require("new scale set name", &p.new.name)?;
        let order = ResizeOrder::from_new_first(
            p.resize_new_first
                .unwrap_or_else(|| self.config.resize_new_first()),
        );
        let scope = Scope::new(&p.subscription_id, &p.resource_group);
        self.resizer(self.waiter(p.timeout_minutes))
            .resize_scale_sets(&scope, order, &p.new, p.old.as_ref(), log)
            .await
    }

    async fn rollback(&self, p: &RollbackParams, log: &dyn ExecutionLogSink) -> Result<DeployResult> {
        require("new scale set name", &p.new_scale_set)?;
        let scope = Scope::new(&p.subscription_id, &p.resource_group);
        let resize = self.resizer(self.waiter(p.timeout_minutes));
        RollbackOrchestrator::new(self.gateways.clone(), resize)
            .rollback(&scope, &p.new_scale_set, p.snapshot.as_ref(), log)
            .await
    }

    async fn switch_route(
        &self,
        p: &SwitchRouteParams,
        log: &dyn ExecutionLogSink,
    ) -> Result<SwitchRouteResult> {
        let scope = Scope::new(&p.subscription_id, &p.resource_group);
        let waiter = self.waiter(p.timeout_minutes);
        let switch =
            TrafficSwitchOrchestrator::new(self.gateways.clone(), self.resizer(waiter), waiter);
        if p.rollback {
            switch
                .rollback(
                    &scope,
                    &p.new_scale_set,
                    &p.old_scale_set,
                    p.route.as_ref(),
                    p.snapshot.as_ref(),
                    log,
                )
                .await
        } else {
            switch
                .swap(
                    &scope,
                    &p.new_scale_set,
                    &p.old_scale_set,
                    p.route.as_ref(),
                    p.downscale_old,
                    log,
                )
                .await
        }
    }

    async fn sync_query(&self, p: &SyncQueryParams) -> Result<SyncResult> {
        let scope = Scope::new(&p.subscription_id, &p.resource_group);
        let compute = self.gateways.compute.as_ref();
        Ok(match &p.query {
            SyncQuery::ListScaleSets => {
                SyncResult::ScaleSets(compute.list_by_resource_group(&scope).await?)
            }
            SyncQuery::GetScaleSet { name } => {
                SyncResult::ScaleSet(compute.get_by_name(&scope, name).await?)
            }
            SyncQuery::ListOwnedRevisions { owner_id } => {
                SyncResult::ScaleSets(list_owned(compute, &scope, owner_id).await?)
            }
            SyncQuery::ListInstances { name } => {
                let resize = self.resizer(self.waiter(0));
                SyncResult::Instances(resize.collect_instances(&scope, name).await?)
            }
        })
    }
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DeployError::Validation(format!("{what} is blank")));
    }
    Ok(())
}
