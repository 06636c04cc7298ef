//! scaleswap blue/green deployments for elastic VM scale sets.
//!
//! This crate creates new scale-set revisions, resizes old and new sets
//! in a controlled order, moves production traffic between them through
//! load-balancer pool membership, and rolls back on failure.
//!
//! # Components
//!
//! - **`revision`**: owned revisions, active revision, next revision number
//! - **`retention`**: downsize/delete old revisions per keep-count
//! - **`setup`**: clone the base scale set into a new tagged revision
//! - **`resize`**: ordered resize of two scale sets with policy detach/reattach
//! - **`switch`**: production pool swap and its reverse
//! - **`rollback`**: reverse-ordered resize, then delete the new revision
//! - **`task`**: task parameters and the execution envelope
//!
//! Every step runs sequentially. The only suspension points are bounded
//! steady-state waits (`steady`).

use std::sync::Arc;

use scaleswap_gateway::{AutoscaleGateway, ComputeGateway};

pub mod error;
pub mod resize;
pub mod retention;
pub mod revision;
pub mod rollback;
pub mod setup;
pub mod steady;
pub mod switch;
pub mod task;
pub mod units;

pub use error::DeployError;
pub use resize::{DeployResult, ResizeOrchestrator, ResizeOrder, ResizeTarget};
pub use retention::{RetentionManager, RetentionPlan, RetentionPolicy, RetentionSummary};
pub use rollback::RollbackOrchestrator;
pub use setup::{SetupOrchestrator, SetupResult};
pub use steady::SteadyStateWaiter;
pub use switch::{SwitchDirection, SwitchRouteResult, TrafficSwitchOrchestrator};
pub use task::{
    DeployParams, RollbackParams, SetupParams, SwitchRouteParams, SyncQuery, SyncQueryParams,
    SyncResult, TaskExecutor, TaskMeta, TaskParameters, TaskPayload, TaskResult, TaskStatus,
};

/// The two provider gateways every orchestrator calls through.
#[derive(Clone)]
pub struct Gateways {
    pub compute: Arc<dyn ComputeGateway>,
    pub autoscale: Arc<dyn AutoscaleGateway>,
}

impl Gateways {
    pub fn new(compute: Arc<dyn ComputeGateway>, autoscale: Arc<dyn AutoscaleGateway>) -> Self {
        Self { compute, autoscale }
    }
}
