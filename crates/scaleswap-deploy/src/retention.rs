//! Retention of old revisions.
//!
//! The keep-count includes the active revision. The next `keep_count - 1`
//! newest revisions are kept as zero-capacity standbys; anything older is
//! deleted in one bulk call. Failures here are fatal to setup.

use serde::{Deserialize, Serialize};
use tracing::info;

use scaleswap_core::{ScaleSetRevision, Scope};
use scaleswap_gateway::ExecutionLogSink;

use crate::error::Result;
use crate::resize::{ResizeOrchestrator, ResizeTarget};
use crate::{units, Gateways};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_count: usize,
}

/// Revisions to drain and revisions to delete, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionPlan {
    pub standby: Vec<ScaleSetRevision>,
    pub delete: Vec<ScaleSetRevision>,
}

/// What retention actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSummary {
    /// Kept, at capacity zero.
    pub standby: Vec<String>,
    /// Standbys that still had capacity and were scaled to zero.
    pub downsized: Vec<String>,
    pub deleted: Vec<String>,
}

impl RetentionPolicy {
    pub fn new(keep_count: usize) -> Self {
        Self { keep_count }
    }

    /// Standby slots left once the active revision has taken its slot.
    pub fn standby_slots(&self) -> usize {
        self.keep_count.saturating_sub(1)
    }

    /// Split every revision except the active one into standbys and deletions.
    ///
    /// Expects `owned` newest first.
    pub fn plan(&self, owned: &[ScaleSetRevision], active: Option<&str>) -> RetentionPlan {
        let mut others = owned
            .iter()
            .filter(|ss| Some(ss.name.as_str()) != active)
            .cloned();
        let standby = others.by_ref().take(self.standby_slots()).collect();
        let delete = others.collect();
        RetentionPlan { standby, delete }
    }
}

#[derive(Clone)]
pub struct RetentionManager {
    gateways: Gateways,
    resize: ResizeOrchestrator,
}

impl RetentionManager {
    pub fn new(gateways: Gateways, resize: ResizeOrchestrator) -> Self {
        Self { gateways, resize }
    }

    pub async fn apply(
        &self,
        scope: &Scope,
        plan: &RetentionPlan,
        log: &dyn ExecutionLogSink,
    ) -> Result<RetentionSummary> {
        let mut summary = RetentionSummary::default();

        for ss in &plan.standby {
            summary.standby.push(ss.name.clone());
            if ss.capacity == 0 {
                log.info(
                    units::RETENTION,
                    &format!("Scale set {} already at zero capacity", ss.name),
                );
                continue;
            }
            self.resize
                .resize_scale_set(scope, &ResizeTarget::drain(&ss.name), units::RETENTION, log)
                .await?;
            summary.downsized.push(ss.name.clone());
        }

        if !plan.delete.is_empty() {
            let names: Vec<String> = plan.delete.iter().map(|ss| ss.name.clone()).collect();
            log.info(
                units::RETENTION,
                &format!("Deleting old scale sets: {}", names.join(", ")),
            );
            self.gateways.compute.delete(scope, &names).await?;
            summary.deleted = names;
        }

        info!(
            standby = summary.standby.len(),
            downsized = summary.downsized.len(),
            deleted = summary.deleted.len(),
            "retention applied"
        );
        log.done(units::RETENTION, "Old revisions downsized");
        Ok(summary)
    }
}
