//! Deploy rollback: restore the old revision first, then drain and delete
//! the new one.
//!
//! The new revision is deleted only after both resizes succeed. On any
//! failure it is left in place for inspection or a retried rollback.

use tracing::info;

use scaleswap_core::{PreDeploymentSnapshot, Scope};
use scaleswap_gateway::ExecutionLogSink;

use crate::error::Result;
use crate::resize::{DeployResult, ResizeOrchestrator, ResizeOrder, ResizeTarget};
use crate::{units, Gateways};

#[derive(Clone)]
pub struct RollbackOrchestrator {
    gateways: Gateways,
    resize: ResizeOrchestrator,
}

impl RollbackOrchestrator {
    pub fn new(gateways: Gateways, resize: ResizeOrchestrator) -> Self {
        Self { gateways, resize }
    }

    pub async fn rollback(
        &self,
        scope: &Scope,
        new: &str,
        snapshot: Option<&PreDeploymentSnapshot>,
        log: &dyn ExecutionLogSink,
    ) -> Result<DeployResult> {
        let old = snapshot.map(|s| {
            ResizeTarget::new(
                &s.old_scale_set_name,
                s.bounds(),
                s.scaling_policy_jsons.clone(),
            )
        });
        if old.is_none() {
            log.warn(
                units::ROLLBACK,
                "No pre-deployment snapshot; only the new scale set is removed",
            );
        }

        let result = self
            .resize
            .resize_scale_sets(
                scope,
                ResizeOrder::OldFirst,
                &ResizeTarget::drain(new),
                old.as_ref(),
                log,
            )
            .await?;

        log.info(units::ROLLBACK, &format!("Deleting scale set {new}"));
        self.gateways
            .compute
            .delete(scope, &[new.to_string()])
            .await?;

        info!(
            removed = new,
            restored = ?snapshot.map(|s| &s.old_scale_set_name),
            "deploy rolled back"
        );
        log.done(units::ROLLBACK, &format!("Rolled back and deleted {new}"));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use scaleswap_gateway::{GatewayCall, InMemoryCloud, MemoryLogSink, Operation};

    use crate::steady::SteadyStateWaiter;
    use crate::DeployError;

    fn scope() -> Scope {
        Scope::new("sub", "rg")
    }

    fn orchestrator(cloud: &InMemoryCloud) -> RollbackOrchestrator {
        let cloud = Arc::new(cloud.clone());
        let gateways = Gateways::new(cloud.clone(), cloud);
        let waiter = SteadyStateWaiter::new(Duration::from_millis(80), Duration::from_millis(5));
        RollbackOrchestrator::new(gateways.clone(), ResizeOrchestrator::new(gateways, waiter))
    }

    fn snapshot() -> PreDeploymentSnapshot {
        PreDeploymentSnapshot {
            old_scale_set_name: "web__1".to_string(),
            desired_capacity_at_snapshot: 2,
            min_capacity: 0,
            max_capacity: 4,
            scaling_policy_jsons: vec!["policy-1".to_string()],
        }
    }

    #[tokio::test]
    async fn restores_old_before_draining_new_then_deletes() {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__1", 0, &[]);
        cloud.insert_scale_set(&scope(), "web__2", 4, &[]);

        let result = orchestrator(&cloud)
            .rollback(&scope(), "web__2", Some(&snapshot()), &MemoryLogSink::new())
            .await
            .unwrap();

        assert_eq!(
            cloud.capacity_updates(),
            vec![("web__1".to_string(), 2), ("web__2".to_string(), 0)]
        );
        assert_eq!(result.old_instances.len(), 2);
        assert!(result.new_instances.is_empty());
        assert!(cloud.scale_set(&scope(), "web__2").is_none());
        assert_eq!(
            cloud.journal().last(),
            Some(&GatewayCall::Delete(vec!["web__2".to_string()]))
        );
        let policy = cloud.autoscale_setting(&scope(), "web__1").unwrap();
        assert_eq!(policy.capacity.maximum, 4);
    }

    #[tokio::test]
    async fn failed_resize_keeps_new_scale_set() {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__1", 0, &[]);
        cloud.insert_scale_set(&scope(), "web__2", 4, &[]);
        cloud.stall(&scope(), "web__1");

        let err = orchestrator(&cloud)
            .rollback(&scope(), "web__2", Some(&snapshot()), &MemoryLogSink::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Timeout { .. }));
        assert!(cloud.scale_set(&scope(), "web__2").is_some());
        assert!(!cloud
            .journal()
            .iter()
            .any(|c| c.operation() == Operation::Delete));
    }

    #[tokio::test]
    async fn without_snapshot_only_new_is_removed() {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__2", 4, &[]);
        let log = MemoryLogSink::new();

        orchestrator(&cloud)
            .rollback(&scope(), "web__2", None, &log)
            .await
            .unwrap();
        assert_eq!(cloud.capacity_updates(), vec![("web__2".to_string(), 0)]);
        assert!(cloud.scale_set(&scope(), "web__2").is_none());
        assert!(log.contains("No pre-deployment snapshot"));
    }
}
