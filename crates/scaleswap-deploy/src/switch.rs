//! Traffic switch between two revisions through production pool membership.
//!
//! A swap moves the new revision from the stage pool into the production
//! pool and takes the old one out. The reverse path restores the old
//! revision's capacity and policy before it rejoins production, then tears
//! the new revision down and deletes it. All preconditions are checked
//! before the first gateway call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use scaleswap_core::{
    DeploymentColor, LoadBalancerRouteDetail, PreDeploymentSnapshot, Scope, TAG_BG_VERSION,
};
use scaleswap_gateway::ExecutionLogSink;

use crate::error::{DeployError, Result};
use crate::resize::{ResizeOrchestrator, ResizeTarget};
use crate::steady::SteadyStateWaiter;
use crate::{units, Gateways};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchDirection {
    Swap,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchRouteResult {
    pub direction: SwitchDirection,
    /// Member of the production pool once the switch completed.
    pub production_scale_set: String,
    pub standby_scale_set: String,
    /// Set when the rollback path deleted the new revision.
    #[serde(default)]
    pub deleted: Option<String>,
}

#[derive(Clone)]
pub struct TrafficSwitchOrchestrator {
    gateways: Gateways,
    resize: ResizeOrchestrator,
    waiter: SteadyStateWaiter,
}

impl TrafficSwitchOrchestrator {
    pub fn new(gateways: Gateways, resize: ResizeOrchestrator, waiter: SteadyStateWaiter) -> Self {
        Self {
            gateways,
            resize,
            waiter,
        }
    }

    /// Move production traffic from `old` to `new`.
    pub async fn swap(
        &self,
        scope: &Scope,
        new: &str,
        old: &str,
        route: Option<&LoadBalancerRouteDetail>,
        downscale_old: bool,
        log: &dyn ExecutionLogSink,
    ) -> Result<SwitchRouteResult> {
        let route = validate(new, old, route)?;
        let compute = self.gateways.compute.as_ref();
        let unit = units::SWAP_ROUTES;
        let lb = route.load_balancer_name.as_str();

        log.info(
            unit,
            &format!("Detaching {new} from stage pool {}", route.stage_backend_pool),
        );
        compute
            .detach_from_pool(scope, new, lb, &route.stage_backend_pool)
            .await?;
        self.waiter.wait(compute, scope, new, unit, log).await?;

        log.info(
            unit,
            &format!("Attaching {new} to production pool {}", route.prod_backend_pool),
        );
        compute
            .attach_to_pool(scope, new, lb, &route.prod_backend_pool)
            .await?;
        self.waiter.wait(compute, scope, new, unit, log).await?;
        self.tag_color(scope, new, DeploymentColor::Green, unit, log)
            .await?;

        log.info(
            unit,
            &format!("Detaching {old} from production pool {}", route.prod_backend_pool),
        );
        compute
            .detach_from_pool(scope, old, lb, &route.prod_backend_pool)
            .await?;
        self.waiter.wait(compute, scope, old, unit, log).await?;

        self.clear_policy(scope, old, unit, log).await?;

        if downscale_old {
            log.info(unit, &format!("Downscaling {old} to zero instances"));
            compute.update_capacity(scope, old, 0).await?;
            self.waiter.wait(compute, scope, old, unit, log).await?;
        }
        self.tag_color(scope, old, DeploymentColor::Blue, unit, log)
            .await?;

        info!(production = new, standby = old, "routes swapped");
        log.done(unit, &format!("Production traffic now served by {new}"));
        Ok(SwitchRouteResult {
            direction: SwitchDirection::Swap,
            production_scale_set: new.to_string(),
            standby_scale_set: old.to_string(),
            deleted: None,
        })
    }

    /// Undo a swap: `old` back into production with its snapshot capacity
    /// and policy, `new` drained and deleted.
    pub async fn rollback(
        &self,
        scope: &Scope,
        new: &str,
        old: &str,
        route: Option<&LoadBalancerRouteDetail>,
        snapshot: Option<&PreDeploymentSnapshot>,
        log: &dyn ExecutionLogSink,
    ) -> Result<SwitchRouteResult> {
        let route = validate(new, old, route)?;
        let snapshot = snapshot.ok_or_else(|| {
            DeployError::Validation("route rollback requires a pre-deployment snapshot".into())
        })?;
        let compute = self.gateways.compute.as_ref();
        let unit = units::ROLLBACK_ROUTES;
        let lb = route.load_balancer_name.as_str();

        // Old capacity is restored before it takes production traffic again.
        let restore = ResizeTarget::new(
            old,
            snapshot.bounds(),
            snapshot.scaling_policy_jsons.clone(),
        );
        self.resize
            .resize_scale_set(scope, &restore, unit, log)
            .await?;

        log.info(
            unit,
            &format!("Attaching {old} to production pool {}", route.prod_backend_pool),
        );
        compute
            .attach_to_pool(scope, old, lb, &route.prod_backend_pool)
            .await?;
        self.waiter.wait(compute, scope, old, unit, log).await?;
        self.tag_color(scope, old, DeploymentColor::Green, unit, log)
            .await?;

        let mut deleted = None;
        if compute.get_by_name(scope, new).await?.is_some() {
            log.info(
                unit,
                &format!("Detaching {new} from production pool {}", route.prod_backend_pool),
            );
            compute
                .detach_from_pool(scope, new, lb, &route.prod_backend_pool)
                .await?;
            self.waiter.wait(compute, scope, new, unit, log).await?;

            self.resize
                .resize_scale_set(scope, &ResizeTarget::drain(new), unit, log)
                .await?;
            self.tag_color(scope, new, DeploymentColor::Blue, unit, log)
                .await?;

            log.info(unit, &format!("Deleting scale set {new}"));
            compute.delete(scope, &[new.to_string()]).await?;
            deleted = Some(new.to_string());
        } else {
            log.warn(unit, &format!("Scale set {new} not found, nothing to tear down"));
        }

        info!(production = old, removed = ?deleted, "routes rolled back");
        log.done(unit, &format!("Production traffic restored to {old}"));
        Ok(SwitchRouteResult {
            direction: SwitchDirection::Rollback,
            production_scale_set: old.to_string(),
            standby_scale_set: new.to_string(),
            deleted,
        })
    }

    async fn clear_policy(
        &self,
        scope: &Scope,
        name: &str,
        unit: &str,
        log: &dyn ExecutionLogSink,
    ) -> Result<()> {
        let scale_set = self
            .gateways
            .compute
            .get_by_name(scope, name)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("scale set {name}")))?;
        log.info(unit, &format!("Clearing autoscale policy of {name}"));
        self.gateways
            .autoscale
            .clear_policy(scope, &scale_set.id)
            .await?;
        Ok(())
    }

    async fn tag_color(
        &self,
        scope: &Scope,
        name: &str,
        color: DeploymentColor,
        unit: &str,
        log: &dyn ExecutionLogSink,
    ) -> Result<()> {
        log.info(unit, &format!("Tagging {name} as {}", color.as_tag()));
        let tags = BTreeMap::from([(TAG_BG_VERSION.to_string(), color.as_tag().to_string())]);
        self.gateways
            .compute
            .update_tags(scope, name, &tags)
            .await?;
        Ok(())
    }
}

fn validate<'r>(
    new: &str,
    old: &str,
    route: Option<&'r LoadBalancerRouteDetail>,
) -> Result<&'r LoadBalancerRouteDetail> {
    if new.trim().is_empty() {
        return Err(DeployError::Validation("new scale set name is blank".into()));
    }
    if old.trim().is_empty() {
        return Err(DeployError::Validation("old scale set name is blank".into()));
    }
    route.ok_or_else(|| DeployError::Validation("load balancer route detail is missing".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use scaleswap_core::ProfileCapacity;
    use scaleswap_gateway::{ComputeGateway, InMemoryCloud, MemoryLogSink, Operation};

    fn scope() -> Scope {
        Scope::new("sub", "rg")
    }

    fn route() -> LoadBalancerRouteDetail {
        LoadBalancerRouteDetail {
            load_balancer_name: "lb-web".to_string(),
            stage_backend_pool: "stage".to_string(),
            prod_backend_pool: "prod".to_string(),
        }
    }

    fn orchestrator(cloud: &InMemoryCloud) -> TrafficSwitchOrchestrator {
        let cloud = Arc::new(cloud.clone());
        let gateways = Gateways::new(cloud.clone(), cloud);
        let waiter = SteadyStateWaiter::new(Duration::from_secs(5), Duration::from_millis(5));
        TrafficSwitchOrchestrator::new(
            gateways.clone(),
            ResizeOrchestrator::new(gateways, waiter),
            waiter,
        )
    }

    /// `web__1` serving production with a policy, `web__2` staged.
    fn staged_cloud() -> InMemoryCloud {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__1", 3, &[(TAG_BG_VERSION, "green")]);
        cloud.insert_pool_member(&scope(), "web__1", "lb-web", "prod");
        cloud.insert_autoscale(
            &scope(),
            "web__1",
            &["policy-1"],
            ProfileCapacity {
                minimum: 1,
                maximum: 5,
                default: 3,
            },
        );
        cloud.insert_scale_set(&scope(), "web__2", 3, &[(TAG_BG_VERSION, "blue")]);
        cloud.insert_pool_member(&scope(), "web__2", "lb-web", "stage");
        cloud
    }

    #[tokio::test]
    async fn missing_route_issues_no_calls() {
        let cloud = staged_cloud();
        let err = orchestrator(&cloud)
            .swap(&scope(), "web__2", "web__1", None, false, &MemoryLogSink::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));
        assert!(cloud.journal().is_empty());
    }

    #[tokio::test]
    async fn blank_names_and_missing_snapshot_are_rejected() {
        let cloud = staged_cloud();
        let switch = orchestrator(&cloud);
        let log = MemoryLogSink::new();

        let err = switch
            .swap(&scope(), " ", "web__1", Some(&route()), false, &log)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));

        let err = switch
            .rollback(&scope(), "web__2", "web__1", Some(&route()), None, &log)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));
        assert!(cloud.journal().is_empty());
    }

    #[tokio::test]
    async fn swap_moves_production_membership() {
        let cloud = staged_cloud();
        let result = orchestrator(&cloud)
            .swap(&scope(), "web__2", "web__1", Some(&route()), true, &MemoryLogSink::new())
            .await
            .unwrap();

        assert_eq!(result.production_scale_set, "web__2");
        assert_eq!(cloud.pool_members("lb-web", "prod"), vec!["web__2".to_string()]);
        assert!(cloud.pool_members("lb-web", "stage").is_empty());

        let new = cloud.scale_set(&scope(), "web__2").unwrap().scale_set;
        let old = cloud.scale_set(&scope(), "web__1").unwrap().scale_set;
        assert_eq!(new.color(), Some(DeploymentColor::Green));
        assert_eq!(old.color(), Some(DeploymentColor::Blue));
        assert_eq!(old.capacity, 0);
        assert!(cloud.autoscale_setting(&scope(), "web__1").is_none());
    }

    #[tokio::test]
    async fn swap_without_downscale_keeps_old_capacity() {
        let cloud = staged_cloud();
        orchestrator(&cloud)
            .swap(&scope(), "web__2", "web__1", Some(&route()), false, &MemoryLogSink::new())
            .await
            .unwrap();
        assert!(cloud.capacity_updates().is_empty());
        assert_eq!(cloud.scale_set(&scope(), "web__1").unwrap().scale_set.capacity, 3);
    }

    #[tokio::test]
    async fn swap_then_rollback_restores_original_state() {
        let cloud = staged_cloud();
        let switch = orchestrator(&cloud);
        let snapshot = PreDeploymentSnapshot {
            old_scale_set_name: "web__1".to_string(),
            desired_capacity_at_snapshot: 3,
            min_capacity: 0,
            max_capacity: 5,
            scaling_policy_jsons: vec!["policy-1".to_string()],
        };

        switch
            .swap(&scope(), "web__2", "web__1", Some(&route()), true, &MemoryLogSink::new())
            .await
            .unwrap();
        let result = switch
            .rollback(
                &scope(),
                "web__2",
                "web__1",
                Some(&route()),
                Some(&snapshot),
                &MemoryLogSink::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.deleted.as_deref(), Some("web__2"));
        assert_eq!(cloud.pool_members("lb-web", "prod"), vec!["web__1".to_string()]);
        assert!(cloud.scale_set(&scope(), "web__2").is_none());

        let old = cloud.scale_set(&scope(), "web__1").unwrap().scale_set;
        assert_eq!(old.capacity, 3);
        assert_eq!(old.color(), Some(DeploymentColor::Green));
        let policy = cloud.autoscale_setting(&scope(), "web__1").unwrap();
        assert_eq!(policy.policies, vec!["policy-1".to_string()]);
        assert_eq!(policy.capacity.maximum, 5);
    }

    #[tokio::test]
    async fn rollback_restores_capacity_before_production_attach() {
        let cloud = staged_cloud();
        let snapshot = PreDeploymentSnapshot {
            old_scale_set_name: "web__1".to_string(),
            desired_capacity_at_snapshot: 3,
            min_capacity: 0,
            max_capacity: 5,
            scaling_policy_jsons: vec!["policy-1".to_string()],
        };
        orchestrator(&cloud)
            .rollback(
                &scope(),
                "web__2",
                "web__1",
                Some(&route()),
                Some(&snapshot),
                &MemoryLogSink::new(),
            )
            .await
            .unwrap();

        let ops: Vec<Operation> = cloud
            .journal()
            .iter()
            .filter(|c| c.is_mutation())
            .map(|c| c.operation())
            .collect();
        let position = |op| ops.iter().position(|o| *o == op).unwrap();
        assert!(position(Operation::UpdateCapacity) < position(Operation::AttachToPool));
        assert!(position(Operation::AttachPolicy) < position(Operation::AttachToPool));
        assert_eq!(ops.last(), Some(&Operation::Delete));
    }

    #[tokio::test]
    async fn rollback_tolerates_missing_new_scale_set() {
        let cloud = staged_cloud();
        cloud.delete(&scope(), &["web__2".to_string()]).await.unwrap();
        let snapshot = PreDeploymentSnapshot {
            old_scale_set_name: "web__1".to_string(),
            desired_capacity_at_snapshot: 3,
            min_capacity: 0,
            max_capacity: 5,
            scaling_policy_jsons: Vec::new(),
        };
        let result = orchestrator(&cloud)
            .rollback(
                &scope(),
                "web__2",
                "web__1",
                Some(&route()),
                Some(&snapshot),
                &MemoryLogSink::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.deleted, None);
        assert_eq!(cloud.pool_members("lb-web", "prod"), vec!["web__1".to_string()]);
    }
}
