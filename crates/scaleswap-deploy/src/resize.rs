//! Resize orchestration: ordered resize of a new and an old scale set.
//!
//! Each resize clears the target's autoscale policy, sets its capacity,
//! waits for steady state, then reattaches the supplied policies so the
//! provider cannot override the capacity mid-operation. The two scale sets
//! are always resized one after the other, in the order the caller picks.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use scaleswap_core::{InstanceBounds, InstanceInfo, ProfileCapacity, Scope};
use scaleswap_gateway::ExecutionLogSink;

use crate::error::Result;
use crate::steady::SteadyStateWaiter;
use crate::{units, Gateways};

/// Which scale set is resized first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeOrder {
    /// Scale the new set before the old one. Favors availability.
    NewFirst,
    /// Restore the old set before touching the new one. Used by rollback.
    OldFirst,
}

impl ResizeOrder {
    pub fn from_new_first(resize_new_first: bool) -> Self {
        if resize_new_first {
            ResizeOrder::NewFirst
        } else {
            ResizeOrder::OldFirst
        }
    }
}

/// One scale set to resize, with the policies to reattach afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeTarget {
    pub name: String,
    /// `desired` is the capacity to set; `min`/`max` go on the reattached policy.
    pub bounds: InstanceBounds,
    #[serde(default)]
    pub policies: Vec<String>,
}

impl ResizeTarget {
    pub fn new(name: &str, bounds: InstanceBounds, policies: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            bounds,
            policies,
        }
    }

    /// Scale to zero with no policy to reattach.
    pub fn drain(name: &str) -> Self {
        Self::new(name, InstanceBounds::new(0, 0, 0), Vec::new())
    }
}

/// Instances of both scale sets after a deploy or rollback resize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResult {
    pub new_instances: Vec<InstanceInfo>,
    pub old_instances: Vec<InstanceInfo>,
}

#[derive(Clone)]
pub struct ResizeOrchestrator {
    gateways: Gateways,
    waiter: SteadyStateWaiter,
}

impl ResizeOrchestrator {
    pub fn new(gateways: Gateways, waiter: SteadyStateWaiter) -> Self {
        Self { gateways, waiter }
    }

    /// Resize one scale set.
    ///
    /// A target that no longer exists is logged and treated as already
    /// resized: an empty instance list comes back and no error is raised.
    pub async fn resize_scale_set(
        &self,
        scope: &Scope,
        target: &ResizeTarget,
        unit: &str,
        log: &dyn ExecutionLogSink,
    ) -> Result<Vec<InstanceInfo>> {
        let compute = self.gateways.compute.as_ref();
        let autoscale = self.gateways.autoscale.as_ref();
        let desired = target.bounds.desired;

        let Some(scale_set) = compute.get_by_name(scope, &target.name).await? else {
            warn!(scale_set = %target.name, "scale set not found, skipping resize");
            log.warn(
                unit,
                &format!("Scale set {} not found, nothing to resize", target.name),
            );
            return Ok(Vec::new());
        };

        log.info(unit, &format!("Clearing autoscale policy of {}", scale_set.name));
        autoscale.clear_policy(scope, &scale_set.id).await?;

        log.info(
            unit,
            &format!(
                "Resizing {} from {} to {} instances",
                scale_set.name, scale_set.capacity, desired
            ),
        );
        compute.update_capacity(scope, &scale_set.name, desired).await?;
        self.waiter
            .wait(compute, scope, &scale_set.name, unit, log)
            .await?;

        if target.policies.is_empty() {
            log.info(unit, "No autoscale policy to attach");
        } else if desired == 0 {
            // A drained set keeps no policy; it would scale itself back up.
            log.info(
                unit,
                &format!("Not reattaching policy to drained {}", scale_set.name),
            );
        } else {
            let capacity = ProfileCapacity::from_bounds(&target.bounds);
            log.info(
                unit,
                &format!(
                    "Attaching {} autoscale policies to {} (min {}, max {}, desired {})",
                    target.policies.len(),
                    scale_set.name,
                    capacity.minimum,
                    capacity.maximum,
                    capacity.default
                ),
            );
            autoscale
                .attach_policy(scope, &scale_set.id, &target.policies, capacity)
                .await?;
        }

        let instances = self.collect_instances(scope, &scale_set.name).await?;
        info!(
            scale_set = %scale_set.name,
            capacity = desired,
            instances = instances.len(),
            "scale set resized"
        );
        log.done(
            unit,
            &format!("Scale set {} resized to {}", scale_set.name, desired),
        );
        Ok(instances)
    }

    /// Instance metadata of a scale set, each instance refreshed for its
    /// network details.
    pub async fn collect_instances(&self, scope: &Scope, name: &str) -> Result<Vec<InstanceInfo>> {
        let compute = self.gateways.compute.as_ref();
        let mut instances = Vec::new();
        for vm in compute.list_instances(scope, name).await? {
            let refreshed = compute
                .refresh_instance(scope, name, &vm.instance_id)
                .await?;
            instances.push(InstanceInfo::from(refreshed));
        }
        Ok(instances)
    }

    /// Resize the new and (if any) old scale set, strictly one after the other.
    pub async fn resize_scale_sets(
        &self,
        scope: &Scope,
        order: ResizeOrder,
        new: &ResizeTarget,
        old: Option<&ResizeTarget>,
        log: &dyn ExecutionLogSink,
    ) -> Result<DeployResult> {
        let mut result = DeployResult::default();
        match order {
            ResizeOrder::NewFirst => {
                result.new_instances = self
                    .resize_scale_set(scope, new, units::RESIZE_NEW, log)
                    .await?;
                if let Some(old) = old {
                    result.old_instances = self
                        .resize_scale_set(scope, old, units::RESIZE_OLD, log)
                        .await?;
                }
            }
            ResizeOrder::OldFirst => {
                if let Some(old) = old {
                    result.old_instances = self
                        .resize_scale_set(scope, old, units::RESIZE_OLD, log)
                        .await?;
                }
                result.new_instances = self
                    .resize_scale_set(scope, new, units::RESIZE_NEW, log)
                    .await?;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use scaleswap_gateway::{
        scale_set_id, GatewayCall, InMemoryCloud, MemoryLogSink, Operation,
    };

    use crate::DeployError;

    fn scope() -> Scope {
        Scope::new("sub", "rg")
    }

    fn orchestrator(cloud: &InMemoryCloud) -> ResizeOrchestrator {
        let cloud = Arc::new(cloud.clone());
        ResizeOrchestrator::new(
            Gateways::new(cloud.clone(), cloud),
            SteadyStateWaiter::new(Duration::from_secs(5), Duration::from_millis(5)),
        )
    }

    #[tokio::test]
    async fn missing_target_returns_empty_without_error() {
        let cloud = InMemoryCloud::new();
        let log = MemoryLogSink::new();
        let target = ResizeTarget::new("ghost", InstanceBounds::new(1, 3, 2), Vec::new());

        let instances = orchestrator(&cloud)
            .resize_scale_set(&scope(), &target, units::RESIZE_NEW, &log)
            .await
            .unwrap();

        assert!(instances.is_empty());
        assert!(cloud.journal().iter().all(|c| !c.is_mutation()));
        assert!(log.contains("not found"));
    }

    #[tokio::test]
    async fn resize_clears_then_resizes_then_reattaches() {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__2", 0, &[]);
        let log = MemoryLogSink::new();
        let target = ResizeTarget::new(
            "web__2",
            InstanceBounds::new(1, 6, 3),
            vec!["{\"metric\":\"cpu\"}".to_string()],
        );

        let instances = orchestrator(&cloud)
            .resize_scale_set(&scope(), &target, units::RESIZE_NEW, &log)
            .await
            .unwrap();
        assert_eq!(instances.len(), 3);
        assert!(instances.iter().all(|i| i.private_ip.is_some()));

        let mutations: Vec<Operation> = cloud
            .journal()
            .iter()
            .filter(|c| c.is_mutation())
            .map(GatewayCall::operation)
            .collect();
        assert_eq!(
            mutations,
            vec![
                Operation::ClearPolicy,
                Operation::UpdateCapacity,
                Operation::AttachPolicy
            ]
        );

        let setting = cloud.autoscale_setting(&scope(), "web__2").unwrap();
        assert_eq!(setting.capacity.minimum, 1);
        assert_eq!(setting.capacity.maximum, 6);
        assert_eq!(setting.capacity.default, 3);
    }

    #[tokio::test]
    async fn drained_target_gets_no_policy() {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__1", 2, &[]);
        cloud.insert_autoscale(
            &scope(),
            "web__1",
            &["p"],
            ProfileCapacity {
                minimum: 1,
                maximum: 2,
                default: 2,
            },
        );
        let target = ResizeTarget::new("web__1", InstanceBounds::new(0, 2, 0), vec!["p".into()]);

        let instances = orchestrator(&cloud)
            .resize_scale_set(&scope(), &target, units::RESIZE_OLD, &MemoryLogSink::new())
            .await
            .unwrap();
        assert!(instances.is_empty());
        assert!(cloud.autoscale_setting(&scope(), "web__1").is_none());
        assert!(cloud
            .journal()
            .contains(&GatewayCall::ClearPolicy(scale_set_id(&scope(), "web__1"))));
    }

    #[tokio::test]
    async fn new_first_orders_capacity_updates() {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__2", 0, &[]);
        cloud.insert_scale_set(&scope(), "web__1", 6, &[]);
        let new = ResizeTarget::new("web__2", InstanceBounds::new(0, 4, 4), Vec::new());
        let old = ResizeTarget::new("web__1", InstanceBounds::new(0, 6, 2), Vec::new());

        let result = orchestrator(&cloud)
            .resize_scale_sets(&scope(), ResizeOrder::NewFirst, &new, Some(&old), &MemoryLogSink::new())
            .await
            .unwrap();

        assert_eq!(
            cloud.capacity_updates(),
            vec![("web__2".to_string(), 4), ("web__1".to_string(), 2)]
        );
        assert_eq!(result.new_instances.len(), 4);
        assert_eq!(result.old_instances.len(), 2);
    }

    #[tokio::test]
    async fn old_first_orders_capacity_updates() {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__2", 0, &[]);
        cloud.insert_scale_set(&scope(), "web__1", 6, &[]);
        let new = ResizeTarget::new("web__2", InstanceBounds::new(0, 4, 4), Vec::new());
        let old = ResizeTarget::new("web__1", InstanceBounds::new(0, 6, 2), Vec::new());

        orchestrator(&cloud)
            .resize_scale_sets(
                &scope(),
                ResizeOrder::from_new_first(false),
                &new,
                Some(&old),
                &MemoryLogSink::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            cloud.capacity_updates(),
            vec![("web__1".to_string(), 2), ("web__2".to_string(), 4)]
        );
    }

    #[tokio::test]
    async fn failed_provisioning_stops_the_sequence() {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__2", 0, &[]);
        cloud.insert_scale_set(&scope(), "web__1", 6, &[]);
        cloud.fail_provisioning(&scope(), "web__2");
        let new = ResizeTarget::new("web__2", InstanceBounds::new(1, 4, 4), vec!["p".into()]);
        let old = ResizeTarget::drain("web__1");

        let err = orchestrator(&cloud)
            .resize_scale_sets(&scope(), ResizeOrder::NewFirst, &new, Some(&old), &MemoryLogSink::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::ProvisioningFailed(ref name) if name == "web__2"));
        assert_eq!(cloud.capacity_updates(), vec![("web__2".to_string(), 4)]);
        assert!(cloud
            .journal()
            .iter()
            .all(|call| call.operation() != Operation::AttachPolicy));
        assert_eq!(cloud.scale_set(&scope(), "web__1").unwrap().scale_set.capacity, 6);
    }

    #[tokio::test]
    async fn provider_failure_stops_the_sequence() {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__2", 0, &[]);
        cloud.insert_scale_set(&scope(), "web__1", 6, &[]);
        cloud.fail_on(Operation::AttachPolicy);
        let new = ResizeTarget::new("web__2", InstanceBounds::new(1, 4, 4), vec!["p".into()]);
        let old = ResizeTarget::drain("web__1");

        let err = orchestrator(&cloud)
            .resize_scale_sets(&scope(), ResizeOrder::NewFirst, &new, Some(&old), &MemoryLogSink::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Provider(_)));
        assert_eq!(cloud.capacity_updates(), vec![("web__2".to_string(), 4)]);
    }
}
