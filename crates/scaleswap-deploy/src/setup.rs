//! Setup orchestration: create the next scale-set revision.
//!
//! Setup resolves the new revision's instance bounds, snapshots the
//! outgoing active revision for a later rollback, applies retention to
//! older revisions, and clones the base scale set into a new tagged
//! revision created at capacity zero.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use scaleswap_core::{
    DeploymentColor, DeploymentContext, InstanceBounds, LoadBalancerRouteDetail,
    PreDeploymentSnapshot, ProfileCapacity, ScaleSetRevision, Scope, TAG_BG_VERSION,
    TAG_CREATED_AT, TAG_OWNER_ID, TAG_REVISION,
};
use scaleswap_gateway::{ExecutionLogSink, NewScaleSet};

use crate::error::{DeployError, Result};
use crate::retention::{RetentionManager, RetentionPolicy, RetentionSummary};
use crate::revision::{list_owned, most_recent_active, next_revision, revision_name};
use crate::steady::SteadyStateWaiter;
use crate::{units, Gateways};

/// Output of a setup, persisted by the caller for the later steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupResult {
    pub revision: u32,
    pub new_scale_set_name: String,
    pub last_active_scale_set_name: Option<String>,
    pub bounds: InstanceBounds,
    /// Policies of the base scale set, for the deploy step to attach.
    pub base_policy_jsons: Vec<String>,
    pub snapshot: Option<PreDeploymentSnapshot>,
    pub retention: RetentionSummary,
}

#[derive(Clone)]
pub struct SetupOrchestrator {
    gateways: Gateways,
    retention: RetentionManager,
    policy: RetentionPolicy,
    waiter: SteadyStateWaiter,
    default_bounds: InstanceBounds,
}

impl SetupOrchestrator {
    pub fn new(
        gateways: Gateways,
        retention: RetentionManager,
        policy: RetentionPolicy,
        waiter: SteadyStateWaiter,
        default_bounds: InstanceBounds,
    ) -> Self {
        Self {
            gateways,
            retention,
            policy,
            waiter,
            default_bounds,
        }
    }

    pub async fn setup(
        &self,
        ctx: &DeploymentContext,
        route: Option<&LoadBalancerRouteDetail>,
        log: &dyn ExecutionLogSink,
    ) -> Result<SetupResult> {
        let compute = self.gateways.compute.as_ref();
        let autoscale = self.gateways.autoscale.as_ref();
        let scope = ctx.scope();

        log.info(
            units::SETUP,
            &format!("Looking up scale sets owned by {}", ctx.owner_id),
        );
        let owned = list_owned(compute, &scope, &ctx.owner_id).await?;
        let active = most_recent_active(&owned).cloned();
        let revision = next_revision(&owned)?;
        let new_name = revision_name(&ctx.name_prefix, revision);

        let active_profile = match &active {
            Some(ss) => autoscale.get_default_profile(&scope, &ss.id).await?,
            None => None,
        };
        let bounds = self.resolve_bounds(ctx, active.as_ref(), active_profile);
        log.info(
            units::SETUP,
            &format!(
                "New revision {new_name}: min {}, max {}, desired {}",
                bounds.min, bounds.max, bounds.desired
            ),
        );

        let base = compute
            .get_by_name(&scope, &ctx.base_scale_set_name)
            .await?
            .ok_or_else(|| {
                DeployError::NotFound(format!("base scale set {}", ctx.base_scale_set_name))
            })?;
        let base_policy_jsons = autoscale.get_policy_json(&scope, &base.id).await?;

        let snapshot = match &active {
            Some(ss) => Some(self.snapshot(&scope, ss, active_profile).await?),
            None => None,
        };
        log.done(units::SETUP, "Resolved revision and instance bounds");

        let plan = self
            .policy
            .plan(&owned, active.as_ref().map(|ss| ss.name.as_str()));
        let retention = self.retention.apply(&scope, &plan, log).await?;

        self.create_revision(ctx, &scope, &base, &new_name, revision, route, log)
            .await?;

        info!(
            owner = %ctx.owner_id,
            revision,
            scale_set = %new_name,
            last_active = ?active.as_ref().map(|ss| &ss.name),
            "setup complete"
        );

        Ok(SetupResult {
            revision,
            new_scale_set_name: new_name,
            last_active_scale_set_name: active.map(|ss| ss.name),
            bounds,
            base_policy_jsons,
            snapshot,
            retention,
        })
    }

    /// Inherit bounds from the live active revision when asked to,
    /// otherwise use the explicit bounds of the context.
    pub fn resolve_bounds(
        &self,
        ctx: &DeploymentContext,
        active: Option<&ScaleSetRevision>,
        active_profile: Option<ProfileCapacity>,
    ) -> InstanceBounds {
        match active {
            Some(ss) if ctx.use_current_running_count => {
                let (min, max) = match active_profile {
                    Some(profile) => (profile.minimum, profile.maximum),
                    None => (self.default_bounds.min, self.default_bounds.max),
                };
                InstanceBounds::new(min, max, ss.capacity)
            }
            _ => ctx.requested_bounds(),
        }
    }

    async fn snapshot(
        &self,
        scope: &Scope,
        active: &ScaleSetRevision,
        profile: Option<ProfileCapacity>,
    ) -> Result<PreDeploymentSnapshot> {
        let policies = self
            .gateways
            .autoscale
            .get_policy_json(scope, &active.id)
            .await?;
        Ok(PreDeploymentSnapshot {
            old_scale_set_name: active.name.clone(),
            desired_capacity_at_snapshot: active.capacity,
            min_capacity: 0,
            max_capacity: profile.map_or(active.capacity, |p| p.maximum),
            scaling_policy_jsons: policies,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_revision(
        &self,
        ctx: &DeploymentContext,
        scope: &Scope,
        base: &ScaleSetRevision,
        name: &str,
        revision: u32,
        route: Option<&LoadBalancerRouteDetail>,
        log: &dyn ExecutionLogSink,
    ) -> Result<ScaleSetRevision> {
        let compute = self.gateways.compute.as_ref();

        let mut tags = BTreeMap::new();
        tags.insert(TAG_OWNER_ID.to_string(), ctx.owner_id.clone());
        tags.insert(TAG_REVISION.to_string(), revision.to_string());
        tags.insert(TAG_CREATED_AT.to_string(), epoch_secs().to_string());
        if ctx.blue_green {
            tags.insert(
                TAG_BG_VERSION.to_string(),
                DeploymentColor::Blue.as_tag().to_string(),
            );
        }

        log.info(
            units::CREATE,
            &format!("Creating scale set {name} from base {}", base.name),
        );
        let request = NewScaleSet {
            name: name.to_string(),
            base: base.clone(),
            tags,
            auth: ctx.vm_auth.clone(),
            capacity: 0,
        };
        let created = compute.create(scope, &request).await?;

        if ctx.blue_green {
            match route {
                Some(route) => {
                    log.info(
                        units::CREATE,
                        &format!(
                            "Attaching {name} to stage pool {} of {}",
                            route.stage_backend_pool, route.load_balancer_name
                        ),
                    );
                    compute
                        .attach_to_pool(
                            scope,
                            name,
                            &route.load_balancer_name,
                            &route.stage_backend_pool,
                        )
                        .await?;
                    self.waiter.wait(compute, scope, name, units::CREATE, log).await?;
                }
                None => log.warn(
                    units::CREATE,
                    "Blue/green setup without route details; stage pool not attached",
                ),
            }
        }

        log.done(units::CREATE, &format!("Scale set {name} created"));
        Ok(created)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
