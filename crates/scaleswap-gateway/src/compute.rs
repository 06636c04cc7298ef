//! Compute gateway: scale sets, backend pools, and VM instances.

use std::collections::BTreeMap;

use scaleswap_core::{ScaleSetRevision, Scope, VmAuth, VmInstance};

use crate::GatewayFuture;

/// Request to clone a base scale set into a new revision.
#[derive(Debug, Clone)]
pub struct NewScaleSet {
    pub name: String,
    /// Scale set whose image and VM configuration are copied.
    pub base: ScaleSetRevision,
    pub tags: BTreeMap<String, String>,
    pub auth: VmAuth,
    pub capacity: u32,
}

/// Provider compute API, scoped per call to a subscription and resource group.
pub trait ComputeGateway: Send + Sync {
    /// Look up a scale set. `None` when it does not exist.
    fn get_by_name<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
    ) -> GatewayFuture<'a, Option<ScaleSetRevision>>;

    /// All scale sets in the scope's resource group.
    fn list_by_resource_group<'a>(
        &'a self,
        scope: &'a Scope,
    ) -> GatewayFuture<'a, Vec<ScaleSetRevision>>;

    fn create<'a>(
        &'a self,
        scope: &'a Scope,
        request: &'a NewScaleSet,
    ) -> GatewayFuture<'a, ScaleSetRevision>;

    fn update_capacity<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        capacity: u32,
    ) -> GatewayFuture<'a, ()>;

    /// Merge `tags` into the scale set's existing tags.
    fn update_tags<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        tags: &'a BTreeMap<String, String>,
    ) -> GatewayFuture<'a, ()>;

    /// Delete scale sets in bulk. Names that no longer exist are skipped.
    fn delete<'a>(&'a self, scope: &'a Scope, names: &'a [String]) -> GatewayFuture<'a, ()>;

    fn attach_to_pool<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        load_balancer: &'a str,
        pool: &'a str,
    ) -> GatewayFuture<'a, ()>;

    fn detach_from_pool<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        load_balancer: &'a str,
        pool: &'a str,
    ) -> GatewayFuture<'a, ()>;

    /// Instances of a scale set, without network details.
    fn list_instances<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
    ) -> GatewayFuture<'a, Vec<VmInstance>>;

    /// Re-fetch one instance including its private IP and public DNS name.
    fn refresh_instance<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, VmInstance>;
}
