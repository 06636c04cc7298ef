//! Autoscale settings gateway.
//!
//! Autoscale settings are addressed by the id of the scale set they target.

use scaleswap_core::{ProfileCapacity, Scope};

use crate::GatewayFuture;

pub trait AutoscaleGateway: Send + Sync {
    /// Capacity of the default profile, or `None` if no setting targets the scale set.
    fn get_default_profile<'a>(
        &'a self,
        scope: &'a Scope,
        target_id: &'a str,
    ) -> GatewayFuture<'a, Option<ProfileCapacity>>;

    /// Serialized policies currently attached to the scale set. Empty if none.
    fn get_policy_json<'a>(
        &'a self,
        scope: &'a Scope,
        target_id: &'a str,
    ) -> GatewayFuture<'a, Vec<String>>;

    /// Attach `policies`, with every profile's capacity replaced by `capacity`.
    fn attach_policy<'a>(
        &'a self,
        scope: &'a Scope,
        target_id: &'a str,
        policies: &'a [String],
        capacity: ProfileCapacity,
    ) -> GatewayFuture<'a, ()>;

    /// Remove every autoscale setting targeting the scale set.
    fn clear_policy<'a>(&'a self, scope: &'a Scope, target_id: &'a str) -> GatewayFuture<'a, ()>;
}
