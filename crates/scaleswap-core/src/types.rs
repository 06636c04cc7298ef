//! Domain types for blue/green scale-set deployments.
//!
//! Scale sets are owned by the cloud provider. These types are read
//! through the gateways on every call and never cached across calls;
//! the only state carried between invocations is the
//! [`PreDeploymentSnapshot`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ── Tags ───────────────────────────────────────────────────────────

/// Tag naming the logical service that owns a scale set.
pub const TAG_OWNER_ID: &str = "owner-id";

/// Tag carrying the integer revision of a scale set.
pub const TAG_REVISION: &str = "revision";

/// Tag carrying the creation time (unix seconds) of a scale set.
pub const TAG_CREATED_AT: &str = "created-at";

/// Tag carrying the blue/green color of a scale set.
pub const TAG_BG_VERSION: &str = "bg-version";

/// Blue/green coloring convention.
///
/// `Green` marks the scale set serving production traffic, `Blue` the
/// stage/standby one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentColor {
    Blue,
    Green,
}

impl DeploymentColor {
    pub fn as_tag(&self) -> &'static str {
        match self {
            DeploymentColor::Blue => "blue",
            DeploymentColor::Green => "green",
        }
    }

    pub fn from_tag(value: &str) -> Option<Self> {
        match value {
            "blue" => Some(DeploymentColor::Blue),
            "green" => Some(DeploymentColor::Green),
            _ => None,
        }
    }
}

// ── Scale sets ─────────────────────────────────────────────────────

/// Provider-reported provisioning state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    Creating,
    Updating,
    Succeeded,
    Failed,
    Deleting,
}

/// Resource scope every gateway call is issued against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub subscription_id: String,
    pub resource_group: String,
}

impl Scope {
    pub fn new(subscription_id: &str, resource_group: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            resource_group: resource_group.to_string(),
        }
    }
}

/// One scale set as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSetRevision {
    pub id: String,
    pub name: String,
    pub resource_group: String,
    /// Current instance capacity.
    pub capacity: u32,
    /// Image reference new revisions are cloned from.
    pub image: String,
    pub tags: BTreeMap<String, String>,
    pub provisioning_state: ProvisioningState,
}

impl ScaleSetRevision {
    pub fn owner_id(&self) -> Option<&str> {
        self.tags.get(TAG_OWNER_ID).map(String::as_str)
    }

    /// Revision number, if the tag is present and numeric.
    pub fn revision(&self) -> Option<u32> {
        self.tags.get(TAG_REVISION)?.trim().parse().ok()
    }

    /// Creation time in unix seconds, if the tag is present and numeric.
    pub fn created_at(&self) -> Option<u64> {
        self.tags.get(TAG_CREATED_AT)?.trim().parse().ok()
    }

    pub fn color(&self) -> Option<DeploymentColor> {
        self.tags
            .get(TAG_BG_VERSION)
            .and_then(|v| DeploymentColor::from_tag(v))
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id() == Some(owner_id)
    }
}

/// A single VM inside a scale set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInstance {
    pub instance_id: String,
    pub provisioning_state: ProvisioningState,
    /// Whether the instance runs the scale set's latest model.
    pub latest_model_applied: bool,
    pub private_ip: Option<String>,
    pub public_dns: Option<String>,
}

/// Instance metadata reported back after a resize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub private_ip: Option<String>,
    pub public_dns: Option<String>,
}

impl From<VmInstance> for InstanceInfo {
    fn from(vm: VmInstance) -> Self {
        Self {
            instance_id: vm.instance_id,
            private_ip: vm.private_ip,
            public_dns: vm.public_dns,
        }
    }
}

// ── Capacity ───────────────────────────────────────────────────────

/// Min/max/desired instance count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceBounds {
    pub min: u32,
    pub max: u32,
    pub desired: u32,
}

impl InstanceBounds {
    pub fn new(min: u32, max: u32, desired: u32) -> Self {
        Self { min, max, desired }
    }
}

/// Capacity block of a provider autoscale profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileCapacity {
    pub minimum: u32,
    pub maximum: u32,
    pub default: u32,
}

impl ProfileCapacity {
    /// Build the profile capacity for a policy reattach.
    pub fn from_bounds(bounds: &InstanceBounds) -> Self {
        Self {
            minimum: bounds.min,
            maximum: bounds.max,
            default: bounds.desired,
        }
    }

    pub fn bounds(&self) -> InstanceBounds {
        InstanceBounds {
            min: self.minimum,
            max: self.maximum,
            desired: self.default,
        }
    }
}

// ── Deployment inputs ──────────────────────────────────────────────

/// Credentials installed on VMs of a newly created revision.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VmAuth {
    Password { username: String, password: String },
    SshPublicKey { username: String, public_key: String },
}

impl VmAuth {
    pub fn username(&self) -> &str {
        match self {
            VmAuth::Password { username, .. } | VmAuth::SshPublicKey { username, .. } => username,
        }
    }
}

impl fmt::Debug for VmAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmAuth::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            VmAuth::SshPublicKey { username, .. } => f
                .debug_struct("SshPublicKey")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Per-invocation deployment inputs. Immutable during one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentContext {
    pub subscription_id: String,
    pub resource_group: String,
    pub owner_id: String,
    pub name_prefix: String,
    pub base_scale_set_name: String,
    pub vm_auth: VmAuth,
    #[serde(default)]
    pub blue_green: bool,
    /// Steady-state wait budget. Non-positive values use the configured default.
    #[serde(default)]
    pub timeout_minutes: i32,
    #[serde(default)]
    pub min_instances: u32,
    #[serde(default)]
    pub max_instances: u32,
    #[serde(default)]
    pub desired_instances: u32,
    #[serde(default)]
    pub use_current_running_count: bool,
}

impl DeploymentContext {
    pub fn scope(&self) -> Scope {
        Scope::new(&self.subscription_id, &self.resource_group)
    }

    /// The explicitly requested instance bounds.
    pub fn requested_bounds(&self) -> InstanceBounds {
        InstanceBounds::new(self.min_instances, self.max_instances, self.desired_instances)
    }
}

/// State of the outgoing active revision, captured at setup and
/// replayed by rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreDeploymentSnapshot {
    pub old_scale_set_name: String,
    pub desired_capacity_at_snapshot: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub scaling_policy_jsons: Vec<String>,
}

impl PreDeploymentSnapshot {
    pub fn bounds(&self) -> InstanceBounds {
        InstanceBounds::new(
            self.min_capacity,
            self.max_capacity,
            self.desired_capacity_at_snapshot,
        )
    }
}

/// Load balancer and the two backend pools traffic is switched between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerRouteDetail {
    pub load_balancer_name: String,
    pub stage_backend_pool: String,
    pub prod_backend_pool: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revision_with_tags(tags: &[(&str, &str)]) -> ScaleSetRevision {
        ScaleSetRevision {
            id: "/subscriptions/s/resourceGroups/rg/vmss/web__1".to_string(),
            name: "web__1".to_string(),
            resource_group: "rg".to_string(),
            capacity: 1,
            image: "ubuntu-22.04".to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            provisioning_state: ProvisioningState::Succeeded,
        }
    }

    #[test]
    fn reads_revision_tags() {
        let ss = revision_with_tags(&[
            (TAG_OWNER_ID, "svc-1"),
            (TAG_REVISION, "7"),
            (TAG_CREATED_AT, "1700000000"),
            (TAG_BG_VERSION, "green"),
        ]);
        assert!(ss.is_owned_by("svc-1"));
        assert_eq!(ss.revision(), Some(7));
        assert_eq!(ss.created_at(), Some(1_700_000_000));
        assert_eq!(ss.color(), Some(DeploymentColor::Green));
    }

    #[test]
    fn garbage_tags_read_as_absent() {
        let ss = revision_with_tags(&[(TAG_REVISION, "seven"), (TAG_CREATED_AT, "yesterday")]);
        assert_eq!(ss.revision(), None);
        assert_eq!(ss.created_at(), None);
        assert_eq!(ss.color(), None);
        assert!(!ss.is_owned_by("svc-1"));
    }

    #[test]
    fn profile_capacity_wires_min_and_max_separately() {
        let cap = ProfileCapacity::from_bounds(&InstanceBounds::new(1, 5, 3));
        assert_eq!(cap.minimum, 1);
        assert_eq!(cap.maximum, 5);
        assert_eq!(cap.default, 3);
        assert_ne!(cap.minimum, cap.maximum);
        assert_eq!(cap.bounds(), InstanceBounds::new(1, 5, 3));
    }

    #[test]
    fn vm_auth_debug_hides_password() {
        let auth = VmAuth::Password {
            username: "azureuser".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{auth:?}");
        assert!(rendered.contains("azureuser"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn context_deserializes_with_defaults() {
        let json = r#"{
            "subscription_id": "sub",
            "resource_group": "rg",
            "owner_id": "svc-1",
            "name_prefix": "web",
            "base_scale_set_name": "web-base",
            "vm_auth": {"type": "ssh_public_key", "username": "ops", "public_key": "ssh-ed25519 AAAA"}
        }"#;
        let ctx: DeploymentContext = serde_json::from_str(json).unwrap();
        assert!(!ctx.blue_green);
        assert_eq!(ctx.timeout_minutes, 0);
        assert_eq!(ctx.scope(), Scope::new("sub", "rg"));
        assert_eq!(ctx.vm_auth.username(), "ops");
    }
}
