use serde::{Deserialize, Serialize};

use scaleswap_core::{PreDeploymentSnapshot, Scope};
use scaleswap_deploy::SetupResult;

/// A setup output together with where it ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupRecord {
    pub owner_id: String,
    pub subscription_id: String,
    pub resource_group: String,
    /// Unix epoch seconds.
    pub recorded_at: u64,
    pub setup: SetupResult,
}

impl SetupRecord {
    pub fn new(owner_id: &str, scope: &Scope, recorded_at: u64, setup: SetupResult) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            subscription_id: scope.subscription_id.clone(),
            resource_group: scope.resource_group.clone(),
            recorded_at,
            setup,
        }
    }

    pub fn table_key(&self) -> &str {
        &self.owner_id
    }

    pub fn scope(&self) -> Scope {
        Scope::new(&self.subscription_id, &self.resource_group)
    }

    pub fn snapshot(&self) -> Option<&PreDeploymentSnapshot> {
        self.setup.snapshot.as_ref()
    }

    /// Whether this setup created the scale set `name` in `scope`.
    pub fn created(&self, scope: &Scope, name: &str) -> bool {
        self.setup.new_scale_set_name == name && self.scope() == *scope
    }
}
