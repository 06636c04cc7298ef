//! In-memory simulated cloud.
//!
//! `InMemoryCloud` implements both [`ComputeGateway`] and
//! [`AutoscaleGateway`] over a serializable [`CloudDocument`]. Every call
//! is appended to a journal so callers can assert ordering, and individual
//! operations can be made to fail or scale sets made to stall.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use scaleswap_core::{
    ProfileCapacity, ProvisioningState, ScaleSetRevision, Scope, VmInstance,
};

use crate::autoscale::AutoscaleGateway;
use crate::compute::{ComputeGateway, NewScaleSet};
use crate::error::{GatewayError, GatewayResult};
use crate::GatewayFuture;

/// A simulated scale set plus the provider-side state not exposed on
/// [`ScaleSetRevision`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimScaleSet {
    #[serde(flatten)]
    pub scale_set: ScaleSetRevision,
    /// Pool memberships, as `{load_balancer}/{pool}`.
    #[serde(default)]
    pub backend_pools: BTreeSet<String>,
    #[serde(default)]
    pub admin_username: Option<String>,
    /// A stalled scale set never reaches steady state after a change.
    #[serde(default)]
    pub stalled: bool,
    /// A failed scale set and its instances report `Failed` after a change.
    #[serde(default)]
    pub failed: bool,
}

/// Autoscale setting attached to one scale set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscaleSetting {
    pub policies: Vec<String>,
    pub capacity: ProfileCapacity,
}

/// Serializable state of the simulated cloud.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudDocument {
    /// Scale sets keyed by `{subscription_id}/{resource_group}/{name}`.
    #[serde(default)]
    pub scale_sets: BTreeMap<String, SimScaleSet>,
    /// Autoscale settings keyed by target scale-set id.
    #[serde(default)]
    pub autoscale: BTreeMap<String, AutoscaleSetting>,
}

/// Gateway operation kinds, used for the journal and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    GetByName,
    ListByResourceGroup,
    Create,
    UpdateCapacity,
    UpdateTags,
    Delete,
    AttachToPool,
    DetachFromPool,
    ListInstances,
    RefreshInstance,
    GetDefaultProfile,
    GetPolicyJson,
    AttachPolicy,
    ClearPolicy,
}

/// One journaled gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    GetByName(String),
    ListByResourceGroup(String),
    Create(String),
    UpdateCapacity { name: String, capacity: u32 },
    UpdateTags { name: String, tags: BTreeMap<String, String> },
    Delete(Vec<String>),
    AttachToPool { name: String, pool: String },
    DetachFromPool { name: String, pool: String },
    ListInstances(String),
    RefreshInstance { name: String, instance_id: String },
    GetDefaultProfile(String),
    GetPolicyJson(String),
    AttachPolicy { target_id: String, policies: Vec<String>, capacity: ProfileCapacity },
    ClearPolicy(String),
}

impl GatewayCall {
    pub fn operation(&self) -> Operation {
        match self {
            GatewayCall::GetByName(_) => Operation::GetByName,
            GatewayCall::ListByResourceGroup(_) => Operation::ListByResourceGroup,
            GatewayCall::Create(_) => Operation::Create,
            GatewayCall::UpdateCapacity { .. } => Operation::UpdateCapacity,
            GatewayCall::UpdateTags { .. } => Operation::UpdateTags,
            GatewayCall::Delete(_) => Operation::Delete,
            GatewayCall::AttachToPool { .. } => Operation::AttachToPool,
            GatewayCall::DetachFromPool { .. } => Operation::DetachFromPool,
            GatewayCall::ListInstances(_) => Operation::ListInstances,
            GatewayCall::RefreshInstance { .. } => Operation::RefreshInstance,
            GatewayCall::GetDefaultProfile(_) => Operation::GetDefaultProfile,
            GatewayCall::GetPolicyJson(_) => Operation::GetPolicyJson,
            GatewayCall::AttachPolicy { .. } => Operation::AttachPolicy,
            GatewayCall::ClearPolicy(_) => Operation::ClearPolicy,
        }
    }

    /// Whether the call changes provider state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.operation(),
            Operation::Create
                | Operation::UpdateCapacity
                | Operation::UpdateTags
                | Operation::Delete
                | Operation::AttachToPool
                | Operation::DetachFromPool
                | Operation::AttachPolicy
                | Operation::ClearPolicy
        )
    }
}

#[derive(Default)]
struct CloudState {
    doc: CloudDocument,
    journal: Vec<GatewayCall>,
    failures: BTreeSet<Operation>,
}

/// Thread-safe simulated cloud. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryCloud {
    state: Arc<Mutex<CloudState>>,
}

/// Provider-style resource id for a scale set.
pub fn scale_set_id(scope: &Scope, name: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}",
        scope.subscription_id, scope.resource_group, name
    )
}

fn table_key(scope: &Scope, name: &str) -> String {
    format!("{}{name}", scope_prefix(scope))
}

fn scope_prefix(scope: &Scope) -> String {
    format!("{}/{}/", scope.subscription_id, scope.resource_group)
}

fn pool_key(load_balancer: &str, pool: &str) -> String {
    format!("{load_balancer}/{pool}")
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(doc: CloudDocument) -> Self {
        Self {
            state: Arc::new(Mutex::new(CloudState {
                doc,
                ..Default::default()
            })),
        }
    }

    pub fn document(&self) -> CloudDocument {
        self.state.lock().expect("cloud lock").doc.clone()
    }

    /// Seed a steady scale set directly, bypassing the journal.
    pub fn insert_scale_set(
        &self,
        scope: &Scope,
        name: &str,
        capacity: u32,
        tags: &[(&str, &str)],
    ) -> ScaleSetRevision {
        let scale_set = ScaleSetRevision {
            id: scale_set_id(scope, name),
            name: name.to_string(),
            resource_group: scope.resource_group.clone(),
            capacity,
            image: "ubuntu-22.04-lts".to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            provisioning_state: ProvisioningState::Succeeded,
        };
        let mut state = self.state.lock().expect("cloud lock");
        state.doc.scale_sets.insert(
            table_key(scope, name),
            SimScaleSet {
                scale_set: scale_set.clone(),
                backend_pools: BTreeSet::new(),
                admin_username: None,
                stalled: false,
                failed: false,
            },
        );
        scale_set
    }

    /// Seed an autoscale setting directly, bypassing the journal.
    pub fn insert_autoscale(
        &self,
        scope: &Scope,
        name: &str,
        policies: &[&str],
        capacity: ProfileCapacity,
    ) {
        let mut state = self.state.lock().expect("cloud lock");
        state.doc.autoscale.insert(
            scale_set_id(scope, name),
            AutoscaleSetting {
                policies: policies.iter().map(|p| p.to_string()).collect(),
                capacity,
            },
        );
    }

    /// Seed a pool membership directly, bypassing the journal.
    pub fn insert_pool_member(&self, scope: &Scope, name: &str, load_balancer: &str, pool: &str) {
        let mut state = self.state.lock().expect("cloud lock");
        if let Some(sim) = state
            .doc
            .scale_sets
            .get_mut(&table_key(scope, name))
        {
            sim.backend_pools.insert(pool_key(load_balancer, pool));
        }
    }

    /// Keep a scale set from ever reaching steady state.
    pub fn stall(&self, scope: &Scope, name: &str) {
        let mut state = self.state.lock().expect("cloud lock");
        if let Some(sim) = state
            .doc
            .scale_sets
            .get_mut(&table_key(scope, name))
        {
            sim.stalled = true;
            sim.scale_set.provisioning_state = ProvisioningState::Updating;
        }
    }

    /// Put a scale set and its instances into the `Failed` provisioning
    /// state, now and after every later change.
    pub fn fail_provisioning(&self, scope: &Scope, name: &str) {
        let mut state = self.state.lock().expect("cloud lock");
        if let Some(sim) = state.doc.scale_sets.get_mut(&table_key(scope, name)) {
            sim.failed = true;
            sim.scale_set.provisioning_state = ProvisioningState::Failed;
        }
    }

    /// Make every future call of `op` fail with a provider error.
    pub fn fail_on(&self, op: Operation) {
        self.state.lock().expect("cloud lock").failures.insert(op);
    }

    pub fn journal(&self) -> Vec<GatewayCall> {
        self.state.lock().expect("cloud lock").journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state.lock().expect("cloud lock").journal.clear();
    }

    /// `(name, capacity)` of every capacity update, in call order.
    pub fn capacity_updates(&self) -> Vec<(String, u32)> {
        self.journal()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::UpdateCapacity { name, capacity } => Some((name, capacity)),
                _ => None,
            })
            .collect()
    }

    pub fn scale_set(&self, scope: &Scope, name: &str) -> Option<SimScaleSet> {
        self.state
            .lock()
            .expect("cloud lock")
            .doc
            .scale_sets
            .get(&table_key(scope, name))
            .cloned()
    }

    pub fn autoscale_setting(&self, scope: &Scope, name: &str) -> Option<AutoscaleSetting> {
        self.state
            .lock()
            .expect("cloud lock")
            .doc
            .autoscale
            .get(&scale_set_id(scope, name))
            .cloned()
    }

    /// Names of scale sets in a backend pool, sorted.
    pub fn pool_members(&self, load_balancer: &str, pool: &str) -> Vec<String> {
        let key = pool_key(load_balancer, pool);
        self.state
            .lock()
            .expect("cloud lock")
            .doc
            .scale_sets
            .values()
            .filter(|sim| sim.backend_pools.contains(&key))
            .map(|sim| sim.scale_set.name.clone())
            .collect()
    }

    /// Journal the call, then run `f` against the document unless the
    /// operation has been set to fail.
    fn call<T>(
        &self,
        entry: GatewayCall,
        f: impl FnOnce(&mut CloudDocument) -> GatewayResult<T>,
    ) -> GatewayResult<T> {
        let mut state = self.state.lock().expect("cloud lock");
        let op = entry.operation();
        debug!(?entry, "simulated gateway call");
        state.journal.push(entry);
        if state.failures.contains(&op) {
            return Err(GatewayError::Request(format!("injected failure for {op:?}")));
        }
        f(&mut state.doc)
    }
}

fn sim_mut<'d>(
    doc: &'d mut CloudDocument,
    scope: &Scope,
    name: &str,
) -> GatewayResult<&'d mut SimScaleSet> {
    doc.scale_sets
        .get_mut(&table_key(scope, name))
        .ok_or_else(|| GatewayError::NotFound(format!("scale set {name}")))
}

fn sim_instances(sim: &SimScaleSet) -> Vec<VmInstance> {
    let state = sim_state(sim);
    (0..sim.scale_set.capacity)
        .map(|i| VmInstance {
            instance_id: i.to_string(),
            provisioning_state: state,
            latest_model_applied: !sim.stalled,
            private_ip: None,
            public_dns: None,
        })
        .collect()
}

fn sim_state(sim: &SimScaleSet) -> ProvisioningState {
    if sim.failed {
        ProvisioningState::Failed
    } else if sim.stalled {
        ProvisioningState::Updating
    } else {
        ProvisioningState::Succeeded
    }
}

fn settle(sim: &mut SimScaleSet) {
    sim.scale_set.provisioning_state = sim_state(sim);
}

impl ComputeGateway for InMemoryCloud {
    fn get_by_name<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
    ) -> GatewayFuture<'a, Option<ScaleSetRevision>> {
        Box::pin(async move {
            self.call(GatewayCall::GetByName(name.to_string()), |doc| {
                Ok(doc
                    .scale_sets
                    .get(&table_key(scope, name))
                    .map(|sim| sim.scale_set.clone()))
            })
        })
    }

    fn list_by_resource_group<'a>(
        &'a self,
        scope: &'a Scope,
    ) -> GatewayFuture<'a, Vec<ScaleSetRevision>> {
        Box::pin(async move {
            self.call(
                GatewayCall::ListByResourceGroup(scope.resource_group.clone()),
                |doc| {
                    let prefix = scope_prefix(scope);
                    Ok(doc
                        .scale_sets
                        .iter()
                        .filter(|(key, _)| key.starts_with(&prefix))
                        .map(|(_, sim)| sim.scale_set.clone())
                        .collect())
                },
            )
        })
    }

    fn create<'a>(
        &'a self,
        scope: &'a Scope,
        request: &'a NewScaleSet,
    ) -> GatewayFuture<'a, ScaleSetRevision> {
        Box::pin(async move {
            self.call(GatewayCall::Create(request.name.clone()), |doc| {
                let key = table_key(scope, &request.name);
                if doc.scale_sets.contains_key(&key) {
                    return Err(GatewayError::Rejected(format!(
                        "scale set {} already exists",
                        request.name
                    )));
                }
                let scale_set = ScaleSetRevision {
                    id: scale_set_id(scope, &request.name),
                    name: request.name.clone(),
                    resource_group: scope.resource_group.clone(),
                    capacity: request.capacity,
                    image: request.base.image.clone(),
                    tags: request.tags.clone(),
                    provisioning_state: ProvisioningState::Succeeded,
                };
                doc.scale_sets.insert(
                    key,
                    SimScaleSet {
                        scale_set: scale_set.clone(),
                        backend_pools: BTreeSet::new(),
                        admin_username: Some(request.auth.username().to_string()),
                        stalled: false,
                        failed: false,
                    },
                );
                Ok(scale_set)
            })
        })
    }

    fn update_capacity<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        capacity: u32,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let entry = GatewayCall::UpdateCapacity {
                name: name.to_string(),
                capacity,
            };
            self.call(entry, |doc| {
                let sim = sim_mut(doc, scope, name)?;
                sim.scale_set.capacity = capacity;
                settle(sim);
                Ok(())
            })
        })
    }

    fn update_tags<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        tags: &'a BTreeMap<String, String>,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let entry = GatewayCall::UpdateTags {
                name: name.to_string(),
                tags: tags.clone(),
            };
            self.call(entry, |doc| {
                let sim = sim_mut(doc, scope, name)?;
                sim.scale_set
                    .tags
                    .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(())
            })
        })
    }

    fn delete<'a>(&'a self, scope: &'a Scope, names: &'a [String]) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.call(GatewayCall::Delete(names.to_vec()), |doc| {
                for name in names {
                    if doc
                        .scale_sets
                        .remove(&table_key(scope, name))
                        .is_some()
                    {
                        doc.autoscale.remove(&scale_set_id(scope, name));
                    }
                }
                Ok(())
            })
        })
    }

    fn attach_to_pool<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        load_balancer: &'a str,
        pool: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let entry = GatewayCall::AttachToPool {
                name: name.to_string(),
                pool: pool.to_string(),
            };
            self.call(entry, |doc| {
                let sim = sim_mut(doc, scope, name)?;
                sim.backend_pools.insert(pool_key(load_balancer, pool));
                settle(sim);
                Ok(())
            })
        })
    }

    fn detach_from_pool<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        load_balancer: &'a str,
        pool: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let entry = GatewayCall::DetachFromPool {
                name: name.to_string(),
                pool: pool.to_string(),
            };
            self.call(entry, |doc| {
                let sim = sim_mut(doc, scope, name)?;
                sim.backend_pools.remove(&pool_key(load_balancer, pool));
                settle(sim);
                Ok(())
            })
        })
    }

    fn list_instances<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
    ) -> GatewayFuture<'a, Vec<VmInstance>> {
        Box::pin(async move {
            self.call(GatewayCall::ListInstances(name.to_string()), |doc| {
                let sim = sim_mut(doc, scope, name)?;
                Ok(sim_instances(sim))
            })
        })
    }

    fn refresh_instance<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        instance_id: &'a str,
    ) -> GatewayFuture<'a, VmInstance> {
        Box::pin(async move {
            let entry = GatewayCall::RefreshInstance {
                name: name.to_string(),
                instance_id: instance_id.to_string(),
            };
            self.call(entry, |doc| {
                let sim = sim_mut(doc, scope, name)?;
                let mut vm = sim_instances(sim)
                    .into_iter()
                    .find(|vm| vm.instance_id == instance_id)
                    .ok_or_else(|| {
                        GatewayError::NotFound(format!("instance {instance_id} of {name}"))
                    })?;
                let index: u32 = instance_id.parse().unwrap_or(0);
                vm.private_ip = Some(format!("10.0.{}.{}", index / 250, index % 250 + 4));
                vm.public_dns = Some(format!("{name}-{instance_id}.cloudapp.example.net"));
                Ok(vm)
            })
        })
    }
}

impl AutoscaleGateway for InMemoryCloud {
    fn get_default_profile<'a>(
        &'a self,
        _scope: &'a Scope,
        target_id: &'a str,
    ) -> GatewayFuture<'a, Option<ProfileCapacity>> {
        Box::pin(async move {
            self.call(GatewayCall::GetDefaultProfile(target_id.to_string()), |doc| {
                Ok(doc.autoscale.get(target_id).map(|s| s.capacity))
            })
        })
    }

    fn get_policy_json<'a>(
        &'a self,
        _scope: &'a Scope,
        target_id: &'a str,
    ) -> GatewayFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.call(GatewayCall::GetPolicyJson(target_id.to_string()), |doc| {
                Ok(doc
                    .autoscale
                    .get(target_id)
                    .map(|s| s.policies.clone())
                    .unwrap_or_default())
            })
        })
    }

    fn attach_policy<'a>(
        &'a self,
        _scope: &'a Scope,
        target_id: &'a str,
        policies: &'a [String],
        capacity: ProfileCapacity,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let entry = GatewayCall::AttachPolicy {
                target_id: target_id.to_string(),
                policies: policies.to_vec(),
                capacity,
            };
            self.call(entry, |doc| {
                if !doc
                    .scale_sets
                    .values()
                    .any(|sim| sim.scale_set.id == target_id)
                {
                    return Err(GatewayError::NotFound(format!("scale set {target_id}")));
                }
                doc.autoscale.insert(
                    target_id.to_string(),
                    AutoscaleSetting {
                        policies: policies.to_vec(),
                        capacity,
                    },
                );
                Ok(())
            })
        })
    }

    fn clear_policy<'a>(&'a self, _scope: &'a Scope, target_id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            self.call(GatewayCall::ClearPolicy(target_id.to_string()), |doc| {
                doc.autoscale.remove(target_id);
                Ok(())
            })
        })
    }
}
