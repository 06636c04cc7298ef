//! Steady-state waits.
//!
//! A scale set is steady when the provider reports it `Succeeded`, it has
//! exactly `capacity` instances, and every instance is `Succeeded` with
//! the latest model applied. Waits poll until steady and are bounded by
//! the task's timeout; there is no cancellation once a wait has started.

use std::time::Duration;

use tracing::debug;

use scaleswap_core::{ProvisioningState, Scope};
use scaleswap_gateway::{CommandStatus, ComputeGateway, ExecutionLogSink, LogLevel};

use crate::error::{DeployError, Result};

/// Outcome of a single steady-state probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Steady,
    Converging,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct SteadyStateWaiter {
    timeout: Duration,
    poll_interval: Duration,
}

impl SteadyStateWaiter {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll until `name` is steady, failing once the timeout elapses.
    pub async fn wait(
        &self,
        compute: &dyn ComputeGateway,
        scope: &Scope,
        name: &str,
        unit: &str,
        log: &dyn ExecutionLogSink,
    ) -> Result<()> {
        log.info(unit, &format!("Waiting for scale set {name} to reach steady state"));

        let poll = async {
            loop {
                match probe(compute, scope, name).await? {
                    Probe::Steady => return Ok::<(), DeployError>(()),
                    Probe::Failed => {
                        return Err(DeployError::ProvisioningFailed(name.to_string()));
                    }
                    Probe::Converging => {
                        debug!(scale_set = name, "not yet steady");
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            }
        };

        match tokio::time::timeout(self.timeout, poll).await {
            Ok(Ok(())) => {
                log.info(unit, &format!("Scale set {name} reached steady state"));
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                log.log(
                    unit,
                    &format!(
                        "Timed out after {}s waiting for scale set {name}",
                        self.timeout.as_secs()
                    ),
                    LogLevel::Error,
                    CommandStatus::Failure,
                );
                Err(DeployError::Timeout {
                    scale_set: name.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

/// Check the scale set and its instances once.
pub async fn probe(compute: &dyn ComputeGateway, scope: &Scope, name: &str) -> Result<Probe> {
    let scale_set = compute
        .get_by_name(scope, name)
        .await?
        .ok_or_else(|| DeployError::NotFound(format!("scale set {name}")))?;

    match scale_set.provisioning_state {
        ProvisioningState::Failed => return Ok(Probe::Failed),
        ProvisioningState::Succeeded => {}
        _ => return Ok(Probe::Converging),
    }

    let instances = compute.list_instances(scope, name).await?;
    if instances
        .iter()
        .any(|vm| vm.provisioning_state == ProvisioningState::Failed)
    {
        return Ok(Probe::Failed);
    }
    let settled = instances.len() == scale_set.capacity as usize
        && instances.iter().all(|vm| {
            vm.provisioning_state == ProvisioningState::Succeeded && vm.latest_model_applied
        });

    Ok(if settled {
        Probe::Steady
    } else {
        Probe::Converging
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scaleswap_gateway::{InMemoryCloud, MemoryLogSink};

    fn scope() -> Scope {
        Scope::new("sub", "rg")
    }

    #[tokio::test]
    async fn steady_scale_set_returns_immediately() {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__1", 2, &[]);
        let log = MemoryLogSink::new();

        let waiter = SteadyStateWaiter::new(Duration::from_secs(5), Duration::from_millis(10));
        waiter
            .wait(&cloud, &scope(), "web__1", "Upscale", &log)
            .await
            .unwrap();
        assert!(log.contains("reached steady state"));
    }

    #[tokio::test]
    async fn stalled_scale_set_times_out() {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__1", 2, &[]);
        cloud.stall(&scope(), "web__1");
        let log = MemoryLogSink::new();

        let waiter = SteadyStateWaiter::new(Duration::from_millis(60), Duration::from_millis(10));
        let err = waiter
            .wait(&cloud, &scope(), "web__1", "Upscale", &log)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Timeout { ref scale_set, .. } if scale_set == "web__1"));
        assert!(log.contains("Timed out"));
    }

    #[tokio::test]
    async fn failed_provisioning_ends_the_wait_early() {
        let cloud = InMemoryCloud::new();
        cloud.insert_scale_set(&scope(), "web__1", 2, &[]);
        cloud.fail_provisioning(&scope(), "web__1");
        let log = MemoryLogSink::new();

        let waiter = SteadyStateWaiter::new(Duration::from_secs(30), Duration::from_millis(10));
        let started = std::time::Instant::now();
        let err = waiter
            .wait(&cloud, &scope(), "web__1", "Upscale", &log)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::ProvisioningFailed(ref name) if name == "web__1"));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!log.contains("Timed out"));
    }

    #[tokio::test]
    async fn vanished_scale_set_is_an_error() {
        let cloud = InMemoryCloud::new();
        let err = probe(&cloud, &scope(), "ghost").await.unwrap_err();
        assert!(matches!(err, DeployError::NotFound(_)));
    }
}
