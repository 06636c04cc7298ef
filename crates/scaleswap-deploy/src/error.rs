//! Error types for deployment orchestration.
//!
//! A scale set missing during a resize is not an error: lookups return
//! `Option` and the resize path logs a warning instead.

use std::time::Duration;

use thiserror::Error;

use scaleswap_gateway::GatewayError;

pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DeployError {
    /// Missing identifiers or route details, raised before any mutation.
    #[error("invalid task parameters: {0}")]
    Validation(String),

    #[error("scale set {scale_set} did not reach steady state within {timeout:?}")]
    Timeout { scale_set: String, timeout: Duration },

    #[error("scale set {0} entered a failed provisioning state")]
    ProvisioningFailed(String),

    /// A resource the step cannot proceed without is missing.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider error: {0}")]
    Provider(#[from] GatewayError),
}
