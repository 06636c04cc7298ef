//! Error types for provider gateways.

use thiserror::Error;

/// Result type alias for gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors a provider gateway can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("request rejected by provider: {0}")]
    Rejected(String),

    #[error("provider request failed: {0}")]
    Request(String),
}
