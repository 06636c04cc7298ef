//! scaleswap-gateway: the provider seams the deployment orchestrators
//! talk through.
//!
//! # Components
//!
//! - **`compute`**: scale-set lookup, creation, capacity, pools, instances
//! - **`autoscale`**: autoscale profile and policy management
//! - **`log`**: operator-facing execution log sink
//! - **`memory`**: in-memory simulated cloud implementing both gateways
//!
//! Gateway methods return boxed futures so implementations can be held
//! as `Arc<dyn ComputeGateway>` / `Arc<dyn AutoscaleGateway>`.

use std::future::Future;
use std::pin::Pin;

pub mod autoscale;
pub mod compute;
pub mod error;
pub mod log;
pub mod memory;

pub use autoscale::AutoscaleGateway;
pub use compute::{ComputeGateway, NewScaleSet};
pub use error::{GatewayError, GatewayResult};
pub use log::{CommandStatus, ExecutionLogSink, LogLevel, LogLine, MemoryLogSink, TracingLogSink};
pub use memory::{
    scale_set_id, AutoscaleSetting, CloudDocument, GatewayCall, InMemoryCloud, Operation, SimScaleSet,
};

/// Boxed future returned by every gateway method.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send + 'a>>;
