//! scaleswap-core: shared types for blue/green scale-set deployments.
//!
//! Holds the data model every other crate speaks: scale-set revisions and
//! their tags, the per-invocation deployment context, the pre-deployment
//! snapshot replayed by rollbacks, and `scaleswap.toml` parsing.

pub mod config;
pub mod types;

pub use config::DeployerConfig;
pub use types::*;
