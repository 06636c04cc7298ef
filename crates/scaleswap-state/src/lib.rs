//! scaleswap-state: persistence carried between task invocations.
//!
//! Setup produces the only state that outlives one invocation: the new
//! revision's name, its resolved bounds, and the pre-deployment snapshot
//! of the revision it replaces. The store keeps the latest setup per owner
//! id so a later rollback can replay the snapshot.
//!
//! Records are JSON-serialized into redb `&[u8]` value columns. The
//! `StateStore` is `Clone + Send + Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod record;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use record::SetupRecord;
pub use store::StateStore;
