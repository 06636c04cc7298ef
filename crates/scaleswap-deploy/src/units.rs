//! Command-unit names used on the execution log.

pub const SETUP: &str = "Setup Scale Set";
pub const RETENTION: &str = "Downsize Old Revisions";
pub const CREATE: &str = "Create Scale Set";
pub const RESIZE_NEW: &str = "Resize New Scale Set";
pub const RESIZE_OLD: &str = "Resize Old Scale Set";
pub const SWAP_ROUTES: &str = "Swap Routes";
pub const ROLLBACK_ROUTES: &str = "Rollback Swap Routes";
pub const ROLLBACK: &str = "Rollback Scale Sets";
pub const EXECUTE: &str = "Execute";
