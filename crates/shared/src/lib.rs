// Test code patterns:
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! CarePlan Shared Library
//!
//! Domain enums and database helpers used by the API server and the
//! billing crate.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{AccountRole, ActivityType, BaseFeeStatus, PlanStatus, SubscriptionStatus};

/// Sentinel clinic id for patients who registered without picking a clinic.
pub const UNASSIGNED_CLINIC: &str = "unassigned";
