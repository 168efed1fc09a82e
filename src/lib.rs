//! TestPlanIt background workers.
//!
//! Recurring job scheduling, test-duration forecasting for linked repository
//! cases and test runs, and notification delivery, all routed through a
//! Redis-compatible job broker with per-tenant database isolation.

pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod logging;
pub mod migration;
pub mod models;
pub mod queue;
pub mod runtime;
pub mod services;
pub mod shutdown;
pub mod tenant;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workers;
