//! End-to-end tests of the job engine.
//!
//! Jobs flow through the real queue, worker pool and handlers, backed by the
//! in-memory broker and data stores from `test_support`. No PostgreSQL or
//! Redis is needed.
//!
//! Run with: cargo test --test engine_e2e

mod test_helpers;

mod test_forecast_scenarios;
mod test_scheduler;
mod test_worker_dispatch;
