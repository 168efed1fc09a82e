//! Business logic services.

pub mod forecast;
pub mod group_discovery;
pub mod notifications;
pub mod scheduling;

use crate::error::AppResult;

pub use forecast::{
    CaseForecastOptions, CaseForecastOutcome, update_repository_case_forecast,
    update_test_run_forecast,
};
pub use group_discovery::get_unique_case_group_ids;
pub use notifications::{
    CreateOutcome, DigestReport, SEND_DIGEST_EMAIL, SEND_NOTIFICATION_EMAIL, create_notification,
    process_user_notifications, send_daily_digest,
};
pub use scheduling::{RECURRING_JOBS, ScheduleReport, TenantSet, schedule_recurring_jobs};

/// Success/failure counts of a best-effort batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTally {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchTally {
    pub fn record<T>(&mut self, result: &AppResult<T>) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}
