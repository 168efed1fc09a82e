//! Domain models for the TestPlanIt workers.

pub mod case;
pub mod job;
pub mod notification;

// Re-export commonly used types
pub use case::{
    CaseLinkEdge, CaseRecord, CaseSource, ForecastPair, RunCaseForecast,
    SAME_TEST_DIFFERENT_SOURCE, UNTESTED_STATUS, is_untested,
};
pub use job::{
    CaseForecastPayload, CreateNotificationPayload, DigestEmailPayload, NotificationEmailPayload,
    TenantPayload, UserNotificationsPayload,
};
pub use notification::{
    NewNotification, NotificationMode, NotificationSummary, UserNotificationMode,
    resolve_effective_mode,
};
