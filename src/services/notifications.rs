//! Notification creation, inbox processing and daily digests.
//!
//! Emails are not sent here: immediate and digest emails are queued on the
//! `emails` queue for the mail service.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::NotificationStore;
use crate::error::AppResult;
use crate::models::{
    CreateNotificationPayload, DigestEmailPayload, NewNotification, NotificationEmailPayload,
    NotificationMode, UserNotificationsPayload, resolve_effective_mode,
};
use crate::queue::{AddOptions, Queue};

pub const SEND_NOTIFICATION_EMAIL: &str = "send-notification-email";
pub const SEND_DIGEST_EMAIL: &str = "send-digest-email";

/// How far back a daily digest looks.
pub const DIGEST_WINDOW_HOURS: i64 = 24;

/// Namespace for notification ids derived from job ids.
const NOTIFICATION_NAMESPACE: Uuid = Uuid::from_u128(0x5c1e_7a2d_94b3_4f08_a6d1_3e8b_0c27_f915);

/// The notification id a `create-notification` job writes. Redelivering the
/// same job yields the same id, so the insert happens at most once.
pub fn notification_id_for(job_id: &str) -> Uuid {
    Uuid::new_v5(&NOTIFICATION_NAMESPACE, job_id.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The recipient's effective mode is `NONE`
    Suppressed,
    Created {
        notification_id: Uuid,
        email_queued: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestReport {
    pub daily_users: usize,
    pub digests_queued: usize,
}

async fn effective_mode<S>(store: &S, user_id: &str) -> AppResult<NotificationMode>
where
    S: NotificationStore + ?Sized,
{
    let user_mode = store.notification_mode_for(user_id).await?;
    let global_mode = match user_mode {
        None | Some(NotificationMode::UseGlobal) => store.global_notification_mode().await?,
        Some(_) => None,
    };
    Ok(resolve_effective_mode(user_mode, global_mode))
}

/// Create a notification honouring the recipient's delivery mode.
///
/// Safe to retry: the row id and the email job id both derive from `job_id`.
pub async fn create_notification<S>(
    store: &S,
    emails: Option<&Queue>,
    job_id: &str,
    payload: &CreateNotificationPayload,
) -> AppResult<CreateOutcome>
where
    S: NotificationStore + ?Sized,
{
    let mode = effective_mode(store, &payload.user_id).await?;
    if mode == NotificationMode::None {
        debug!(user_id = %payload.user_id, "Notifications disabled for user, skipping");
        return Ok(CreateOutcome::Suppressed);
    }

    let notification_id = notification_id_for(job_id);
    let inserted = store
        .insert_notification(NewNotification {
            id: notification_id,
            user_id: payload.user_id.clone(),
            notification_type: payload.notification_type.clone(),
            title: payload.title.clone(),
            message: payload.message.clone(),
            related_entity_id: payload.related_entity_id.clone(),
            related_entity_type: payload.related_entity_type.clone(),
            data: payload.data.clone(),
        })
        .await?;

    let mut email_queued = false;
    if mode == NotificationMode::InAppEmailImmediate {
        match emails {
            Some(queue) => {
                let email = NotificationEmailPayload {
                    notification_id: notification_id.to_string(),
                    user_id: payload.user_id.clone(),
                    immediate: true,
                    tenant_id: payload.tenant_id.clone(),
                };
                queue
                    .add(
                        SEND_NOTIFICATION_EMAIL,
                        serde_json::to_value(&email)?,
                        AddOptions::with_job_id(format!("notification-email:{}", notification_id)),
                    )
                    .await?;
                email_queued = true;
            }
            None => warn!(
                notification_id = %notification_id,
                "Emails queue unavailable, immediate email not sent"
            ),
        }
    }

    if inserted {
        info!(
            user_id = %payload.user_id,
            notification_id = %notification_id,
            mode = %mode,
            "Notification created"
        );
    } else {
        debug!(notification_id = %notification_id, "Notification already exists");
    }

    Ok(CreateOutcome::Created {
        notification_id,
        email_queued,
    })
}

/// Load a user's unread notifications. Returns how many there are.
pub async fn process_user_notifications<S>(
    store: &S,
    payload: &UserNotificationsPayload,
) -> AppResult<usize>
where
    S: NotificationStore + ?Sized,
{
    let unread = store.unread_notifications(&payload.user_id, None).await?;
    info!(
        "Processing {} unread notifications for user {}",
        unread.len(),
        payload.user_id
    );
    Ok(unread.len())
}

/// Queue one digest email per daily-digest user with recent unread notifications.
///
/// Digest jobs get a per-user, per-day job id so a retried digest run does not
/// queue the same email twice.
pub async fn send_daily_digest<S>(
    store: &S,
    emails: Option<&Queue>,
    tenant_id: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<DigestReport>
where
    S: NotificationStore + ?Sized,
{
    let Some(queue) = emails else {
        warn!("Emails queue unavailable, skipping daily digest");
        return Ok(DigestReport::default());
    };

    let global_mode = store.global_notification_mode().await?;
    let since = now - Duration::hours(DIGEST_WINDOW_HOURS);
    let mut report = DigestReport::default();

    for user in store.active_user_modes().await? {
        if resolve_effective_mode(user.mode, global_mode) != NotificationMode::InAppEmailDaily {
            continue;
        }
        report.daily_users += 1;

        let notifications = store
            .unread_notifications(&user.user_id, Some(since))
            .await?;
        if notifications.is_empty() {
            continue;
        }

        let job_id = format!(
            "digest:{}:{}:{}",
            tenant_id.unwrap_or("default"),
            user.user_id,
            now.date_naive()
        );
        let digest = DigestEmailPayload {
            user_id: user.user_id.clone(),
            notifications,
            tenant_id: tenant_id.map(str::to_string),
        };

        let added = queue
            .add(
                SEND_DIGEST_EMAIL,
                serde_json::to_value(&digest)?,
                AddOptions::with_job_id(job_id),
            )
            .await?;
        if !added.duplicate {
            report.digests_queued += 1;
        }
    }

    info!(
        "Daily digest: {} users on daily mode, {} digests queued",
        report.daily_users, report.digests_queued
    );

    Ok(report)
}
