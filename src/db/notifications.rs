//! Database queries for notifications and delivery preferences.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use tracing::warn;

use crate::entity::app_config::Entity as AppConfig;
use crate::entity::notification::{self as notification, ActiveModel, Entity as Notification};
use crate::entity::user::{self as user, Entity as User};
use crate::entity::user_preferences::{self as preferences, Entity as UserPreferences};
use crate::error::{AppError, AppResult};
use crate::models::{NewNotification, NotificationMode, NotificationSummary, UserNotificationMode};

use super::DbPool;

/// `app_config` key holding `{ "defaultMode": ... }`.
pub const NOTIFICATION_SETTINGS_KEY: &str = "notificationSettings";

/// Data access needed by the notification worker.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// The user's stored preference, if any.
    async fn notification_mode_for(&self, user_id: &str) -> AppResult<Option<NotificationMode>>;

    /// Tenant-wide default mode from application config.
    async fn global_notification_mode(&self) -> AppResult<Option<NotificationMode>>;

    /// Insert unless a notification with the same id exists. Returns whether
    /// a row was written.
    async fn insert_notification(&self, notification: NewNotification) -> AppResult<bool>;

    /// Unread, non-deleted notifications of a user, newest first.
    async fn unread_notifications(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<NotificationSummary>>;

    /// Active users with their stored preference.
    async fn active_user_modes(&self) -> AppResult<Vec<UserNotificationMode>>;
}

fn parse_mode(raw: &str) -> Option<NotificationMode> {
    let mode = NotificationMode::parse(raw);
    if mode.is_none() {
        warn!(mode = raw, "Ignoring unknown notification mode");
    }
    mode
}

#[async_trait]
impl NotificationStore for DbPool {
    async fn notification_mode_for(&self, user_id: &str) -> AppResult<Option<NotificationMode>> {
        let prefs = UserPreferences::find()
            .filter(preferences::Column::UserId.eq(user_id))
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get user preferences: {}", e)))?;

        Ok(prefs.and_then(|p| parse_mode(&p.notification_mode)))
    }

    async fn global_notification_mode(&self) -> AppResult<Option<NotificationMode>> {
        let config = AppConfig::find_by_id(NOTIFICATION_SETTINGS_KEY.to_string())
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get notification settings: {}", e)))?;

        Ok(config.and_then(|c| {
            c.value
                .get("defaultMode")
                .and_then(|v| v.as_str())
                .and_then(parse_mode)
        }))
    }

    async fn insert_notification(&self, new: NewNotification) -> AppResult<bool> {
        let model = ActiveModel {
            id: Set(new.id),
            user_id: Set(new.user_id),
            notification_type: Set(new.notification_type),
            title: Set(new.title),
            message: Set(new.message),
            related_entity_id: Set(new.related_entity_id),
            related_entity_type: Set(new.related_entity_type),
            data: Set(new.data),
            is_read: Set(false),
            is_deleted: Set(false),
            created_at: Set(Utc::now()),
        };

        let inserted = Notification::insert(model)
            .on_conflict(
                OnConflict::column(notification::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert notification: {}", e)))?;

        Ok(inserted > 0)
    }

    async fn unread_notifications(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<NotificationSummary>> {
        let mut query = Notification::find()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .filter(notification::Column::IsDeleted.eq(false));

        if let Some(since) = since {
            query = query.filter(notification::Column::CreatedAt.gte(since));
        }

        let rows = query
            .order_by_desc(notification::Column::CreatedAt)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get unread notifications: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|n| NotificationSummary {
                id: n.id,
                notification_type: n.notification_type,
                title: n.title,
                message: n.message,
                related_entity_id: n.related_entity_id,
                related_entity_type: n.related_entity_type,
                created_at: n.created_at,
            })
            .collect())
    }

    async fn active_user_modes(&self) -> AppResult<Vec<UserNotificationMode>> {
        let users = User::find()
            .filter(user::Column::IsActive.eq(true))
            .filter(user::Column::IsDeleted.eq(false))
            .order_by_asc(user::Column::Id)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list users: {}", e)))?;

        let prefs: HashMap<String, String> = UserPreferences::find()
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list user preferences: {}", e)))?
            .into_iter()
            .map(|p| (p.user_id, p.notification_mode))
            .collect();

        Ok(users
            .into_iter()
            .map(|u| {
                let mode = prefs.get(&u.id).and_then(|m| parse_mode(m));
                UserNotificationMode {
                    user_id: u.id,
                    mode,
                }
            })
            .collect())
    }
}

#[async_trait]
impl<T: NotificationStore + ?Sized> NotificationStore for std::sync::Arc<T> {
    async fn notification_mode_for(&self, user_id: &str) -> AppResult<Option<NotificationMode>> {
        (**self).notification_mode_for(user_id).await
    }

    async fn global_notification_mode(&self) -> AppResult<Option<NotificationMode>> {
        (**self).global_notification_mode().await
    }

    async fn insert_notification(&self, notification: NewNotification) -> AppResult<bool> {
        (**self).insert_notification(notification).await
    }

    async fn unread_notifications(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<NotificationSummary>> {
        (**self).unread_notifications(user_id, since).await
    }

    async fn active_user_modes(&self) -> AppResult<Vec<UserNotificationMode>> {
        (**self).active_user_modes().await
    }
}
