//! Notification domain models and delivery modes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// How a user wants to receive notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationMode {
    /// Drop notifications entirely.
    None,
    /// In-app inbox only.
    InApp,
    /// In-app plus one email per notification.
    InAppEmailImmediate,
    /// In-app plus a daily digest email.
    InAppEmailDaily,
    /// Defer to the tenant-wide default.
    UseGlobal,
}

impl NotificationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::InApp => "IN_APP",
            Self::InAppEmailImmediate => "IN_APP_EMAIL_IMMEDIATE",
            Self::InAppEmailDaily => "IN_APP_EMAIL_DAILY",
            Self::UseGlobal => "USE_GLOBAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Self::None),
            "IN_APP" => Some(Self::InApp),
            "IN_APP_EMAIL_IMMEDIATE" => Some(Self::InAppEmailImmediate),
            "IN_APP_EMAIL_DAILY" => Some(Self::InAppEmailDaily),
            "USE_GLOBAL" => Some(Self::UseGlobal),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolve the delivery mode that actually applies to a user.
///
/// A missing preference behaves like `USE_GLOBAL`; a missing (or
/// self-referencing) global default falls back to in-app delivery.
pub fn resolve_effective_mode(
    user_mode: Option<NotificationMode>,
    global_mode: Option<NotificationMode>,
) -> NotificationMode {
    match user_mode {
        Some(NotificationMode::UseGlobal) | None => match global_mode {
            Some(NotificationMode::UseGlobal) | None => NotificationMode::InApp,
            Some(mode) => mode,
        },
        Some(mode) => mode,
    }
}

/// A notification to be inserted under a caller-chosen id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: String,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub related_entity_id: Option<String>,
    pub related_entity_type: Option<String>,
    pub data: Option<JsonValue>,
}

/// An unread notification as listed in inboxes and digests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummary {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_entity_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An active user and their stored preference (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotificationMode {
    pub user_id: String,
    pub mode: Option<NotificationMode>,
}
