//! Job payloads carried by the broker.
//!
//! Payloads are JSON with camelCase keys so producers in other services can
//! enqueue them without sharing Rust types.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{AppError, AppResult};
use crate::tenant::TenantScoped;

use super::notification::NotificationSummary;

/// Payload for jobs that only need a tenant (bulk forecast, daily digest).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl TenantPayload {
    pub fn new(tenant_id: Option<String>) -> Self {
        Self { tenant_id }
    }
}

/// Payload for `update-single-case-forecast`.
///
/// The id is kept as raw JSON so that a missing or non-numeric id is reported
/// as an invalid payload rather than a generic decode failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseForecastPayload {
    #[serde(default)]
    pub repository_case_id: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl CaseForecastPayload {
    pub fn new(repository_case_id: i32, tenant_id: Option<String>) -> Self {
        Self {
            repository_case_id: Some(JsonValue::from(repository_case_id)),
            tenant_id,
        }
    }

    /// Validated repository case id.
    pub fn case_id(&self) -> AppResult<i32> {
        let value = self
            .repository_case_id
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput("repositoryCaseId is required".to_string()))?;

        value
            .as_i64()
            .and_then(|id| i32::try_from(id).ok())
            .ok_or_else(|| {
                AppError::InvalidInput(format!("repositoryCaseId must be numeric, got {}", value))
            })
    }
}

/// Payload for `create-notification`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationPayload {
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Payload for `process-user-notifications`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNotificationsPayload {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Emails-queue payload for `send-notification-email`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEmailPayload {
    pub notification_id: String,
    pub user_id: String,
    pub immediate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Emails-queue payload for `send-digest-email`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestEmailPayload {
    pub user_id: String,
    pub notifications: Vec<NotificationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl TenantScoped for TenantPayload {
    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

impl TenantScoped for CaseForecastPayload {
    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

impl TenantScoped for CreateNotificationPayload {
    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

impl TenantScoped for UserNotificationsPayload {
    fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_case_id_validation() {
        let payload: CaseForecastPayload =
            serde_json::from_value(json!({ "repositoryCaseId": 42, "tenantId": "acme" })).unwrap();
        assert_eq!(payload.case_id().unwrap(), 42);
        assert_eq!(payload.tenant_id(), Some("acme"));

        let missing: CaseForecastPayload = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(missing.case_id(), Err(AppError::InvalidInput(_))));

        let text: CaseForecastPayload =
            serde_json::from_value(json!({ "repositoryCaseId": "42" })).unwrap();
        assert!(matches!(text.case_id(), Err(AppError::InvalidInput(_))));

        let fractional: CaseForecastPayload =
            serde_json::from_value(json!({ "repositoryCaseId": 4.5 })).unwrap();
        assert!(fractional.case_id().is_err());
    }

    #[test]
    fn test_notification_payload_uses_type_key() {
        let payload: CreateNotificationPayload = serde_json::from_value(json!({
            "userId": "user-1",
            "type": "COMMENT_MENTION",
            "title": "You were mentioned",
            "message": "Alex mentioned you",
        }))
        .unwrap();

        assert_eq!(payload.notification_type, "COMMENT_MENTION");
        assert!(payload.tenant_id.is_none());
        assert!(payload.data.is_none());
    }

    #[test]
    fn test_tenant_payload_omits_missing_tenant() {
        let value = serde_json::to_value(TenantPayload::default()).unwrap();
        assert_eq!(value, json!({}));

        let value = serde_json::to_value(TenantPayload::new(Some("acme".into()))).unwrap();
        assert_eq!(value, json!({ "tenantId": "acme" }));
    }
}
