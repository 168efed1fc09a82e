//! Domain error types for the TestPlanIt workers.
//!
//! Uses thiserror for ergonomic error handling with automatic Display implementations.

/// Application-level errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid input data (malformed job payloads, unknown job names)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Broker operation failed
    #[error("Queue error: {0}")]
    Queue(String),

    /// A required queue has no broker connection behind it
    #[error("Queue '{0}' is not available")]
    QueueUnavailable(String),

    /// Multi-tenant mode requires a tenant id on every job
    #[error("Job payload is missing tenantId (required in multi-tenant mode)")]
    MissingTenantId,

    /// No configuration exists for the requested tenant
    #[error("No configuration found for tenant '{0}'")]
    UnknownTenant(String),
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

// Conversion implementations for common error types

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Queue(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::UnknownTenant("acme".to_string());
        assert_eq!(err.to_string(), "No configuration found for tenant 'acme'");

        let err = AppError::MissingTenantId;
        assert!(err.to_string().contains("tenantId"));

        let err = AppError::QueueUnavailable("emails".to_string());
        assert!(err.to_string().contains("emails"));
    }

    #[test]
    fn test_json_error_maps_to_invalid_input() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
