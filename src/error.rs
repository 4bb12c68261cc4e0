//! Identity Error Types
//!
//! Centralized error handling for all identity and session operations.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};

/// Profile field covered by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Identifier,
    Email,
    Mobile,
}

impl UniqueField {
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueField::Identifier => "identifier",
            UniqueField::Email => "email",
            UniqueField::Mobile => "mobile",
        }
    }
}

impl std::fmt::Display for UniqueField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity subsystem errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityError {
    #[error("No matching record")]
    NotFound,

    #[error("{field} is already registered")]
    AlreadyExists { field: UniqueField },

    #[error("Invalid credentials")]
    AuthFailed,

    #[error("Account is temporarily locked")]
    Locked { until: DateTime<Utc> },

    #[error("Code or session has expired")]
    Expired,

    #[error("Password does not meet requirements")]
    WeakPassword,

    #[error("Validation error: {0}")]
    InvalidInput(String),

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Could not deliver the one-time passcode")]
    DeliveryFailed,

    #[error("Storage error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error")]
    Internal,
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            IdentityError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                self.to_string(),
            ),
            IdentityError::AlreadyExists { .. } => (
                StatusCode::CONFLICT,
                "already_exists",
                self.to_string(),
            ),
            IdentityError::AuthFailed => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                self.to_string(),
            ),
            IdentityError::Locked { until } => {
                // Tell the caller when the lock clears, not why it was imposed.
                let minutes = (*until - Utc::now()).num_minutes().max(0) + 1;
                (
                    StatusCode::FORBIDDEN,
                    "account_locked",
                    format!("Account is temporarily locked. Try again in {minutes} minute(s)"),
                )
            }
            IdentityError::Expired => (
                StatusCode::UNAUTHORIZED,
                "expired",
                self.to_string(),
            ),
            IdentityError::WeakPassword => (
                StatusCode::BAD_REQUEST,
                "weak_password",
                self.to_string(),
            ),
            IdentityError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
            IdentityError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                self.to_string(),
            ),
            IdentityError::DeliveryFailed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "delivery_failed",
                self.to_string(),
            ),
            IdentityError::Io(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
                "Storage is temporarily unavailable, please retry".to_string(),
            ),
            IdentityError::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                msg.clone(),
            ),
            IdentityError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            ),
        };

        (
            status,
            Json(serde_json::json!({
                "error": error_code,
                "message": message
            })),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for IdentityError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => IdentityError::NotFound,
            // SQLite reports "UNIQUE constraint failed: profiles.email"
            sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed") => {
                let message = db.message().to_string();
                let field = if message.contains(".email") {
                    UniqueField::Email
                } else if message.contains(".mobile") {
                    UniqueField::Mobile
                } else {
                    UniqueField::Identifier
                };
                IdentityError::AlreadyExists { field }
            }
            other => {
                tracing::error!("Storage error: {:?}", other);
                IdentityError::Io(other.to_string())
            }
        }
    }
}

impl From<argon2::password_hash::Error> for IdentityError {
    fn from(err: argon2::password_hash::Error) -> Self {
        tracing::error!("Password hashing error: {:?}", err);
        IdentityError::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_field_display() {
        assert_eq!(UniqueField::Email.to_string(), "email");
        assert_eq!(UniqueField::Mobile.to_string(), "mobile");
        assert_eq!(UniqueField::Identifier.to_string(), "identifier");
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: IdentityError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, IdentityError::NotFound));
    }

    #[test]
    fn test_already_exists_message_names_field() {
        let err = IdentityError::AlreadyExists {
            field: UniqueField::Mobile,
        };
        assert_eq!(err.to_string(), "mobile is already registered");
    }
}
