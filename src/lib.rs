//! Campus Identity & Session Subsystem
//!
//! Durable member registration and authentication for the campus
//! portal (school / college / hospital / hostel members):
//! - Profile record store over embedded SQLite
//! - Argon2id credential verification
//! - Failed-attempt lockout with temporary locks
//! - One-time passcode challenges over SMS/email
//! - Bounded in-memory sessions with sliding expiry
//! - Append-only audit trail of every authentication event
//!
//! # Configuration
//!
//! All tunables come from `CAMPUS_*` environment variables with safe
//! defaults; see [`IdentityConfig`]. The OTP second factor can be
//! disabled per deployment with `CAMPUS_REQUIRE_OTP=false`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use campus_identity::{activate, create_routes, IdentityConfig, OutboxNotifier};
//! use std::sync::Arc;
//!
//! let notifier = Arc::new(OutboxNotifier::new("data/outbox"));
//! let service = activate("data/campus.db", notifier, IdentityConfig::from_env()).await?;
//! let app = create_routes(service);
//! ```

pub mod config;
pub mod credential;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod lockout;
pub mod middleware;
pub mod models;
pub mod notifier;
pub mod otp;
pub mod service;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use config::IdentityConfig;
pub use credential::CredentialVerifier;
pub use error::{IdentityError, UniqueField};
pub use extractors::{ClientInfo, SessionUser};
pub use handlers::{create_routes, AuthState};
pub use lockout::LockoutPolicy;
pub use models::*;
pub use notifier::{Channel, Notifier, OutboxNotifier};
pub use otp::{IssuedOtp, OtpManager, OtpOutcome};
pub use service::IdentityService;
pub use session::{SessionManager, SessionValidation};
pub use store::{AuditEvent, RecordStore};

use std::path::Path;
use std::sync::Arc;

/// Open (or create) the store at `db_path`, validate the configuration
/// and assemble the identity service.
pub async fn activate(
    db_path: impl AsRef<Path>,
    notifier: Arc<dyn Notifier>,
    config: IdentityConfig,
) -> Result<Arc<IdentityService>, IdentityError> {
    tracing::info!("Activating campus identity subsystem");

    config.validate()?;
    let store = Arc::new(RecordStore::open(db_path).await?);

    Ok(Arc::new(IdentityService::new(store, notifier, config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::testing::RecordingNotifier;

    #[tokio::test]
    async fn test_activate_with_file_store() {
        let db = std::env::temp_dir().join(format!(
            "campus-identity-activate-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&db);

        let notifier = Arc::new(RecordingNotifier::default());
        let service = activate(&db, notifier, IdentityConfig::default())
            .await
            .unwrap();

        // The store is usable and the router assembles
        assert!(matches!(
            service.profile("nobody").await,
            Err(IdentityError::NotFound)
        ));
        let _app = create_routes(service);

        let _ = std::fs::remove_file(&db);
    }

    #[tokio::test]
    async fn test_activate_rejects_invalid_config() {
        let notifier = Arc::new(RecordingNotifier::default());
        let config = IdentityConfig {
            session_capacity: 0,
            ..IdentityConfig::default()
        };

        let result = activate("unused.db", notifier, config).await;
        assert!(matches!(result, Err(IdentityError::Config(_))));
    }
}
