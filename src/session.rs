//! Session Manager
//!
//! Bounded in-memory table of authenticated sessions with sliding
//! expiry. Sessions do not survive a restart; durable state belongs to
//! the Record Store. The table is owned by this manager and mutated
//! only through its API - an injected instance, not ambient globals.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::config::IdentityConfig;
use crate::error::IdentityError;
use crate::models::AuthLevel;

/// One live session
#[derive(Debug, Clone)]
pub struct Session {
    pub identifier: String,
    pub level: AuthLevel,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// The caller-facing slice of a validated session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub identifier: String,
    pub level: AuthLevel,
}

/// Outcome of validating a presented token. `Expired` and `Invalid`
/// are treated alike by callers but kept distinct for diagnostics.
#[derive(Debug, Clone)]
pub enum SessionValidation {
    Valid(SessionInfo),
    Expired,
    Invalid,
}

/// Bounded, concurrency-safe session table
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    timeout: Duration,
    capacity: usize,
}

impl SessionManager {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout: Duration::seconds(config.session_timeout_secs),
            capacity: config.session_capacity,
        }
    }

    /// Opaque token: 32 random bytes, hex-encoded. Carries nothing
    /// recoverable about the identifier.
    fn generate_token() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex_encode(&bytes)
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now - session.last_activity >= self.timeout
    }

    /// Create a session for an authenticated identifier. When the table
    /// is full, expired sessions are swept eagerly before giving up.
    pub async fn create(
        &self,
        identifier: &str,
        level: AuthLevel,
    ) -> Result<String, IdentityError> {
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.capacity {
            let now = Utc::now();
            sessions.retain(|_, s| !self.is_expired(s, now));

            if sessions.len() >= self.capacity {
                tracing::warn!("Session table full, rejecting new session");
                return Err(IdentityError::Io("session capacity exhausted".to_string()));
            }
        }

        let token = Self::generate_token();
        let now = Utc::now();
        sessions.insert(
            token.clone(),
            Session {
                identifier: identifier.to_string(),
                level,
                created_at: now,
                last_activity: now,
            },
        );

        Ok(token)
    }

    /// Check a presented token; an expired session is removed on sight
    pub async fn validate(&self, token: &str) -> SessionValidation {
        let mut sessions = self.sessions.write().await;

        let Some(session) = sessions.get(token) else {
            return SessionValidation::Invalid;
        };

        if self.is_expired(session, Utc::now()) {
            sessions.remove(token);
            return SessionValidation::Expired;
        }

        SessionValidation::Valid(SessionInfo {
            identifier: session.identifier.clone(),
            level: session.level,
        })
    }

    /// Refresh the sliding window; the caller invokes this on each
    /// activity-bearing request.
    pub async fn touch(&self, token: &str) -> bool {
        let mut sessions = self.sessions.write().await;

        let now = Utc::now();
        match sessions.get_mut(token) {
            Some(session) if now - session.last_activity < self.timeout => {
                session.last_activity = now;
                true
            }
            Some(_) => {
                sessions.remove(token);
                false
            }
            None => false,
        }
    }

    /// Destroy a session, returning it if it existed
    pub async fn destroy(&self, token: &str) -> Option<Session> {
        self.sessions.write().await.remove(token)
    }

    /// Destroy every session bound to an identifier (credential
    /// rotation, administrative action). Returns how many were dropped.
    pub async fn destroy_all_for(&self, identifier: &str) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.identifier != identifier);
        before - sessions.len()
    }

    /// Drop expired sessions; returns how many were reclaimed
    pub async fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_expired(s, now));
        before - sessions.len()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn hex_encode(data: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        write!(out, "{byte:02x}").expect("writing to a String cannot fail");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(timeout_secs: i64, capacity: usize) -> SessionManager {
        SessionManager::new(&IdentityConfig {
            session_timeout_secs: timeout_secs,
            session_capacity: capacity,
            ..IdentityConfig::default()
        })
    }

    #[tokio::test]
    async fn test_create_validate_touch_destroy() {
        let mgr = manager(1800, 100);

        let token = mgr.create("ab261234", AuthLevel::Basic).await.unwrap();
        assert_eq!(token.len(), 64);

        match mgr.validate(&token).await {
            SessionValidation::Valid(info) => {
                assert_eq!(info.identifier, "ab261234");
                assert_eq!(info.level, AuthLevel::Basic);
            }
            other => panic!("expected valid session, got {other:?}"),
        }

        assert!(mgr.touch(&token).await);

        mgr.destroy(&token).await.unwrap();
        assert!(matches!(
            mgr.validate(&token).await,
            SessionValidation::Invalid
        ));
    }

    #[tokio::test]
    async fn test_tokens_are_unique_and_opaque() {
        let mgr = manager(1800, 100);

        let a = mgr.create("ab261234", AuthLevel::Basic).await.unwrap();
        let b = mgr.create("ab261234", AuthLevel::Basic).await.unwrap();

        assert_ne!(a, b);
        assert!(!a.contains("ab261234"));
    }

    #[tokio::test]
    async fn test_expired_session_cannot_be_resurrected() {
        // Zero timeout: every session is expired the instant it is made
        let mgr = manager(0, 100);

        let token = mgr.create("ab261234", AuthLevel::Basic).await.unwrap();

        assert!(matches!(
            mgr.validate(&token).await,
            SessionValidation::Expired
        ));
        // Removed on detection: a second look is Invalid, not Expired
        assert!(matches!(
            mgr.validate(&token).await,
            SessionValidation::Invalid
        ));

        let token = mgr.create("ab261234", AuthLevel::Basic).await.unwrap();
        assert!(!mgr.touch(&token).await);
        assert!(matches!(
            mgr.validate(&token).await,
            SessionValidation::Invalid
        ));
    }

    #[tokio::test]
    async fn test_capacity_sweeps_before_rejecting() {
        let mgr = manager(0, 2);

        // Both sessions expire immediately, so the third create
        // reclaims them instead of failing.
        mgr.create("aa261111", AuthLevel::Basic).await.unwrap();
        mgr.create("bb262222", AuthLevel::Basic).await.unwrap();

        assert!(mgr.create("cc263333", AuthLevel::Basic).await.is_ok());
        assert_eq!(mgr.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_rejects_when_all_live() {
        let mgr = manager(1800, 2);

        mgr.create("aa261111", AuthLevel::Basic).await.unwrap();
        mgr.create("bb262222", AuthLevel::Basic).await.unwrap();

        let refused = mgr.create("cc263333", AuthLevel::Basic).await;
        assert!(matches!(refused, Err(IdentityError::Io(_))));
    }

    #[tokio::test]
    async fn test_destroy_all_for_identifier() {
        let mgr = manager(1800, 100);

        mgr.create("ab261234", AuthLevel::Basic).await.unwrap();
        mgr.create("ab261234", AuthLevel::Basic).await.unwrap();
        let other = mgr.create("cd265678", AuthLevel::Basic).await.unwrap();

        assert_eq!(mgr.destroy_all_for("ab261234").await, 2);
        assert_eq!(mgr.active_count().await, 1);
        assert!(matches!(
            mgr.validate(&other).await,
            SessionValidation::Valid(_)
        ));
    }

    #[tokio::test]
    async fn test_sweep_reclaims_only_expired() {
        let expired = manager(0, 100);
        expired.create("aa261111", AuthLevel::Basic).await.unwrap();
        expired.create("bb262222", AuthLevel::Basic).await.unwrap();
        assert_eq!(expired.sweep_expired().await, 2);

        let live = manager(1800, 100);
        live.create("aa261111", AuthLevel::Basic).await.unwrap();
        assert_eq!(live.sweep_expired().await, 0);
        assert_eq!(live.active_count().await, 1);
    }
}
