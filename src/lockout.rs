//! Lockout Policy
//!
//! Per-identifier failed-attempt counting and temporary account locks.
//! State lives in the Record Store's side-tables; expiry is evaluated
//! lazily on each check and expired locks are reclaimed on sight.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::IdentityConfig;
use crate::error::IdentityError;
use crate::store::{AuditEvent, AuxKind, RecordStore};

/// Consecutive-failure counter since the last success or lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptCounter {
    pub count: u32,
}

/// Temporary account lock; absent once expired and reclaimed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountLock {
    pub expires_at: DateTime<Utc>,
}

/// Per-key async mutexes: operations on the same identifier serialize,
/// operations on different identifiers never contend.
#[derive(Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}

/// Attempt counting and lock enforcement for one Record Store
pub struct LockoutPolicy {
    store: Arc<RecordStore>,
    max_attempts: u32,
    lock_duration: Duration,
    locks: KeyedLocks,
}

impl LockoutPolicy {
    pub fn new(store: Arc<RecordStore>, config: &IdentityConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_login_attempts,
            lock_duration: Duration::seconds(config.lockout_duration_secs),
            locks: KeyedLocks::default(),
        }
    }

    /// Record one failed attempt. Returns the lock expiry if this
    /// failure crossed the threshold. The increment-and-check runs
    /// under a per-identifier mutex so two racing failures cannot both
    /// observe the same counter value.
    pub async fn record_failure(
        &self,
        identifier: &str,
    ) -> Result<Option<DateTime<Utc>>, IdentityError> {
        let _guard = self.locks.acquire(identifier).await;

        let count = self
            .store
            .get_aux::<AttemptCounter>(identifier, AuxKind::Attempts)
            .await?
            .map(|c| c.count)
            .unwrap_or(0)
            + 1;

        if count < self.max_attempts {
            self.store
                .put_aux(identifier, AuxKind::Attempts, &AttemptCounter { count })
                .await?;
            return Ok(None);
        }

        // Threshold crossed: lock, and reset the counter so the
        // identifier starts clean once the lock clears.
        let expires_at = Utc::now() + self.lock_duration;
        self.store
            .put_aux(identifier, AuxKind::Lock, &AccountLock { expires_at })
            .await?;
        self.store.delete_aux(identifier, AuxKind::Attempts).await?;
        self.store
            .append_audit(
                identifier,
                AuditEvent::AccountLocked,
                "Account locked after repeated failed attempts",
            )
            .await?;

        tracing::warn!(identifier, "Account locked until {expires_at}");
        Ok(Some(expires_at))
    }

    /// Clear the failure counter after a successful authentication
    pub async fn record_success(&self, identifier: &str) -> Result<(), IdentityError> {
        let _guard = self.locks.acquire(identifier).await;
        self.store.delete_aux(identifier, AuxKind::Attempts).await?;
        Ok(())
    }

    /// Is the identifier currently locked? An expired lock is deleted on
    /// sight and reported as absent. Storage failures propagate; they
    /// are never interpreted as "not locked".
    pub async fn is_locked(
        &self,
        identifier: &str,
    ) -> Result<Option<DateTime<Utc>>, IdentityError> {
        let lock = self
            .store
            .get_aux::<AccountLock>(identifier, AuxKind::Lock)
            .await?;

        match lock {
            Some(lock) if Utc::now() < lock.expires_at => Ok(Some(lock.expires_at)),
            Some(_) => {
                self.store.delete_aux(identifier, AuxKind::Lock).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Administrative unlock, unconditional
    pub async fn unlock(&self, identifier: &str) -> Result<(), IdentityError> {
        let existed = self.store.delete_aux(identifier, AuxKind::Lock).await?;

        if existed {
            self.store
                .append_audit(identifier, AuditEvent::AccountUnlocked, "Unlocked manually")
                .await?;
            tracing::info!(identifier, "Account unlocked manually");
        }

        Ok(())
    }

    /// Current consecutive-failure count (diagnostics and tests)
    pub async fn attempts(&self, identifier: &str) -> Result<u32, IdentityError> {
        Ok(self
            .store
            .get_aux::<AttemptCounter>(identifier, AuxKind::Attempts)
            .await?
            .map(|c| c.count)
            .unwrap_or(0))
    }
}
