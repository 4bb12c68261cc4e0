//! OTP Manager
//!
//! Issues, persists and verifies short-lived one-time passcodes.
//! At most one live challenge exists per identifier; a challenge is
//! consumed exactly once, on successful verification or on detected
//! expiry. Delivery fans out over SMS and email with per-channel
//! timeouts; if every channel fails the challenge is withdrawn.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::IdentityConfig;
use crate::error::IdentityError;
use crate::notifier::{Channel, Notifier};
use crate::store::{AuditEvent, AuxKind, RecordStore};

/// Persisted challenge state; `resends` carries the resend budget
/// across reissues within one sign-in flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub resends: u32,
}

/// Definitive result of a verification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpOutcome {
    Verified,
    Mismatch,
    Expired,
    NoChallenge,
}

/// Result of issuing a challenge
#[derive(Debug, Clone)]
pub struct IssuedOtp {
    /// Channels that accepted the message
    pub channels: Vec<Channel>,
    /// Resends still available in this flow
    pub resends_left: u32,
}

/// Challenge issuance and verification for one Record Store
pub struct OtpManager {
    store: Arc<RecordStore>,
    notifier: Arc<dyn Notifier>,
    digits: u32,
    validity: Duration,
    resend_limit: u32,
    send_timeout: std::time::Duration,
}

impl OtpManager {
    pub fn new(
        store: Arc<RecordStore>,
        notifier: Arc<dyn Notifier>,
        config: &IdentityConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            digits: config.otp_digits,
            validity: Duration::seconds(config.otp_validity_secs),
            resend_limit: config.otp_resend_limit,
            send_timeout: std::time::Duration::from_secs(config.notifier_timeout_secs),
        }
    }

    /// Fixed-length numeric code from the thread-local CSPRNG, uniform
    /// over the whole width (no leading zero, no modulo bias).
    fn generate_code(&self) -> String {
        let low = 10u64.pow(self.digits - 1);
        let code = rand::thread_rng().gen_range(low..low * 10);
        code.to_string()
    }

    /// Issue a fresh challenge, superseding any prior one
    pub async fn issue(
        &self,
        identifier: &str,
        email: &str,
        mobile: &str,
    ) -> Result<IssuedOtp, IdentityError> {
        self.issue_with_resends(identifier, email, mobile, 0).await
    }

    /// Reissue within the current flow, counting against the resend
    /// budget carried in the superseded challenge.
    pub async fn resend(
        &self,
        identifier: &str,
        email: &str,
        mobile: &str,
    ) -> Result<IssuedOtp, IdentityError> {
        let resends = self
            .store
            .get_aux::<OtpChallenge>(identifier, AuxKind::Otp)
            .await?
            .map(|c| c.resends)
            .unwrap_or(0)
            + 1;

        if resends > self.resend_limit {
            return Err(IdentityError::InvalidInput(
                "Resend limit reached, start over from sign-in".to_string(),
            ));
        }

        self.issue_with_resends(identifier, email, mobile, resends)
            .await
    }

    async fn issue_with_resends(
        &self,
        identifier: &str,
        email: &str,
        mobile: &str,
        resends: u32,
    ) -> Result<IssuedOtp, IdentityError> {
        let code = self.generate_code();
        let challenge = OtpChallenge {
            code: code.clone(),
            expires_at: Utc::now() + self.validity,
            resends,
        };

        // Persist first: a replaced challenge must be dead before the
        // new code leaves the process.
        self.store
            .put_aux(identifier, AuxKind::Otp, &challenge)
            .await?;

        let mut channels = Vec::new();
        if self.deliver(Channel::Sms, mobile, &code).await {
            channels.push(Channel::Sms);
        }
        if self.deliver(Channel::Email, email, &code).await {
            channels.push(Channel::Email);
        }

        if channels.is_empty() {
            // Never leave an unreachable challenge behind
            self.store.delete_aux(identifier, AuxKind::Otp).await?;
            self.store
                .append_audit(
                    identifier,
                    AuditEvent::OtpDeliveryFailed,
                    "All delivery channels failed",
                )
                .await?;
            return Err(IdentityError::DeliveryFailed);
        }

        let detail = channels
            .iter()
            .map(Channel::as_str)
            .collect::<Vec<_>>()
            .join(",");
        self.store
            .append_audit(identifier, AuditEvent::OtpIssued, &format!("via {detail}"))
            .await?;

        Ok(IssuedOtp {
            channels,
            resends_left: self.resend_limit - resends,
        })
    }

    async fn deliver(&self, channel: Channel, destination: &str, code: &str) -> bool {
        match tokio::time::timeout(
            self.send_timeout,
            self.notifier.send(channel, destination, code),
        )
        .await
        {
            Ok(delivered) => delivered,
            Err(_) => {
                tracing::warn!(%channel, "OTP delivery timed out");
                false
            }
        }
    }

    /// Verify a candidate code. Success and detected expiry both
    /// consume the challenge; a mismatch leaves it live for bounded
    /// retries (the orchestrator counts those against the lockout).
    pub async fn verify(
        &self,
        identifier: &str,
        candidate: &str,
    ) -> Result<OtpOutcome, IdentityError> {
        let challenge = match self
            .store
            .get_aux::<OtpChallenge>(identifier, AuxKind::Otp)
            .await?
        {
            Some(c) => c,
            None => return Ok(OtpOutcome::NoChallenge),
        };

        if Utc::now() >= challenge.expires_at {
            self.store.delete_aux(identifier, AuxKind::Otp).await?;
            self.store
                .append_audit(identifier, AuditEvent::OtpExpired, "Challenge expired")
                .await?;
            return Ok(OtpOutcome::Expired);
        }

        if candidate != challenge.code {
            self.store
                .append_audit(identifier, AuditEvent::OtpRejected, "Code mismatch")
                .await?;
            return Ok(OtpOutcome::Mismatch);
        }

        // Conditional delete: of two racing verifications only one
        // observes the row, so the code cannot be replayed.
        if !self.store.delete_aux(identifier, AuxKind::Otp).await? {
            return Ok(OtpOutcome::NoChallenge);
        }

        self.store
            .append_audit(identifier, AuditEvent::OtpVerified, "")
            .await?;
        Ok(OtpOutcome::Verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::testing::RecordingNotifier;

    fn config() -> IdentityConfig {
        IdentityConfig::default()
    }

    async fn manager_with(
        notifier: RecordingNotifier,
    ) -> (Arc<RecordStore>, Arc<RecordingNotifier>, OtpManager) {
        let store = Arc::new(RecordStore::open_in_memory().await.unwrap());
        let notifier = Arc::new(notifier);
        let manager = OtpManager::new(store.clone(), notifier.clone(), &config());
        (store, notifier, manager)
    }

    #[tokio::test]
    async fn test_code_shape() {
        let (_, _, manager) = manager_with(RecordingNotifier::default()).await;

        for _ in 0..50 {
            let code = manager.generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
            assert_ne!(code.as_bytes()[0], b'0');
        }
    }

    #[tokio::test]
    async fn test_issue_then_verify() {
        let (_, notifier, manager) = manager_with(RecordingNotifier::default()).await;

        let issued = manager
            .issue("ab261234", "a@b.com", "9876543210")
            .await
            .unwrap();
        assert_eq!(issued.channels, vec![Channel::Sms, Channel::Email]);
        assert_eq!(issued.resends_left, 3);

        let code = notifier.last_code().unwrap();
        assert_eq!(
            manager.verify("ab261234", &code).await.unwrap(),
            OtpOutcome::Verified
        );
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let (_, notifier, manager) = manager_with(RecordingNotifier::default()).await;

        manager
            .issue("ab261234", "a@b.com", "9876543210")
            .await
            .unwrap();
        let code = notifier.last_code().unwrap();

        assert_eq!(
            manager.verify("ab261234", &code).await.unwrap(),
            OtpOutcome::Verified
        );
        assert_eq!(
            manager.verify("ab261234", &code).await.unwrap(),
            OtpOutcome::NoChallenge
        );
    }

    #[tokio::test]
    async fn test_mismatch_keeps_challenge_live() {
        let (_, notifier, manager) = manager_with(RecordingNotifier::default()).await;

        manager
            .issue("ab261234", "a@b.com", "9876543210")
            .await
            .unwrap();
        let code = notifier.last_code().unwrap();
        let wrong = if code == "000000" { "000001" } else { "000000" };

        assert_eq!(
            manager.verify("ab261234", wrong).await.unwrap(),
            OtpOutcome::Mismatch
        );
        assert_eq!(
            manager.verify("ab261234", &code).await.unwrap(),
            OtpOutcome::Verified
        );
    }

    #[tokio::test]
    async fn test_expired_challenge_is_consumed() {
        let (store, _, manager) = manager_with(RecordingNotifier::default()).await;

        store
            .put_aux(
                "ab261234",
                AuxKind::Otp,
                &OtpChallenge {
                    code: "123456".to_string(),
                    expires_at: Utc::now() - Duration::seconds(1),
                    resends: 0,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            manager.verify("ab261234", "123456").await.unwrap(),
            OtpOutcome::Expired
        );
        // Deleted on detection, so a retry sees no challenge
        assert_eq!(
            manager.verify("ab261234", "123456").await.unwrap(),
            OtpOutcome::NoChallenge
        );
    }

    #[tokio::test]
    async fn test_resend_supersedes_prior_code() {
        let (_, notifier, manager) = manager_with(RecordingNotifier::default()).await;

        manager
            .issue("ab261234", "a@b.com", "9876543210")
            .await
            .unwrap();
        let first = notifier.last_code().unwrap();

        let reissued = manager
            .resend("ab261234", "a@b.com", "9876543210")
            .await
            .unwrap();
        assert_eq!(reissued.resends_left, 2);
        let second = notifier.last_code().unwrap();

        if first != second {
            assert_eq!(
                manager.verify("ab261234", &first).await.unwrap(),
                OtpOutcome::Mismatch
            );
        }
        assert_eq!(
            manager.verify("ab261234", &second).await.unwrap(),
            OtpOutcome::Verified
        );
    }

    #[tokio::test]
    async fn test_resend_limit_is_enforced() {
        let (_, _, manager) = manager_with(RecordingNotifier::default()).await;

        manager
            .issue("ab261234", "a@b.com", "9876543210")
            .await
            .unwrap();

        for _ in 0..3 {
            manager
                .resend("ab261234", "a@b.com", "9876543210")
                .await
                .unwrap();
        }

        let blocked = manager.resend("ab261234", "a@b.com", "9876543210").await;
        assert!(matches!(blocked, Err(IdentityError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_single_channel_failure_degrades() {
        let (_, notifier, manager) =
            manager_with(RecordingNotifier::failing(true, false)).await;

        let issued = manager
            .issue("ab261234", "a@b.com", "9876543210")
            .await
            .unwrap();
        assert_eq!(issued.channels, vec![Channel::Email]);
        assert_eq!(notifier.delivery_count(), 1);
    }

    #[tokio::test]
    async fn test_total_delivery_failure_withdraws_challenge() {
        let (store, _, manager) = manager_with(RecordingNotifier::failing(true, true)).await;

        let result = manager.issue("ab261234", "a@b.com", "9876543210").await;
        assert!(matches!(result, Err(IdentityError::DeliveryFailed)));

        let challenge: Option<OtpChallenge> =
            store.get_aux("ab261234", AuxKind::Otp).await.unwrap();
        assert!(challenge.is_none());
    }
}
