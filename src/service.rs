//! Authentication Orchestrator
//!
//! Composes the record store, credential verifier, lockout policy, OTP
//! manager and session manager into the signup, sign-in and
//! self-service flows. Input validation happens here, before anything
//! touches storage; failed sign-ins reveal nothing about which part of
//! the credentials was wrong.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use validator::Validate;

use crate::config::IdentityConfig;
use crate::credential::CredentialVerifier;
use crate::error::{IdentityError, UniqueField};
use crate::lockout::LockoutPolicy;
use crate::models::{
    validate_field_labels, validate_mobile, AuthLevel, ChangePasswordRequest, OtpVerifyRequest,
    ProfileUpdate, SessionGrant, SigninOutcome, SigninRequest, SignupRequest, UserProfile,
};
use crate::notifier::Notifier;
use crate::otp::{IssuedOtp, OtpManager, OtpOutcome};
use crate::session::SessionManager;
use crate::store::{AuditEvent, RecordStore};

/// The identity subsystem's service facade
pub struct IdentityService {
    store: Arc<RecordStore>,
    sessions: Arc<SessionManager>,
    lockout: LockoutPolicy,
    otp: OtpManager,
    verifier: CredentialVerifier,
    require_otp: bool,
}

impl IdentityService {
    pub fn new(
        store: Arc<RecordStore>,
        notifier: Arc<dyn Notifier>,
        config: IdentityConfig,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(&config)),
            lockout: LockoutPolicy::new(store.clone(), &config),
            otp: OtpManager::new(store.clone(), notifier, &config),
            verifier: CredentialVerifier::new(&config),
            require_otp: config.require_otp,
            store,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    // ============================================
    // Signup
    // ============================================

    /// Register a new member and return the stored profile, including
    /// the freshly generated identifier.
    pub async fn signup(&self, req: SignupRequest) -> Result<UserProfile, IdentityError> {
        req.validate()
            .map_err(|e| IdentityError::InvalidInput(e.to_string()))?;
        validate_mobile(&req.mobile)?;

        let field_labels = match req
            .field_labels
            .clone()
            .or_else(|| req.campus.default_field_labels())
        {
            Some(labels) => labels,
            None => {
                return Err(IdentityError::InvalidInput(format!(
                    "{} members must list their field labels",
                    req.campus
                )))
            }
        };
        validate_field_labels(&field_labels)?;

        self.verifier.validate_password(&req.password)?;

        // Friendlier duplicate reporting up front; the INSERT remains
        // the authority under races.
        self.ensure_unused(UniqueField::Email, &req.email).await?;
        self.ensure_unused(UniqueField::Mobile, &req.mobile).await?;

        let password_hash = self.verifier.hash_password(&req.password)?;
        let now = Utc::now();

        for _ in 0..5 {
            let profile = UserProfile {
                identifier: generate_identifier(&req.name),
                name: req.name.clone(),
                institute: req.institute.clone(),
                department: req.department.clone(),
                campus: req.campus,
                email: req.email.clone(),
                mobile: req.mobile.clone(),
                password_hash: password_hash.clone(),
                field_labels: field_labels.clone(),
                created_at: now,
                updated_at: now,
            };

            match self.store.create_profile(&profile).await {
                Ok(()) => {
                    self.store
                        .append_audit(
                            &profile.identifier,
                            AuditEvent::UserRegistered,
                            "New member registration completed",
                        )
                        .await?;
                    tracing::info!(identifier = %profile.identifier, "Member registered");
                    return Ok(profile);
                }
                // Identifier collision: roll a new one and retry
                Err(IdentityError::AlreadyExists {
                    field: UniqueField::Identifier,
                }) => continue,
                Err(err) => return Err(err),
            }
        }

        Err(IdentityError::Io(
            "could not allocate a fresh identifier".to_string(),
        ))
    }

    async fn ensure_unused(
        &self,
        field: UniqueField,
        value: &str,
    ) -> Result<(), IdentityError> {
        match self.store.find_by_unique(field, value).await {
            Ok(_) => Err(IdentityError::AlreadyExists { field }),
            Err(IdentityError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }

    // ============================================
    // Sign-in
    // ============================================

    /// First factor: identifier + mobile + password. On success either
    /// dispatches an OTP challenge or, with the OTP policy disabled,
    /// issues the session directly.
    pub async fn signin(&self, req: SigninRequest) -> Result<SigninOutcome, IdentityError> {
        req.validate()
            .map_err(|e| IdentityError::InvalidInput(e.to_string()))?;

        if let Some(until) = self.lockout.is_locked(&req.identifier).await? {
            return Err(IdentityError::Locked { until });
        }

        let profile = match self.store.get_profile(&req.identifier).await {
            Ok(profile) => profile,
            Err(IdentityError::NotFound) => {
                // Same answer as a wrong password: no enumeration.
                self.store
                    .append_audit(&req.identifier, AuditEvent::LoginFailed, "Unknown identifier")
                    .await?;
                return Err(IdentityError::AuthFailed);
            }
            Err(err) => return Err(err),
        };

        let credentials_ok = profile.mobile == req.mobile
            && self
                .verifier
                .verify_password(&req.password, &profile.password_hash)?;

        if !credentials_ok {
            self.lockout.record_failure(&req.identifier).await?;
            self.store
                .append_audit(&req.identifier, AuditEvent::LoginFailed, "Credential mismatch")
                .await?;
            return Err(IdentityError::AuthFailed);
        }

        if !self.require_otp {
            let grant = self.finish_signin(profile).await?;
            return Ok(SigninOutcome::Authenticated(grant));
        }

        let issued = self
            .otp
            .issue(&profile.identifier, &profile.email, &profile.mobile)
            .await?;

        Ok(SigninOutcome::OtpPending {
            channels: issued.channels,
            resends_left: issued.resends_left,
        })
    }

    /// Second factor. A mismatch counts against the lockout threshold
    /// exactly like a wrong password.
    pub async fn verify_otp(&self, req: OtpVerifyRequest) -> Result<SessionGrant, IdentityError> {
        req.validate()
            .map_err(|e| IdentityError::InvalidInput(e.to_string()))?;

        if let Some(until) = self.lockout.is_locked(&req.identifier).await? {
            return Err(IdentityError::Locked { until });
        }

        match self.otp.verify(&req.identifier, &req.code).await? {
            OtpOutcome::Verified => {
                let profile = self.store.get_profile(&req.identifier).await?;
                self.finish_signin(profile).await
            }
            OtpOutcome::Mismatch => {
                self.lockout.record_failure(&req.identifier).await?;
                Err(IdentityError::AuthFailed)
            }
            OtpOutcome::Expired => Err(IdentityError::Expired),
            OtpOutcome::NoChallenge => {
                self.store
                    .append_audit(
                        &req.identifier,
                        AuditEvent::LoginFailed,
                        "OTP presented without a live challenge",
                    )
                    .await?;
                Err(IdentityError::AuthFailed)
            }
        }
    }

    /// Reissue the pending challenge, bounded by the resend budget
    pub async fn resend_otp(&self, identifier: &str) -> Result<IssuedOtp, IdentityError> {
        if let Some(until) = self.lockout.is_locked(identifier).await? {
            return Err(IdentityError::Locked { until });
        }

        let profile = match self.store.get_profile(identifier).await {
            Ok(profile) => profile,
            Err(IdentityError::NotFound) => return Err(IdentityError::AuthFailed),
            Err(err) => return Err(err),
        };

        self.otp
            .resend(&profile.identifier, &profile.email, &profile.mobile)
            .await
    }

    async fn finish_signin(&self, profile: UserProfile) -> Result<SessionGrant, IdentityError> {
        self.lockout.record_success(&profile.identifier).await?;

        let token = self
            .sessions
            .create(&profile.identifier, AuthLevel::Basic)
            .await?;

        self.store
            .append_audit(&profile.identifier, AuditEvent::LoginSuccess, "")
            .await?;
        self.store
            .append_audit(&profile.identifier, AuditEvent::SessionCreated, "")
            .await?;
        tracing::info!(identifier = %profile.identifier, "Member authenticated");

        Ok(SessionGrant {
            session_token: token,
            level: AuthLevel::Basic,
            profile: profile.into(),
        })
    }

    /// Destroy the presented session; idempotent
    pub async fn logout(&self, token: &str) -> Result<(), IdentityError> {
        if let Some(session) = self.sessions.destroy(token).await {
            self.store
                .append_audit(&session.identifier, AuditEvent::SessionDestroyed, "Logout")
                .await?;
        }

        Ok(())
    }

    // ============================================
    // Self-service
    // ============================================

    pub async fn profile(&self, identifier: &str) -> Result<UserProfile, IdentityError> {
        self.store.get_profile(identifier).await
    }

    /// Change password for an authenticated member. Every session of
    /// the identifier is invalidated afterwards.
    pub async fn change_password(
        &self,
        identifier: &str,
        req: ChangePasswordRequest,
    ) -> Result<(), IdentityError> {
        req.validate()
            .map_err(|e| IdentityError::InvalidInput(e.to_string()))?;

        let mut profile = self.store.get_profile(identifier).await?;

        if !self
            .verifier
            .verify_password(&req.current_password, &profile.password_hash)?
        {
            self.store
                .append_audit(
                    identifier,
                    AuditEvent::LoginFailed,
                    "Password change rejected: wrong current password",
                )
                .await?;
            return Err(IdentityError::AuthFailed);
        }

        self.verifier.validate_password(&req.new_password)?;

        profile.password_hash = self.verifier.hash_password(&req.new_password)?;
        profile.updated_at = Utc::now();
        self.store.update_profile(&profile).await?;

        let dropped = self.sessions.destroy_all_for(identifier).await;
        self.store
            .append_audit(
                identifier,
                AuditEvent::PasswordChanged,
                &format!("{dropped} session(s) invalidated"),
            )
            .await?;

        Ok(())
    }

    /// Partial profile update; unique fields are re-checked before the
    /// write.
    pub async fn update_profile(
        &self,
        identifier: &str,
        update: ProfileUpdate,
    ) -> Result<UserProfile, IdentityError> {
        if update.is_empty() {
            return Err(IdentityError::InvalidInput(
                "No fields to update".to_string(),
            ));
        }

        let mut profile = self.store.get_profile(identifier).await?;

        if let Some(name) = update.name {
            require_nonempty("name", &name)?;
            profile.name = name;
        }
        if let Some(institute) = update.institute {
            require_nonempty("institute", &institute)?;
            profile.institute = institute;
        }
        if let Some(department) = update.department {
            require_nonempty("department", &department)?;
            profile.department = department;
        }
        if let Some(email) = update.email {
            if email != profile.email {
                use validator::ValidateEmail;
                if !email.validate_email() {
                    return Err(IdentityError::InvalidInput(
                        "Invalid email format".to_string(),
                    ));
                }
                self.ensure_unused(UniqueField::Email, &email).await?;
                profile.email = email;
            }
        }
        if let Some(mobile) = update.mobile {
            if mobile != profile.mobile {
                validate_mobile(&mobile)?;
                self.ensure_unused(UniqueField::Mobile, &mobile).await?;
                profile.mobile = mobile;
            }
        }
        if let Some(labels) = update.field_labels {
            validate_field_labels(&labels)?;
            profile.field_labels = labels;
        }

        profile.updated_at = Utc::now();
        self.store.update_profile(&profile).await?;
        self.store
            .append_audit(identifier, AuditEvent::ProfileUpdated, "")
            .await?;

        Ok(profile)
    }

    /// Forgot-identifier recovery through the unique email
    pub async fn recover_identifier(&self, email: &str) -> Result<String, IdentityError> {
        let identifier = self.store.find_by_unique(UniqueField::Email, email).await?;

        self.store
            .append_audit(
                &identifier,
                AuditEvent::IdentifierRecovered,
                "Forgot-identifier lookup",
            )
            .await?;

        Ok(identifier)
    }

    /// Administrative unlock
    pub async fn unlock(&self, identifier: &str) -> Result<(), IdentityError> {
        self.lockout.unlock(identifier).await
    }
}

fn require_nonempty(field: &str, value: &str) -> Result<(), IdentityError> {
    if value.trim().is_empty() {
        return Err(IdentityError::InvalidInput(format!(
            "{field} cannot be empty"
        )));
    }
    Ok(())
}

/// Member identifiers: two name initials (padded with `x`), the
/// two-digit year, and four random digits, e.g. `ab264821`.
fn generate_identifier(name: &str) -> String {
    let mut initials: String = name
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .take(2)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    while initials.len() < 2 {
        initials.push('x');
    }

    let year = Utc::now().format("%y");
    let serial = rand::thread_rng().gen_range(1000..10_000);
    format!("{initials}{year}{serial}")
}
