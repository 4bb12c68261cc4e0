//! Identity Configuration
//!
//! All configuration values are loaded from environment variables.
//! No hardcoded secrets or sensitive data.

use crate::error::IdentityError;
use std::env;

/// Identity subsystem configuration loaded from environment
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Consecutive failed attempts before lockout (from CAMPUS_MAX_LOGIN_ATTEMPTS env var)
    pub max_login_attempts: u32,

    /// Account lockout duration in seconds (from CAMPUS_LOCKOUT_DURATION env var)
    pub lockout_duration_secs: i64,

    /// One-time passcode validity window in seconds (from CAMPUS_OTP_VALIDITY env var)
    pub otp_validity_secs: i64,

    /// Maximum OTP resends per sign-in (from CAMPUS_OTP_RESEND_LIMIT env var)
    pub otp_resend_limit: u32,

    /// Number of digits in an OTP code (from CAMPUS_OTP_DIGITS env var)
    pub otp_digits: u32,

    /// Whether sign-in requires OTP verification (from CAMPUS_REQUIRE_OTP env var)
    pub require_otp: bool,

    /// Session inactivity timeout in seconds (from CAMPUS_SESSION_TIMEOUT env var)
    pub session_timeout_secs: i64,

    /// Maximum concurrent sessions (from CAMPUS_SESSION_CAPACITY env var)
    pub session_capacity: usize,

    /// Minimum password length (from CAMPUS_MIN_PASSWORD_LENGTH env var)
    pub min_password_length: usize,

    /// Minimum password strength score, 0-4 (from CAMPUS_MIN_PASSWORD_SCORE env var)
    pub min_password_score: u8,

    /// Per-channel notifier timeout in seconds (from CAMPUS_NOTIFIER_TIMEOUT env var)
    pub notifier_timeout_secs: u64,

    /// Argon2 memory cost in KiB (from CAMPUS_ARGON2_MEMORY_COST env var)
    pub argon2_memory_cost: u32,

    /// Argon2 time cost, iterations (from CAMPUS_ARGON2_TIME_COST env var)
    pub argon2_time_cost: u32,

    /// Argon2 parallelism (from CAMPUS_ARGON2_PARALLELISM env var)
    pub argon2_parallelism: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            max_login_attempts: 3,
            lockout_duration_secs: 900,  // 15 minutes
            otp_validity_secs: 300,      // 5 minutes
            otp_resend_limit: 3,
            otp_digits: 6,
            require_otp: true,
            session_timeout_secs: 1800,  // 30 minutes
            session_capacity: 100,
            min_password_length: 8,
            min_password_score: 3,
            notifier_timeout_secs: 5,
            argon2_memory_cost: 65536,   // 64 MiB
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl IdentityConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_login_attempts: env_parsed("CAMPUS_MAX_LOGIN_ATTEMPTS", defaults.max_login_attempts),
            lockout_duration_secs: env_parsed("CAMPUS_LOCKOUT_DURATION", defaults.lockout_duration_secs),
            otp_validity_secs: env_parsed("CAMPUS_OTP_VALIDITY", defaults.otp_validity_secs),
            otp_resend_limit: env_parsed("CAMPUS_OTP_RESEND_LIMIT", defaults.otp_resend_limit),
            otp_digits: env_parsed("CAMPUS_OTP_DIGITS", defaults.otp_digits),
            require_otp: env::var("CAMPUS_REQUIRE_OTP")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(defaults.require_otp),
            session_timeout_secs: env_parsed("CAMPUS_SESSION_TIMEOUT", defaults.session_timeout_secs),
            session_capacity: env_parsed("CAMPUS_SESSION_CAPACITY", defaults.session_capacity),
            min_password_length: env_parsed("CAMPUS_MIN_PASSWORD_LENGTH", defaults.min_password_length),
            min_password_score: env_parsed("CAMPUS_MIN_PASSWORD_SCORE", defaults.min_password_score),
            notifier_timeout_secs: env_parsed("CAMPUS_NOTIFIER_TIMEOUT", defaults.notifier_timeout_secs),
            argon2_memory_cost: env_parsed("CAMPUS_ARGON2_MEMORY_COST", defaults.argon2_memory_cost),
            argon2_time_cost: env_parsed("CAMPUS_ARGON2_TIME_COST", defaults.argon2_time_cost),
            argon2_parallelism: env_parsed("CAMPUS_ARGON2_PARALLELISM", defaults.argon2_parallelism),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.max_login_attempts == 0 {
            return Err(IdentityError::Config(
                "CAMPUS_MAX_LOGIN_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        if self.lockout_duration_secs <= 0 {
            return Err(IdentityError::Config(
                "CAMPUS_LOCKOUT_DURATION must be positive".to_string(),
            ));
        }

        if self.otp_validity_secs <= 0 {
            return Err(IdentityError::Config(
                "CAMPUS_OTP_VALIDITY must be positive".to_string(),
            ));
        }

        if !(4..=8).contains(&self.otp_digits) {
            return Err(IdentityError::Config(
                "CAMPUS_OTP_DIGITS must be between 4 and 8".to_string(),
            ));
        }

        if self.session_timeout_secs <= 0 {
            return Err(IdentityError::Config(
                "CAMPUS_SESSION_TIMEOUT must be positive".to_string(),
            ));
        }

        if self.session_capacity == 0 {
            return Err(IdentityError::Config(
                "CAMPUS_SESSION_CAPACITY must be at least 1".to_string(),
            ));
        }

        if self.min_password_length < 8 {
            return Err(IdentityError::Config(
                "CAMPUS_MIN_PASSWORD_LENGTH must be at least 8".to_string(),
            ));
        }

        if self.min_password_score > 4 {
            return Err(IdentityError::Config(
                "CAMPUS_MIN_PASSWORD_SCORE must be between 0 and 4".to_string(),
            ));
        }

        if self.notifier_timeout_secs == 0 {
            return Err(IdentityError::Config(
                "CAMPUS_NOTIFIER_TIMEOUT must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
