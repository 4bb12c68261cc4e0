//! Credential Verifier
//!
//! Stateless password hashing, verification and strength scoring.
//! Argon2id throughout; no secret material is ever logged.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};

use crate::config::IdentityConfig;
use crate::error::IdentityError;

/// Password hashing and strength policy
#[derive(Debug, Clone)]
pub struct CredentialVerifier {
    memory_cost: u32,
    time_cost: u32,
    parallelism: u32,
    min_length: usize,
    min_score: u8,
}

impl CredentialVerifier {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            memory_cost: config.argon2_memory_cost,
            time_cost: config.argon2_time_cost,
            parallelism: config.argon2_parallelism,
            min_length: config.min_password_length,
            min_score: config.min_password_score,
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>, IdentityError> {
        let params = Params::new(self.memory_cost, self.time_cost, self.parallelism, None)
            .map_err(|_| IdentityError::Internal)?;

        Ok(Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        ))
    }

    /// Hash a password using Argon2id
    pub fn hash_password(&self, password: &str) -> Result<String, IdentityError> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)?
            .to_string();

        Ok(hash)
    }

    /// Verify a password against a stored digest
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, IdentityError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|_| IdentityError::Internal)?;

        Ok(self
            .argon2()?
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    /// Score password strength 0-4: one point each for uppercase,
    /// lowercase, digit and punctuation. Anything under 8 characters
    /// scores 0 outright.
    pub fn password_score(&self, password: &str) -> u8 {
        if password.len() < 8 {
            return 0;
        }

        let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        let has_special = password.chars().any(|c| c.is_ascii_punctuation());

        has_upper as u8 + has_lower as u8 + has_digit as u8 + has_special as u8
    }

    /// Gate a candidate password against the configured policy
    pub fn validate_password(&self, password: &str) -> Result<(), IdentityError> {
        if password.len() < self.min_length || self.password_score(password) < self.min_score {
            return Err(IdentityError::WeakPassword);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> CredentialVerifier {
        // Cheap Argon2 params so the test suite stays fast
        CredentialVerifier::new(&IdentityConfig {
            argon2_memory_cost: 1024,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
            ..IdentityConfig::default()
        })
    }

    #[test]
    fn test_hash_and_verify_roundtrip() {
        let v = verifier();
        let hash = v.hash_password("Sunny@Day42").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(v.verify_password("Sunny@Day42", &hash).unwrap());
        assert!(!v.verify_password("Sunny@Day43", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let v = verifier();
        let a = v.hash_password("Sunny@Day42").unwrap();
        let b = v.hash_password("Sunny@Day42").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_password_scoring() {
        let v = verifier();
        assert_eq!(v.password_score("short"), 0);
        assert_eq!(v.password_score("password"), 1);
        assert_eq!(v.password_score("Password"), 2);
        assert_eq!(v.password_score("Password123"), 3);
        assert_eq!(v.password_score("Pass@123"), 4);
    }

    #[test]
    fn test_policy_gate() {
        let v = verifier();
        assert!(v.validate_password("Pass@123").is_ok());
        assert!(v.validate_password("Password123").is_ok());
        assert!(matches!(
            v.validate_password("password"),
            Err(IdentityError::WeakPassword)
        ));
        assert!(matches!(
            v.validate_password("Ab1@xyz"), // 7 chars
            Err(IdentityError::WeakPassword)
        ));
    }
}
