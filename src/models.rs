//! Identity Models
//!
//! Data structures for profiles, sign-in requests/responses, and the
//! campus category taxonomy shared by every flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::IdentityError;
use crate::notifier::Channel;

/// Upper bound on campus-specific field labels per profile
pub const MAX_FIELD_LABELS: usize = 10;

// ============================================
// Domain Entities
// ============================================

/// Campus category a member belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CampusCategory {
    School,
    College,
    Hospital,
    Hostel,
}

impl CampusCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampusCategory::School => "school",
            CampusCategory::College => "college",
            CampusCategory::Hospital => "hospital",
            CampusCategory::Hostel => "hostel",
        }
    }

    /// Fixed field labels for categories where the member does not pick
    /// their own (hospitals record vitals, hostels record accommodation).
    /// School and college members name their subjects/courses themselves.
    pub fn default_field_labels(&self) -> Option<Vec<String>> {
        match self {
            CampusCategory::Hospital => Some(
                ["Blood Pressure", "Temperature", "Weight", "Diagnosis"]
                    .map(String::from)
                    .to_vec(),
            ),
            CampusCategory::Hostel => Some(
                ["Room Number", "Floor", "Mess Plan"].map(String::from).to_vec(),
            ),
            CampusCategory::School | CampusCategory::College => None,
        }
    }
}

impl std::fmt::Display for CampusCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Authorization level bound to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    Basic,
    Enhanced,
    Admin,
}

impl AuthLevel {
    pub fn is_admin(&self) -> bool {
        matches!(self, AuthLevel::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthLevel::Basic => "basic",
            AuthLevel::Enhanced => "enhanced",
            AuthLevel::Admin => "admin",
        }
    }
}

/// Member profile, the durable identity record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Unique member identifier, generated at signup, immutable
    pub identifier: String,
    pub name: String,
    pub institute: String,
    pub department: String,
    pub campus: CampusCategory,
    pub email: String,
    pub mobile: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Campus-specific field labels (subjects, courses, vitals, ...)
    pub field_labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Request DTOs
// ============================================

/// Signup request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 100, message = "Institute must be 1-100 characters"))]
    pub institute: String,

    #[validate(length(min = 1, max = 50, message = "Department must be 1-50 characters"))]
    pub department: String,

    pub campus: CampusCategory,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Mobile number is required"))]
    pub mobile: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    /// Campus-specific field labels; optional where the category has defaults
    pub field_labels: Option<Vec<String>>,
}

/// Sign-in request (first factor: identifier + mobile + password)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SigninRequest {
    #[validate(length(min = 1, message = "Identifier is required"))]
    pub identifier: String,

    #[validate(length(min = 1, message = "Mobile number is required"))]
    pub mobile: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// OTP verification request (second factor)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OtpVerifyRequest {
    #[validate(length(min = 1, message = "Identifier is required"))]
    pub identifier: String,

    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,
}

/// OTP resend request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OtpResendRequest {
    #[validate(length(min = 1, message = "Identifier is required"))]
    pub identifier: String,
}

/// Forgot-identifier recovery request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecoverIdRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

/// Change password request (for authenticated members)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 8, message = "New password must be at least 8 characters"))]
    pub new_password: String,

    #[validate(must_match(other = "new_password", message = "Passwords do not match"))]
    pub new_password_confirm: String,
}

/// Partial profile update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub institute: Option<String>,
    pub department: Option<String>,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub field_labels: Option<Vec<String>>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.institute.is_none()
            && self.department.is_none()
            && self.email.is_none()
            && self.mobile.is_none()
            && self.field_labels.is_none()
    }
}

/// Administrative unlock request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UnlockRequest {
    #[validate(length(min = 1, message = "Identifier is required"))]
    pub identifier: String,
}

// ============================================
// Response DTOs
// ============================================

/// Public profile data without sensitive fields
#[derive(Debug, Clone, Serialize)]
pub struct ProfileResponse {
    pub identifier: String,
    pub name: String,
    pub institute: String,
    pub department: String,
    pub campus: CampusCategory,
    pub email: String,
    pub mobile: String,
    pub field_labels: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<UserProfile> for ProfileResponse {
    fn from(p: UserProfile) -> Self {
        Self {
            identifier: p.identifier,
            name: p.name,
            institute: p.institute,
            department: p.department,
            campus: p.campus,
            email: p.email,
            mobile: p.mobile,
            field_labels: p.field_labels,
            created_at: p.created_at,
        }
    }
}

/// Session issued after full authentication
#[derive(Debug, Clone, Serialize)]
pub struct SessionGrant {
    pub session_token: String,
    pub level: AuthLevel,
    pub profile: ProfileResponse,
}

/// Outcome of the first sign-in factor
#[derive(Debug, Clone)]
pub enum SigninOutcome {
    /// Credentials verified; an OTP challenge was dispatched
    OtpPending {
        channels: Vec<Channel>,
        resends_left: u32,
    },
    /// OTP policy is disabled; the session was issued directly
    Authenticated(SessionGrant),
}

/// Simple message response
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ============================================
// Domain Validation
// ============================================

/// Mobile numbers: 10-15 characters, digits plus `+`, `-` and spaces.
pub fn validate_mobile(mobile: &str) -> Result<(), IdentityError> {
    let len = mobile.len();
    if !(10..=15).contains(&len) {
        return Err(IdentityError::InvalidInput(
            "Mobile number must be 10-15 characters".to_string(),
        ));
    }

    if !mobile
        .chars()
        .all(|c| c.is_ascii_digit() || c == '+' || c == '-' || c == ' ')
    {
        return Err(IdentityError::InvalidInput(
            "Mobile number may only contain digits, '+', '-' and spaces".to_string(),
        ));
    }

    Ok(())
}

/// Field labels: 1..=MAX_FIELD_LABELS entries, non-empty, pairwise distinct.
pub fn validate_field_labels(labels: &[String]) -> Result<(), IdentityError> {
    if labels.is_empty() || labels.len() > MAX_FIELD_LABELS {
        return Err(IdentityError::InvalidInput(format!(
            "Between 1 and {MAX_FIELD_LABELS} field labels are required"
        )));
    }

    for (i, label) in labels.iter().enumerate() {
        if label.trim().is_empty() {
            return Err(IdentityError::InvalidInput(
                "Field labels cannot be empty".to_string(),
            ));
        }
        if labels[..i].contains(label) {
            return Err(IdentityError::InvalidInput(format!(
                "Duplicate field label '{label}'"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mobile_validation() {
        assert!(validate_mobile("9876543210").is_ok());
        assert!(validate_mobile("+91 98765-43210").is_ok());
        assert!(validate_mobile("123456789").is_err()); // too short
        assert!(validate_mobile("1234567890123456").is_err()); // too long
        assert!(validate_mobile("98765abcde").is_err()); // letters
    }

    #[test]
    fn test_field_label_validation() {
        let ok = vec!["Maths".to_string(), "Physics".to_string()];
        assert!(validate_field_labels(&ok).is_ok());

        let dup = vec!["Maths".to_string(), "Maths".to_string()];
        assert!(validate_field_labels(&dup).is_err());

        let blank = vec!["  ".to_string()];
        assert!(validate_field_labels(&blank).is_err());

        let too_many: Vec<String> = (0..=MAX_FIELD_LABELS).map(|i| format!("S{i}")).collect();
        assert!(validate_field_labels(&too_many).is_err());

        assert!(validate_field_labels(&[]).is_err());
    }

    #[test]
    fn test_category_defaults() {
        assert_eq!(
            CampusCategory::Hospital.default_field_labels().unwrap().len(),
            4
        );
        assert_eq!(
            CampusCategory::Hostel.default_field_labels().unwrap().len(),
            3
        );
        assert!(CampusCategory::School.default_field_labels().is_none());
        assert!(CampusCategory::College.default_field_labels().is_none());
    }

    #[test]
    fn test_profile_response_hides_hash() {
        let profile = UserProfile {
            identifier: "ab261234".to_string(),
            name: "Test Member".to_string(),
            institute: "Test School".to_string(),
            department: "Science".to_string(),
            campus: CampusCategory::School,
            email: "a@b.com".to_string(),
            mobile: "9876543210".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            field_labels: vec!["Maths".to_string()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&profile).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("password_hash"));
    }
}
