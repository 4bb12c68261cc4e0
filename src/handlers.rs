//! Identity HTTP Handlers
//!
//! REST endpoints for the identity and session flows. This is the
//! subsystem's own mounting point; portal presentation layers call the
//! same `IdentityService` API directly.

use axum::{
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use validator::Validate;

use crate::error::IdentityError;
use crate::extractors::{ClientInfo, SessionUser};
use crate::middleware;
use crate::models::{
    ChangePasswordRequest, MessageResponse, OtpResendRequest, OtpVerifyRequest, ProfileResponse,
    ProfileUpdate, RecoverIdRequest, SigninOutcome, SigninRequest, SignupRequest, UnlockRequest,
};
use crate::service::IdentityService;

/// Shared identity service state
pub type AuthState = Arc<IdentityService>;

// ============================================
// Route Builder
// ============================================

/// Create identity routes
pub fn create_routes(service: Arc<IdentityService>) -> Router {
    // Public routes (no session required)
    let public = Router::new()
        .route("/identity/signup", post(signup))
        .route("/identity/signin", post(signin))
        .route("/identity/otp/verify", post(verify_otp))
        .route("/identity/otp/resend", post(resend_otp))
        .route("/identity/recover-id", post(recover_identifier));

    // Protected routes (require a live session)
    let protected = Router::new()
        .route("/identity/me", get(current_profile))
        .route("/identity/logout", post(logout))
        .route("/identity/password", post(change_password))
        .route("/identity/profile", put(update_profile))
        .route("/identity/unlock", post(unlock))
        .layer(axum_middleware::from_fn_with_state(
            service.clone(),
            middleware::require_session,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(service)
}

// ============================================
// Registration
// ============================================

/// POST /identity/signup
///
/// Register a new member profile
pub async fn signup(
    State(service): State<AuthState>,
    client: ClientInfo,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, IdentityError> {
    let profile = service.signup(req).await?;

    tracing::info!(
        identifier = %profile.identifier,
        ip = client.ip.as_deref().unwrap_or("-"),
        "Member registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Registration successful",
            "identifier": profile.identifier,
            "profile": ProfileResponse::from(profile)
        })),
    ))
}

// ============================================
// Sign-in
// ============================================

/// POST /identity/signin
///
/// First factor: identifier + mobile + password
pub async fn signin(
    State(service): State<AuthState>,
    client: ClientInfo,
    Json(req): Json<SigninRequest>,
) -> Result<impl IntoResponse, IdentityError> {
    tracing::debug!(ip = client.ip.as_deref().unwrap_or("-"), "Sign-in attempt");

    let response = match service.signin(req).await? {
        SigninOutcome::OtpPending {
            channels,
            resends_left,
        } => serde_json::json!({
            "status": "otp_required",
            "message": "A one-time passcode has been sent",
            "channels": channels,
            "resends_left": resends_left
        }),
        SigninOutcome::Authenticated(grant) => serde_json::json!({
            "status": "authenticated",
            "session_token": grant.session_token,
            "level": grant.level,
            "profile": grant.profile
        }),
    };

    Ok(Json(response))
}

/// POST /identity/otp/verify
///
/// Second factor: exchange the passcode for a session
pub async fn verify_otp(
    State(service): State<AuthState>,
    Json(req): Json<OtpVerifyRequest>,
) -> Result<impl IntoResponse, IdentityError> {
    let grant = service.verify_otp(req).await?;

    Ok(Json(serde_json::json!({
        "status": "authenticated",
        "session_token": grant.session_token,
        "level": grant.level,
        "profile": grant.profile
    })))
}

/// POST /identity/otp/resend
pub async fn resend_otp(
    State(service): State<AuthState>,
    Json(req): Json<OtpResendRequest>,
) -> Result<impl IntoResponse, IdentityError> {
    req.validate()
        .map_err(|e| IdentityError::InvalidInput(e.to_string()))?;

    let issued = service.resend_otp(&req.identifier).await?;

    Ok(Json(serde_json::json!({
        "message": "A fresh passcode has been sent",
        "channels": issued.channels,
        "resends_left": issued.resends_left
    })))
}

/// POST /identity/logout
pub async fn logout(
    State(service): State<AuthState>,
    user: SessionUser,
) -> Result<impl IntoResponse, IdentityError> {
    service.logout(&user.token).await?;

    Ok(Json(MessageResponse::new("Logged out successfully")))
}

// ============================================
// Recovery
// ============================================

/// POST /identity/recover-id
///
/// Forgot-identifier lookup by registered email
pub async fn recover_identifier(
    State(service): State<AuthState>,
    Json(req): Json<RecoverIdRequest>,
) -> Result<impl IntoResponse, IdentityError> {
    req.validate()
        .map_err(|e| IdentityError::InvalidInput(e.to_string()))?;

    let identifier = service.recover_identifier(&req.email).await?;

    Ok(Json(serde_json::json!({ "identifier": identifier })))
}

// ============================================
// Self-service
// ============================================

/// GET /identity/me
pub async fn current_profile(
    State(service): State<AuthState>,
    user: SessionUser,
) -> Result<impl IntoResponse, IdentityError> {
    let profile = service.profile(&user.identifier).await?;

    Ok(Json(serde_json::json!({
        "profile": ProfileResponse::from(profile)
    })))
}

/// POST /identity/password
pub async fn change_password(
    State(service): State<AuthState>,
    user: SessionUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, IdentityError> {
    service.change_password(&user.identifier, req).await?;

    Ok(Json(MessageResponse::new(
        "Password changed successfully. Please sign in again on all devices.",
    )))
}

/// PUT /identity/profile
pub async fn update_profile(
    State(service): State<AuthState>,
    user: SessionUser,
    Json(req): Json<ProfileUpdate>,
) -> Result<impl IntoResponse, IdentityError> {
    let profile = service.update_profile(&user.identifier, req).await?;

    Ok(Json(serde_json::json!({
        "message": "Profile updated",
        "profile": ProfileResponse::from(profile)
    })))
}

// ============================================
// Administration
// ============================================

/// POST /identity/unlock
///
/// Administrative unlock of a locked account
pub async fn unlock(
    State(service): State<AuthState>,
    user: SessionUser,
    Json(req): Json<UnlockRequest>,
) -> Result<impl IntoResponse, IdentityError> {
    if !user.is_admin() {
        return Err(IdentityError::Forbidden);
    }

    req.validate()
        .map_err(|e| IdentityError::InvalidInput(e.to_string()))?;

    service.unlock(&req.identifier).await?;

    Ok(Json(MessageResponse::new("Account unlocked")))
}
