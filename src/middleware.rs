//! Session Middleware
//!
//! Validates the opaque bearer token against the Session Manager and
//! refreshes the sliding expiry window on every guarded request.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::extractors::SessionUser;
use crate::handlers::AuthState;
use crate::session::SessionValidation;

fn unauthorized(code: &str, message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": code,
            "message": message
        })),
    )
        .into_response()
}

fn bearer_token(req: &Request) -> Result<&str, Response> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| unauthorized("unauthorized", "Authentication required"))?;

    if !header.starts_with("Bearer ") {
        return Err(unauthorized(
            "unauthorized",
            "Invalid authorization header format",
        ));
    }

    Ok(header.trim_start_matches("Bearer "))
}

/// Require a live session
///
/// Validates the token, touches the session so activity extends it,
/// and stores the member identity in request extensions for extractors.
pub async fn require_session(
    State(service): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = bearer_token(&req)?.to_string();

    let info = match service.sessions().validate(&token).await {
        SessionValidation::Valid(info) => info,
        // Same status either way; the codes differ for diagnostics
        SessionValidation::Expired => {
            return Err(unauthorized("session_expired", "Session has expired"))
        }
        SessionValidation::Invalid => {
            return Err(unauthorized("invalid_session", "Invalid session"))
        }
    };

    service.sessions().touch(&token).await;

    req.extensions_mut().insert(SessionUser {
        identifier: info.identifier,
        level: info.level,
        token,
    });

    Ok(next.run(req).await)
}
