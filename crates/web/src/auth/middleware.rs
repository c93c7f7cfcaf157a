//! Authentication middleware for Axum.

use autoqa_common::{IdentityStore, UserAccount};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

pub const SESSION_COOKIE: &str = "autoqa_session";

/// Extension that holds the authenticated user
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserAccount);

/// Pull a session token from the Authorization header, falling back to the
/// session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Resolve the caller, if any. A missing or stale token is not an error.
pub fn optional_user(
    identities: &IdentityStore,
    headers: &HeaderMap,
) -> Result<Option<UserAccount>, (StatusCode, &'static str)> {
    let token = match session_token(headers) {
        Some(t) => t,
        None => return Ok(None),
    };
    identities.resolve_session(&token).map_err(|e| {
        warn!("Session lookup failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Session validation failed")
    })
}

/// Middleware that requires a live session
pub async fn require_session(
    State(identities): State<IdentityStore>,
    mut request: Request,
    next: Next,
) -> Response {
    match optional_user(&identities, request.headers()) {
        Ok(Some(user)) => {
            request.extensions_mut().insert(AuthenticatedUser(user));
            next.run(request).await
        }
        Ok(None) => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Not logged in"})),
        )
            .into_response(),
        Err((status, msg)) => (status, Json(serde_json::json!({"error": msg}))).into_response(),
    }
}

pub fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, max_age_secs
    )
}

pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}
