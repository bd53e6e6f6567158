//! Session endpoints: login, refresh, logout, and the protected check.
//!
//! Every authentication failure leaves this module as the same
//! `401 Unauthorized` body. Which check failed is logged and, for security
//! events, published to the bus, never told to the caller.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{error, warn};

use super::types::{
    LoginRequest, LogoutRequest, RefreshRequest, SessionResponse, TokenPairResponse,
};
use crate::session::{AuthError, SessionEngine, SessionRef, TokenPair};

const GENERIC_REJECTION: &str = "Unauthorized";

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Credential accepted, session issued", body = TokenPairResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Authentication failed", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    engine: Extension<Arc<SessionEngine>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let identity = request.identity.trim().to_string();
    if identity.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing identity".to_string()).into_response();
    }

    let secret = SecretString::from(request.secret);
    match engine.login(&identity, &secret).await {
        Ok(pair) => (StatusCode::OK, Json(pair_response(pair))).into_response(),
        Err(err) => reject("login", &err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session rotated, new pair issued", body = TokenPairResponse),
        (status = 400, description = "Validation error", body = String),
        (status = 401, description = "Authentication failed", body = String)
    ),
    tag = "auth"
)]
pub async fn refresh(
    engine: Extension<Arc<SessionEngine>>,
    payload: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match engine.refresh(request.refresh_token.trim()).await {
        Ok(pair) => (StatusCode::OK, Json(pair_response(pair))).into_response(),
        Err(err) => reject("refresh", &err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Session revoked (or already gone)"),
        (status = 401, description = "No usable session reference", body = String)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    engine: Extension<Arc<SessionEngine>>,
    payload: Option<Json<LogoutRequest>>,
) -> impl IntoResponse {
    let reference = payload
        .and_then(|Json(request)| request.session_id.map(SessionRef::Id))
        .or_else(|| extract_bearer(&headers).map(SessionRef::AccessToken));
    let Some(reference) = reference else {
        return (StatusCode::UNAUTHORIZED, GENERIC_REJECTION.to_string()).into_response();
    };

    match engine.logout(reference).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => reject("logout", &err),
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Access token is valid", body = SessionResponse),
        (status = 401, description = "Authentication failed", body = String)
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    engine: Extension<Arc<SessionEngine>>,
) -> impl IntoResponse {
    let Some(access_token) = extract_bearer(&headers) else {
        return (StatusCode::UNAUTHORIZED, GENERIC_REJECTION.to_string()).into_response();
    };

    match engine.authenticate(&access_token).await {
        Ok(claims) => (
            StatusCode::OK,
            Json(SessionResponse {
                identity: claims.sub,
                session_id: claims.sid.to_string(),
                expires_at: claims.exp,
            }),
        )
            .into_response(),
        Err(err) => reject("session check", &err),
    }
}

fn pair_response(pair: TokenPair) -> TokenPairResponse {
    TokenPairResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: "Bearer".to_string(),
        session_id: pair.session_id.to_string(),
        access_expires_at: pair.access_expires_at,
        refresh_expires_at: pair.refresh_expires_at,
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

// The caller-facing body is identical for every failure class; only the logs
// and the event bus know the difference.
fn reject(operation: &str, err: &AuthError) -> axum::response::Response {
    match err {
        AuthError::Unauthenticated => {}
        AuthError::SecurityAlert(kind) => {
            warn!(alert = kind.as_str(), "security alert during {operation}");
        }
        AuthError::StoreUnavailable(source) => {
            error!("{operation} failed closed, store unavailable: {source:#}");
        }
        AuthError::Timeout => error!("{operation} failed closed, store timeout"),
        AuthError::Internal(source) => error!("{operation} internal error: {source:#}"),
    }
    (StatusCode::UNAUTHORIZED, GENERIC_REJECTION.to_string()).into_response()
}
