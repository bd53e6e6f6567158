//! Request and response types for the auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

// No Debug derive: the secret must never end up in logs.
#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub identity: String,
    pub secret: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LogoutRequest {
    /// Session to end. When absent, the bearer access token identifies it.
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub session_id: String,
    pub access_expires_at: i64,
    pub refresh_expires_at: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub identity: String,
    pub session_id: String,
    pub expires_at: i64,
}
