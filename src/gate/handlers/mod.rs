//! HTTP handlers for the gateway API.
//!
//! Handlers are thin request/response marshalling over the session engine;
//! every decision about credentials, tokens, and revocation happens in
//! [`crate::session`].

pub(crate) mod auth;
pub(crate) mod health;
pub(crate) mod types;

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::login,
        auth::refresh,
        auth::logout,
        auth::session,
        health::health
    ),
    components(schemas(
        types::LoginRequest,
        types::RefreshRequest,
        types::LogoutRequest,
        types::TokenPairResponse,
        types::SessionResponse,
        health::Health
    )),
    tags(
        (name = "auth", description = "Session lifecycle: login, refresh, logout"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;
