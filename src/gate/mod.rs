//! Server wiring: connect the stores, build the session engine, serve the API.

pub(crate) mod handlers;

use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::session::{
    EngineConfig, SessionEngine, SystemClock,
    credential::PgCredentialDirectory,
    events::{EventPublisher, LogEventPublisher, NatsEventPublisher},
    ledger::PgSessionLedger,
    revocation::RedisRevocationStore,
};
use crate::token::SigningKeySet;

/// Start the server.
///
/// # Errors
///
/// Returns an error if a backing store is unreachable at startup or the
/// listener cannot bind.
pub async fn new(
    port: u16,
    dsn: String,
    cache_url: String,
    events_url: Option<String>,
    keys: SigningKeySet,
    config: EngineConfig,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let cache_client =
        redis::Client::open(cache_url.as_str()).context("Invalid revocation cache URL")?;
    let cache = ConnectionManager::new(cache_client)
        .await
        .context("Failed to connect to revocation cache")?;

    // The bus is optional: without one, lifecycle events only hit the logs.
    let events: Arc<dyn EventPublisher> = match events_url {
        Some(url) => {
            let client = async_nats::connect(url)
                .await
                .context("Failed to connect to event bus")?;
            Arc::new(NatsEventPublisher::new(client))
        }
        None => Arc::new(LogEventPublisher),
    };

    let engine = Arc::new(SessionEngine::new(
        config,
        keys,
        Arc::new(PgCredentialDirectory::new(pool.clone())),
        Arc::new(PgSessionLedger::new(pool.clone())),
        Arc::new(RedisRevocationStore::new(cache.clone())),
        events,
        Arc::new(SystemClock),
    ));

    let app = Router::new()
        .route("/v1/auth/login", post(handlers::auth::login))
        .route("/v1/auth/refresh", post(handlers::auth::refresh))
        .route("/v1/auth/logout", post(handlers::auth::logout))
        .route("/v1/auth/session", get(handlers::auth::session))
        .route("/health", get(handlers::health::health))
        .merge(
            SwaggerUi::new("/docs").url("/api-docs/openapi.json", handlers::ApiDoc::openapi()),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(engine))
                .layer(Extension(cache))
                .layer(Extension(pool)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
