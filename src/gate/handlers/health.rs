use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tracing::{Instrument, debug, error, info_span};
use utoipa::ToSchema;

use crate::GIT_COMMIT_HASH;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
    cache: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database and revocation cache are reachable", body = Health),
        (status = 503, description = "Database or revocation cache is unreachable", body = Health)
    ),
    tag = "health"
)]
pub async fn health(
    pool: Extension<PgPool>,
    cache: Extension<ConnectionManager>,
) -> impl IntoResponse {
    let database_ok = database_ok(&pool).await;
    let cache_ok = cache_ok(&cache).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: status_str(database_ok).to_string(),
        cache: status_str(cache_ok).to_string(),
    };

    let status = if database_ok && cache_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, app_header(&health), Json(health)).into_response()
}

async fn database_ok(pool: &PgPool) -> bool {
    let span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
    let result = async {
        let mut conn = pool.acquire().await?;
        conn.ping().await
    }
    .instrument(span)
    .await;

    match result {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping database: {err}");
            false
        }
    }
}

async fn cache_ok(cache: &ConnectionManager) -> bool {
    let mut conn = cache.clone();
    let span = info_span!("cache.ping", db.system = "redis", db.operation = "PING");
    let result: Result<String, redis::RedisError> = redis::cmd("PING")
        .query_async(&mut conn)
        .instrument(span)
        .await;

    match result {
        Ok(_) => true,
        Err(err) => {
            error!("Failed to ping revocation cache: {err}");
            false
        }
    }
}

fn status_str(ok: bool) -> &'static str {
    if ok { "ok" } else { "error" }
}

// `X-App: name:version:short-commit`, mirrored by the other mesh services.
fn app_header(health: &Health) -> HeaderMap {
    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => debug!("Failed to build X-App header: {err}"),
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_header_includes_name_and_version() {
        let health = Health {
            commit: "0123456789abcdef".to_string(),
            name: "gate".to_string(),
            version: "0.1.0".to_string(),
            database: "ok".to_string(),
            cache: "ok".to_string(),
        };
        let headers = app_header(&health);
        let value = headers.get("X-App").and_then(|v| v.to_str().ok());
        assert_eq!(value, Some("gate:0.1.0:0123456"));
    }

    #[test]
    fn status_str_maps_booleans() {
        assert_eq!(status_str(true), "ok");
        assert_eq!(status_str(false), "error");
    }
}
