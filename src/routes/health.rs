/**
 * Health Routes
 * Liveness, dependency and readiness checks
 */
use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

use crate::config::SITE;

lazy_static::lazy_static! {
    static ref SERVER_START: Instant = Instant::now();
}

/// Initialize the server start time
pub fn init_start_time() {
    lazy_static::initialize(&SERVER_START);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
}

/// Single dependency check result
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCheck {
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub database: ServiceCheck,
    pub storage: ServiceCheck,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedHealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime: u64,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime: u64,
    pub database: CheckStatus,
    pub storage: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimpleHealthResponse {
    pub status: String,
}

async fn check_database() -> ServiceCheck {
    match crate::db::health_check().await {
        Ok(duration) => ServiceCheck {
            status: CheckStatus::Healthy,
            response_time: Some(duration.as_millis() as u64),
            error: None,
        },
        Err(e) => ServiceCheck {
            status: CheckStatus::Unhealthy,
            response_time: None,
            error: Some(e.to_string()),
        },
    }
}

/// The bucket root must exist (or be creatable) and be a directory.
async fn check_storage(root: &Path) -> ServiceCheck {
    let start = Instant::now();
    let result = match tokio::fs::create_dir_all(root).await {
        Ok(()) => tokio::fs::metadata(root).await.map(|m| m.is_dir()),
        Err(e) => Err(e),
    };

    match result {
        Ok(true) => ServiceCheck {
            status: CheckStatus::Healthy,
            response_time: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Ok(false) => ServiceCheck {
            status: CheckStatus::Unhealthy,
            response_time: None,
            error: Some(format!("{} is not a directory", root.display())),
        },
        Err(e) => ServiceCheck {
            status: CheckStatus::Unhealthy,
            response_time: None,
            error: Some(e.to_string()),
        },
    }
}

/// GET /health
pub async fn health_ping() -> Json<SimpleHealthResponse> {
    Json(SimpleHealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /health/detailed
/// Overall status stays "ok" while the process runs; checks carry the detail.
pub async fn health_detailed() -> Json<DetailedHealthResponse> {
    Json(DetailedHealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        uptime: SERVER_START.elapsed().as_secs(),
        checks: HealthChecks {
            database: check_database().await,
            storage: check_storage(&SITE.upload_dir).await,
        },
    })
}

/// GET /health/database
pub async fn health_database() -> Json<ServiceCheck> {
    Json(check_database().await)
}

/// GET /health/ready
/// Ready once uploads can be stored; the database is optional
/// (public endpoints degrade to empty lists without it).
pub async fn health_ready() -> (StatusCode, Json<ReadyResponse>) {
    let database = check_database().await.status;
    let storage = check_storage(&SITE.upload_dir).await.status;
    let ready = storage == CheckStatus::Healthy;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if ready { "ready" } else { "not ready" }.to_string(),
            timestamp: Utc::now(),
            uptime: SERVER_START.elapsed().as_secs(),
            database,
            storage,
            reason: (!ready).then(|| "Upload storage is not writable".to_string()),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn test_router() -> Router {
        Router::new()
            .route("/health", get(health_ping))
            .route("/health/detailed", get(health_detailed))
            .route("/health/database", get(health_database))
            .route("/health/ready", get(health_ready))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(app: Router, uri: &str) -> (StatusCode, T) {
        let req = Request::get(uri).body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: T = serde_json::from_slice(&body).unwrap();
        (status, value)
    }

    #[test]
    fn test_check_status_serialization() {
        let s = serde_json::to_string(&CheckStatus::Unhealthy).unwrap();
        assert_eq!(s, "\"unhealthy\"");
    }

    #[tokio::test]
    async fn test_health_ping_returns_ok() {
        init_start_time();
        let (status, body) = get_json::<SimpleHealthResponse>(test_router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn test_health_database_unhealthy_without_pool() {
        let (status, body) = get_json::<ServiceCheck>(test_router(), "/health/database").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, CheckStatus::Unhealthy);
        assert!(body.error.is_some());
    }

    #[tokio::test]
    async fn test_health_detailed_reports_both_checks() {
        init_start_time();
        let (status, body) =
            get_json::<DetailedHealthResponse>(test_router(), "/health/detailed").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
        assert_eq!(body.checks.database.status, CheckStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_storage_check_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        let check = check_storage(&root).await;
        assert_eq!(check.status, CheckStatus::Healthy);
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_storage_check_fails_on_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let check = check_storage(&file).await;
        assert_eq!(check.status, CheckStatus::Unhealthy);
    }
}
