/**
 * Logs Route Handler
 * Endpoint for receiving browser logs from the site and dashboard
 */
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
};
use tower_http::request_id::RequestId;

use crate::error::{ApiError, ApiResult};
use crate::logging::config::{
    ClientLogBatch, ClientLogEntry, LogLevel, LogResponse, MAX_CLIENT_BATCH, MAX_CLIENT_MESSAGE,
};

/// POST /api/logs
#[tracing::instrument(skip_all, fields(batch_size = batch.logs.len()))]
pub async fn receive_client_logs(
    request_id: Option<Extension<RequestId>>,
    Json(batch): Json<ClientLogBatch>,
) -> ApiResult<(StatusCode, Json<LogResponse>)> {
    if batch.logs.len() > MAX_CLIENT_BATCH {
        return Err(ApiError::BadRequest(format!(
            "At most {} log entries per request",
            MAX_CLIENT_BATCH
        )));
    }

    let req_id = request_id
        .as_ref()
        .and_then(|ext| ext.0.header_value().to_str().ok())
        .unwrap_or("unknown");

    let processed = batch
        .logs
        .iter()
        .filter(|entry| emit_client_log(entry, req_id))
        .count();

    Ok((
        StatusCode::ACCEPTED,
        Json(LogResponse {
            success: true,
            received: batch.logs.len(),
            processed,
        }),
    ))
}

fn truncate(message: &str) -> &str {
    match message.char_indices().nth(MAX_CLIENT_MESSAGE) {
        Some((cut, _)) => &message[..cut],
        None => message,
    }
}

/// Re-emits one entry through `tracing`; blank messages are dropped.
fn emit_client_log(entry: &ClientLogEntry, request_id: &str) -> bool {
    let message = truncate(entry.message.trim());
    if message.is_empty() {
        return false;
    }

    let span = tracing::info_span!(
        "client_log",
        request_id = %request_id,
        timestamp = %entry.timestamp,
        page = entry.page.as_deref().unwrap_or("-"),
    );
    let _enter = span.enter();

    match entry.level {
        LogLevel::Trace => tracing::trace!(context = ?entry.context, "{}", message),
        LogLevel::Debug => tracing::debug!(context = ?entry.context, "{}", message),
        LogLevel::Info => tracing::info!(context = ?entry.context, "{}", message),
        LogLevel::Warn => tracing::warn!(context = ?entry.context, "{}", message),
        LogLevel::Error => tracing::error!(context = ?entry.context, "{}", message),
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::send;
    use axum::routing::post;
    use axum::Router;
    use serde_json::json;

    fn app() -> Router {
        Router::new().route("/api/logs", post(receive_client_logs))
    }

    #[tokio::test]
    async fn test_batch_is_accepted_and_blank_entries_skipped() {
        let (status, bytes) = send(
            app(),
            "POST",
            "/api/logs",
            None,
            Some(json!({
                "logs": [
                    {
                        "timestamp": "2026-01-01T00:00:00Z",
                        "level": "error",
                        "message": "map failed",
                        "page": "/propiedades"
                    },
                    { "timestamp": "2026-01-01T00:00:01Z", "level": "info", "message": "   " }
                ]
            })),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        let body: LogResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.received, 2);
        assert_eq!(body.processed, 1);
    }

    #[tokio::test]
    async fn test_oversized_batch_is_rejected() {
        let entry = json!({ "timestamp": "t", "level": "debug", "message": "x" });
        let logs = vec![entry; MAX_CLIENT_BATCH + 1];
        let body = json!({ "logs": logs });
        let (status, _) = send(app(), "POST", "/api/logs", None, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "ñ".repeat(MAX_CLIENT_MESSAGE + 5);
        assert_eq!(truncate(&long).chars().count(), MAX_CLIENT_MESSAGE);
        assert_eq!(truncate("hola"), "hola");
    }
}
