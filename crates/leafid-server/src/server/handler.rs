use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, SecondsFormat};
use leafid::{IdResult, Mode, segment::BufferView, store::PersistedAllocation};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use super::state::AppState;

/// Builds the HTTP surface over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/segment/get/{tag}", get(segment_get))
        .route("/api/snowflake/get/{tag}", get(snowflake_get))
        .route("/monitor/cache", get(monitor_cache))
        .route("/monitor/db", get(monitor_db))
        .route("/monitor/decode/{id}", get(monitor_decode))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Failure of a monitoring endpoint, rendered as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn disabled(mode: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("{mode} mode is disabled"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Body {
            error: String,
        }
        (
            self.status,
            Json(Body {
                error: self.message,
            }),
        )
            .into_response()
    }
}

async fn segment_get(State(state): State<AppState>, Path(tag): Path<String>) -> Json<IdResult> {
    Json(state.service().get(Mode::Segment, &tag).await)
}

async fn snowflake_get(State(state): State<AppState>, Path(tag): Path<String>) -> Json<IdResult> {
    Json(state.service().get(Mode::Snowflake, &tag).await)
}

async fn monitor_cache(State(state): State<AppState>) -> Result<Json<Vec<BufferView>>, ApiError> {
    let allocator = state
        .service()
        .segment()
        .ok_or_else(|| ApiError::disabled("segment"))?;
    Ok(Json(allocator.snapshot()))
}

async fn monitor_db(
    State(state): State<AppState>,
) -> Result<Json<Vec<PersistedAllocation>>, ApiError> {
    let allocator = state
        .service()
        .segment()
        .ok_or_else(|| ApiError::disabled("segment"))?;
    let rows = allocator.allocations().await.map_err(|e| ApiError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        message: e.to_string(),
    })?;
    Ok(Json(rows))
}

/// A Snowflake id split into its fields, with the timestamp rendered in
/// RFC 3339.
#[derive(Debug, Serialize)]
pub struct DecodedView {
    pub id: i64,
    pub timestamp_ms: i64,
    pub time: Option<String>,
    pub worker_id: i64,
    pub sequence: i64,
}

async fn monitor_decode(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DecodedView>, ApiError> {
    let generator = state
        .service()
        .snowflake()
        .ok_or_else(|| ApiError::disabled("snowflake"))?;
    let decoded = generator.decode(id);
    Ok(Json(DecodedView {
        id,
        timestamp_ms: decoded.timestamp_ms,
        time: DateTime::from_timestamp_millis(decoded.timestamp_ms)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        worker_id: decoded.worker_id,
        sequence: decoded.sequence,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::state::{Allocator, Service};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use leafid::{
        segment::{SegmentAllocator, SegmentConfig},
        snowflake::{SnowflakeConfig, SnowflakeGenerator},
        store::MemoryAllocationStore,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn state(segment: bool, snowflake: bool) -> AppState {
        let allocator: Option<Allocator> = segment.then(|| {
            let store = Arc::new(MemoryAllocationStore::new());
            store.insert("order_id", 900, 100);
            SegmentAllocator::new(store, SegmentConfig::default())
        });
        let generator = snowflake.then(|| {
            SnowflakeGenerator::new(SnowflakeConfig {
                worker_id: 3,
                ..SnowflakeConfig::default()
            })
            .unwrap()
        });
        let service: Service = leafid::IdGenService::new(allocator, generator);
        assert!(service.init().await);
        AppState::from_parts(service, None)
    }

    async fn call(state: &AppState, uri: &str) -> (StatusCode, Value) {
        let response = router(state.clone())
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn segment_ids_follow_the_seeded_row() {
        let state = state(true, false).await;

        let (status, body) = call(&state, "/api/segment/get/order_id").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 900);
        assert_eq!(body["status"], "SUCCESS");

        let (_, body) = call(&state, "/api/segment/get/missing").await;
        assert_eq!(body["id"], -2);
        assert_eq!(body["status"], "EXCEPTION");

        let (_, cache) = call(&state, "/monitor/cache").await;
        assert_eq!(cache[0]["tag"], "order_id");
        assert_eq!(cache[0]["initialized"], true);

        let (_, db) = call(&state, "/monitor/db").await;
        assert_eq!(db[0]["tag"], "order_id");
        assert_eq!(db[0]["max_id"], 1_000);

        state.shutdown().await;
    }

    #[tokio::test]
    async fn snowflake_ids_decode() {
        let state = state(false, true).await;

        let (status, body) = call(&state, "/api/snowflake/get/anything").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "SUCCESS");
        let id = body["id"].as_i64().unwrap();
        assert!(id > 0);

        let (status, decoded) = call(&state, &format!("/monitor/decode/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decoded["worker_id"], 3);
        assert!(decoded["time"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn disabled_modes_answer_zero_and_hide_monitoring() {
        let state = state(false, false).await;

        let (_, body) = call(&state, "/api/segment/get/order_id").await;
        assert_eq!(body["id"], 0);
        assert_eq!(body["status"], "SUCCESS");

        let (status, body) = call(&state, "/monitor/cache").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "segment mode is disabled");

        let (status, _) = call(&state, "/monitor/decode/1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
