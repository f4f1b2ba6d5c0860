//! HTTP API over the credential store.
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/` | embedded web page |
//! | GET | `/api/services` | list stored services |
//! | POST | `/api/services` | `{"uri": "otpauth://totp/..."}` |
//! | DELETE | `/api/services/{index}` | remove and compact |
//! | GET | `/api/code/{index}` | current code for a service |

use crate::clock::Clock;
use crate::engine::{self, EngineError};
use crate::parser::{self, ParseError};
use crate::store::{CredentialStore, StoreError};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{delete, get},
};
use serde::Serialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

pub const MAX_BODY_LEN: usize = 1024;

const INDEX_HTML: &str = include_str!("index.html");

/// Shared by all handlers. The store sits behind one lock so a reader
/// never sees a list halfway through compaction.
pub struct AppState {
    store: Mutex<CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(store: CredentialStore, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(store),
            clock,
        })
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("URI field required")]
    MissingUri,
    #[error("Invalid URI: {0}")]
    InvalidUri(#[from] ParseError),
    #[error("Invalid index {0:?}")]
    InvalidIndex(String),
    #[error("Service not found")]
    ServiceNotFound,
    #[error("Failed to save: {0}")]
    Save(StoreError),
    #[error("Delete failed: {0}")]
    Delete(StoreError),
    #[error("Failed to generate JSON: {0}")]
    List(StoreError),
    #[error("Failed to generate code: {0}")]
    Code(#[from] EngineError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson(_)
            | ApiError::MissingUri
            | ApiError::InvalidUri(_)
            | ApiError::InvalidIndex(_)
            | ApiError::Delete(StoreError::OutOfRange { .. }) => StatusCode::BAD_REQUEST,
            ApiError::ServiceNotFound => StatusCode::NOT_FOUND,
            ApiError::Save(StoreError::Full { .. }) => StatusCode::INSUFFICIENT_STORAGE,
            ApiError::Save(_) | ApiError::Delete(_) | ApiError::List(_) | ApiError::Code(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{self}");
        } else {
            log::warn!("{self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct CodeResponse {
    pub code: u32,
    pub remaining: u32,
    pub service: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/health", get(health_check))
        .route("/api/services", get(list_services).post(add_service))
        .route("/api/services/:index", delete(delete_service))
        .route("/api/code/:index", get(get_code))
        .layer(DefaultBodyLimit::max(MAX_BODY_LEN))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("http server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("http server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for ctrl-c: {e}");
    }
}

async fn index_page() -> Html<&'static str> {
    log::info!("serving index page");
    Html(INDEX_HTML)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "otpkeep",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_services(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    log::info!("api: list services");
    let json = state.store.lock().await.list_as_json().map_err(ApiError::List)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], json).into_response())
}

async fn add_service(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    log::info!("api: add service");
    let request: Value = serde_json::from_slice(&body)?;
    let uri = request
        .get("uri")
        .and_then(Value::as_str)
        .ok_or(ApiError::MissingUri)?;
    let service = parser::parse_uri(uri)?;

    let index = state
        .store
        .lock()
        .await
        .add(service)
        .map_err(ApiError::Save)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "index": index })),
    ))
}

async fn get_code(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
) -> Result<Json<CodeResponse>, ApiError> {
    log::info!("api: get code for {index}");
    let index: usize = index.parse().map_err(|_| ApiError::ServiceNotFound)?;
    let service = {
        let store = state.store.lock().await;
        store
            .get(index)
            .map_err(|_| ApiError::ServiceNotFound)?
            .clone()
    };

    // One reading for both values so they agree on the time step.
    let now = state.clock.unix_time().map_err(EngineError::from)?;
    let code = engine::generate_code_at(
        service.secret().as_str(),
        service.period(),
        service.digits(),
        now,
    )?;
    let remaining = engine::remaining_seconds_at(now, service.period())?;

    Ok(Json(CodeResponse {
        code,
        remaining,
        service: service.issuer().to_string(),
    }))
}

async fn delete_service(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
) -> Result<Json<Value>, ApiError> {
    log::info!("api: delete service {index}");
    let parsed: usize = index
        .parse()
        .map_err(|_| ApiError::InvalidIndex(index.clone()))?;
    state
        .store
        .lock()
        .await
        .delete(parsed)
        .map_err(ApiError::Delete)?;
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryKv;

    const RFC_URI: &str =
        "otpauth://totp/RFC:tester?secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ&digits=8&issuer=RFC";

    fn state_with(kv: &MemoryKv, capacity: usize, now: u64) -> Arc<AppState> {
        let store = CredentialStore::open(Box::new(kv.clone()), capacity).unwrap();
        AppState::new(store, Arc::new(ManualClock::new(now)))
    }

    async fn into_parts(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn post(state: &Arc<AppState>, body: &str) -> (StatusCode, Value) {
        let response = add_service(State(state.clone()), Bytes::from(body.to_string()))
            .await
            .into_response();
        into_parts(response).await
    }

    async fn code(state: &Arc<AppState>, index: &str) -> (StatusCode, Value) {
        let response = get_code(State(state.clone()), Path(index.to_string()))
            .await
            .into_response();
        into_parts(response).await
    }

    async fn remove(state: &Arc<AppState>, index: &str) -> (StatusCode, Value) {
        let response = delete_service(State(state.clone()), Path(index.to_string()))
            .await
            .into_response();
        into_parts(response).await
    }

    async fn list(state: &Arc<AppState>) -> (StatusCode, Value) {
        let response = list_services(State(state.clone())).await.into_response();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        into_parts(response).await
    }

    fn body_for(uri: &str) -> String {
        json!({ "uri": uri }).to_string()
    }

    #[tokio::test]
    async fn add_then_list() {
        let state = state_with(&MemoryKv::default(), 20, 59);
        let (status, body) = post(
            &state,
            &body_for("otpauth://totp/GitHub:user@example.com?secret=JBSWY3DPEHPK3PXP&issuer=GitHub"),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({ "success": true, "index": 0 }));

        let (status, body) = list(&state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([{
                "service_name": "GitHub",
                "account": "user@example.com",
                "issuer": "GitHub",
                "secret": "JBSWY3DPEHPK3PXP",
                "digits": 6,
                "period": 30
            }])
        );
    }

    #[tokio::test]
    async fn add_rejects_bad_requests() {
        let state = state_with(&MemoryKv::default(), 20, 59);

        let (status, body) = post(&state, "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON"));

        let (status, body) = post(&state, r#"{"url": "otpauth://totp/x?secret=A"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "URI field required");

        let (status, _) = post(&state, r#"{"uri": 42}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post(&state, &body_for("otpauth://totp/GitHub:user?issuer=GitHub")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("secret"));

        let (_, body) = list(&state).await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn full_store_is_distinct_from_bad_input() {
        let state = state_with(&MemoryKv::default(), 1, 59);
        let (status, _) = post(&state, &body_for(RFC_URI)).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = post(&state, &body_for(RFC_URI)).await;
        assert_eq!(status, StatusCode::INSUFFICIENT_STORAGE);
        assert!(body["error"].as_str().unwrap().contains("full"));
    }

    #[tokio::test]
    async fn storage_failure_on_add_is_a_server_error() {
        let kv = MemoryKv::default();
        let state = state_with(&kv, 20, 59);
        kv.fail_after(0);
        let (status, _) = post(&state, &body_for(RFC_URI)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        kv.heal();
        let (_, body) = list(&state).await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn code_uses_clock_and_reports_remaining() {
        let state = state_with(&MemoryKv::default(), 20, 59);
        post(&state, &body_for(RFC_URI)).await;

        let (status, body) = code(&state, "0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "code": 94287082u32, "remaining": 1, "service": "RFC" })
        );
    }

    #[tokio::test]
    async fn code_for_unknown_index_is_not_found() {
        let state = state_with(&MemoryKv::default(), 20, 59);
        post(&state, &body_for(RFC_URI)).await;
        for index in ["1", "abc", "-1"] {
            let (status, body) = code(&state, index).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{index}");
            assert_eq!(body["error"], "Service not found");
        }
    }

    #[tokio::test]
    async fn delete_compacts_indices() {
        let state = state_with(&MemoryKv::default(), 20, 59);
        for name in ["a", "b", "c"] {
            let uri = format!("otpauth://totp/{name}?secret=JBSWY3DPEHPK3PXP");
            post(&state, &body_for(&uri)).await;
        }

        let (status, body) = remove(&state, "0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let (_, body) = list(&state).await;
        let names: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["service_name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["b", "c"]);

        let (_, body) = code(&state, "1").await;
        assert_eq!(body["service"], "c");
    }

    #[tokio::test]
    async fn delete_rejects_bad_index() {
        let state = state_with(&MemoryKv::default(), 20, 59);
        let (status, body) = remove(&state, "0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Delete failed"));

        let (status, _) = remove(&state, "zero").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn storage_failure_on_delete_is_a_server_error() {
        let kv = MemoryKv::default();
        let state = state_with(&kv, 20, 59);
        for name in ["a", "b"] {
            let uri = format!("otpauth://totp/{name}?secret=JBSWY3DPEHPK3PXP");
            post(&state, &body_for(&uri)).await;
        }

        kv.fail_after(0);
        let (status, body) = remove(&state, "0").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().starts_with("Delete failed"));

        // The removal stands in memory even though the write failed.
        kv.heal();
        let (_, body) = list(&state).await;
        let list = body.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["service_name"], "b");
    }

    #[tokio::test]
    async fn index_page_is_html() {
        let response = index_page().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/html"), "{content_type}");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let page = std::str::from_utf8(&bytes).unwrap();
        assert!(page.contains("/api/services"));
        assert!(page.contains("/api/code/"));
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(body) = health_check().await;
        assert_eq!(body["status"], "ok");
    }
}
