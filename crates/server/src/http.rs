#![forbid(unsafe_code)]

//! HTTP front: `POST /run`, `GET /attributes`, `GET /health`.
//!
//! The engine is synchronous, so every call into it runs on the blocking pool.

mod auth;

use crate::engine::{Engine, EngineError};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use dw_core::JobRequest;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub use auth::{SIGNATURE_HEADER, sign};

pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct HttpOptions {
    /// Shared secret for request signatures. `None` disables the check.
    pub secret: Option<String>,
    pub max_body_bytes: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            secret: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    engine: Arc<Engine>,
    secret: Option<Arc<str>>,
    max_body_bytes: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache_size: usize,
    pub store_size: u64,
}

type HttpError = (StatusCode, String);

/// Turns a JSON body into a request. Errors are the plain-text reasons sent back with 400.
pub fn parse_job_request(body: &[u8]) -> Result<JobRequest, String> {
    let value: Value = serde_json::from_slice(body).map_err(|err| err.to_string())?;
    let Value::Object(map) = value else {
        return Err("Request is not a JSON object".to_string());
    };

    let mut request = JobRequest::new();
    for (name, value) in map {
        let result = match value {
            Value::String(value) => request.set(name, value),
            Value::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let Value::String(item) = item else {
                        return Err("Element in array is not a string.".to_string());
                    };
                    values.push(item);
                }
                request.set_vector(name, values)
            }
            _ => return Err("Argument must be array or string.".to_string()),
        };
        result.map_err(|err| err.to_string())?;
    }
    Ok(request)
}

fn engine_error(err: EngineError) -> HttpError {
    match err {
        EngineError::EmptyRequest => (StatusCode::BAD_REQUEST, err.to_string()),
        EngineError::Backend(backend) => (StatusCode::CONFLICT, backend.to_string()),
        other => (StatusCode::CONFLICT, other.to_string()),
    }
}

async fn run_blocking<T, F>(engine: &Arc<Engine>, op: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> Result<T, EngineError> + Send + 'static,
{
    let engine = Arc::clone(engine);
    match tokio::task::spawn_blocking(move || op(&engine)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Poisoned("engine task")),
    }
}

async fn handle_run(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<&'static str>, HttpError> {
    let request = parse_job_request(&body).map_err(|reason| {
        info!(reason = %reason, "rejected malformed job request");
        (StatusCode::BAD_REQUEST, reason)
    })?;

    match run_blocking(&state.engine, move |engine| engine.submit(&request)).await {
        Ok(status) => Ok(Json(status.as_str())),
        Err(err) => {
            warn!(error = %err, "job request failed");
            Err(engine_error(err))
        }
    }
}

async fn handle_attributes(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, bool>>, HttpError> {
    run_blocking(&state.engine, |engine| engine.attributes())
        .await
        .map(Json)
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, HttpError> {
    let (cache_size, store_size) = run_blocking(&state.engine, |engine| {
        Ok((engine.cache_size()?, engine.store_size()?))
    })
    .await
    .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
    Ok(Json(HealthResponse {
        status: "healthy",
        cache_size,
        store_size,
    }))
}

/// Builds the router. `/run` and `/attributes` are signed when a secret is configured;
/// `/health` never is.
pub fn router(engine: Arc<Engine>, options: HttpOptions) -> Router {
    let state = AppState {
        engine,
        secret: options
            .secret
            .filter(|secret| !secret.is_empty())
            .map(Arc::from),
        max_body_bytes: options.max_body_bytes,
    };

    let signed = Router::new()
        .route("/run", post(handle_run))
        .route("/attributes", get(handle_attributes))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_signature,
        ));

    Router::new()
        .merge(signed)
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strings_and_string_arrays() {
        let request =
            parse_job_request(br#"{"remote_command":"/bin/echo","v_argv":["a","b"]}"#)
                .expect("parse");
        assert_eq!(
            request.attributes().get("remote_command").map(String::as_str),
            Some("/bin/echo")
        );
        assert_eq!(
            request.vector_attributes().get("v_argv").cloned(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn rejects_malformed_bodies_with_reasons() {
        assert!(parse_job_request(b"not json").is_err());
        assert_eq!(
            parse_job_request(b"[1, 2]").unwrap_err(),
            "Request is not a JSON object"
        );
        assert_eq!(
            parse_job_request(br#"{"v_argv":["a", 1]}"#).unwrap_err(),
            "Element in array is not a string."
        );
        assert_eq!(
            parse_job_request(br#"{"wd": 5}"#).unwrap_err(),
            "Argument must be array or string."
        );
        assert_eq!(
            parse_job_request(br#"{"wd": null}"#).unwrap_err(),
            "Argument must be array or string."
        );
    }

    #[test]
    fn empty_object_parses_to_empty_request() {
        assert!(parse_job_request(b"{}").expect("parse").is_empty());
    }
}
