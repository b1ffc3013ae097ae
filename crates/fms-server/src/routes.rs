//! HTTP routes
//!
//! | method | path            | body / query            | reply                       |
//! |--------|-----------------|-------------------------|-----------------------------|
//! | GET    | `/`             |                         | service index               |
//! | POST   | `/ingest`       | `RawMeasurement`        | 201 accepted, 400 rejected  |
//! | POST   | `/ingest/batch` | `[RawMeasurement]`      | 201 with per-item results   |
//! | GET    | `/tags`         |                         | `{"tags": [...]}`           |
//! | GET    | `/data`         | `tag`, `from`, `to`     | rows, newest first          |
//! | GET    | `/anomalies`    | `tag?`, `from`, `to`    | anomalous rows              |
//! | GET    | `/stats`        |                         | `StatsReport`               |
//! | GET    | `/health`       |                         | `HealthReport`              |

use chrono::{DateTime, Utc};
use fms_common::{parse_timestamp, RawMeasurement};
use fms_core::{IngestionOrchestrator, MeasurementQuery, MemoryStore};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::{self, Response};
use warp::{Filter, Rejection, Reply};

/// Largest accepted request body
const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Shared handles for the handlers
#[derive(Debug, Clone)]
pub struct AppState {
    /// Ingestion pipeline
    pub orchestrator: Arc<IngestionOrchestrator>,
    /// Measurement backend, for queries
    pub store: Arc<MemoryStore>,
}

/// Query parameters of `/data` and `/anomalies`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeParams {
    /// Tag filter
    pub tag: Option<String>,
    /// Lower time bound (ISO-8601)
    pub from: Option<String>,
    /// Upper time bound (ISO-8601)
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// All routes, with rejections turned into JSON errors
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let index = warp::path::end().and(warp::get()).map(index);

    let ingest = warp::path!("ingest")
        .and(warp::post())
        .and(json_body::<RawMeasurement>())
        .and(with_state(state.clone()))
        .and_then(ingest_one);

    let batch = warp::path!("ingest" / "batch")
        .and(warp::post())
        .and(json_body::<Vec<RawMeasurement>>())
        .and(with_state(state.clone()))
        .and_then(ingest_batch);

    let tags = warp::path!("tags")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(list_tags);

    let data = warp::path!("data")
        .and(warp::get())
        .and(warp::query::<RangeParams>())
        .and(with_state(state.clone()))
        .and_then(|params: RangeParams, state: AppState| query_rows(params, state, false));

    let anomalies = warp::path!("anomalies")
        .and(warp::get())
        .and(warp::query::<RangeParams>())
        .and(with_state(state.clone()))
        .and_then(|params: RangeParams, state: AppState| query_rows(params, state, true));

    let stats = warp::path!("stats")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(stats);

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_state(state))
        .and_then(health);

    index
        .or(ingest)
        .or(batch)
        .or(tags)
        .or(data)
        .or(anomalies)
        .or(stats)
        .or(health)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn index() -> impl Reply {
    reply::json(&serde_json::json!({
        "message": "Fermenter Monitoring API",
        "version": fms_core::VERSION,
        "endpoints": {
            "ingest": "/ingest",
            "batch": "/ingest/batch",
            "tags": "/tags",
            "data": "/data",
            "anomalies": "/anomalies",
            "stats": "/stats",
            "health": "/health",
        }
    }))
}

async fn ingest_one(raw: RawMeasurement, state: AppState) -> Result<Response, Rejection> {
    let resp = state.orchestrator.handle(raw).await;
    let code = if resp.is_accepted() {
        StatusCode::CREATED
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok(reply::with_status(reply::json(&resp), code).into_response())
}

async fn ingest_batch(batch: Vec<RawMeasurement>, state: AppState) -> Result<Response, Rejection> {
    let resp = state.orchestrator.handle_batch(batch).await;
    Ok(reply::with_status(reply::json(&resp), StatusCode::CREATED).into_response())
}

async fn list_tags(state: AppState) -> Result<Response, Rejection> {
    Ok(reply::json(&serde_json::json!({ "tags": state.store.tags() })).into_response())
}

async fn query_rows(
    params: RangeParams,
    state: AppState,
    anomalies_only: bool,
) -> Result<Response, Rejection> {
    if !anomalies_only && params.tag.is_none() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "missing required query parameter 'tag'"));
    }

    let from = match parse_bound(params.from.as_deref(), "from") {
        Ok(from) => from,
        Err(resp) => return Ok(resp),
    };
    let to = match parse_bound(params.to.as_deref(), "to") {
        Ok(to) => to,
        Err(resp) => return Ok(resp),
    };

    let query = MeasurementQuery {
        tag: params.tag,
        from,
        to,
        anomalies_only,
    };
    Ok(reply::json(&state.store.query(&query)).into_response())
}

fn parse_bound(raw: Option<&str>, name: &str) -> Result<Option<DateTime<Utc>>, Response> {
    raw.map(parse_timestamp)
        .transpose()
        .map_err(|_| error_reply(StatusCode::BAD_REQUEST, &format!("invalid '{name}' timestamp format")))
}

async fn stats(state: AppState) -> Result<Response, Rejection> {
    let report = state.orchestrator.stats(state.store.totals());
    Ok(reply::json(&report).into_response())
}

async fn health(state: AppState) -> Result<Response, Rejection> {
    Ok(reply::json(&state.orchestrator.health().await).into_response())
}

fn error_reply(code: StatusCode, message: &str) -> Response {
    let body = ErrorBody {
        error: message.to_string(),
    };
    reply::with_status(reply::json(&body), code).into_response()
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let resp = if err.is_not_found() {
        error_reply(StatusCode::NOT_FOUND, "not found")
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        error_reply(StatusCode::BAD_REQUEST, &e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        error_reply(StatusCode::BAD_REQUEST, &e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        error_reply(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        error_reply(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        tracing::error!(?err, "unhandled rejection");
        error_reply(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    };
    Ok(resp)
}
