//! HTTP routing and JSON/SSE handlers.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, Limited, StreamBody};
use hyper::body::{Body, Frame};
use modelboard_training::{DatasetStore, Landmarks, Sample};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::leaderboard::{LeaderboardError, SortField};
use crate::orchestration::{ChannelSink, ProgressEvent, ProgressStreamer, SubmitError, SubmitRequest, TrainingSession};

pub type BoxBody = UnsyncBoxBody<Bytes, Infallible>;

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
const SSE_BUFFER: usize = 64;
const DELETE_PREFIX: &str = "/api/leaderboard/delete/";

/// Shared state behind every request.
#[derive(Debug)]
pub struct AppState {
    pub session: TrainingSession,
    pub dataset: Arc<DatasetStore>,
    pub streamer: ProgressStreamer,
}

/// Route one request. Never fails; errors become JSON or SSE error responses.
pub async fn handle<B>(state: Arc<AppState>, request: Request<B>) -> Result<Response<BoxBody>, Infallible>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = request.method().clone();
    let path = request.uri().path().trim_end_matches('/').to_string();
    let query = parse_query(request.uri().query());
    let body = request.into_body();

    let response = match (method, path.as_str()) {
        (Method::GET, "/api/health") => health(&state),
        (Method::POST, "/api/train") => train(&state, body).await,
        (Method::POST, "/api/train/stream") => train_stream(&state, body).await,
        (Method::GET, "/api/leaderboard") => leaderboard(&state, &query),
        (Method::POST, "/api/leaderboard/clear") => clear_leaderboard(&state).await,
        (Method::DELETE, p) if p.starts_with(DELETE_PREFIX) => {
            delete_entry(&state, p.strip_prefix(DELETE_PREFIX).unwrap_or_default()).await
        }
        (Method::POST, "/api/data/save") => save_data(&state, body).await,
        (Method::GET, "/api/data/stats") => data_stats(&state),
        (Method::POST, "/api/data/reset") => reset_data(&state),
        (Method::GET, "/api/models/list") => list_models(&state),
        (Method::GET, "/api/live/models") => live_models(&state),
        (Method::POST, "/api/live/load") => live_load(&state, body).await,
        (Method::POST, "/api/live/predict") => live_predict(&state, body).await,
        (Method::POST, "/api/live/unload") => live_unload(&state),
        _ => not_found(),
    };
    Ok(response)
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).map_or_else(|_| spaced.clone(), std::borrow::Cow::into_owned)
}

fn full(bytes: impl Into<Bytes>) -> BoxBody {
    Full::new(bytes.into()).boxed_unsync()
}

fn json_response(status: StatusCode, value: &Value) -> Response<BoxBody> {
    let mut response = Response::new(full(value.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn ok(value: &Value) -> Response<BoxBody> {
    json_response(StatusCode::OK, value)
}

fn json_error(status: StatusCode, message: impl std::fmt::Display) -> Response<BoxBody> {
    json_response(status, &json!({"success": false, "error": message.to_string()}))
}

fn not_found() -> Response<BoxBody> {
    json_error(StatusCode::NOT_FOUND, "Not found")
}

fn sse_response(status: StatusCode, body: BoxBody) -> Response<BoxBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// A complete SSE response carrying one `error` event.
fn sse_error(status: StatusCode, message: impl Into<String>) -> Response<BoxBody> {
    sse_response(status, full(ProgressEvent::error(message).to_sse_frame()))
}

/// Run `work` on the blocking pool against the shared state.
async fn run_blocking<T, F>(state: &Arc<AppState>, work: F) -> Result<T, JoinError>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> T + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(&state)).await
}

fn join_failed(e: &JoinError) -> String {
    error!(error = %e, "blocking task failed");
    format!("internal error: {e}")
}

async fn read_body<B>(body: B) -> Result<Bytes, String>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .map_err(|e| format!("failed to read request body: {e}"))
}

/// Parse a JSON body. An empty body parses as `T::default()`.
async fn read_json<T, B>(body: B) -> Result<T, String>
where
    T: DeserializeOwned + Default,
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = read_body(body).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| format!("Invalid request body: {e}"))
}

fn health(state: &AppState) -> Response<BoxBody> {
    ok(&json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "training": state.session.is_busy(),
        "leaderboard_entries": state.session.leaderboard().len(),
    }))
}

/// Run to completion and answer with the final summary as plain JSON.
async fn train<B>(state: &Arc<AppState>, body: B) -> Response<BoxBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request: SubmitRequest = match read_json(body).await {
        Ok(request) => request,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, message),
    };

    let mut ticket = match run_blocking(state, move |s| s.session.submit(request)).await {
        Ok(Ok(ticket)) => ticket,
        Ok(Err(e @ SubmitError::AlreadyRunning)) => return json_error(StatusCode::CONFLICT, e),
        Ok(Err(e @ (SubmitError::InvalidRequest(_) | SubmitError::NoData))) => {
            info!(error = %e, "training submission rejected");
            return json_error(StatusCode::BAD_REQUEST, e);
        }
        Ok(Err(e @ SubmitError::Internal(_))) => {
            error!(error = %e, "training submission failed");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, e);
        }
        Err(e) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, join_failed(&e)),
    };

    while let Some(event) = ticket.events.recv().await {
        match event {
            ProgressEvent::Complete { summary, .. } => return ok(&json!({"success": true, "result": summary})),
            ProgressEvent::Error { message } => {
                warn!(run_id = %ticket.spec.run_id, error = %message, "training run failed");
                return json_error(StatusCode::INTERNAL_SERVER_ERROR, message);
            }
            ProgressEvent::Status { .. } | ProgressEvent::Epoch { .. } => {}
        }
    }
    error!(run_id = %ticket.spec.run_id, "training worker exited without a result");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Training ended unexpectedly")
}

async fn train_stream<B>(state: &Arc<AppState>, body: B) -> Response<BoxBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request: SubmitRequest = match read_json(body).await {
        Ok(request) => request,
        Err(message) => return sse_error(StatusCode::BAD_REQUEST, message),
    };

    let submitted = match run_blocking(state, move |s| s.session.submit(request)).await {
        Ok(submitted) => submitted,
        Err(e) => return sse_error(StatusCode::INTERNAL_SERVER_ERROR, join_failed(&e)),
    };
    let mut ticket = match submitted {
        Ok(ticket) => ticket,
        Err(SubmitError::AlreadyRunning) => {
            return json_error(StatusCode::CONFLICT, SubmitError::AlreadyRunning);
        }
        Err(e @ (SubmitError::InvalidRequest(_) | SubmitError::NoData)) => {
            info!(error = %e, "training submission rejected");
            return sse_error(StatusCode::BAD_REQUEST, e.to_string());
        }
        Err(e @ SubmitError::Internal(_)) => {
            error!(error = %e, "training submission failed");
            return sse_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let (tx, rx) = mpsc::channel::<Bytes>(SSE_BUFFER);
    let streamer = state.streamer.clone();
    let run_id = ticket.spec.run_id.clone();
    tokio::spawn(async move {
        let mut sink = ChannelSink(tx);
        let outcome = streamer.relay(&mut ticket.events, &mut sink).await;
        debug!(%run_id, ?outcome, "progress stream finished");
    });

    let frames = ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(Frame::data(frame)));
    sse_response(StatusCode::OK, BodyExt::boxed_unsync(StreamBody::new(frames)))
}

fn leaderboard(state: &AppState, query: &HashMap<String, String>) -> Response<BoxBody> {
    let sort_by = query.get("sort_by").map_or("val_accuracy", String::as_str);
    let ascending = query.get("order").is_some_and(|o| o.eq_ignore_ascii_case("asc"));
    let field = match sort_by.parse::<SortField>() {
        Ok(field) => Some(field),
        Err(e) => {
            debug!(error = %e, "unsorted leaderboard requested");
            None
        }
    };
    let results = state.session.leaderboard().list(field, ascending);
    ok(&json!({"success": true, "total": results.len(), "results": results}))
}

async fn clear_leaderboard(state: &Arc<AppState>) -> Response<BoxBody> {
    match run_blocking(state, |s| s.session.leaderboard().clear()).await {
        Ok(removed) => ok(&json!({"success": true, "removed": removed})),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, join_failed(&e)),
    }
}

async fn delete_entry(state: &Arc<AppState>, raw_index: &str) -> Response<BoxBody> {
    let Ok(position) = raw_index.parse::<usize>() else {
        return not_found();
    };
    match run_blocking(state, move |s| s.session.leaderboard().delete(position)).await {
        Ok(Ok(_)) => ok(&json!({"success": true})),
        Ok(Err(e @ LeaderboardError::OutOfRange { .. })) => json_error(StatusCode::BAD_REQUEST, e),
        Ok(Err(e)) => json_error(StatusCode::INTERNAL_SERVER_ERROR, e),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, join_failed(&e)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct SaveDataRequest {
    #[serde(default)]
    samples: Vec<Sample>,
}

async fn save_data<B>(state: &AppState, body: B) -> Response<BoxBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request: SaveDataRequest = match read_json(body).await {
        Ok(request) => request,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, message),
    };
    let added = request.samples.len();
    match state.dataset.append(request.samples) {
        Ok(total) => {
            info!(added, total, "samples saved");
            ok(&json!({"success": true, "total_samples": total, "added_samples": added}))
        }
        Err(e) => {
            warn!(error = %e, "failed to save samples");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

fn data_stats(state: &AppState) -> Response<BoxBody> {
    match state.dataset.stats() {
        Ok(stats) => ok(&json!({
            "success": true,
            "total_samples": stats.total_samples,
            "num_gestures": stats.num_gestures,
            "gesture_counts": stats.gesture_counts,
        })),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

fn reset_data(state: &AppState) -> Response<BoxBody> {
    match state.dataset.reset() {
        Ok(()) => {
            info!("dataset reset");
            ok(&json!({"success": true}))
        }
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

fn list_models(state: &AppState) -> Response<BoxBody> {
    ok(&json!({"success": true, "models": state.session.architectures()}))
}

fn live_models(state: &AppState) -> Response<BoxBody> {
    ok(&json!({"success": true, "models": state.session.live_models()}))
}

#[derive(Debug, Default, Deserialize)]
struct LoadRequest {
    #[serde(default)]
    model_files: Vec<String>,
}

async fn live_load<B>(state: &Arc<AppState>, body: B) -> Response<BoxBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request: LoadRequest = match read_json(body).await {
        Ok(request) => request,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, message),
    };
    match run_blocking(state, move |s| s.session.load_models(&request.model_files)).await {
        Ok(reports) => ok(&json!({"success": true, "loaded_models": reports})),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, join_failed(&e)),
    }
}

#[derive(Debug, Default, Deserialize)]
struct PredictRequest {
    #[serde(default)]
    landmarks: Option<Landmarks>,
}

async fn live_predict<B>(state: &Arc<AppState>, body: B) -> Response<BoxBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let request: PredictRequest = match read_json(body).await {
        Ok(request) => request,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, message),
    };
    let landmarks = match request.landmarks {
        Some(Landmarks::Points(p)) if !p.is_empty() => Landmarks::Points(p),
        Some(Landmarks::Flat(v)) if !v.is_empty() => Landmarks::Flat(v),
        _ => return json_error(StatusCode::BAD_REQUEST, "No landmarks provided"),
    };
    match run_blocking(state, move |s| s.session.predict(&landmarks)).await {
        Ok(Ok(predictions)) => ok(&json!({"success": true, "predictions": predictions})),
        Ok(Err(e)) => json_error(StatusCode::BAD_REQUEST, e),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, join_failed(&e)),
    }
}

fn live_unload(state: &AppState) -> Response<BoxBody> {
    let unloaded = state.session.unload_all();
    ok(&json!({"success": true, "unloaded": unloaded}))
}
