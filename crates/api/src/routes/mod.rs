use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use lacak_domain::error::DomainError;
use lacak_domain::latest::DevicePosition;
use lacak_domain::location::RawRecord;
use lacak_domain::tracker::IngestOutcome;
use lacak_infra::transit;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::services::ServeDir;

use crate::observability;
use crate::{error::ApiError, middleware as app_middleware, state::AppState};

const DEFAULT_RECENT_LIMIT: usize = 100;

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/location", post(ingest_location))
        .route("/locations/recent", get(recent_locations))
        .route("/api/vehicles", get(list_vehicles))
        .route("/api/vehicles/:device_id", get(get_vehicle))
        .route("/api/routes", get(list_routes))
        .route("/api/stops", get(list_stops))
        .route("/api/stream", get(stream_positions))
        .route("/api/locations/all", get(all_locations))
        .route("/api/locations/latest", get(latest_location))
        .route("/metrics", get(metrics))
        .fallback_service(ServeDir::new(&state.config.static_dir))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(app_middleware::metrics_layer));

    if !state.config.is_test() {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

/// Accepts OwnTracks-style and generic tracker payloads. The body is
/// decoded leniently: anything that is not parseable JSON is a missing
/// body, everything else goes through the normalizer.
async fn ingest_location(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload: Value = serde_json::from_slice(&body).map_err(|_| {
        observability::register_ingest("malformed");
        ApiError::MissingJson
    })?;

    match state.tracker.ingest(&payload).await {
        Ok(IngestOutcome::Stored(_)) => {
            observability::register_ingest("stored");
            Ok((StatusCode::CREATED, Json(json!({ "status": "ok" }))).into_response())
        }
        Ok(IngestOutcome::Ignored) => {
            observability::register_ingest("ignored");
            Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response())
        }
        Err(DomainError::BadCoordinates) => {
            observability::register_ingest("bad_coordinates");
            Err(ApiError::BadCoordinates)
        }
        Err(err) => {
            observability::register_ingest("store_failure");
            tracing::error!(error = %err, "failed to append location");
            Err(ApiError::Internal)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn recent_locations(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<RawRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    let rows = state.tracker.recent(limit).await.map_err(internal)?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct VehiclesQuery {
    limit: Option<usize>,
}

async fn list_vehicles(
    State(state): State<AppState>,
    Query(query): Query<VehiclesQuery>,
) -> Json<Vec<DevicePosition>> {
    Json(state.tracker.all_latest(query.limit.unwrap_or(0)).await)
}

async fn get_vehicle(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<DevicePosition>, ApiError> {
    state
        .tracker
        .latest_for_device(&device_id)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn list_routes(State(state): State<AppState>) -> Json<Value> {
    Json(transit::load_routes(std::path::Path::new(
        &state.config.routes_path,
    )))
}

async fn list_stops(State(state): State<AppState>) -> Json<Vec<Value>> {
    Json(transit::load_stops(std::path::Path::new(
        &state.config.stops_path,
    )))
}

async fn all_locations(State(state): State<AppState>) -> Result<Json<Vec<RawRecord>>, ApiError> {
    Ok(Json(state.tracker.all_raw().await.map_err(internal)?))
}

async fn latest_location(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let row = state.tracker.latest_overall().await.map_err(internal)?;
    match row {
        Some(row) => Ok(Json(
            serde_json::to_value(row).map_err(|_| ApiError::Internal)?,
        )),
        None => Ok(Json(json!({}))),
    }
}

/// Live updates as server-sent events: one snapshot event on connect,
/// then one event per change, each carrying the JSON array of changed
/// records. Devices whose position did not change are never emitted.
async fn stream_positions(State(state): State<AppState>) -> Response {
    let mut updates = state.tracker.subscribe();
    let snapshot = state.tracker.all_latest(0).await;

    let (tx, rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();
    let mut last_sent: HashMap<String, (Option<f64>, Option<f64>)> = HashMap::new();

    if !snapshot.is_empty() {
        for position in &snapshot {
            last_sent.insert(
                position.device_id.clone(),
                (position.latitude, position.longitude),
            );
        }
        let _ = tx.send(Ok(positions_event(&snapshot)));
    }

    let tracker = state.tracker.clone();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(position) => {
                    let coords = (position.latitude, position.longitude);
                    // Drops the overlap between the snapshot and
                    // updates published while it was being sent.
                    if last_sent.get(&position.device_id) == Some(&coords) {
                        continue;
                    }
                    last_sent.insert(position.device_id.clone(), coords);
                    let event = positions_event(std::slice::from_ref(&position));
                    if tx.send(Ok(event)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Updates were dropped; resync from the index and
                    // emit whatever actually changed.
                    tracing::debug!(skipped, "position stream lagged, resyncing");
                    let snapshot = tracker.all_latest(0).await;
                    let changed: Vec<DevicePosition> = snapshot
                        .into_iter()
                        .filter(|position| {
                            last_sent.get(&position.device_id)
                                != Some(&(position.latitude, position.longitude))
                        })
                        .collect();
                    if changed.is_empty() {
                        continue;
                    }
                    for position in &changed {
                        last_sent.insert(
                            position.device_id.clone(),
                            (position.latitude, position.longitude),
                        );
                    }
                    if tx.send(Ok(positions_event(&changed))).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

fn positions_event(positions: &[DevicePosition]) -> Event {
    match serde_json::to_string(positions) {
        Ok(payload) => Event::default().data(payload),
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize stream event");
            Event::default().data("[]")
        }
    }
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => body.into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

fn internal(err: DomainError) -> ApiError {
    tracing::error!(error = %err, "store read failed");
    ApiError::Internal
}
