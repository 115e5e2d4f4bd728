use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;

use crate::models::{ControlAction, HealthReport, MeterLevels, MeterState, Snapshot};
use crate::server::AppState;
use crate::utils::unix_seconds;

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: String,
}

pub async fn spl(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.publisher.current().as_ref().clone())
}

/// `POST /api/control`
///
/// Unparseable requests are rejected with 400 before anything reaches the
/// control handler; everything else gets a 200 with the outcome.
pub async fn control(
    State(state): State<AppState>,
    payload: Result<Json<ControlRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let action = match request.action.parse::<ControlAction>() {
        Ok(action) => action,
        Err(e) => {
            warn!("Rejected control request: {}", e);
            return bad_request(e);
        }
    };

    Json(state.control.execute(action).await).into_response()
}

fn bad_request(error: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": error })),
    )
        .into_response()
}

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let snapshot = state.publisher.current();
    Json(health_report(&snapshot, unix_seconds(), state.health_stale_secs))
}

/// Judge bridge health from a snapshot taken at wall-clock `now`
pub fn health_report(snapshot: &Snapshot, now: f64, stale_secs: f64) -> HealthReport {
    let seconds_since_update = (snapshot.last_update > 0.0)
        .then(|| (now - snapshot.last_update).max(0.0));

    let fresh = !snapshot.measurement_active
        || seconds_since_update.is_some_and(|age| age <= stale_secs);
    let healthy = snapshot.meter_state == MeterState::Running && fresh;

    HealthReport {
        status: if healthy { "healthy" } else { "degraded" },
        rew_running: snapshot.meter_running,
        last_update: snapshot.last_update,
        seconds_since_update,
    }
}

/// Level push from the meter's subscription
pub async fn rew_callback(
    State(state): State<AppState>,
    Json(levels): Json<MeterLevels>,
) -> Json<serde_json::Value> {
    debug!("Pushed level: {:.1} dB", levels.spl);
    state.inbox.push(levels);
    Json(json!({ "status": "ok" }))
}
