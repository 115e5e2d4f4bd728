/// HTTP surface of the bridge
///
/// Handlers only read the published snapshot or hand work to the control
/// handler; none of them talks to the meter directly.
pub mod routes;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::pipeline::{ControlHandler, SnapshotPublisher, UpdateInbox};

#[derive(Clone)]
pub struct AppState {
    pub publisher: SnapshotPublisher,
    pub control: Arc<ControlHandler>,
    pub inbox: UpdateInbox,
    /// Seconds without a reading before an active measurement counts as stale
    pub health_stale_secs: f64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/spl", get(routes::spl))
        .route("/api/control", post(routes::control))
        .route("/health", get(routes::health))
        .route("/rew-callback", post(routes::rew_callback))
        .with_state(state)
}
