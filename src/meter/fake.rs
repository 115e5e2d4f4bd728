/// In-process stand-in for the meter's API, used by tests
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::{ApiSettings, MeterSettings, DEFAULT_API_PORT};
use crate::meter::client::MeterClient;
use crate::meter::process::Supervisor;
use crate::meter::state::MeterStateCell;
use crate::models::MeterLevels;

#[derive(Debug, Default)]
struct FakeState {
    stalled: bool,
    reject_commands: bool,
    reject_levels: bool,
    levels: Option<MeterLevels>,
    commands: Vec<String>,
    subscriptions: Vec<String>,
    profiles: Vec<Value>,
    shutdowns: usize,
}

#[derive(Clone)]
pub struct FakeMeter {
    port: u16,
    state: Arc<Mutex<FakeState>>,
}

pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Settings that run `sleep 30` in place of the meter
pub fn sleep_settings() -> MeterSettings {
    MeterSettings {
        executable: Some(PathBuf::from("sleep")),
        show_gui: false,
        args_override: Some(vec!["30".to_string()]),
        api_port: DEFAULT_API_PORT,
        ready_timeout: Duration::from_secs(2),
        ready_poll_interval: Duration::from_millis(50),
        shutdown_grace: Duration::from_millis(200),
    }
}

impl FakeMeter {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(FakeState {
            levels: Some(MeterLevels::default()),
            ..Default::default()
        }));

        let app = Router::new()
            .route("/application", get(application))
            .route("/application/command", post(application_command))
            .route("/spl-meter/1/levels", get(levels))
            .route("/spl-meter/1/command", post(meter_command))
            .route("/spl-meter/1/subscribe", post(subscribe))
            .route("/spl-meter/1/configuration", post(configure))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { port, state }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            host: "127.0.0.1".to_string(),
            port: self.port,
            meter_number: 1,
            request_timeout: Duration::from_millis(300),
            weighting: "A".to_string(),
            filter: "Slow".to_string(),
        }
    }

    pub fn client(&self) -> MeterClient {
        MeterClient::new(&self.api_settings()).unwrap()
    }

    /// Supervisor for a `sleep` process whose API is this fake
    pub fn supervisor(&self, state: MeterStateCell) -> Supervisor {
        Supervisor::new(sleep_settings(), self.client(), state)
    }

    /// Supervisor already launched and past readiness
    pub async fn running_supervisor(&self, state: MeterStateCell) -> Supervisor {
        let supervisor = self.supervisor(state);
        supervisor.launch().await.unwrap();
        supervisor.await_ready(Duration::from_secs(2)).await.unwrap();
        supervisor
    }

    /// Hold every request past the client timeout
    pub fn stall(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    pub fn reject_commands(&self, reject: bool) {
        self.lock().reject_commands = reject;
    }

    /// Answer level queries with 503 while set
    pub fn reject_levels(&self, reject: bool) {
        self.lock().reject_levels = reject;
    }

    pub fn set_levels(&self, levels: Option<MeterLevels>) {
        self.lock().levels = levels;
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    pub fn profiles(&self) -> Vec<Value> {
        self.lock().profiles.clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.lock().shutdowns
    }
}

type Shared = Arc<Mutex<FakeState>>;

async fn stall_if_needed(state: &Shared) {
    let stalled = state.lock().unwrap().stalled;
    if stalled {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

async fn application(State(state): State<Shared>) -> Response {
    stall_if_needed(&state).await;
    Json(serde_json::json!({ "version": "fake" })).into_response()
}

async fn application_command(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    stall_if_needed(&state).await;
    if body["command"] == "shutdown" {
        state.lock().unwrap().shutdowns += 1;
    }
    StatusCode::OK.into_response()
}

async fn levels(State(state): State<Shared>) -> Response {
    stall_if_needed(&state).await;
    let guard = state.lock().unwrap();
    if guard.reject_levels {
        return (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response();
    }
    match guard.levels.clone() {
        Some(levels) => Json(levels).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn meter_command(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    stall_if_needed(&state).await;
    let mut guard = state.lock().unwrap();
    if guard.reject_commands {
        return (StatusCode::INTERNAL_SERVER_ERROR, "command refused").into_response();
    }
    if let Some(name) = body["command"].as_str() {
        guard.commands.push(name.to_string());
    }
    StatusCode::OK.into_response()
}

async fn subscribe(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    stall_if_needed(&state).await;
    if let Some(url) = body["callbackUrl"].as_str() {
        state.lock().unwrap().subscriptions.push(url.to_string());
    }
    StatusCode::OK.into_response()
}

async fn configure(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    stall_if_needed(&state).await;
    state.lock().unwrap().profiles.push(body);
    StatusCode::OK.into_response()
}
