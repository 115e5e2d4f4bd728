mod config;
mod error;
mod meter;
mod models;
mod pipeline;
mod server;
mod utils;

use log::{error, info, warn, LevelFilter};
use std::future::IntoFuture;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::net::TcpListener;

use config::BridgeConfig;
use meter::{MeterClient, MeterProfile, MeterStateCell, Supervisor};
use models::ControlAction;
use pipeline::{
    ControlHandler, LiveMeasurement, Poller, SharedMeasurement, SnapshotPublisher, UpdateInbox,
};
use server::AppState;
use utils::{format_datetime, Clock};

/// Initialize logging at `level`; `RUST_LOG` still overrides per module
fn init_logging(level: &str) {
    let level = level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .init();
}

async fn run(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let clock = Clock::start();
    let client = MeterClient::new(&config.api)?;
    info!("Meter API expected at {}", client.base_url());
    let supervisor = Arc::new(Supervisor::new(
        config.meter.clone(),
        client.clone(),
        MeterStateCell::new(),
    ));
    let measurement = SharedMeasurement::new(LiveMeasurement::new(
        config.pipeline.short_window_secs,
        config.pipeline.long_window_secs,
    ));
    let inbox = UpdateInbox::new(clock);
    let publisher = SnapshotPublisher::new();

    let callback_url = config
        .pipeline
        .subscribe_updates
        .then(|| config.pipeline.callback_url.clone());
    let control = Arc::new(ControlHandler::new(
        supervisor.clone(),
        client.clone(),
        measurement.clone(),
        inbox.clone(),
        MeterProfile::new(&config.api, config.rolling_leq_minutes()),
        callback_url,
    ));

    let poller = Poller::new(
        supervisor.clone(),
        client,
        measurement,
        inbox.clone(),
        publisher.clone(),
        config.pipeline.clone(),
    );

    let app = server::router(AppState {
        publisher,
        control: control.clone(),
        inbox,
        health_stale_secs: config.health_stale_secs,
    });

    // Bind before launching the meter so subscription pushes have somewhere to go
    let address = format!("{}:{}", config.bind_host, config.bridge_port);
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", address, e);
            return Err(e.into());
        }
    };
    info!(
        "Bridge listening on {} at {}",
        address,
        format_datetime(&OffsetDateTime::now_utc())
    );

    let poller_task = tokio::spawn(poller.run());

    if config.auto_start {
        let control = control.clone();
        tokio::spawn(async move {
            let outcome = control.execute(ControlAction::Start).await;
            match outcome.message {
                None => info!("Meter started, state {}", outcome.state),
                Some(message) => warn!("Automatic start failed: {}", message),
            }
        });
    } else {
        info!("Automatic start disabled, waiting for a start command");
    }

    // Serve until the server fails or the user interrupts
    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            if let Err(e) = result {
                error!("HTTP server failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Bridge terminated by user. Shutting down the meter.");
        }
    }

    poller_task.abort();
    supervisor.terminate(true).await;
    info!(
        "Bridge stopped at {}",
        format_datetime(&OffsetDateTime::now_utc())
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = BridgeConfig::from_env();

    // Initialize logging
    let level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(&level);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Program completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {}", e);
            Err(e)
        }
    }
}
