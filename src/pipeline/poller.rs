/// Fixed-cadence loop that keeps the windows, meter state and snapshot current
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::PipelineSettings;
use crate::error::{BridgeError, Result};
use crate::meter::{MeterClient, Supervisor};
use crate::models::{MeterLevels, MeterState};
use crate::pipeline::inbox::UpdateInbox;
use crate::pipeline::measurement::SharedMeasurement;
use crate::pipeline::snapshot::SnapshotPublisher;
use crate::utils::{unix_seconds, Clock};

pub struct Poller {
    supervisor: Arc<Supervisor>,
    client: MeterClient,
    measurement: SharedMeasurement,
    inbox: UpdateInbox,
    publisher: SnapshotPublisher,
    clock: Clock,
    settings: PipelineSettings,
    consecutive_failures: u32,
    /// Newest timestamp fed to the windows, keeps them in time order
    last_timestamp: f64,
}

impl Poller {
    pub fn new(
        supervisor: Arc<Supervisor>,
        client: MeterClient,
        measurement: SharedMeasurement,
        inbox: UpdateInbox,
        publisher: SnapshotPublisher,
        settings: PipelineSettings,
    ) -> Self {
        let clock = inbox.clock();
        Self {
            supervisor,
            client,
            measurement,
            inbox,
            publisher,
            clock,
            settings,
            consecutive_failures: 0,
            last_timestamp: 0.0,
        }
    }

    /// Poll forever; a failed cycle is logged and the next one runs on time
    pub async fn run(mut self) {
        info!(
            "Poller started, interval {:?}, windows {}s/{}s",
            self.settings.poll_interval,
            self.settings.short_window_secs,
            self.settings.long_window_secs
        );
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                match e {
                    BridgeError::ApiUnreachable(_) => warn!("Poll cycle failed: {}", e),
                    _ => error!("Poll cycle failed: {}", e),
                }
            }
        }
    }

    /// One synchronization cycle; always publishes a snapshot
    pub async fn poll_once(&mut self) -> Result<()> {
        let result = self.sync_with_meter().await;
        self.publish();
        result
    }

    async fn sync_with_meter(&mut self) -> Result<()> {
        let state = self.supervisor.state();
        if !matches!(state, MeterState::Running | MeterState::Unreachable) {
            self.consecutive_failures = 0;
            return Ok(());
        }

        if !self.supervisor.is_alive().await {
            self.consecutive_failures = 0;
            if self.supervisor.mark_exited() {
                error!("Meter process is gone, state is now ERROR");
            }
            return Err(BridgeError::MeterExited(
                "process no longer running".to_string(),
            ));
        }

        self.refresh_subscription().await;

        let generation = self.measurement.lock().generation();
        let pushed = self.inbox.drain();
        let fetched = if pushed.is_empty() {
            Some(self.client.fetch_current().await)
        } else {
            None
        };

        match fetched {
            None => {
                self.on_reachable();
                self.record(generation, pushed);
                Ok(())
            }
            Some(Ok(levels)) => {
                self.on_reachable();
                let now = self.clock.now();
                match levels {
                    Some(levels) => self.record(generation, vec![(now, levels)]),
                    None => {
                        let mut measurement = self.measurement.lock();
                        if measurement.generation() == generation {
                            measurement.set_active(false);
                        }
                    }
                }
                Ok(())
            }
            Some(Err(e)) => {
                if e.is_unreachable() {
                    self.on_unreachable();
                } else {
                    // The meter answered, so the unreachable run is broken;
                    // a rejection leaves the state alone
                    self.consecutive_failures = 0;
                }
                Err(e)
            }
        }
    }

    fn on_reachable(&mut self) {
        self.consecutive_failures = 0;
        if self.supervisor.mark_reachable() {
            info!("Meter API reachable again");
        }
    }

    fn on_unreachable(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.settings.failure_threshold
            && self.supervisor.mark_unreachable()
        {
            warn!(
                "Meter API unreachable after {} consecutive failures",
                self.consecutive_failures
            );
        }
    }

    /// Feed readings unless a reset happened while they were in flight
    fn record(&mut self, generation: u64, readings: Vec<(f64, MeterLevels)>) {
        if readings.is_empty() {
            return;
        }
        let mut measurement = self.measurement.lock();
        if measurement.generation() != generation {
            debug!("Discarding {} readings from before a reset", readings.len());
            return;
        }
        let wall_clock = unix_seconds();
        for (timestamp, levels) in readings {
            let timestamp = timestamp.max(self.last_timestamp);
            self.last_timestamp = timestamp;
            measurement.record(timestamp, levels, wall_clock);
        }
    }

    async fn refresh_subscription(&mut self) {
        if !self.settings.subscribe_updates {
            return;
        }
        let now = self.clock.now();
        let refresh = self.settings.subscription_refresh.as_secs_f64();
        if !self.inbox.subscription_due(now, refresh) {
            return;
        }

        self.inbox.mark_subscribed(now);
        match self.client.subscribe_updates(&self.settings.callback_url).await {
            Ok(()) => info!("Subscribed to meter updates"),
            Err(e) => warn!("Meter subscription failed: {}", e),
        }
    }

    fn publish(&self) {
        let state = self.supervisor.state();
        let snapshot = self.measurement.lock().snapshot(state);
        self.publisher.publish(snapshot);
    }
}
