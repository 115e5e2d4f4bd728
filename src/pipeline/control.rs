/// Start / stop / restart / shutdown of the meter, serialized
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{BridgeError, Result};
use crate::meter::{MeterClient, MeterCommand, MeterProfile, Supervisor};
use crate::models::{ControlAction, ControlOutcome, MeterState};
use crate::pipeline::inbox::UpdateInbox;
use crate::pipeline::measurement::SharedMeasurement;

/// Executes control actions one at a time
///
/// A second action waits for the first to finish, so a `start` racing a
/// `shutdown` can never interleave their transitions. `shutdown` and
/// `restart` stop the meter before queueing, so they never wait out a
/// pending readiness timeout.
pub struct ControlHandler {
    supervisor: Arc<Supervisor>,
    client: MeterClient,
    measurement: SharedMeasurement,
    inbox: UpdateInbox,
    profile: MeterProfile,
    /// Where the meter should push level updates, if anywhere
    callback_url: Option<String>,
    ready_timeout: Duration,
    lock: Mutex<()>,
}

impl ControlHandler {
    pub fn new(
        supervisor: Arc<Supervisor>,
        client: MeterClient,
        measurement: SharedMeasurement,
        inbox: UpdateInbox,
        profile: MeterProfile,
        callback_url: Option<String>,
    ) -> Self {
        let ready_timeout = supervisor.settings().ready_timeout;
        Self {
            supervisor,
            client,
            measurement,
            inbox,
            profile,
            callback_url,
            ready_timeout,
            lock: Mutex::new(()),
        }
    }

    /// Run `action` to completion
    ///
    /// # Returns
    /// Outcome with the resulting state; failures are reported, never raised
    pub async fn execute(&self, action: ControlAction) -> ControlOutcome {
        if matches!(action, ControlAction::Shutdown | ControlAction::Restart) {
            // Termination preempts a start still waiting for readiness
            self.supervisor.terminate(true).await;
        }
        let _guard = self.lock.lock().await;
        info!("Control action: {}", action);

        let result = match action {
            ControlAction::Start => self.start().await,
            ControlAction::Stop => self.stop().await,
            ControlAction::Restart => self.restart().await,
            ControlAction::Shutdown => self.shutdown().await,
        };

        let state = self.supervisor.state();
        match result {
            Ok(()) => ControlOutcome::ok(state),
            Err(e) => {
                error!("Control action {} failed: {}", action, e);
                ControlOutcome::failed(state, e.to_string())
            }
        }
    }

    async fn start(&self) -> Result<()> {
        match self.supervisor.state() {
            MeterState::Stopped | MeterState::Error => self.bring_up().await,
            MeterState::Running | MeterState::Unreachable => self.begin_measurement().await,
            busy => Err(BridgeError::InvalidState(format!(
                "meter is {}, try again shortly",
                busy
            ))),
        }
    }

    async fn stop(&self) -> Result<()> {
        match self.supervisor.state() {
            MeterState::Running | MeterState::Unreachable => {
                self.client.send_command(MeterCommand::StopMeasurement).await?;
                self.measurement.lock().set_active(false);
                Ok(())
            }
            other => Err(BridgeError::InvalidState(format!(
                "meter is {}, nothing to stop",
                other
            ))),
        }
    }

    async fn restart(&self) -> Result<()> {
        self.terminate_if_needed().await;
        self.measurement.lock().reset();
        self.bring_up().await
    }

    async fn shutdown(&self) -> Result<()> {
        self.terminate_if_needed().await;
        self.measurement.lock().set_active(false);
        Ok(())
    }

    /// A start queued behind the lock may have relaunched the meter
    async fn terminate_if_needed(&self) {
        if self.supervisor.state() != MeterState::Stopped {
            self.supervisor.terminate(true).await;
        }
    }

    /// Launch the meter and start a measurement on it
    async fn bring_up(&self) -> Result<()> {
        if self.supervisor.state() == MeterState::Error {
            // A failed launch may have left a process behind
            self.supervisor.terminate(false).await;
        }

        self.supervisor.launch().await?;
        self.inbox.forget_subscription();
        self.supervisor.await_ready(self.ready_timeout).await?;

        if let Err(e) = self.client.configure_meter(&self.profile).await {
            warn!("Meter configuration failed, using its current settings: {}", e);
        }
        self.subscribe().await;
        self.begin_measurement().await
    }

    async fn subscribe(&self) {
        let Some(url) = &self.callback_url else {
            return;
        };
        self.inbox.mark_subscribed(self.inbox.clock().now());
        if let Err(e) = self.client.subscribe_updates(url).await {
            warn!("Meter subscription failed, relying on polling: {}", e);
        }
    }

    async fn begin_measurement(&self) -> Result<()> {
        if self.measurement.lock().is_active() {
            info!("Measurement already active");
            return Ok(());
        }
        self.client.send_command(MeterCommand::StartMeasurement).await?;
        self.measurement.lock().set_active(true);
        Ok(())
    }
}
