/// Meter process supervision: launch, readiness, liveness and termination
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};

use crate::config::{MeterSettings, DEFAULT_API_PORT};
use crate::error::{BridgeError, Result};
use crate::meter::client::{MeterClient, MeterCommand};
use crate::meter::state::MeterStateCell;
use crate::models::MeterState;

/// Fully resolved command line for starting the meter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// The launcher hands off to another process and exits (macOS `open`),
    /// so the child handle says nothing about the meter's liveness
    pub detached: bool,
}

#[cfg(target_os = "windows")]
const DEFAULT_INSTALL_PATHS: &[&str] = &[
    r"C:\Program Files\REW\roomeqwizard.exe",
    r"C:\Program Files (x86)\REW\roomeqwizard.exe",
];

#[cfg(not(target_os = "windows"))]
const DEFAULT_INSTALL_PATHS: &[&str] = &[];

#[cfg(target_os = "macos")]
const MACOS_APP_BUNDLE: &str = "/Applications/REW.app";

/// Flags that select headless API mode on the meter
fn meter_flags(settings: &MeterSettings) -> Vec<String> {
    if let Some(args) = &settings.args_override {
        return args.clone();
    }
    let mut flags = vec!["-api".to_string()];
    if !settings.show_gui {
        flags.push("-nogui".to_string());
    }
    if settings.api_port != DEFAULT_API_PORT {
        flags.push("-port".to_string());
        flags.push(settings.api_port.to_string());
    }
    flags
}

/// Work out which program to run for the meter
///
/// Order: the configured path, the configured name looked up on PATH, then
/// the platform's default install locations.
///
/// # Returns
/// `Launch` error when nothing usable is found
pub fn resolve_launch(settings: &MeterSettings) -> Result<LaunchCommand> {
    let flags = meter_flags(settings);

    if let Some(configured) = &settings.executable {
        if configured.exists() {
            return Ok(LaunchCommand {
                program: configured.clone(),
                args: flags,
                detached: false,
            });
        }
        if let Ok(found) = which::which(configured) {
            return Ok(LaunchCommand {
                program: found,
                args: flags,
                detached: false,
            });
        }
        warn!(
            "Configured meter path does not exist: {}",
            configured.display()
        );
    }

    if let Some(path) = DEFAULT_INSTALL_PATHS
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
    {
        return Ok(LaunchCommand {
            program: path.to_path_buf(),
            args: flags,
            detached: false,
        });
    }

    #[cfg(target_os = "macos")]
    if Path::new(MACOS_APP_BUNDLE).exists() {
        let mut args = vec!["-a".to_string(), "REW.app".to_string(), "--args".to_string()];
        args.extend(flags);
        return Ok(LaunchCommand {
            program: PathBuf::from("open"),
            args,
            detached: true,
        });
    }

    Err(BridgeError::launch("meter executable not found"))
}

enum MeterProcess {
    Tracked(Child),
    Detached,
}

/// Owns the meter subprocess and every transition of `MeterState`
pub struct Supervisor {
    settings: MeterSettings,
    client: MeterClient,
    state: MeterStateCell,
    process: Mutex<Option<MeterProcess>>,
}

impl Supervisor {
    pub fn new(settings: MeterSettings, client: MeterClient, state: MeterStateCell) -> Self {
        Self {
            settings,
            client,
            state,
            process: Mutex::new(None),
        }
    }

    pub fn state(&self) -> MeterState {
        self.state.get()
    }

    pub fn settings(&self) -> &MeterSettings {
        &self.settings
    }

    /// Start the meter process
    ///
    /// Moves `STOPPED|ERROR -> STARTING`. Any failure to resolve or spawn the
    /// executable leaves the state at `ERROR`.
    pub async fn launch(&self) -> Result<()> {
        let mut slot = self.process.lock().await;

        if !self
            .state
            .transition(&[MeterState::Stopped, MeterState::Error], MeterState::Starting)
        {
            return Err(BridgeError::launch(format!(
                "meter is {}, not stopped",
                self.state.get()
            )));
        }

        let spawned = resolve_launch(&self.settings).and_then(|command| {
            info!(
                "Launching meter: {} {}",
                command.program.display(),
                command.args.join(" ")
            );
            let child = Command::new(&command.program)
                .args(&command.args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    BridgeError::launch(format!("{}: {}", command.program.display(), e))
                })?;
            Ok(if command.detached {
                MeterProcess::Detached
            } else {
                MeterProcess::Tracked(child)
            })
        });

        match spawned {
            Ok(process) => {
                *slot = Some(process);
                Ok(())
            }
            Err(e) => {
                error!("{}", e);
                self.state.set(MeterState::Error);
                Err(e)
            }
        }
    }

    /// Wait until the meter's API answers a health probe
    ///
    /// On timeout the state becomes `ERROR` but the process is left running;
    /// a slow JVM start should not be killed by an impatient caller.
    pub async fn await_ready(&self, budget: Duration) -> Result<()> {
        let deadline = Instant::now() + budget;

        loop {
            let probe = self.client.probe().await;

            // A concurrent terminate owns the state from here on
            if self.state.get() != MeterState::Starting {
                return Err(BridgeError::launch(format!(
                    "meter left STARTING while waiting (now {})",
                    self.state.get()
                )));
            }

            match probe {
                Ok(()) => {
                    if self
                        .state
                        .transition(&[MeterState::Starting], MeterState::Running)
                    {
                        info!("Meter API is ready");
                        return Ok(());
                    }
                    continue;
                }
                Err(e) => debug!("Meter API not ready yet: {}", e),
            }

            if !self.is_alive().await {
                self.state
                    .transition(&[MeterState::Starting], MeterState::Error);
                return Err(BridgeError::MeterExited(
                    "process ended before its API became ready".to_string(),
                ));
            }

            if Instant::now() >= deadline {
                error!("Meter API did not become available within {:?}", budget);
                self.state
                    .transition(&[MeterState::Starting], MeterState::Error);
                return Err(BridgeError::ReadyTimeout(budget));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(self.settings.ready_poll_interval.min(remaining)).await;
        }
    }

    /// Stop the meter, best effort
    ///
    /// Graceful termination asks the API to shut down first and only kills
    /// the process if it outlives the grace period. Never fails; the state
    /// always ends at `STOPPED`.
    pub async fn terminate(&self, graceful: bool) {
        let mut slot = self.process.lock().await;
        self.state.set(MeterState::Stopping);

        if graceful {
            match self.client.send_command(MeterCommand::ShutdownApplication).await {
                Ok(()) => info!("Meter shutdown command sent"),
                Err(e) => debug!("Meter shutdown command failed: {}", e),
            }
        }

        if let Some(MeterProcess::Tracked(mut child)) = slot.take() {
            let exited = if graceful {
                timeout(self.settings.shutdown_grace, child.wait()).await.is_ok()
            } else {
                false
            };

            if !exited {
                if let Err(e) = child.kill().await {
                    debug!("Meter process kill: {}", e);
                }
            }
        }

        self.state.set(MeterState::Stopped);
    }

    /// Process-level liveness, independent of API reachability
    ///
    /// Returns true while a launch or termination holds the process slot, and
    /// for detached launches whose liveness can only be judged via the API.
    pub async fn is_alive(&self) -> bool {
        let mut slot = match self.process.try_lock() {
            Ok(slot) => slot,
            Err(_) => return true,
        };

        match slot.as_mut() {
            Some(MeterProcess::Tracked(child)) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    warn!("Meter process exited with {}", status);
                    false
                }
                Err(e) => {
                    warn!("Could not query meter process: {}", e);
                    false
                }
            },
            Some(MeterProcess::Detached) => true,
            None => false,
        }
    }

    /// API stopped answering while the process still runs
    pub fn mark_unreachable(&self) -> bool {
        self.state
            .transition(&[MeterState::Running], MeterState::Unreachable)
    }

    pub fn mark_reachable(&self) -> bool {
        self.state
            .transition(&[MeterState::Unreachable], MeterState::Running)
    }

    /// The process died underneath a running meter
    pub fn mark_exited(&self) -> bool {
        self.state.transition(
            &[MeterState::Running, MeterState::Unreachable],
            MeterState::Error,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::fake::{sleep_settings, unused_port, FakeMeter};

    fn settings(executable: Option<&str>) -> MeterSettings {
        MeterSettings {
            executable: executable.map(PathBuf::from),
            show_gui: false,
            args_override: None,
            api_port: DEFAULT_API_PORT,
            ready_timeout: Duration::from_secs(2),
            ready_poll_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_headless_flags() {
        let mut s = settings(None);
        assert_eq!(meter_flags(&s), vec!["-api", "-nogui"]);

        s.show_gui = true;
        s.api_port = 4800;
        assert_eq!(meter_flags(&s), vec!["-api", "-port", "4800"]);

        s.args_override = Some(vec!["--headless".to_string()]);
        assert_eq!(meter_flags(&s), vec!["--headless"]);
    }

    #[test]
    fn test_missing_executable_is_launch_error() {
        let s = settings(Some("/definitely/not/here/roomeqwizard"));
        if DEFAULT_INSTALL_PATHS.iter().any(|p| Path::new(p).exists()) {
            return;
        }
        assert!(matches!(resolve_launch(&s), Err(BridgeError::Launch(_))));
    }

    #[tokio::test]
    async fn test_launch_failure_sets_error() {
        let meter = FakeMeter::start().await;
        let state = MeterStateCell::new();
        let supervisor = Supervisor::new(
            settings(Some("/definitely/not/here/roomeqwizard")),
            meter.client(),
            state.clone(),
        );
        if DEFAULT_INSTALL_PATHS.iter().any(|p| Path::new(p).exists()) {
            return;
        }
        assert!(supervisor.launch().await.is_err());
        assert_eq!(state.get(), MeterState::Error);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_ready_terminate() {
        let meter = FakeMeter::start().await;
        let state = MeterStateCell::new();
        let supervisor = meter.supervisor(state.clone());
        supervisor.launch().await.unwrap();
        assert_eq!(state.get(), MeterState::Starting);
        assert!(supervisor.is_alive().await);

        supervisor.await_ready(Duration::from_secs(2)).await.unwrap();
        assert_eq!(state.get(), MeterState::Running);

        supervisor.terminate(true).await;
        assert_eq!(state.get(), MeterState::Stopped);
        assert_eq!(meter.shutdowns(), 1);
        assert!(!supervisor.is_alive().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ready_timeout_leaves_process_running() {
        let meter = FakeMeter::start().await;
        meter.stall(true);
        let state = MeterStateCell::new();
        let supervisor = meter.supervisor(state.clone());

        supervisor.launch().await.unwrap();
        let err = supervisor
            .await_ready(Duration::from_millis(400))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ReadyTimeout(_)));
        assert_eq!(state.get(), MeterState::Error);
        assert!(supervisor.is_alive().await);

        supervisor.terminate(false).await;
        assert_eq!(state.get(), MeterState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_never_running_without_successful_probe() {
        let settings = crate::config::ApiSettings {
            host: "127.0.0.1".to_string(),
            port: unused_port(),
            meter_number: 1,
            request_timeout: Duration::from_millis(100),
            weighting: "A".to_string(),
            filter: "Slow".to_string(),
        };
        let client = MeterClient::new(&settings).unwrap();
        let state = MeterStateCell::new();
        let supervisor = Supervisor::new(sleep_settings(), client, state.clone());

        supervisor.launch().await.unwrap();
        assert!(supervisor.await_ready(Duration::from_millis(300)).await.is_err());
        assert_ne!(state.get(), MeterState::Running);
        supervisor.terminate(false).await;
    }

    #[tokio::test]
    async fn test_terminate_without_process_is_harmless() {
        let meter = FakeMeter::start().await;
        let state = MeterStateCell::new();
        let supervisor = Supervisor::new(settings(None), meter.client(), state.clone());
        supervisor.terminate(true).await;
        supervisor.terminate(false).await;
        assert_eq!(state.get(), MeterState::Stopped);
    }

    #[test]
    fn test_unreachable_transitions() {
        let state = MeterStateCell::new();
        let settings = crate::config::ApiSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            meter_number: 1,
            request_timeout: Duration::from_millis(100),
            weighting: "A".to_string(),
            filter: "Slow".to_string(),
        };
        let supervisor = Supervisor::new(
            sleep_settings(),
            MeterClient::new(&settings).unwrap(),
            state.clone(),
        );

        assert!(!supervisor.mark_unreachable());
        state.set(MeterState::Running);
        assert!(supervisor.mark_unreachable());
        assert_eq!(state.get(), MeterState::Unreachable);
        assert!(supervisor.mark_reachable());
        assert_eq!(state.get(), MeterState::Running);
        assert!(supervisor.mark_exited());
        assert_eq!(state.get(), MeterState::Error);
    }
}
