use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single instant level taken from the meter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Monotonic seconds since the bridge started
    pub timestamp: f64,
    /// Sound level in dB
    pub value: f64,
}

/// Level report as produced by the meter, both on `GET .../levels` and on
/// subscription pushes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeterLevels {
    pub meter_number: u32,
    pub weighting: String,
    pub filter: String,
    pub spl: f64,
    pub leq: f64,
    pub is_rolling_leq: bool,
    pub rolling_leq_minutes: u32,
    #[serde(rename = "leq1m")]
    pub leq_1m: f64,
    #[serde(rename = "leq10m")]
    pub leq_10m: f64,
    pub sel: f64,
    pub elapsed_time: f64,
}

impl Default for MeterLevels {
    fn default() -> Self {
        Self {
            meter_number: 1,
            weighting: "A".to_string(),
            filter: "Slow".to_string(),
            spl: 0.0,
            leq: 0.0,
            is_rolling_leq: false,
            rolling_leq_minutes: 0,
            leq_1m: 0.0,
            leq_10m: 0.0,
            sel: 0.0,
            elapsed_time: 0.0,
        }
    }
}

/// Lifecycle of the meter process as seen by the bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeterState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Unreachable,
    Error,
}

impl fmt::Display for MeterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeterState::Stopped => "STOPPED",
            MeterState::Starting => "STARTING",
            MeterState::Running => "RUNNING",
            MeterState::Stopping => "STOPPING",
            MeterState::Unreachable => "UNREACHABLE",
            MeterState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Point-in-time view served on `/api/spl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub spl_instant: Option<f64>,
    pub leq_short: Option<f64>,
    pub leq_long: Option<f64>,
    pub leq_1min: Option<f64>,
    pub leq_10min: Option<f64>,
    pub elapsed_time: f64,
    pub valid_short_window: bool,
    pub meter_running: bool,
    pub meter_state: MeterState,
    pub measurement_active: bool,
    pub buffer_sample_count: usize,
    pub buffer_seconds: f64,
    pub last_update: f64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            spl_instant: None,
            leq_short: None,
            leq_long: None,
            leq_1min: None,
            leq_10min: None,
            elapsed_time: 0.0,
            valid_short_window: false,
            meter_running: false,
            meter_state: MeterState::Stopped,
            measurement_active: false,
            buffer_sample_count: 0,
            buffer_seconds: 0.0,
            last_update: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    Shutdown,
}

impl FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "shutdown" => Ok(Self::Shutdown),
            _ => Err(format!("Unknown action: {}", s)),
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
            ControlAction::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Result of a control command, returned to the controller as-is
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlOutcome {
    pub success: bool,
    pub state: MeterState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ControlOutcome {
    pub fn ok(state: MeterState) -> Self {
        Self {
            success: true,
            state,
            message: None,
        }
    }

    pub fn failed<S: Into<String>>(state: MeterState, message: S) -> Self {
        Self {
            success: false,
            state,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub rew_running: bool,
    pub last_update: f64,
    pub seconds_since_update: Option<f64>,
}
