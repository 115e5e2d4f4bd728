use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Port the meter's API listens on unless told otherwise
pub const DEFAULT_API_PORT: u16 = 4735;

/// How the meter process is located, launched and stopped
#[derive(Debug, Clone)]
pub struct MeterSettings {
    pub executable: Option<PathBuf>,
    pub show_gui: bool,
    /// Replaces the built-in headless flags entirely when set
    pub args_override: Option<Vec<String>>,
    pub api_port: u16,
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub shutdown_grace: Duration,
}

/// Where the meter's API lives and how the SPL meter is configured
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
    pub meter_number: u32,
    pub request_timeout: Duration,
    pub weighting: String,
    pub filter: String,
}

/// Poller cadence and derived averaging windows
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub poll_interval: Duration,
    pub short_window_secs: f64,
    pub long_window_secs: f64,
    pub failure_threshold: u32,
    pub subscribe_updates: bool,
    pub callback_url: String,
    pub subscription_refresh: Duration,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bind_host: String,
    pub bridge_port: u16,
    pub auto_start: bool,
    pub health_stale_secs: f64,
    pub log_level: String,
    pub meter: MeterSettings,
    pub api: ApiSettings,
    pub pipeline: PipelineSettings,
}

impl BridgeConfig {
    /// Load configuration from the process environment
    ///
    /// A `.env` file in the working directory is honoured; values already
    /// present in the environment win.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// # Arguments
    /// * `lookup` - Returns the raw value for a variable name, if set
    ///
    /// # Returns
    /// The validated configuration, or a `Config` error naming the bad variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bridge_port: u16 = parse_or(&get, "BRIDGE_PORT", 8080)?;
        let api_port: u16 = parse_or(&get, "REW_API_PORT", DEFAULT_API_PORT)?;
        let long_window_secs: f64 = parse_or(&get, "LONG_WINDOW_SECS", 900.0)?;

        let meter = MeterSettings {
            executable: get("REW_PATH").map(PathBuf::from),
            show_gui: parse_bool_or(&get, "REW_GUI", false)?,
            args_override: get("REW_ARGS")
                .map(|v| v.split_whitespace().map(str::to_string).collect()),
            api_port,
            ready_timeout: Duration::from_secs(parse_or(&get, "READY_TIMEOUT_SECS", 30)?),
            ready_poll_interval: Duration::from_millis(parse_or(&get, "READY_POLL_MS", 1000)?),
            shutdown_grace: Duration::from_secs(parse_or(&get, "SHUTDOWN_GRACE_SECS", 5)?),
        };

        let api = ApiSettings {
            host: get("REW_API_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: api_port,
            meter_number: parse_or(&get, "METER_NUMBER", 1)?,
            request_timeout: Duration::from_millis(parse_or(&get, "REQUEST_TIMEOUT_MS", 2000)?),
            weighting: get("METER_WEIGHTING").unwrap_or_else(|| "A".to_string()),
            filter: get("METER_FILTER").unwrap_or_else(|| "Slow".to_string()),
        };

        let pipeline = PipelineSettings {
            poll_interval: Duration::from_millis(parse_or(&get, "POLL_INTERVAL_MS", 500)?),
            short_window_secs: parse_or(&get, "SHORT_WINDOW_SECS", 120.0)?,
            long_window_secs,
            failure_threshold: parse_or(&get, "FAILURE_THRESHOLD", 3)?,
            subscribe_updates: parse_bool_or(&get, "SUBSCRIBE_UPDATES", true)?,
            callback_url: get("CALLBACK_URL")
                .unwrap_or_else(|| format!("http://localhost:{}/rew-callback", bridge_port)),
            subscription_refresh: Duration::from_secs(parse_or(
                &get,
                "SUBSCRIPTION_REFRESH_SECS",
                60,
            )?),
        };

        let config = BridgeConfig {
            bind_host: get("BRIDGE_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            bridge_port,
            auto_start: parse_bool_or(&get, "AUTO_START", true)?,
            health_stale_secs: parse_or(&get, "HEALTH_STALE_SECS", 5.0)?,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            meter,
            api,
            pipeline,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.short_window_secs.is_nan() || p.short_window_secs <= 0.0 {
            return Err(BridgeError::config("SHORT_WINDOW_SECS must be positive"));
        }
        if !p.short_window_secs.is_finite() || !p.long_window_secs.is_finite() {
            return Err(BridgeError::config(
                "SHORT_WINDOW_SECS and LONG_WINDOW_SECS must be finite",
            ));
        }
        if p.long_window_secs < p.short_window_secs {
            return Err(BridgeError::config(
                "LONG_WINDOW_SECS must not be shorter than SHORT_WINDOW_SECS",
            ));
        }
        if p.failure_threshold == 0 {
            return Err(BridgeError::config("FAILURE_THRESHOLD must be at least 1"));
        }
        if p.poll_interval.is_zero() {
            return Err(BridgeError::config("POLL_INTERVAL_MS must be positive"));
        }
        if self.meter.ready_poll_interval.is_zero() {
            return Err(BridgeError::config("READY_POLL_MS must be positive"));
        }
        if self.api.request_timeout.is_zero() {
            return Err(BridgeError::config("REQUEST_TIMEOUT_MS must be positive"));
        }
        Ok(())
    }

    /// Minutes of rolling Leq the meter is asked to compute natively
    pub fn rolling_leq_minutes(&self) -> u32 {
        (self.pipeline.long_window_secs / 60.0).round().max(1.0) as u32
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| BridgeError::config(format!("invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_bool_or<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_lowercase()) {
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(BridgeError::config(format!("invalid {} '{}'", key, v))),
        },
        None => Ok(default),
    }
}
