/// Live measurement data shared by the poller and the control handler
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{MeterLevels, MeterState, Reading, Snapshot};
use crate::pipeline::window::RollingWindow;
use crate::utils::round_to;

/// Both averaging windows plus the meter's latest native values
///
/// The poller adds, the control handler resets; both go through the same
/// mutex. `generation` changes on every reset so a poll cycle that started
/// before a reset can tell its data is stale.
#[derive(Debug)]
pub struct LiveMeasurement {
    short: RollingWindow,
    long: RollingWindow,
    latest: Option<MeterLevels>,
    last_update: f64,
    active: bool,
    generation: u64,
}

impl LiveMeasurement {
    pub fn new(short_window_secs: f64, long_window_secs: f64) -> Self {
        Self {
            short: RollingWindow::new(short_window_secs),
            long: RollingWindow::new(long_window_secs),
            latest: None,
            last_update: 0.0,
            active: false,
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Feed one level report taken at monotonic `timestamp`
    pub fn record(&mut self, timestamp: f64, levels: MeterLevels, wall_clock: f64) {
        let reading = Reading {
            timestamp,
            value: levels.spl,
        };
        self.short.add(reading);
        self.long.add(reading);
        self.latest = Some(levels);
        self.last_update = wall_clock;
        self.active = true;
    }

    /// Forget every reading and native value
    pub fn reset(&mut self) {
        self.short.reset();
        self.long.reset();
        self.latest = None;
        self.last_update = 0.0;
        self.active = false;
        self.generation += 1;
    }

    /// The meter's own rolling Leq, if it covers the long window
    fn native_long_leq(&self) -> Option<f64> {
        let levels = self.latest.as_ref()?;
        let native_secs = levels.rolling_leq_minutes as f64 * 60.0;
        let matches = levels.is_rolling_leq
            && (native_secs - self.long.window_seconds()).abs() < 1.0;
        matches.then_some(round_to(levels.leq, 1))
    }

    /// Build the externally visible view for the given meter state
    pub fn snapshot(&self, state: MeterState) -> Snapshot {
        let short = self.short.compute();
        let leq_long = self
            .native_long_leq()
            .or_else(|| self.long.compute().value.map(|v| round_to(v, 1)));
        let latest = self.latest.as_ref();

        Snapshot {
            spl_instant: latest.map(|l| l.spl),
            leq_short: short.value.map(|v| round_to(v, 1)),
            leq_long,
            leq_1min: latest.map(|l| l.leq_1m),
            leq_10min: latest.map(|l| l.leq_10m),
            elapsed_time: latest.map(|l| l.elapsed_time).unwrap_or(0.0),
            valid_short_window: short.is_valid,
            meter_running: state == MeterState::Running,
            meter_state: state,
            measurement_active: self.active,
            buffer_sample_count: short.sample_count,
            buffer_seconds: short.covered_seconds,
            last_update: self.last_update,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SharedMeasurement {
    inner: Arc<Mutex<LiveMeasurement>>,
}

impl SharedMeasurement {
    pub fn new(measurement: LiveMeasurement) -> Self {
        Self {
            inner: Arc::new(Mutex::new(measurement)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, LiveMeasurement> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
