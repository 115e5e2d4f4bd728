/// Utility functions for level math and time keeping
use std::time::Instant;
use time::macros::format_description;
use time::OffsetDateTime;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    dt.format(format_description!(
        "[day].[month].[year] - [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| dt.to_string())
}

/// Current wall-clock time as fractional Unix seconds
pub fn unix_seconds() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}

/// Monotonic clock shared by everything that stamps readings
///
/// Readings from the poller and from subscription pushes must share one
/// origin, otherwise window eviction would compare unrelated timelines.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds since the clock was started
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Convert a decibel level to linear power
pub fn db_to_power(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert linear power back to decibels
pub fn power_to_db(power: f64) -> f64 {
    10.0 * power.log10()
}

/// Energy-domain average (Leq) of a set of decibel levels
///
/// Each level is converted to linear power, the powers are averaged and the
/// mean is converted back to decibels.
///
/// # Arguments
/// * `levels` - Iterator of levels in dB
///
/// # Returns
/// None for an empty input or a non-finite result
pub fn energy_average<I>(levels: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = levels
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), db| (sum + db_to_power(db), count + 1));

    if count == 0 {
        return None;
    }

    let leq = power_to_db(sum / count as f64);
    leq.is_finite().then_some(leq)
}

/// Round to a fixed number of decimal places for display
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
