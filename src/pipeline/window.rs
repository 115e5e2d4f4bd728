/// Time-bounded rolling window with energy-domain averaging
use std::collections::VecDeque;

use crate::models::Reading;
use crate::utils::energy_average;

/// Result of `RollingWindow::compute`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    /// Leq over the retained readings, only when the window is fully covered
    pub value: Option<f64>,
    pub is_valid: bool,
    pub sample_count: usize,
    pub covered_seconds: f64,
}

/// Readings from the trailing `window_seconds`
///
/// Readings arrive in time order, so eviction only ever pops from the front.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    window_seconds: f64,
    readings: VecDeque<Reading>,
    /// Timestamp of the first reading of the current uninterrupted run
    coverage_start: Option<f64>,
}

impl RollingWindow {
    pub fn new(window_seconds: f64) -> Self {
        Self {
            window_seconds,
            readings: VecDeque::new(),
            coverage_start: None,
        }
    }

    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }

    /// Append a reading and drop everything older than the window
    pub fn add(&mut self, reading: Reading) {
        let had_history = !self.readings.is_empty();
        self.readings.push_back(reading);

        let cutoff = reading.timestamp - self.window_seconds;
        while let Some(oldest) = self.readings.front() {
            if oldest.timestamp >= cutoff {
                break;
            }
            self.readings.pop_front();
        }

        // A gap longer than the window leaves only the new reading behind
        if !had_history || self.readings.len() == 1 {
            self.coverage_start = Some(reading.timestamp);
        }
    }

    /// Leq and coverage of the retained readings
    pub fn compute(&self) -> WindowStats {
        let sample_count = self.readings.len();
        let covered_seconds = match (self.coverage_start, self.readings.back()) {
            (Some(start), Some(newest)) => (newest.timestamp - start).min(self.window_seconds),
            _ => 0.0,
        };

        let is_valid = sample_count > 0 && covered_seconds >= self.window_seconds;
        let value = if is_valid {
            energy_average(self.readings.iter().map(|r| r.value))
        } else {
            None
        };

        WindowStats {
            value,
            is_valid: value.is_some(),
            sample_count,
            covered_seconds,
        }
    }

    pub fn reset(&mut self) {
        self.readings.clear();
        self.coverage_start = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(timestamp: f64, value: f64) -> Reading {
        Reading { timestamp, value }
    }

    fn fill(window: &mut RollingWindow, from: f64, to: f64, step: f64, value: f64) {
        let mut t = from;
        while t <= to + 1e-9 {
            window.add(reading(t, value));
            t += step;
        }
    }

    #[test]
    fn test_empty_window_is_invalid() {
        let stats = RollingWindow::new(10.0).compute();
        assert_eq!(stats.value, None);
        assert!(!stats.is_valid);
        assert_eq!(stats.sample_count, 0);
        assert_eq!(stats.covered_seconds, 0.0);
    }

    #[test]
    fn test_invalid_until_window_covered() {
        let mut window = RollingWindow::new(10.0);
        fill(&mut window, 0.0, 9.5, 0.5, 60.0);
        let stats = window.compute();
        assert!(!stats.is_valid);
        assert_eq!(stats.value, None);
        assert_eq!(stats.sample_count, 20);

        window.add(reading(10.0, 60.0));
        let stats = window.compute();
        assert!(stats.is_valid);
        assert!((stats.value.unwrap() - 60.0).abs() < 1e-9);
        assert_eq!(stats.covered_seconds, 10.0);

        // Stays valid as the window slides
        fill(&mut window, 10.5, 30.0, 0.5, 60.0);
        assert!(window.compute().is_valid);
    }

    #[test]
    fn test_old_readings_never_contribute() {
        let mut window = RollingWindow::new(10.0);
        fill(&mut window, 0.0, 5.0, 0.5, 100.0);
        fill(&mut window, 5.5, 30.0, 0.5, 60.0);

        let stats = window.compute();
        assert!(stats.is_valid);
        assert!((stats.value.unwrap() - 60.0).abs() < 1e-9);
        // 20.0 ..= 30.0 at 0.5 s spacing
        assert_eq!(stats.sample_count, 21);
    }

    #[test]
    fn test_average_matches_energy_mean_of_retained() {
        let mut window = RollingWindow::new(4.0);
        let values = [50.0, 80.0, 60.0, 70.0, 65.0, 72.0, 58.0];
        for (i, v) in values.iter().enumerate() {
            window.add(reading(i as f64, *v));
        }
        // Retained timestamps 2..=6
        let expected = energy_average(values[2..].iter().copied()).unwrap();
        let stats = window.compute();
        assert_eq!(stats.sample_count, 5);
        assert!((stats.value.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_retained_readings_stay_inside_window() {
        let mut window = RollingWindow::new(3.0);
        fill(&mut window, 0.0, 20.0, 0.25, 70.0);
        let newest = 20.0;
        assert!(window
            .readings
            .iter()
            .all(|r| r.timestamp >= newest - 3.0 && r.timestamp <= newest));
    }

    #[test]
    fn test_reset_clears_history() {
        let mut window = RollingWindow::new(5.0);
        fill(&mut window, 0.0, 10.0, 1.0, 70.0);
        assert!(window.compute().is_valid);

        window.reset();
        let stats = window.compute();
        assert!(!stats.is_valid);
        assert_eq!(stats.sample_count, 0);

        // Coverage restarts from the first post-reset reading
        window.add(reading(11.0, 70.0));
        window.add(reading(12.0, 70.0));
        assert!(!window.compute().is_valid);
    }

    #[test]
    fn test_gap_longer_than_window_restarts_coverage() {
        let mut window = RollingWindow::new(5.0);
        fill(&mut window, 0.0, 10.0, 1.0, 70.0);
        assert!(window.compute().is_valid);

        window.add(reading(100.0, 70.0));
        let stats = window.compute();
        assert_eq!(stats.sample_count, 1);
        assert!(!stats.is_valid);
    }
}
