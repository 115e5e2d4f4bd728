/// Process-wide meter state cell
use log::info;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::MeterState;

/// The single authority on `MeterState`
///
/// Cloning shares the same cell. The guard is never held across an await, so
/// a std mutex is enough.
#[derive(Debug, Clone, Default)]
pub struct MeterStateCell {
    inner: Arc<Mutex<MeterState>>,
}

impl MeterStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MeterState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> MeterState {
        *self.lock()
    }

    /// Unconditionally move to `next`, returning the previous state
    pub fn set(&self, next: MeterState) -> MeterState {
        let mut state = self.lock();
        let previous = *state;
        if previous != next {
            info!("Meter state {} -> {}", previous, next);
        }
        *state = next;
        previous
    }

    /// Move to `next` only if the current state is one of `from`
    ///
    /// Check and update happen under one lock, so a poller transition can not
    /// overwrite a control transition that happened in between.
    pub fn transition(&self, from: &[MeterState], next: MeterState) -> bool {
        let mut state = self.lock();
        if !from.contains(&*state) {
            return false;
        }
        if *state != next {
            info!("Meter state {} -> {}", *state, next);
        }
        *state = next;
        true
    }
}
