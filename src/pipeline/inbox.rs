/// Level reports pushed by the meter's subscription, waiting for the poller
use log::warn;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::MeterLevels;
use crate::utils::Clock;

/// Upper bound on queued pushes if the poller falls behind
const MAX_PENDING: usize = 1024;

#[derive(Debug, Default)]
struct InboxInner {
    pending: VecDeque<(f64, MeterLevels)>,
    last_push: Option<f64>,
    last_subscribe: Option<f64>,
}

/// Pushed readings plus subscription bookkeeping
///
/// Pushes are stamped on arrival with the shared clock and handed to the
/// poller, which stays the only writer of the rolling windows.
#[derive(Debug, Clone)]
pub struct UpdateInbox {
    clock: Clock,
    inner: Arc<Mutex<InboxInner>>,
}

impl UpdateInbox {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            inner: Arc::new(Mutex::new(InboxInner::default())),
        }
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    fn lock(&self) -> MutexGuard<'_, InboxInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, levels: MeterLevels) {
        let now = self.clock.now();
        let mut inner = self.lock();
        if inner.pending.len() >= MAX_PENDING {
            warn!("Update inbox full, dropping oldest pushed reading");
            inner.pending.pop_front();
        }
        inner.pending.push_back((now, levels));
        inner.last_push = Some(now);
    }

    /// Take every pending push, oldest first
    pub fn drain(&self) -> Vec<(f64, MeterLevels)> {
        self.lock().pending.drain(..).collect()
    }

    /// Whether the subscription should be (re)established at `now`
    ///
    /// Due when no push arrived for `refresh_secs` and the last attempt is at
    /// least that old.
    pub fn subscription_due(&self, now: f64, refresh_secs: f64) -> bool {
        let inner = self.lock();
        let silent = inner.last_push.map_or(true, |t| now - t >= refresh_secs);
        let attempt_due = inner.last_subscribe.map_or(true, |t| now - t >= refresh_secs);
        silent && attempt_due
    }

    pub fn mark_subscribed(&self, now: f64) {
        self.lock().last_subscribe = Some(now);
    }

    /// Drop pending pushes and subscription history after a relaunch
    pub fn forget_subscription(&self) {
        let mut inner = self.lock();
        inner.pending.clear();
        inner.last_push = None;
        inner.last_subscribe = None;
    }
}
