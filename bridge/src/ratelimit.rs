//! Sliding-window rate limiter

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use host_api::models::RateLimitStatus;

/// Rate limiter options
#[derive(Debug, Clone)]
pub struct Options {
    /// Length of the trailing window
    pub window: Duration,

    /// Maximum calls admitted within one window
    pub limit: usize,

    /// Saturation period after the cloud answered 429
    pub cooldown: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            limit: 8,
            cooldown: Duration::from_secs(10),
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call was recorded and may proceed
    Immediate,
    /// Nothing was recorded; check again after this long
    Wait(Duration),
}

#[derive(Debug, Default)]
struct RateWindow {
    calls: VecDeque<Instant>,
    saturated_until: Option<Instant>,
    admitted: u64,
    deferred: u64,
    rate_limited: u64,
}

impl RateWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.calls.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
        if matches!(self.saturated_until, Some(until) if until <= now) {
            self.saturated_until = None;
        }
    }
}

/// Admission control over every outbound cloud call
#[derive(Debug)]
pub struct RateLimiter {
    options: Options,
    state: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            state: Mutex::new(RateWindow::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RateWindow> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit one call now, or report how long until one could be
    pub fn admit(&self) -> Admission {
        self.admit_at(Instant::now())
    }

    pub fn admit_at(&self, now: Instant) -> Admission {
        let mut state = self.state();
        state.prune(now, self.options.window);

        if let Some(until) = state.saturated_until {
            state.deferred += 1;
            return Admission::Wait(until - now);
        }

        if state.calls.len() >= self.options.limit {
            state.deferred += 1;
            // the front entry is the one that frees a slot first
            let wait = state
                .calls
                .front()
                .map(|oldest| (*oldest + self.options.window).saturating_duration_since(now))
                .unwrap_or_default();
            return Admission::Wait(wait);
        }

        state.calls.push_back(now);
        state.admitted += 1;
        Admission::Immediate
    }

    /// Wait until a call is admitted
    pub async fn acquire(&self) {
        loop {
            match self.admit() {
                Admission::Immediate => return,
                Admission::Wait(wait) => {
                    debug!("Rate limit reached, waiting {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// The cloud answered 429; treat the next cooldown period as saturated
    pub fn on_rate_limited(&self) {
        let now = Instant::now();
        let mut state = self.state();
        state.rate_limited += 1;
        let until = now + self.options.cooldown;
        state.saturated_until = Some(state.saturated_until.map_or(until, |s| s.max(until)));
        warn!("Cloud rate limit hit, cooling down for {:?}", self.options.cooldown);
    }

    /// Calls that could be admitted right now
    pub fn available(&self) -> usize {
        self.available_at(Instant::now())
    }

    pub fn available_at(&self, now: Instant) -> usize {
        let mut state = self.state();
        state.prune(now, self.options.window);
        if state.saturated_until.is_some() {
            return 0;
        }
        self.options.limit.saturating_sub(state.calls.len())
    }

    pub fn status(&self) -> RateLimitStatus {
        let available = self.available();
        let state = self.state();
        RateLimitStatus {
            available,
            admitted: state.admitted,
            deferred: state.deferred,
            rate_limited: state.rate_limited,
        }
    }
}
