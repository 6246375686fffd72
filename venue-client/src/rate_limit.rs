//! Outbound rate limiting
//!
//! At most `max_per_sec` venue messages per second in aggregate, plus a
//! pause-and-retry penalty window for venue throttle responses (-1003 /
//! -1015 on Binance). The penalty doubles from a 2 s base up to a 60 s cap
//! with jitter, and resets after the first successful call.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tracing::warn;

const PENALTY_BASE: Duration = Duration::from_secs(2);
const PENALTY_CAP: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    max_per_sec: usize,
    state: Mutex<LimiterState>,
}

struct LimiterState {
    sent: VecDeque<Instant>,
    pause_until: Option<Instant>,
    penalty: Option<Duration>,
}

impl RateLimiter {
    pub fn new(max_per_sec: usize) -> Self {
        Self {
            max_per_sec,
            state: Mutex::new(LimiterState {
                sent: VecDeque::new(),
                pause_until: None,
                penalty: None,
            }),
        }
    }

    /// Wait until an outbound message may be sent.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                if let Some(until) = state.pause_until {
                    if until > now {
                        Some(until - now)
                    } else {
                        state.pause_until = None;
                        None
                    }
                } else {
                    while let Some(front) = state.sent.front() {
                        if now.duration_since(*front) >= Duration::from_secs(1) {
                            state.sent.pop_front();
                        } else {
                            break;
                        }
                    }
                    if state.sent.len() < self.max_per_sec {
                        state.sent.push_back(now);
                        return;
                    }
                    // Sleep until the oldest message leaves the window.
                    state
                        .sent
                        .front()
                        .map(|front| Duration::from_secs(1).saturating_sub(now - *front))
                }
            };
            if let Some(wait) = wait {
                tokio::time::sleep(wait.max(Duration::from_millis(5))).await;
            }
        }
    }

    /// Apply the venue-throttle penalty window.
    pub async fn penalize(&self) {
        let mut state = self.state.lock().await;
        let next = match state.penalty {
            None => PENALTY_BASE,
            Some(prev) => (prev * 2).min(PENALTY_CAP),
        };
        let jitter = Duration::from_millis(rand::rng().random_range(0..500));
        state.penalty = Some(next);
        state.pause_until = Some(Instant::now() + next + jitter);
        warn!(pause_secs = next.as_secs(), "venue rate limit hit, pausing outbound requests");
    }

    /// A successful call clears the penalty ladder.
    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.penalty = None;
    }
}
