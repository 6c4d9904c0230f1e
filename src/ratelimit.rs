//! Per-task rate-limited diagnostic logging (spec §4.G, §9): three
//! independent token buckets pulsing roughly one token every 10 seconds,
//! one each for parse errors, offset-too-small drops, and offset-too-large
//! backpressure events.

use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use std::num::NonZeroU32;
use std::time::Duration;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn every_10s() -> Limiter {
    let quota = Quota::with_period(Duration::from_secs(10))
        .expect("10s is a valid quota period")
        .allow_burst(NonZeroU32::new(1).unwrap());
    RateLimiter::direct(quota)
}

/// Gate for a single diagnostic log line: `check()` returns true at most
/// once per 10-second window.
pub struct LogThrottle {
    limiter: Limiter,
}

impl LogThrottle {
    pub fn new() -> Self {
        Self {
            limiter: every_10s(),
        }
    }

    pub fn allow(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new()
    }
}

/// The supervisor's three independent log limiters (spec §4.G).
pub struct TaskLimiters {
    pub parse_errors: LogThrottle,
    pub offset_too_small: LogThrottle,
    pub offset_too_large: LogThrottle,
}

impl TaskLimiters {
    pub fn new() -> Self {
        Self {
            parse_errors: LogThrottle::new(),
            offset_too_small: LogThrottle::new(),
            offset_too_large: LogThrottle::new(),
        }
    }
}

impl Default for TaskLimiters {
    fn default() -> Self {
        Self::new()
    }
}
