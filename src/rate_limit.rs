use std::num::NonZeroU32;
use std::thread;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token bucket shared by every worker of a stage. Requests are spaced evenly
/// (burst of one); a disabled limiter never blocks.
pub struct RequestLimiter {
    limiter: Option<DirectLimiter>,
    clock: DefaultClock,
}

impl RequestLimiter {
    pub fn new(requests_per_second: Option<u32>) -> Self {
        let limiter = requests_per_second.and_then(NonZeroU32::new).map(|rate| {
            RateLimiter::direct(Quota::per_second(rate).allow_burst(NonZeroU32::MIN))
        });
        Self {
            limiter,
            clock: DefaultClock::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Blocks the calling thread until a request slot is available.
    pub fn acquire(&self) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        while let Err(not_until) = limiter.check() {
            thread::sleep(not_until.wait_time_from(self.clock.now()));
        }
    }
}

impl std::fmt::Debug for RequestLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLimiter")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn disabled_limiter_never_blocks() {
        let limiter = RequestLimiter::new(Some(0));
        assert!(!limiter.is_enabled());
        let started = Instant::now();
        for _ in 0..1000 {
            limiter.acquire();
        }
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn spaces_requests_at_configured_rate() {
        let limiter = RequestLimiter::new(Some(20));
        let started = Instant::now();
        for _ in 0..5 {
            limiter.acquire();
        }
        // First slot is immediate, the remaining four wait ~50ms each.
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn shared_across_threads() {
        let limiter = RequestLimiter::new(Some(50));
        let started = Instant::now();
        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..3 {
                        limiter.acquire();
                    }
                });
            }
        });
        // Twelve acquisitions at 20ms spacing.
        assert!(started.elapsed() >= Duration::from_millis(180));
    }
}
