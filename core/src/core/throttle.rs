/// Per-host pacing for outbound requests.
///
/// `HostThrottle` hands out send slots per network location so that no host
/// sees two requests closer together than the configured spacing, no matter
/// how many tasks are in flight. Reservation happens under a short lock and
/// the sleep happens outside it, so waiting tasks never block each other.
///
/// `HostLimiter` caps the number of concurrent operations per host with a
/// lazily created semaphore per network location.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Duration, Instant};

pub struct HostThrottle {
    spacing: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostThrottle {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Reserves the next free slot for `host` and sleeps until it arrives.
    pub async fn wait(&self, host: &str) {
        let at = self.reserve(host, Instant::now());
        if at > Instant::now() {
            sleep_until(at).await;
        }
    }

    /// Returns the instant the caller may send at and books the one after it.
    fn reserve(&self, host: &str, now: Instant) -> Instant {
        if self.spacing.is_zero() {
            return now;
        }
        let mut slots = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(host.to_string()).or_insert(now);
        let at = if *slot > now { *slot } else { now };
        *slot = at + self.spacing;
        at
    }

    pub fn tracked_hosts(&self) -> usize {
        self.next_slot.lock().map(|m| m.len()).unwrap_or(0)
    }
}

pub struct HostLimiter {
    per_host: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimiter {
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host: per_host.max(1),
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, host: &str) -> Option<OwnedSemaphorePermit> {
        let sem = {
            let mut map = self.semaphores.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
                .clone()
        };
        sem.acquire_owned().await.ok()
    }

    pub fn limit(&self) -> usize {
        self.per_host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservations_are_spaced_per_host() {
        let throttle = HostThrottle::new(Duration::from_millis(200));
        let now = Instant::now();

        let a1 = throttle.reserve("a.test", now);
        let a2 = throttle.reserve("a.test", now);
        let a3 = throttle.reserve("a.test", now);
        let b1 = throttle.reserve("b.test", now);

        assert_eq!(a1, now);
        assert_eq!(a2 - a1, Duration::from_millis(200));
        assert_eq!(a3 - a2, Duration::from_millis(200));
        assert_eq!(b1, now);
        assert_eq!(throttle.tracked_hosts(), 2);
    }

    #[test]
    fn test_idle_host_gets_immediate_slot() {
        let throttle = HostThrottle::new(Duration::from_millis(50));
        let start = Instant::now();
        throttle.reserve("a.test", start);
        let later = start + Duration::from_secs(1);
        assert_eq!(throttle.reserve("a.test", later), later);
    }

    #[test]
    fn test_zero_spacing_is_noop() {
        let throttle = HostThrottle::new(Duration::ZERO);
        let now = Instant::now();
        assert_eq!(throttle.reserve("a.test", now), now);
        assert_eq!(throttle.tracked_hosts(), 0);
    }

    #[tokio::test]
    async fn test_wait_enforces_spacing() {
        let throttle = HostThrottle::new(Duration::from_millis(100));
        let start = Instant::now();
        throttle.wait("a.test").await;
        throttle.wait("a.test").await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_host_limiter_caps_permits() {
        let limiter = HostLimiter::new(2);
        let p1 = limiter.acquire("a.test").await;
        let p2 = limiter.acquire("a.test").await;
        assert!(p1.is_some() && p2.is_some());

        let blocked = tokio::time::timeout(Duration::from_millis(50), limiter.acquire("a.test")).await;
        assert!(blocked.is_err());

        let other = tokio::time::timeout(Duration::from_millis(50), limiter.acquire("b.test")).await;
        assert!(other.is_ok());

        drop(p1);
        let unblocked = tokio::time::timeout(Duration::from_millis(50), limiter.acquire("a.test")).await;
        assert!(unblocked.is_ok());
    }
}
