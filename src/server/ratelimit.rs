//! Per-client-IP rate limiting for the audio-fetch path.
//!
//! Fixed window: each client address gets `max` requests per `window`; the
//! counter resets when the window elapses. Loopback clients are exempt so
//! local probing never starves. This bounds how often one client can force an
//! upstream extraction.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    exempt_loopback: bool,
    windows: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            exempt_loopback: true,
            windows: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn without_loopback_exemption(mut self) -> Self {
        self.exempt_loopback = false;
        self
    }

    /// Records one request from `ip`. `Err` carries the seconds until the
    /// client's window resets.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        if self.exempt_loopback && ip.is_loopback() {
            return Ok(());
        }

        let now = Instant::now();
        let mut windows = self.windows.lock();
        let entry = windows.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.max {
            let elapsed = now.duration_since(entry.started);
            let retry_after = self.window.saturating_sub(elapsed).as_secs().max(1);
            debug!("rate limit hit for {}, retry in {}s", ip, retry_after);
            return Err(retry_after);
        }

        entry.count += 1;
        Ok(())
    }

    /// Drops windows that have fully elapsed. Called from the periodic sweep
    /// so the map does not grow with one entry per client forever.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| now.duration_since(w.started) < self.window);
        before - windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn client() -> IpAddr {
        "10.0.0.7".parse().unwrap()
    }

    #[test]
    fn allows_up_to_max_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(900));
        let ip = client();

        for _ in 0..3 {
            assert!(limiter.check(ip).is_ok());
        }
        let retry_after = limiter.check(ip).unwrap_err();
        assert!(retry_after >= 1);
    }

    #[test]
    fn window_reset_restores_budget() {
        let limiter = RateLimiter::new(1, Duration::from_millis(30));
        let ip = client();

        assert!(limiter.check(ip).is_ok());
        assert!(limiter.check(ip).is_err());

        std::thread::sleep(Duration::from_millis(50));
        assert!(limiter.check(ip).is_ok());
    }

    #[test]
    fn clients_are_tracked_independently() {
        let limiter = RateLimiter::new(1, Duration::from_secs(900));
        assert!(limiter.check("10.0.0.1".parse().unwrap()).is_ok());
        assert!(limiter.check("10.0.0.2".parse().unwrap()).is_ok());
        assert!(limiter.check("10.0.0.1".parse().unwrap()).is_err());
    }

    #[test]
    fn loopback_is_exempt() {
        let limiter = RateLimiter::new(1, Duration::from_secs(900));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..10 {
            assert!(limiter.check(ip).is_ok());
        }
    }

    #[test]
    fn loopback_exemption_can_be_disabled() {
        let limiter =
            RateLimiter::new(1, Duration::from_secs(900)).without_loopback_exemption();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.check(ip).is_ok());
        assert!(limiter.check(ip).is_err());
    }

    #[test]
    fn cleanup_drops_elapsed_windows() {
        let limiter = RateLimiter::new(5, Duration::from_millis(20));
        limiter.check(client()).unwrap();

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(limiter.cleanup(), 1);
    }
}
