//! Wrong-PIN blocking
//!
//! Tracks failed PIN submissions per remote IP. After
//! [`MAX_WRONG_PIN_ATTEMPTS`] failures the address is blocked for
//! [`BLOCK_DURATION`]; a correct PIN resets the counter. Failures older
//! than [`BLOCK_DURATION`] are forgotten.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Failed submissions tolerated before blocking
pub const MAX_WRONG_PIN_ATTEMPTS: u32 = 5;

/// How long an address stays blocked
pub const BLOCK_DURATION: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Default, Clone, Copy)]
struct Attempts {
    failed: u32,
    last_failure: Option<Instant>,
    blocked_until: Option<Instant>,
}

impl Attempts {
    /// Whether the entry carries nothing worth keeping at `now`
    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        match (self.blocked_until, self.last_failure) {
            (Some(until), _) => until <= now,
            (None, Some(at)) => now.saturating_duration_since(at) >= window,
            (None, None) => true,
        }
    }
}

/// Per-address PIN attempt tracker
#[derive(Debug)]
pub struct PinGuard {
    enabled: bool,
    max_attempts: u32,
    block_duration: Duration,
    attempts: Mutex<HashMap<IpAddr, Attempts>>,
}

impl PinGuard {
    /// Create a guard; a disabled guard never blocks
    pub fn new(enabled: bool) -> Self {
        Self::with_limits(enabled, MAX_WRONG_PIN_ATTEMPTS, BLOCK_DURATION)
    }

    /// Create a guard with custom limits
    pub fn with_limits(enabled: bool, max_attempts: u32, block_duration: Duration) -> Self {
        Self {
            enabled,
            max_attempts: max_attempts.max(1),
            block_duration,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, Attempts>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether blocking is active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `ip` is currently blocked
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.is_blocked_at(ip, Instant::now())
    }

    fn is_blocked_at(&self, ip: IpAddr, now: Instant) -> bool {
        if !self.enabled {
            return false;
        }

        let mut attempts = self.lock();
        match attempts.get(&ip).and_then(|a| a.blocked_until) {
            Some(until) if until > now => true,
            Some(_) => {
                // Block expired
                attempts.remove(&ip);
                false
            }
            None => false,
        }
    }

    /// Record a PIN submission from `ip`
    ///
    /// Returns `true` if the address is blocked after this attempt.
    pub fn record(&self, ip: IpAddr, accepted: bool) -> bool {
        self.record_at(ip, accepted, Instant::now())
    }

    fn record_at(&self, ip: IpAddr, accepted: bool, now: Instant) -> bool {
        if !self.enabled {
            return false;
        }

        let mut attempts = self.lock();
        if attempts.get(&ip).and_then(|a| a.blocked_until) > Some(now) {
            return true;
        }
        let window = self.block_duration;
        attempts.retain(|_, a| !a.is_stale(now, window));

        if accepted {
            attempts.remove(&ip);
            return false;
        }

        let entry = attempts.entry(ip).or_default();
        entry.failed += 1;
        entry.last_failure = Some(now);
        if entry.failed >= self.max_attempts {
            entry.blocked_until = Some(now + self.block_duration);
            tracing::warn!(ip = %ip, attempts = entry.failed, "Address blocked after wrong PIN attempts");
            return true;
        }
        false
    }

    /// Forget every address
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
    const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 21));

    #[test]
    fn test_blocks_after_max_attempts() {
        let guard = PinGuard::new(true);

        for _ in 0..MAX_WRONG_PIN_ATTEMPTS - 1 {
            assert!(!guard.record(IP, false));
        }
        assert!(!guard.is_blocked(IP));

        assert!(guard.record(IP, false));
        assert!(guard.is_blocked(IP));
        assert!(!guard.is_blocked(OTHER));
    }

    #[test]
    fn test_correct_pin_resets_counter() {
        let guard = PinGuard::new(true);

        for _ in 0..MAX_WRONG_PIN_ATTEMPTS - 1 {
            guard.record(IP, false);
        }
        guard.record(IP, true);
        assert!(!guard.record(IP, false));
        assert!(!guard.is_blocked(IP));
    }

    #[test]
    fn test_correct_pin_does_not_unblock() {
        let guard = PinGuard::with_limits(true, 1, Duration::from_secs(60));
        assert!(guard.record(IP, false));

        assert!(guard.record(IP, true));
        assert!(guard.is_blocked(IP));
    }

    #[test]
    fn test_block_expires() {
        let guard = PinGuard::with_limits(true, 2, Duration::from_secs(60));
        let start = Instant::now();

        guard.record_at(IP, false, start);
        assert!(guard.record_at(IP, false, start));
        assert!(guard.is_blocked_at(IP, start + Duration::from_secs(59)));
        assert!(!guard.is_blocked_at(IP, start + Duration::from_secs(61)));

        // Counter starts over after expiry
        assert!(!guard.record_at(IP, false, start + Duration::from_secs(62)));
    }

    #[test]
    fn test_stale_failures_forgotten() {
        let guard = PinGuard::with_limits(true, 3, Duration::from_secs(60));
        let start = Instant::now();

        for i in 0..100u8 {
            let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, i));
            assert!(!guard.record_at(ip, false, start));
        }
        guard.record_at(IP, false, start);
        assert_eq!(guard.lock().len(), 101);

        // The next submission after the window sweeps the old counters
        let later = start + Duration::from_secs(61);
        assert!(!guard.record_at(OTHER, false, later));
        assert_eq!(guard.lock().len(), 1);

        // IP's earlier failure no longer counts towards a block
        assert!(!guard.record_at(IP, false, later));
        assert!(!guard.record_at(IP, false, later));
        assert!(guard.record_at(IP, false, later));
    }

    #[test]
    fn test_disabled_guard_never_blocks() {
        let guard = PinGuard::new(false);
        for _ in 0..20 {
            assert!(!guard.record(IP, false));
        }
        assert!(!guard.is_blocked(IP));
    }
}
