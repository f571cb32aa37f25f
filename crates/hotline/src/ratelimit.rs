//! Per-IP connection rate limiting ahead of the login transaction
//! admission rule of 0.5 connections/sec, burst 1 — a new connection is
//! admitted only once every 2 seconds per source address, with one grace
//! slot for the very first connection. Also the `MaxConnectionsPerIP`
//! live-connection cap enforced at accept time alongside it.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const MIN_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Default)]
pub struct ConnRateLimiter {
    last_accept: Mutex<HashMap<IpAddr, Instant>>,
}

impl ConnRateLimiter {
    pub fn new() -> ConnRateLimiter {
        ConnRateLimiter::default()
    }

    /// `true` if a connection from `ip` is admitted right now.
    pub async fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut map = self.last_accept.lock().await;
        match map.get(&ip) {
            Some(last) if now.duration_since(*last) < MIN_INTERVAL => false,
            _ => {
                map.insert(ip, now);
                true
            }
        }
    }
}

/// Caps live connections per source IP (`MaxConnectionsPerIP`), enforced at
/// accept time. Counts are plain synchronous state since increment/decrement
/// never blocks; a `ConnGuard` decrements on drop so a task panic or early
/// return can't leak a slot.
#[derive(Default)]
pub struct ConnAdmission {
    counts: StdMutex<HashMap<IpAddr, usize>>,
}

impl ConnAdmission {
    pub fn new() -> ConnAdmission {
        ConnAdmission::default()
    }

    /// Admits `ip` if it is currently under `max_per_ip` live connections,
    /// returning a guard that releases the slot when dropped.
    pub fn try_acquire(self: &Arc<Self>, ip: IpAddr, max_per_ip: usize) -> Option<ConnGuard> {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(ip).or_insert(0);
        if *count >= max_per_ip {
            return None;
        }
        *count += 1;
        Some(ConnGuard { admission: self.clone(), ip })
    }
}

pub struct ConnGuard {
    admission: Arc<ConnAdmission>,
    ip: IpAddr,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        let mut counts = self.admission.counts.lock().unwrap();
        if let Some(count) = counts.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&self.ip);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn admission_rejects_beyond_the_cap_and_releases_on_drop() {
        let admission = Arc::new(ConnAdmission::new());
        let ip = IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9));
        let first = admission.try_acquire(ip, 2).unwrap();
        let second = admission.try_acquire(ip, 2).unwrap();
        assert!(admission.try_acquire(ip, 2).is_none());
        drop(first);
        let third = admission.try_acquire(ip, 2).unwrap();
        drop(second);
        drop(third);
        assert!(admission.try_acquire(ip, 2).is_some());
    }

    #[tokio::test]
    async fn first_connection_is_a_free_burst_slot() {
        let rl = ConnRateLimiter::new();
        let ip = IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4));
        assert!(rl.check(ip).await);
    }

    #[tokio::test]
    async fn second_immediate_connection_is_rejected() {
        let rl = ConnRateLimiter::new();
        let ip = IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4));
        assert!(rl.check(ip).await);
        assert!(!rl.check(ip).await);
    }

    #[tokio::test]
    async fn different_ips_are_independent() {
        let rl = ConnRateLimiter::new();
        assert!(rl.check(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))).await);
        assert!(rl.check(IpAddr::V4(Ipv4Addr::new(2, 2, 2, 2))).await);
    }
}
