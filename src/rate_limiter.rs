//! Per-masked-client-prefix token-bucket rate limiting (spec.md §4.5).
//!
//! Generalizes the teacher's `DnsRateLimiter` (`rate_limiter.rs`), which
//! keyed governor limiters by the exact source `IpAddr`, into a
//! masked-prefix keying scheme so an operator can rate-limit a /24 or a
//! /48 instead of a single host. The governor-backed token bucket itself
//! is unchanged.

use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as Governor};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub qps: u32,
    pub burst: u32,
    /// IPv4 mask length, 0–32. Default 32 (per exact address).
    pub mask4: u8,
    /// IPv6 mask length, 0–128. Default 48.
    pub mask6: u8,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { qps: 50, burst: 50, mask4: 32, mask6: 48 }
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Masks `addr` to its rate-limit prefix. Resolves spec.md §9's open
/// question on v4-mapped-v6 clients by always unmapping to a plain v4
/// address first and masking with `mask4` — a v4-mapped-v6 client and a
/// native-v4 client from the same address then share one bucket instead
/// of two.
fn masked_prefix(addr: IpAddr, mask4: u8, mask6: u8) -> u128 {
    match addr {
        IpAddr::V4(v4) => mask_v4(v4, mask4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => mask_v4(v4, mask4),
            None => mask_v6(v6, mask6),
        },
    }
}

fn mask_v4(v4: Ipv4Addr, mask_len: u8) -> u128 {
    let bits = mask_len.min(32);
    let mask: u32 = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
    let masked = u32::from(v4) & mask;
    // Offset into the v4-mapped-v6 range so v4 and v6 keys never collide.
    0xFFFF_0000_0000u128 | masked as u128
}

fn mask_v6(v6: Ipv6Addr, mask_len: u8) -> u128 {
    let bits = mask_len.min(128);
    let mask: u128 = if bits == 0 { 0 } else { u128::MAX << (128 - bits) };
    (u128::from(v6) & mask) | (1u128 << 127) // tag bit keeps v6 space disjoint from v4 space above
}

struct Bucket {
    limiter: DefaultDirectRateLimiter,
    last_seen_unix: AtomicU64,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: DashMap<u128, Arc<Bucket>>,
    gc_interval: Duration,
    gc_handle: Mutex<Option<JoinHandle<()>>>,
    close_tx: broadcast::Sender<()>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Arc<Self> {
        // Auto-selects the GC interval in [2s, 10s], bounded by the
        // bucket's own refill time B/L (spec.md §4.5).
        let refill_secs = if config.qps == 0 {
            10.0
        } else {
            config.burst as f64 / config.qps as f64
        };
        let gc_interval = Duration::from_secs_f64(refill_secs.clamp(2.0, 10.0));

        let (close_tx, _) = broadcast::channel(1);
        let limiter = Arc::new(Self {
            config,
            buckets: DashMap::new(),
            gc_interval,
            gc_handle: Mutex::new(None),
            close_tx,
        });

        let gc_target = Arc::clone(&limiter);
        let mut close_rx = limiter.close_tx.subscribe();
        let interval = gc_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => gc_target.gc(),
                    _ = close_rx.recv() => break,
                }
            }
        });
        *limiter.gc_handle.lock() = Some(handle);

        limiter
    }

    fn bucket_for(&self, prefix: u128) -> Arc<Bucket> {
        let now = now_unix();
        if let Some(existing) = self.buckets.get(&prefix) {
            existing.last_seen_unix.store(now, Ordering::Relaxed);
            return Arc::clone(&existing);
        }
        let quota = Quota::per_second(NonZeroU32::new(self.config.qps.max(1)).unwrap())
            .allow_burst(NonZeroU32::new(self.config.burst.max(1)).unwrap());
        let bucket = Arc::new(Bucket { limiter: Governor::direct(quota), last_seen_unix: AtomicU64::new(now) });
        let entry = self.buckets.entry(prefix).or_insert_with(|| bucket);
        Arc::clone(&entry)
    }

    /// Consumes one token for `addr`'s masked prefix; `false` means the
    /// caller should synthesize REFUSED and short-circuit.
    pub fn allow(&self, addr: IpAddr) -> bool {
        let prefix = masked_prefix(addr, self.config.mask4, self.config.mask6);
        let bucket = self.bucket_for(prefix);
        bucket.limiter.check().is_ok()
    }

    fn gc(&self) {
        let now = now_unix();
        let idle_threshold = self.gc_interval.as_secs();
        self.buckets.retain(|_, bucket| {
            now.saturating_sub(bucket.last_seen_unix.load(Ordering::Relaxed)) <= idle_threshold
        });
    }

    pub async fn close(&self) {
        let _ = self.close_tx.send(());
        let handle = self.gc_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn burst_then_refused() {
        let limiter = RateLimiter::new(RateLimiterConfig { qps: 5, burst: 5, mask4: 32, mask6: 48 });
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        for _ in 0..5 {
            assert!(limiter.allow(ip));
        }
        assert!(!limiter.allow(ip));
    }

    #[test]
    fn distinct_prefixes_are_independent() {
        let limiter = RateLimiter::new(RateLimiterConfig { qps: 1, burst: 1, mask4: 32, mask6: 48 });
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert!(limiter.allow(a));
        assert!(!limiter.allow(a));
        assert!(limiter.allow(b));
    }

    #[test]
    fn mask_24_groups_subnet_into_one_bucket() {
        let limiter = RateLimiter::new(RateLimiterConfig { qps: 1, burst: 1, mask4: 24, mask6: 48 });
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert!(limiter.allow(a));
        assert!(!limiter.allow(b));
    }

    #[test]
    fn v4_mapped_v6_shares_bucket_with_native_v4() {
        let limiter = RateLimiter::new(RateLimiterConfig { qps: 1, burst: 1, mask4: 32, mask6: 48 });
        let v4 = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));
        let mapped = IpAddr::V6(Ipv4Addr::new(203, 0, 113, 9).to_ipv6_mapped());
        assert!(limiter.allow(v4));
        assert!(!limiter.allow(mapped));
    }
}
