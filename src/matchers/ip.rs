//! IP-prefix matcher: spec.md §4.2 "client-subnet / response-address
//! matcher over a set of CIDR prefixes". Prefixes are normalized into
//! v6-mapped 128-bit space, sorted and collapsed at build time so
//! overlapping entries don't get scanned twice, then checked per spec.md
//! §4.2: binary search on the sorted first-address array to find the
//! largest start ≤ addr, then a containment check on that candidate.

use super::Matcher;
use crate::context::QueryContext;
use crate::error::Result;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// A single prefix normalized into 128-bit (v6-mapped) space so v4 and
/// v6 entries sort and compare uniformly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Prefix {
    base: u128,
    prefix_len: u8,
}

impl Prefix {
    fn new(addr: IpAddr, prefix_len: u8) -> Self {
        let base = match addr {
            IpAddr::V4(v4) => mapped(v4),
            IpAddr::V6(v6) => u128::from(v6),
        };
        let mask = mask_for(prefix_len, addr.is_ipv4());
        Self { base: base & mask, prefix_len: normalized_len(prefix_len, addr.is_ipv4()) }
    }

    fn contains(&self, addr: IpAddr) -> bool {
        let value = match addr {
            IpAddr::V4(v4) => mapped(v4),
            IpAddr::V6(v6) => u128::from(v6),
        };
        let mask = mask_for(self.prefix_len, false);
        value & mask == self.base
    }
}

fn mapped(v4: Ipv4Addr) -> u128 {
    u128::from(v4.to_ipv6_mapped())
}

fn normalized_len(prefix_len: u8, is_v4: bool) -> u8 {
    if is_v4 { 96 + prefix_len.min(32) } else { prefix_len.min(128) }
}

fn mask_for(prefix_len: u8, is_v4: bool) -> u128 {
    let bits = if is_v4 { normalized_len(prefix_len, true) } else { prefix_len.min(128) };
    if bits == 0 {
        0
    } else {
        u128::MAX << (128 - bits)
    }
}

pub struct IpSetBuilder {
    entries: Vec<Prefix>,
}

impl IpSetBuilder {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn cidr(mut self, addr: IpAddr, prefix_len: u8) -> Self {
        self.entries.push(Prefix::new(addr, prefix_len));
        self
    }

    pub fn host(self, addr: IpAddr) -> Self {
        let len = if addr.is_ipv4() { 32 } else { 128 };
        self.cidr(addr, len)
    }

    /// Sorts by base address, then drops any entry that is a strict
    /// subset of a broader (shorter-prefix) entry already kept — two
    /// overlapping loads collapse into the widest net rather than
    /// evaluating the same address against redundant prefixes.
    pub fn build(self) -> IpMatcher {
        let mut entries = self.entries;
        entries.sort();
        entries.dedup();
        let mut kept: Vec<Prefix> = Vec::with_capacity(entries.len());
        for p in entries {
            let covered = kept.iter().any(|k| {
                k.prefix_len <= p.prefix_len && (p.base & mask_for(k.prefix_len, false)) == k.base
            });
            if !covered {
                kept.push(p);
            }
        }
        IpMatcher { entries: kept }
    }
}

impl Default for IpSetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct IpMatcher {
    entries: Vec<Prefix>,
}

impl IpMatcher {
    pub fn builder() -> IpSetBuilder {
        IpSetBuilder::new()
    }

    /// Binary search for the largest prefix whose base is ≤ `addr`
    /// (spec.md §4.2), then a containment check on that one candidate.
    /// Correct because `build()` leaves no kept entry as a subset of
    /// another: two CIDR prefixes either nest or are disjoint, so at
    /// most one entry in the sorted, collapsed array can contain any
    /// given address, and it is always the last one whose base doesn't
    /// exceed it.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let value = match addr {
            IpAddr::V4(v4) => mapped(v4),
            IpAddr::V6(v6) => u128::from(v6),
        };
        let idx = self.entries.partition_point(|p| p.base <= value);
        idx.checked_sub(1).is_some_and(|i| self.entries[i].contains(addr))
    }
}

#[async_trait]
impl Matcher for IpMatcher {
    async fn matches(&self, ctx: &QueryContext) -> Result<bool> {
        Ok(self.contains(ctx.server_meta.client_addr.ip()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn v4_prefix_contains() {
        let m = IpMatcher::builder()
            .cidr(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 0)), 24)
            .build();
        assert!(m.contains(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 200))));
        assert!(!m.contains(IpAddr::V4(Ipv4Addr::new(192, 0, 3, 1))));
    }

    #[test]
    fn v6_prefix_contains() {
        let m = IpMatcher::builder()
            .cidr(IpAddr::V6("2001:db8::".parse().unwrap()), 32)
            .build();
        assert!(m.contains(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, 1))));
        assert!(!m.contains(IpAddr::V6("2001:db9::1".parse().unwrap())));
    }

    #[test]
    fn overlapping_prefixes_collapse_to_widest() {
        let m = IpMatcher::builder()
            .cidr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)), 8)
            .cidr(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 0)), 24)
            .build();
        assert_eq!(m.entries.len(), 1);
    }
}
