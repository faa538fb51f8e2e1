//! # Connection State
//!
//! The two small pieces of state the classifier keeps between packets:
//!
//! - [`DnsAnswerCache`]: IPv4 address -> the domain most recently resolved
//!   to it. Filled from DNS responses, read when a TLS packet carries no SNI.
//! - [`AppDataTracker`]: connection keys whose first TLS Application Data
//!   record has already been reported.
//!
//! Both are LRU-bounded so a long capture cannot grow them without limit.
//! Neither is cleared when a capture session restarts.

use std::fmt;
use std::net::Ipv4Addr;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Connection Key
// ---------------------------------------------------------------------------

/// Directional 4-tuple of a TCP connection.
///
/// Rendered as `src:sport-dst:dport`. The two directions of one connection
/// are distinct keys.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
}

impl ConnectionKey {
    pub fn new(src_ip: Ipv4Addr, src_port: u16, dst_ip: Ipv4Addr, dst_port: u16) -> Self {
        Self {
            src_ip,
            src_port,
            dst_ip,
            dst_port,
        }
    }

    /// The same connection seen from the other side.
    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

// ---------------------------------------------------------------------------
// DNS Answer Cache
// ---------------------------------------------------------------------------

/// Resolved address -> domain name, least recently used entries evicted.
///
/// A newer answer for the same address replaces the older domain.
pub struct DnsAnswerCache {
    entries: LruCache<Ipv4Addr, String>,
}

impl DnsAnswerCache {
    /// Create a cache holding at most `capacity` addresses (minimum 1).
    pub fn new(cap: usize) -> Self {
        Self {
            entries: LruCache::new(capacity(cap)),
        }
    }

    /// Record that `domain` resolved to `addr`.
    pub fn insert(&mut self, addr: Ipv4Addr, domain: &str) {
        self.entries.put(addr, domain.to_string());
    }

    /// Domain last resolved to `addr`, refreshing its recency.
    pub fn lookup(&mut self, addr: Ipv4Addr) -> Option<String> {
        self.entries.get(&addr).cloned()
    }

    /// Lookup without touching recency.
    pub fn peek(&self, addr: Ipv4Addr) -> Option<&str> {
        self.entries.peek(&addr).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for DnsAnswerCache {
    fn default() -> Self {
        Self::new(4096)
    }
}

// ---------------------------------------------------------------------------
// Application Data Tracker
// ---------------------------------------------------------------------------

/// Connection keys whose first Application Data record was reported.
///
/// When the bound is reached the least recently active connection is
/// forgotten; its next Application Data record is reported again.
pub struct AppDataTracker {
    seen: LruCache<ConnectionKey, ()>,
}

impl AppDataTracker {
    pub fn new(cap: usize) -> Self {
        Self {
            seen: LruCache::new(capacity(cap)),
        }
    }

    /// Mark `key` as seen. Returns true the first time a key is observed.
    pub fn first_sighting(&mut self, key: ConnectionKey) -> bool {
        // `put` returns the previous value, refreshing recency either way.
        self.seen.put(key, ()).is_none()
    }

    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

impl Default for AppDataTracker {
    fn default() -> Self {
        Self::new(16384)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
