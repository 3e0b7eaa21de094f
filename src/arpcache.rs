//! ARP cache and pending-request queue
//!
//! A fixed-capacity IPv4-to-MAC cache with 15-second aging, plus the queue
//! of unresolved next hops. Each pending request owns deep copies of the
//! frames waiting on it; a request is retransmitted at most once a second
//! and gives up after five attempts, at which point every waiting frame is
//! answered with an ICMP host-unreachable by the dispatcher.
//!
//! All state sits behind one plain mutex. Operations that want to transmit
//! return [`SweepAction`]s instead of sending, so no I/O ever happens with
//! the lock held and the mutex never needs to be re-entered.
//!
//! Timestamps are whole seconds from router start, supplied by the caller
//! and used only as differences.

use std::fmt;
use std::net::Ipv4Addr;

use rand::Rng;
use spin::Mutex;

/// Cache capacity.
pub const CACHE_SIZE: usize = 100;

/// Seconds after which a cache entry goes stale.
pub const ENTRY_TIMEOUT_SECS: u64 = 15;

/// Minimum seconds between retransmissions of one request.
pub const RETRY_INTERVAL_SECS: u64 = 1;

/// Attempts before a resolution is abandoned.
pub const MAX_REQUEST_ATTEMPTS: u32 = 5;

#[derive(Clone, Copy)]
struct ArpEntry {
    ip: Ipv4Addr,
    mac: [u8; 6],
    added: u64,
    valid: bool,
}

const EMPTY_ENTRY: ArpEntry = ArpEntry {
    ip: Ipv4Addr::UNSPECIFIED,
    mac: [0; 6],
    added: 0,
    valid: false,
};

/// A frame parked behind an unresolved next hop: an owned copy of the
/// bytes plus the interface it will leave on.
#[derive(Debug)]
pub struct PendingFrame {
    /// Complete Ethernet frame, MAC addresses not yet rewritten
    pub bytes: Vec<u8>,
    /// Egress interface name
    pub iface: String,
}

struct ArpRequest {
    ip: Ipv4Addr,
    /// When the request was last broadcast; `None` until the first send.
    sent: Option<u64>,
    times_sent: u32,
    /// Waiting frames, newest first.
    packets: Vec<PendingFrame>,
}

/// Work recorded under the lock, to be carried out by the dispatcher after
/// the lock is released.
#[derive(Debug)]
pub enum SweepAction {
    /// Broadcast an ARP request for `ip` out of `iface`.
    Transmit { ip: Ipv4Addr, iface: String },
    /// Resolution abandoned: answer every waiting frame with an ICMP
    /// host-unreachable.
    Fail { packets: Vec<PendingFrame> },
}

struct ArpState {
    entries: [ArpEntry; CACHE_SIZE],
    requests: Vec<ArpRequest>,
}

impl ArpState {
    /// Retransmit or abandon the request at `idx` if its retry interval
    /// elapsed. On abandonment the request is removed from the queue.
    fn service_request(&mut self, idx: usize, now: u64) -> Option<SweepAction> {
        let due = self.requests[idx]
            .sent
            .map_or(true, |sent| now.saturating_sub(sent) >= RETRY_INTERVAL_SECS);
        if !due {
            return None;
        }

        if self.requests[idx].times_sent >= MAX_REQUEST_ATTEMPTS {
            let req = self.requests.remove(idx);
            return Some(SweepAction::Fail {
                packets: req.packets,
            });
        }

        let req = &mut self.requests[idx];
        let iface = req.packets.first()?.iface.clone();
        req.sent = Some(now);
        req.times_sent += 1;
        Some(SweepAction::Transmit { ip: req.ip, iface })
    }
}

/// The ARP subsystem: cache plus pending-request queue under one mutex.
pub struct ArpCache {
    state: Mutex<ArpState>,
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ArpCache {
    pub fn new() -> Self {
        ArpCache {
            state: Mutex::new(ArpState {
                entries: [EMPTY_ENTRY; CACHE_SIZE],
                requests: Vec::new(),
            }),
        }
    }

    /// The MAC for `ip` if a valid entry exists. Returns a copy; the entry
    /// may be invalidated the moment the lock drops.
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<[u8; 6]> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .find(|e| e.valid && e.ip == ip)
            .map(|e| e.mac)
    }

    /// Record `ip -> mac` and take over the pending request for `ip`.
    ///
    /// The returned frames are the ones that were waiting on this
    /// resolution; the caller rewrites their MAC addresses and sends them.
    /// An existing valid entry for `ip` is refreshed in place so the cache
    /// never holds two valid entries for one IP. With no free slot, one
    /// pseudo-random live entry is evicted.
    pub fn insert(&self, ip: Ipv4Addr, mac: [u8; 6], now: u64) -> Vec<PendingFrame> {
        let mut state = self.state.lock();

        let taken = match state.requests.iter().position(|r| r.ip == ip) {
            Some(idx) => state.requests.remove(idx).packets,
            None => Vec::new(),
        };

        let slot = state
            .entries
            .iter()
            .position(|e| e.valid && e.ip == ip)
            .or_else(|| state.entries.iter().position(|e| !e.valid))
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..CACHE_SIZE));

        state.entries[slot] = ArpEntry {
            ip,
            mac,
            added: now,
            valid: true,
        };

        taken
    }

    /// Park a frame behind the resolution of `ip`, creating the pending
    /// request if this is the first frame for that IP.
    ///
    /// The frame is deep-copied; nothing borrowed from the caller outlives
    /// this call. A fresh request is due immediately, so the first queued
    /// frame usually yields a [`SweepAction::Transmit`] right away.
    pub fn queue(
        &self,
        ip: Ipv4Addr,
        frame: &[u8],
        iface: &str,
        now: u64,
    ) -> Option<SweepAction> {
        let mut state = self.state.lock();

        let idx = match state.requests.iter().position(|r| r.ip == ip) {
            Some(idx) => idx,
            None => {
                state.requests.push(ArpRequest {
                    ip,
                    sent: None,
                    times_sent: 0,
                    packets: Vec::new(),
                });
                state.requests.len() - 1
            }
        };

        // Newest frames go to the front; a completed resolution flushes
        // them in that order.
        state.requests[idx].packets.insert(
            0,
            PendingFrame {
                bytes: frame.to_vec(),
                iface: iface.to_string(),
            },
        );

        state.service_request(idx, now)
    }

    /// One pass of the 1-Hz sweeper: age out stale cache entries, then
    /// retransmit or abandon every due pending request.
    pub fn sweep(&self, now: u64) -> Vec<SweepAction> {
        let mut state = self.state.lock();

        for entry in state.entries.iter_mut() {
            if entry.valid && now.saturating_sub(entry.added) > ENTRY_TIMEOUT_SECS {
                entry.valid = false;
            }
        }

        let mut actions = Vec::new();
        let mut idx = 0;
        while idx < state.requests.len() {
            let before = state.requests.len();
            if let Some(action) = state.service_request(idx, now) {
                actions.push(action);
            }
            // Abandoned requests are removed in place; only advance when
            // the current one survived.
            if state.requests.len() == before {
                idx += 1;
            }
        }

        actions
    }
}

impl fmt::Display for ArpCache {
    /// Dump of the valid cache entries, one `ip mac added` line each.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        for entry in state.entries.iter().filter(|e| e.valid) {
            let m = entry.mac;
            writeln!(
                f,
                "{} {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x} added={}s",
                entry.ip, m[0], m[1], m[2], m[3], m[4], m[5], entry.added
            )?;
        }
        Ok(())
    }
}
