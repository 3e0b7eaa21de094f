//! Packet-handling core of a small IPv4 software router.
//!
//! The router sits behind an Ethernet link emulator and owns a fixed set of
//! named interfaces. For every inbound frame it either answers locally
//! (ARP, ICMP echo, administrative ICMP), forwards toward the next hop from
//! a static routing table, or drops the frame. The pieces:
//! - Ethernet / ARP / IPv4 / ICMP codecs over borrowed bytes
//! - an interface registry and a longest-prefix-match route table
//! - an ARP cache with aging, a pending-request queue and retransmission
//! - the per-packet dispatcher tying them together
//!
//! Frame I/O, configuration loading and logger installation belong to the
//! embedding process; the crate consumes a [`FrameSink`] and exposes
//! [`Router::handle_frame`] and [`Router::tick`].

pub mod arp;
pub mod arpcache;
pub mod ethernet;
pub mod icmp;
pub mod iface;
pub mod ipv4;
pub mod routing;
pub mod router;

use thiserror::Error;

pub use arpcache::ArpCache;
pub use iface::{Interface, InterfaceTable};
pub use router::{FrameSink, Router, SendError};
pub use routing::{Route, RouteTable};

/// Why a frame or header failed to parse.
///
/// All parse failures are non-fatal: the dispatcher logs and drops the
/// offending frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Buffer shorter than the header(s) it must contain.
    #[error("truncated packet")]
    Truncated,
    /// ARP hardware type is not Ethernet.
    #[error("unsupported ARP hardware type")]
    BadHardwareType,
    /// ARP protocol type is not IPv4, or the address lengths are wrong.
    #[error("unsupported ARP protocol type")]
    BadProtocolType,
    /// IP version field is not 4, or the header length is impossible.
    #[error("bad IP version or header length")]
    BadVersion,
    /// Internet checksum did not verify.
    #[error("checksum mismatch")]
    BadChecksum,
}
