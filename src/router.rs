//! Packet dispatcher
//!
//! The top-level decision machine. Every inbound frame is classified and
//! either answered locally (ARP for one of our addresses, ICMP echo,
//! administrative ICMP), forwarded toward the next hop from the routing
//! table, or dropped. Per-packet faults never escape [`Router::handle_frame`]
//! or [`Router::tick`]; the worst outcome for a bad frame is a logged drop.

use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::arp::{ArpPacket, ARP_OP_REPLY, ARP_OP_REQUEST};
use crate::arpcache::{ArpCache, PendingFrame, SweepAction};
use crate::ethernet::{
    EthernetFrame, BROADCAST_MAC, ETHERNET_HEADER_SIZE, ETHERTYPE_ARP, ETHERTYPE_IPV4,
};
use crate::icmp::{
    self, IcmpPacket, CODE_HOST_UNREACHABLE, CODE_NET_UNREACHABLE, CODE_PORT_UNREACHABLE,
    ICMP_DEST_UNREACHABLE, ICMP_ECHO_REQUEST, ICMP_TIME_EXCEEDED,
};
use crate::iface::InterfaceTable;
use crate::ipv4::{self, Ipv4Packet, PROTOCOL_ICMP, PROTOCOL_TCP, PROTOCOL_UDP};
use crate::routing::RouteTable;

/// The link layer refused an outbound frame. Logged and otherwise ignored;
/// the router never retries a send.
#[derive(Debug, Error)]
#[error("link layer rejected frame")]
pub struct SendError;

/// Outbound seam to the link-layer shim.
///
/// `send_frame` hands over one complete Ethernet frame for the named
/// interface. It must not retain the borrow and is expected to be a fast,
/// bounded write.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: &[u8], iface: &str) -> Result<(), SendError>;
}

/// The router core: interface registry, route table, ARP subsystem and the
/// dispatch logic over them.
///
/// `handle_frame` may be called from any number of I/O threads while one
/// timer thread calls `tick`; the only shared mutable state is the ARP
/// subsystem behind its mutex.
pub struct Router {
    interfaces: InterfaceTable,
    routes: RouteTable,
    arp: ArpCache,
    link: Arc<dyn FrameSink>,
    started: Instant,
}

impl Router {
    pub fn new(interfaces: InterfaceTable, routes: RouteTable, link: Arc<dyn FrameSink>) -> Self {
        for iface in interfaces.iter() {
            log::info!("iface {}", iface);
        }
        for route in routes.iter() {
            log::info!("route {}", route);
        }

        Router {
            interfaces,
            routes,
            arp: ArpCache::new(),
            link,
            started: Instant::now(),
        }
    }

    /// The ARP subsystem, exposed for inspection and seeding.
    pub fn arp(&self) -> &ArpCache {
        &self.arp
    }

    /// Seconds since the router was created. All ARP timestamps are
    /// relative to this clock.
    fn now(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Process one inbound frame from the link layer.
    ///
    /// The buffer stays owned by the caller; anything the router defers is
    /// copied before this returns.
    pub fn handle_frame(&self, frame: &[u8], ingress: &str) {
        let eth = match EthernetFrame::parse(frame) {
            Ok(eth) => eth,
            Err(err) => {
                log::debug!("dropping frame on {}: {}", ingress, err);
                return;
            }
        };

        match eth.ethertype {
            ETHERTYPE_ARP => self.handle_arp(&eth, ingress),
            ETHERTYPE_IPV4 => self.handle_ipv4(frame, &eth, ingress),
            other => {
                log::trace!("dropping ethertype {:#06x} on {}", other, ingress);
            }
        }
    }

    /// One sweeper pass at the internal clock. Called by the 1-Hz timer
    /// thread; also safe to call from the embedding process.
    pub fn tick(&self) {
        self.tick_at(self.now());
    }

    /// One sweeper pass at an explicit timestamp (seconds since start).
    pub fn tick_at(&self, now: u64) {
        for action in self.arp.sweep(now) {
            self.run_arp_action(action);
        }
    }

    /// Spawn the 1-Hz sweeper thread driving ARP aging and
    /// retransmission. Runs until the process exits.
    pub fn start_sweeper(self: &Arc<Self>) -> io::Result<thread::JoinHandle<()>> {
        let router = Arc::clone(self);
        thread::Builder::new()
            .name("arp-sweeper".into())
            .spawn(move || loop {
                thread::sleep(Duration::from_secs(1));
                router.tick();
            })
    }

    fn handle_arp(&self, eth: &EthernetFrame<'_>, ingress: &str) {
        let packet = match ArpPacket::parse(eth.payload) {
            Ok(packet) => packet,
            Err(err) => {
                log::debug!("ARP: dropping packet on {}: {}", ingress, err);
                return;
            }
        };

        let iface = match self.interfaces.by_name(ingress) {
            Some(iface) => iface,
            None => {
                log::warn!("ARP: frame on unknown interface {}", ingress);
                return;
            }
        };

        match packet.operation {
            ARP_OP_REQUEST if packet.target_ip == iface.ip => {
                log::debug!(
                    "ARP: request for {} from {} on {}",
                    packet.target_ip,
                    packet.sender_ip,
                    ingress
                );
                let reply = ArpPacket::build(
                    ARP_OP_REPLY,
                    &iface.addr,
                    iface.ip,
                    &packet.sender_mac,
                    packet.sender_ip,
                );
                let frame =
                    EthernetFrame::build(&iface.addr, &packet.sender_mac, ETHERTYPE_ARP, &reply);
                self.transmit(&frame, ingress);
            }
            ARP_OP_REQUEST => {
                // Request for somebody else on the segment.
            }
            ARP_OP_REPLY => {
                log::debug!("ARP: reply {} on {}", packet.sender_ip, ingress);
                let released =
                    self.arp
                        .insert(packet.sender_ip, packet.sender_mac, self.now());
                for pending in released {
                    self.send_released(pending, packet.sender_mac);
                }
            }
            op => {
                log::debug!("ARP: dropping packet with op {} on {}", op, ingress);
            }
        }
    }

    /// Send a frame whose next hop just resolved: fill in the Ethernet
    /// addresses and put it on its egress interface.
    fn send_released(&self, pending: PendingFrame, dst_mac: [u8; 6]) {
        let egress = match self.interfaces.by_name(&pending.iface) {
            Some(iface) => iface,
            None => return,
        };

        let mut frame = pending.bytes;
        if frame.len() < ETHERNET_HEADER_SIZE {
            return;
        }
        frame[0..6].copy_from_slice(&dst_mac);
        frame[6..12].copy_from_slice(&egress.addr);
        self.transmit(&frame, &pending.iface);
    }

    fn handle_ipv4(&self, raw: &[u8], eth: &EthernetFrame<'_>, ingress: &str) {
        let packet = match Ipv4Packet::parse(eth.payload) {
            Ok(packet) => packet,
            Err(err) => {
                log::debug!("IP: dropping packet on {}: {}", ingress, err);
                return;
            }
        };

        match self.interfaces.by_ip(packet.dst_ip) {
            Some(local) => self.deliver_local(raw, &packet, local.ip, ingress),
            None => self.forward(raw, &packet, ingress),
        }
    }

    /// A packet addressed to one of our interfaces: answer echo requests,
    /// refuse TCP/UDP with port-unreachable, drop the rest.
    fn deliver_local(&self, raw: &[u8], packet: &Ipv4Packet<'_>, local_ip: Ipv4Addr, ingress: &str) {
        let ingress_if = match self.interfaces.by_name(ingress) {
            Some(iface) => iface,
            None => return,
        };

        match packet.protocol {
            PROTOCOL_ICMP => {
                let icmp = match IcmpPacket::parse(packet.payload) {
                    Ok(icmp) => icmp,
                    Err(err) => {
                        log::debug!("ICMP: dropping packet from {}: {}", packet.src_ip, err);
                        return;
                    }
                };
                if icmp.icmp_type != ICMP_ECHO_REQUEST {
                    log::debug!(
                        "ICMP: ignoring type {} from {}",
                        icmp.icmp_type,
                        packet.src_ip
                    );
                    return;
                }
                log::debug!("ICMP: echo request from {}", packet.src_ip);
                if let Some(reply) = icmp::build_echo_reply(raw, &ingress_if.addr) {
                    self.transmit(&reply, ingress);
                }
            }
            PROTOCOL_TCP | PROTOCOL_UDP => {
                log::debug!(
                    "IP: refusing transport {} from {} with port-unreachable",
                    packet.protocol,
                    packet.src_ip
                );
                if let Some(frame) = icmp::build_error(
                    raw,
                    ICMP_DEST_UNREACHABLE,
                    CODE_PORT_UNREACHABLE,
                    local_ip,
                    &ingress_if.addr,
                ) {
                    self.transmit(&frame, ingress);
                }
            }
            other => {
                log::debug!("IP: dropping protocol {} addressed to us", other);
            }
        }
    }

    /// Forward a transit packet: TTL, route lookup, ARP resolution. The
    /// inbound buffer is never modified; all rewriting happens on an owned
    /// copy.
    fn forward(&self, raw: &[u8], packet: &Ipv4Packet<'_>, ingress: &str) {
        let ingress_if = match self.interfaces.by_name(ingress) {
            Some(iface) => iface,
            None => return,
        };

        if packet.ttl <= 1 {
            log::debug!(
                "IP: TTL expired for {} -> {}",
                packet.src_ip,
                packet.dst_ip
            );
            if let Some(frame) = icmp::build_error(
                raw,
                ICMP_TIME_EXCEEDED,
                0,
                ingress_if.ip,
                &ingress_if.addr,
            ) {
                self.transmit(&frame, ingress);
            }
            return;
        }

        let route = match self.routes.lookup(packet.dst_ip) {
            Some(route) => route,
            None => {
                log::debug!("IP: no route to {}", packet.dst_ip);
                if let Some(frame) = icmp::build_error(
                    raw,
                    ICMP_DEST_UNREACHABLE,
                    CODE_NET_UNREACHABLE,
                    ingress_if.ip,
                    &ingress_if.addr,
                ) {
                    self.transmit(&frame, ingress);
                }
                return;
            }
        };

        let mut frame = raw.to_vec();
        let header =
            &mut frame[ETHERNET_HEADER_SIZE..ETHERNET_HEADER_SIZE + packet.header_len()];
        header[8] -= 1; // TTL
        ipv4::write_checksum(header);

        // An on-link route carries no gateway; resolve the destination
        // itself.
        let next_hop = if route.gateway.is_unspecified() {
            packet.dst_ip
        } else {
            route.gateway
        };

        match self.arp.lookup(next_hop) {
            Some(mac) => {
                let egress = match self.interfaces.by_name(&route.iface) {
                    Some(iface) => iface,
                    None => return,
                };
                frame[0..6].copy_from_slice(&mac);
                frame[6..12].copy_from_slice(&egress.addr);
                self.transmit(&frame, &route.iface);
            }
            None => {
                log::debug!("IP: next hop {} unresolved, queueing frame", next_hop);
                if let Some(action) = self.arp.queue(next_hop, &frame, &route.iface, self.now())
                {
                    self.run_arp_action(action);
                }
            }
        }
    }

    /// Carry out work the ARP subsystem recorded under its lock.
    fn run_arp_action(&self, action: SweepAction) {
        match action {
            SweepAction::Transmit { ip, iface } => {
                let egress = match self.interfaces.by_name(&iface) {
                    Some(egress) => egress,
                    None => return,
                };
                log::debug!("ARP: broadcasting request for {} on {}", ip, iface);
                let packet =
                    ArpPacket::build(ARP_OP_REQUEST, &egress.addr, egress.ip, &[0; 6], ip);
                let frame =
                    EthernetFrame::build(&egress.addr, &BROADCAST_MAC, ETHERTYPE_ARP, &packet);
                self.transmit(&frame, &iface);
            }
            SweepAction::Fail { packets } => {
                for pending in packets {
                    self.reject_unreachable(pending);
                }
            }
        }
    }

    /// Resolution gave up on a queued frame: tell its original sender the
    /// host is unreachable.
    fn reject_unreachable(&self, pending: PendingFrame) {
        let iface = match self.interfaces.by_name(&pending.iface) {
            Some(iface) => iface,
            None => return,
        };
        log::debug!(
            "ARP: resolution failed, rejecting queued frame on {}",
            pending.iface
        );
        if let Some(frame) = icmp::build_error(
            &pending.bytes,
            ICMP_DEST_UNREACHABLE,
            CODE_HOST_UNREACHABLE,
            iface.ip,
            &iface.addr,
        ) {
            self.transmit(&frame, &pending.iface);
        }
    }

    fn transmit(&self, frame: &[u8], iface: &str) {
        if let Err(err) = self.link.send_frame(frame, iface) {
            log::warn!("link: failed to send {} bytes on {}: {}", frame.len(), iface, err);
        }
    }
}
