//! End-to-end scenarios: literal byte streams in, captured frames out.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use ipv4_router::arp::{ArpPacket, ARP_OP_REPLY, ARP_OP_REQUEST};
use ipv4_router::ethernet::{EthernetFrame, BROADCAST_MAC, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use ipv4_router::icmp;
use ipv4_router::ipv4::{self, Ipv4Packet, PROTOCOL_ICMP, PROTOCOL_UDP};
use ipv4_router::{
    FrameSink, Interface, InterfaceTable, Route, RouteTable, Router, SendError,
};

const ETH1_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];
const ETH2_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x02];
const HOST_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x64];
const GW_MAC: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];

const ETH1_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);
const ETH2_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 254);
const HOST_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 100);
const GW_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 1);
const FAR_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 5);

/// Captures everything the router sends.
#[derive(Default)]
struct CaptureSink {
    frames: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FrameSink for CaptureSink {
    fn send_frame(&self, frame: &[u8], iface: &str) -> Result<(), SendError> {
        self.frames
            .lock()
            .unwrap()
            .push((iface.to_string(), frame.to_vec()));
        Ok(())
    }
}

impl CaptureSink {
    fn take(&self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut *self.frames.lock().unwrap())
    }
}

fn interfaces() -> InterfaceTable {
    InterfaceTable::new(vec![
        Interface {
            name: "eth1".into(),
            addr: ETH1_MAC,
            ip: ETH1_IP,
            mask: Ipv4Addr::new(255, 255, 255, 0),
        },
        Interface {
            name: "eth2".into(),
            addr: ETH2_MAC,
            ip: ETH2_IP,
            mask: Ipv4Addr::new(255, 255, 255, 0),
        },
    ])
}

fn routes() -> RouteTable {
    RouteTable::new(vec![Route {
        dest: Ipv4Addr::new(192, 168, 2, 0),
        mask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: GW_IP,
        iface: "eth2".into(),
    }])
}

fn router_with(routes: RouteTable) -> (Arc<Router>, Arc<CaptureSink>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let sink = Arc::new(CaptureSink::default());
    let router = Arc::new(Router::new(interfaces(), routes, sink.clone()));
    (router, sink)
}

/// An IPv4 frame from the host toward `dst_ip`, ICMP echo request payload.
fn echo_request_frame(dst_ip: Ipv4Addr, ttl: u8, payload: &[u8]) -> Vec<u8> {
    let mut icmp = vec![icmp::ICMP_ECHO_REQUEST, 0, 0, 0, 0x12, 0x34, 0, 7];
    icmp.extend_from_slice(payload);
    let sum = ipv4::internet_checksum(&icmp);
    icmp[2..4].copy_from_slice(&sum.to_be_bytes());
    transport_frame(dst_ip, ttl, PROTOCOL_ICMP, &icmp)
}

/// An IPv4 frame from the host carrying an arbitrary transport payload.
fn transport_frame(dst_ip: Ipv4Addr, ttl: u8, protocol: u8, payload: &[u8]) -> Vec<u8> {
    let mut ip = vec![0u8; 20];
    ipv4::write_header(
        &mut ip,
        (20 + payload.len()) as u16,
        ttl,
        protocol,
        HOST_IP,
        dst_ip,
    );
    ip.extend_from_slice(payload);
    EthernetFrame::build(&HOST_MAC, &ETH1_MAC, ETHERTYPE_IPV4, &ip)
}

/// Parse an outbound frame down to its ICMP type and code, verifying both
/// checksums on the way.
fn icmp_type_code(frame: &[u8]) -> (u8, u8, Ipv4Addr, Ipv4Addr) {
    let eth = EthernetFrame::parse(frame).unwrap();
    let ip = Ipv4Packet::parse(eth.payload).unwrap();
    let msg = icmp::IcmpPacket::parse(ip.payload).unwrap();
    (msg.icmp_type, msg.code, ip.src_ip, ip.dst_ip)
}

#[test]
fn arp_request_for_our_address_gets_a_reply() {
    let (router, sink) = router_with(routes());

    let request = ArpPacket::build(ARP_OP_REQUEST, &HOST_MAC, HOST_IP, &[0; 6], ETH1_IP);
    let frame = EthernetFrame::build(&HOST_MAC, &BROADCAST_MAC, ETHERTYPE_ARP, &request);
    router.handle_frame(&frame, "eth1");

    let sent = sink.take();
    assert_eq!(sent.len(), 1);
    let (iface, frame) = &sent[0];
    assert_eq!(iface, "eth1");

    let eth = EthernetFrame::parse(frame).unwrap();
    assert_eq!(eth.src_mac, ETH1_MAC);
    assert_eq!(eth.dst_mac, HOST_MAC);

    let reply = ArpPacket::parse(eth.payload).unwrap();
    assert_eq!(reply.operation, ARP_OP_REPLY);
    assert_eq!(reply.sender_mac, ETH1_MAC);
    assert_eq!(reply.sender_ip, ETH1_IP);
    assert_eq!(reply.target_mac, HOST_MAC);
    assert_eq!(reply.target_ip, HOST_IP);
}

#[test]
fn arp_request_for_another_host_is_ignored() {
    let (router, sink) = router_with(routes());

    let request = ArpPacket::build(ARP_OP_REQUEST, &HOST_MAC, HOST_IP, &[0; 6], HOST_IP);
    let frame = EthernetFrame::build(&HOST_MAC, &BROADCAST_MAC, ETHERTYPE_ARP, &request);
    router.handle_frame(&frame, "eth1");

    assert!(sink.take().is_empty());
}

#[test]
fn echo_request_to_us_is_answered_with_full_payload() {
    let (router, sink) = router_with(routes());

    // Payload well past any fixed header size, so a short copy would show.
    let payload: Vec<u8> = (0..400u16).map(|b| b as u8).collect();
    router.handle_frame(&echo_request_frame(ETH1_IP, 64, &payload), "eth1");

    let sent = sink.take();
    assert_eq!(sent.len(), 1);
    let (iface, frame) = &sent[0];
    assert_eq!(iface, "eth1");

    let eth = EthernetFrame::parse(frame).unwrap();
    assert_eq!(eth.dst_mac, HOST_MAC);
    let ip = Ipv4Packet::parse(eth.payload).unwrap();
    assert_eq!(ip.src_ip, ETH1_IP);
    assert_eq!(ip.dst_ip, HOST_IP);

    let msg = icmp::IcmpPacket::parse(ip.payload).unwrap();
    assert_eq!(msg.icmp_type, icmp::ICMP_ECHO_REPLY);
    assert_eq!(msg.code, 0);
    assert_eq!(msg.payload, &payload[..]);
}

#[test]
fn udp_to_us_gets_port_unreachable() {
    let (router, sink) = router_with(routes());

    router.handle_frame(&transport_frame(ETH1_IP, 64, PROTOCOL_UDP, &[0u8; 16]), "eth1");

    let sent = sink.take();
    assert_eq!(sent.len(), 1);
    let (ty, code, src, dst) = icmp_type_code(&sent[0].1);
    assert_eq!((ty, code), (icmp::ICMP_DEST_UNREACHABLE, icmp::CODE_PORT_UNREACHABLE));
    assert_eq!(src, ETH1_IP, "source is the matched local interface");
    assert_eq!(dst, HOST_IP);
}

#[test]
fn expiring_ttl_triggers_time_exceeded() {
    let (router, sink) = router_with(routes());

    router.handle_frame(&echo_request_frame(FAR_IP, 1, b"hop"), "eth1");

    let sent = sink.take();
    assert_eq!(sent.len(), 1, "no forwarded copy, only the error");
    let (iface, frame) = &sent[0];
    assert_eq!(iface, "eth1");
    let (ty, code, src, dst) = icmp_type_code(frame);
    assert_eq!((ty, code), (icmp::ICMP_TIME_EXCEEDED, 0));
    assert_eq!(src, ETH1_IP, "source is the ingress interface");
    assert_eq!(dst, HOST_IP);
}

#[test]
fn forwarding_with_resolved_next_hop() {
    let (router, sink) = router_with(routes());
    router.arp().insert(GW_IP, GW_MAC, 0);

    router.handle_frame(&echo_request_frame(FAR_IP, 64, b"transit"), "eth1");

    let sent = sink.take();
    assert_eq!(sent.len(), 1);
    let (iface, frame) = &sent[0];
    assert_eq!(iface, "eth2");

    let eth = EthernetFrame::parse(frame).unwrap();
    assert_eq!(eth.dst_mac, GW_MAC);
    assert_eq!(eth.src_mac, ETH2_MAC);

    // Checksum must verify after the TTL rewrite.
    let ip = Ipv4Packet::parse(eth.payload).unwrap();
    assert_eq!(ip.ttl, 63);
    assert_eq!(ip.src_ip, HOST_IP);
    assert_eq!(ip.dst_ip, FAR_IP);
}

#[test]
fn unresolved_next_hop_queues_and_eventually_fails() {
    let (router, sink) = router_with(routes());

    router.handle_frame(&echo_request_frame(FAR_IP, 64, b"parked"), "eth1");

    // No data frame, one immediate broadcast ARP request for the gateway.
    let sent = sink.take();
    assert_eq!(sent.len(), 1);
    let (iface, frame) = &sent[0];
    assert_eq!(iface, "eth2");
    let eth = EthernetFrame::parse(frame).unwrap();
    assert_eq!(eth.dst_mac, BROADCAST_MAC);
    let arp = ArpPacket::parse(eth.payload).unwrap();
    assert_eq!(arp.operation, ARP_OP_REQUEST);
    assert_eq!(arp.sender_ip, ETH2_IP);
    assert_eq!(arp.target_ip, GW_IP);
    assert_eq!(arp.target_mac, [0; 6]);

    // Four retransmissions at one-second spacing.
    for now in 1..=4 {
        router.tick_at(now);
        let sent = sink.take();
        assert_eq!(sent.len(), 1, "tick {} should retransmit once", now);
        let eth = EthernetFrame::parse(&sent[0].1).unwrap();
        assert_eq!(eth.ethertype, ETHERTYPE_ARP);
    }

    // Fifth tick: resolution abandoned, the parked frame's sender gets a
    // host-unreachable.
    router.tick_at(5);
    let sent = sink.take();
    assert_eq!(sent.len(), 1);
    let (ty, code, _, dst) = icmp_type_code(&sent[0].1);
    assert_eq!((ty, code), (icmp::ICMP_DEST_UNREACHABLE, icmp::CODE_HOST_UNREACHABLE));
    assert_eq!(dst, HOST_IP);

    // The queue is empty afterwards.
    router.tick_at(6);
    assert!(sink.take().is_empty());
}

#[test]
fn arp_reply_releases_queued_frames() {
    let (router, sink) = router_with(routes());

    router.handle_frame(&echo_request_frame(FAR_IP, 64, b"waiting"), "eth1");
    sink.take(); // the ARP request

    let reply = ArpPacket::build(ARP_OP_REPLY, &GW_MAC, GW_IP, &ETH2_MAC, ETH2_IP);
    let frame = EthernetFrame::build(&GW_MAC, &ETH2_MAC, ETHERTYPE_ARP, &reply);
    router.handle_frame(&frame, "eth2");

    let sent = sink.take();
    assert_eq!(sent.len(), 1);
    let (iface, frame) = &sent[0];
    assert_eq!(iface, "eth2");
    let eth = EthernetFrame::parse(frame).unwrap();
    assert_eq!(eth.dst_mac, GW_MAC);
    assert_eq!(eth.src_mac, ETH2_MAC);
    let ip = Ipv4Packet::parse(eth.payload).unwrap();
    assert_eq!(ip.ttl, 63);
    assert_eq!(ip.dst_ip, FAR_IP);

    // And the mapping is cached for the next packet.
    router.handle_frame(&echo_request_frame(FAR_IP, 64, b"cached"), "eth1");
    assert_eq!(sink.take().len(), 1);
}

#[test]
fn on_link_route_resolves_the_destination_itself() {
    let on_link = RouteTable::new(vec![Route {
        dest: Ipv4Addr::new(192, 168, 2, 0),
        mask: Ipv4Addr::new(255, 255, 255, 0),
        gateway: Ipv4Addr::UNSPECIFIED,
        iface: "eth2".into(),
    }]);
    let (router, sink) = router_with(on_link);

    router.handle_frame(&echo_request_frame(FAR_IP, 64, b"direct"), "eth1");

    let sent = sink.take();
    assert_eq!(sent.len(), 1);
    let arp = ArpPacket::parse(EthernetFrame::parse(&sent[0].1).unwrap().payload).unwrap();
    assert_eq!(arp.target_ip, FAR_IP, "ARP asks for the destination, not 0.0.0.0");
}

#[test]
fn unrouteable_destination_gets_net_unreachable() {
    let (router, sink) = router_with(RouteTable::default());

    router.handle_frame(
        &echo_request_frame(Ipv4Addr::new(8, 8, 8, 8), 64, b"lost"),
        "eth1",
    );

    let sent = sink.take();
    assert_eq!(sent.len(), 1);
    let (ty, code, src, dst) = icmp_type_code(&sent[0].1);
    assert_eq!((ty, code), (icmp::ICMP_DEST_UNREACHABLE, icmp::CODE_NET_UNREACHABLE));
    assert_eq!(src, ETH1_IP);
    assert_eq!(dst, HOST_IP);
}

#[test]
fn corrupted_ip_checksum_is_dropped_silently() {
    let (router, sink) = router_with(routes());

    let mut frame = echo_request_frame(FAR_IP, 64, b"corrupt");
    frame[22] ^= 0xFF; // TTL byte, checksum now stale
    router.handle_frame(&frame, "eth1");

    assert!(sink.take().is_empty());
}

#[test]
fn unknown_ethertype_is_dropped() {
    let (router, sink) = router_with(routes());

    let frame = EthernetFrame::build(&HOST_MAC, &ETH1_MAC, 0x86DD, &[0u8; 40]);
    router.handle_frame(&frame, "eth1");

    assert!(sink.take().is_empty());
}
