//! ARP packet parsing and construction
//!
//! Implements RFC 826 for IPv4-to-Ethernet address resolution. The cache
//! and pending-request machinery live in [`crate::arpcache`].

use std::net::Ipv4Addr;

use crate::ParseError;

/// ARP hardware type for Ethernet.
pub const ARP_HTYPE_ETHERNET: u16 = 1;

/// ARP protocol type for IPv4.
pub const ARP_PTYPE_IPV4: u16 = 0x0800;

/// ARP operation: request.
pub const ARP_OP_REQUEST: u16 = 1;

/// ARP operation: reply.
pub const ARP_OP_REPLY: u16 = 2;

/// ARP packet size for Ethernet/IPv4.
pub const ARP_PACKET_SIZE: usize = 28;

/// Parsed ARP packet.
#[derive(Debug)]
pub struct ArpPacket {
    /// Operation (1 = request, 2 = reply)
    pub operation: u16,
    /// Sender hardware address (MAC)
    pub sender_mac: [u8; 6],
    /// Sender protocol address (IP)
    pub sender_ip: Ipv4Addr,
    /// Target hardware address (MAC)
    pub target_mac: [u8; 6],
    /// Target protocol address (IP)
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Parse an ARP packet from raw bytes.
    ///
    /// Only Ethernet/IPv4 ARP is accepted; anything else is rejected with
    /// the reason.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < ARP_PACKET_SIZE {
            return Err(ParseError::Truncated);
        }

        let htype = u16::from_be_bytes([data[0], data[1]]);
        let ptype = u16::from_be_bytes([data[2], data[3]]);
        let hlen = data[4];
        let plen = data[5];
        let operation = u16::from_be_bytes([data[6], data[7]]);

        if htype != ARP_HTYPE_ETHERNET {
            return Err(ParseError::BadHardwareType);
        }
        if ptype != ARP_PTYPE_IPV4 || hlen != 6 || plen != 4 {
            return Err(ParseError::BadProtocolType);
        }

        let sender_mac = [data[8], data[9], data[10], data[11], data[12], data[13]];
        let sender_ip = Ipv4Addr::from([data[14], data[15], data[16], data[17]]);
        let target_mac = [data[18], data[19], data[20], data[21], data[22], data[23]];
        let target_ip = Ipv4Addr::from([data[24], data[25], data[26], data[27]]);

        Ok(ArpPacket {
            operation,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }

    /// Build an ARP packet.
    pub fn build(
        operation: u16,
        sender_mac: &[u8; 6],
        sender_ip: Ipv4Addr,
        target_mac: &[u8; 6],
        target_ip: Ipv4Addr,
    ) -> Vec<u8> {
        let mut packet = Vec::with_capacity(ARP_PACKET_SIZE);

        packet.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
        packet.extend_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
        packet.push(6);
        packet.push(4);
        packet.extend_from_slice(&operation.to_be_bytes());
        packet.extend_from_slice(sender_mac);
        packet.extend_from_slice(&sender_ip.octets());
        packet.extend_from_slice(target_mac);
        packet.extend_from_slice(&target_ip.octets());

        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_request() {
        let packet = ArpPacket::build(
            ARP_OP_REQUEST,
            &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
            Ipv4Addr::new(10, 0, 1, 1),
            &[0; 6],
            Ipv4Addr::new(10, 0, 1, 2),
        );

        assert_eq!(packet.len(), ARP_PACKET_SIZE);
        let parsed = ArpPacket::parse(&packet).unwrap();
        assert_eq!(parsed.operation, ARP_OP_REQUEST);
        assert_eq!(parsed.sender_mac, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(parsed.sender_ip, Ipv4Addr::new(10, 0, 1, 1));
        assert_eq!(parsed.target_mac, [0; 6]);
        assert_eq!(parsed.target_ip, Ipv4Addr::new(10, 0, 1, 2));
    }

    #[test]
    fn parse_rejects_non_ethernet_hardware() {
        let mut packet = ArpPacket::build(
            ARP_OP_REQUEST,
            &[0; 6],
            Ipv4Addr::UNSPECIFIED,
            &[0; 6],
            Ipv4Addr::UNSPECIFIED,
        );
        packet[1] = 6; // IEEE 802 hardware type
        assert_eq!(
            ArpPacket::parse(&packet).unwrap_err(),
            ParseError::BadHardwareType
        );
    }

    #[test]
    fn parse_rejects_non_ipv4_protocol() {
        let mut packet = ArpPacket::build(
            ARP_OP_REQUEST,
            &[0; 6],
            Ipv4Addr::UNSPECIFIED,
            &[0; 6],
            Ipv4Addr::UNSPECIFIED,
        );
        packet[2] = 0x86;
        packet[3] = 0xDD;
        assert_eq!(
            ArpPacket::parse(&packet).unwrap_err(),
            ParseError::BadProtocolType
        );
    }

    #[test]
    fn parse_rejects_truncated() {
        assert_eq!(
            ArpPacket::parse(&[0u8; 27]).unwrap_err(),
            ParseError::Truncated
        );
    }
}
