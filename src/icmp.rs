//! ICMP parsing and construction
//!
//! Implements ICMP echo (RFC 792) plus the destination-unreachable and
//! time-exceeded messages the router originates. The builders work on the
//! complete original Ethernet frame and return a complete reply frame; the
//! dispatcher decides the source addresses.

use std::net::Ipv4Addr;

use crate::ethernet::{ETHERNET_HEADER_SIZE, ETHERTYPE_IPV4};
use crate::ipv4::{self, IPV4_HEADER_MIN_SIZE, DEFAULT_TTL, PROTOCOL_ICMP};
use crate::ParseError;

/// ICMP type: Echo Reply.
pub const ICMP_ECHO_REPLY: u8 = 0;

/// ICMP type: Destination Unreachable.
pub const ICMP_DEST_UNREACHABLE: u8 = 3;

/// ICMP type: Echo Request.
pub const ICMP_ECHO_REQUEST: u8 = 8;

/// ICMP type: Time Exceeded.
pub const ICMP_TIME_EXCEEDED: u8 = 11;

/// Destination-unreachable code: network unreachable.
pub const CODE_NET_UNREACHABLE: u8 = 0;

/// Destination-unreachable code: host unreachable.
pub const CODE_HOST_UNREACHABLE: u8 = 1;

/// Destination-unreachable code: port unreachable.
pub const CODE_PORT_UNREACHABLE: u8 = 3;

/// ICMP header size (echo and type-3/11 alike).
pub const ICMP_HEADER_SIZE: usize = 8;

/// Bytes of the offending datagram quoted in a type-3/11 message:
/// the IP header plus the first 8 payload bytes.
pub const ICMP_DATA_SIZE: usize = 28;

/// On-wire size of an originated error frame:
/// Ethernet + IP + ICMP header + quotation.
const ERROR_FRAME_SIZE: usize =
    ETHERNET_HEADER_SIZE + IPV4_HEADER_MIN_SIZE + ICMP_HEADER_SIZE + ICMP_DATA_SIZE;

/// Parsed ICMP message.
#[derive(Debug)]
pub struct IcmpPacket<'a> {
    /// ICMP type
    pub icmp_type: u8,
    /// ICMP code
    pub code: u8,
    /// Checksum as received
    pub checksum: u16,
    /// Identifier (echo request/reply)
    pub identifier: u16,
    /// Sequence number (echo request/reply)
    pub sequence: u16,
    /// Payload after the 8-byte header
    pub payload: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    /// Parse an ICMP message from raw bytes.
    ///
    /// The checksum is verified over the entire message: summing a block
    /// that includes its own correct complement yields zero.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < ICMP_HEADER_SIZE {
            return Err(ParseError::Truncated);
        }

        if ipv4::internet_checksum(data) != 0 {
            return Err(ParseError::BadChecksum);
        }

        Ok(IcmpPacket {
            icmp_type: data[0],
            code: data[1],
            checksum: u16::from_be_bytes([data[2], data[3]]),
            identifier: u16::from_be_bytes([data[4], data[5]]),
            sequence: u16::from_be_bytes([data[6], data[7]]),
            payload: &data[ICMP_HEADER_SIZE..],
        })
    }
}

/// Build an echo reply frame from a validated echo request frame.
///
/// The whole request is copied so the reply carries the full echo payload,
/// then type, checksums, addresses and TTL are rewritten in place. Returns
/// `None` if the original is too short to be an IPv4 echo frame.
pub fn build_echo_reply(original: &[u8], src_mac: &[u8; 6]) -> Option<Vec<u8>> {
    if original.len() < ETHERNET_HEADER_SIZE + IPV4_HEADER_MIN_SIZE {
        return None;
    }

    let header_len = ((original[ETHERNET_HEADER_SIZE] & 0x0F) as usize) * 4;
    let total_length =
        u16::from_be_bytes([original[ETHERNET_HEADER_SIZE + 2], original[ETHERNET_HEADER_SIZE + 3]])
            as usize;
    let frame_len = ETHERNET_HEADER_SIZE + total_length;
    if total_length < header_len + ICMP_HEADER_SIZE || original.len() < frame_len {
        return None;
    }

    let mut reply = original[..frame_len].to_vec();

    // Ethernet: back at the sender.
    let sender_mac: [u8; 6] = original[6..12].try_into().ok()?;
    reply[0..6].copy_from_slice(&sender_mac);
    reply[6..12].copy_from_slice(src_mac);
    reply[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    // ICMP: request becomes reply, checksum over the full message.
    let icmp_start = ETHERNET_HEADER_SIZE + header_len;
    reply[icmp_start] = ICMP_ECHO_REPLY;
    reply[icmp_start + 1] = 0;
    reply[icmp_start + 2] = 0;
    reply[icmp_start + 3] = 0;
    let sum = ipv4::internet_checksum(&reply[icmp_start..]);
    reply[icmp_start + 2..icmp_start + 4].copy_from_slice(&sum.to_be_bytes());

    // IP: swap src/dst, fresh TTL, fresh header checksum.
    let (src, dst) = (
        original[ETHERNET_HEADER_SIZE + 12..ETHERNET_HEADER_SIZE + 16].to_vec(),
        original[ETHERNET_HEADER_SIZE + 16..ETHERNET_HEADER_SIZE + 20].to_vec(),
    );
    reply[ETHERNET_HEADER_SIZE + 12..ETHERNET_HEADER_SIZE + 16].copy_from_slice(&dst);
    reply[ETHERNET_HEADER_SIZE + 16..ETHERNET_HEADER_SIZE + 20].copy_from_slice(&src);
    reply[ETHERNET_HEADER_SIZE + 8] = DEFAULT_TTL;
    ipv4::write_checksum(&mut reply[ETHERNET_HEADER_SIZE..ETHERNET_HEADER_SIZE + header_len]);

    Some(reply)
}

/// Build a type-3 or type-11 error frame quoting the offending datagram.
///
/// `src_ip` follows the dispatcher's source-address policy; `src_mac` is
/// the MAC of the interface the error leaves on. The quotation is the
/// original IP header plus the first 8 payload bytes, zero-padded if the
/// original frame is shorter. Returns `None` if there is no IP header to
/// quote.
pub fn build_error(
    original: &[u8],
    icmp_type: u8,
    code: u8,
    src_ip: Ipv4Addr,
    src_mac: &[u8; 6],
) -> Option<Vec<u8>> {
    if original.len() < ETHERNET_HEADER_SIZE + IPV4_HEADER_MIN_SIZE {
        return None;
    }

    let mut frame = vec![0u8; ERROR_FRAME_SIZE];

    // Ethernet: back at the sender.
    frame[0..6].copy_from_slice(&original[6..12]);
    frame[6..12].copy_from_slice(src_mac);
    frame[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    // IP: this router originates the error.
    let orig_src = Ipv4Addr::from([
        original[ETHERNET_HEADER_SIZE + 12],
        original[ETHERNET_HEADER_SIZE + 13],
        original[ETHERNET_HEADER_SIZE + 14],
        original[ETHERNET_HEADER_SIZE + 15],
    ]);
    ipv4::write_header(
        &mut frame[ETHERNET_HEADER_SIZE..ETHERNET_HEADER_SIZE + IPV4_HEADER_MIN_SIZE],
        (ERROR_FRAME_SIZE - ETHERNET_HEADER_SIZE) as u16,
        DEFAULT_TTL,
        PROTOCOL_ICMP,
        src_ip,
        orig_src,
    );

    // ICMP: header then quotation.
    let icmp_start = ETHERNET_HEADER_SIZE + IPV4_HEADER_MIN_SIZE;
    frame[icmp_start] = icmp_type;
    frame[icmp_start + 1] = code;
    // bytes 2..8 stay zero: checksum, unused, next_mtu

    let quote = &original[ETHERNET_HEADER_SIZE..];
    let quote_len = quote.len().min(ICMP_DATA_SIZE);
    let data_start = icmp_start + ICMP_HEADER_SIZE;
    frame[data_start..data_start + quote_len].copy_from_slice(&quote[..quote_len]);

    let sum = ipv4::internet_checksum(&frame[icmp_start..]);
    frame[icmp_start + 2..icmp_start + 4].copy_from_slice(&sum.to_be_bytes());

    Some(frame)
}
