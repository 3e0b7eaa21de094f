//! Ethernet II framing
//!
//! The link emulator hands over whole frames with no FCS and no minimum
//! length, so this is a fixed 14-byte header view plus a builder that
//! lays the header down in front of a payload. Nothing here pads to the
//! 60-byte wire minimum.

use crate::ParseError;

/// Ethernet header size.
pub const ETHERNET_HEADER_SIZE: usize = 14;

/// Broadcast MAC address.
pub const BROADCAST_MAC: [u8; 6] = [0xFF; 6];

/// EtherType for IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// EtherType for ARP.
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// Header view over a received frame.
#[derive(Debug)]
pub struct EthernetFrame<'a> {
    /// Receiver MAC
    pub dst_mac: [u8; 6],
    /// Sender MAC
    pub src_mac: [u8; 6],
    /// Protocol of the payload
    pub ethertype: u16,
    /// Everything after the 14-byte header
    pub payload: &'a [u8],
}

impl<'a> EthernetFrame<'a> {
    /// Split a raw frame into its header fields and payload.
    pub fn parse(data: &'a [u8]) -> Result<Self, ParseError> {
        if data.len() < ETHERNET_HEADER_SIZE {
            return Err(ParseError::Truncated);
        }
        let (header, payload) = data.split_at(ETHERNET_HEADER_SIZE);

        let mut dst_mac = [0u8; 6];
        let mut src_mac = [0u8; 6];
        dst_mac.copy_from_slice(&header[..6]);
        src_mac.copy_from_slice(&header[6..12]);

        Ok(EthernetFrame {
            dst_mac,
            src_mac,
            ethertype: u16::from_be_bytes([header[12], header[13]]),
            payload,
        })
    }

    /// Lay out a complete frame: header in front, payload behind, exactly
    /// `14 + payload.len()` bytes.
    pub fn build(src_mac: &[u8; 6], dst_mac: &[u8; 6], ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; ETHERNET_HEADER_SIZE + payload.len()];

        frame[..6].copy_from_slice(dst_mac);
        frame[6..12].copy_from_slice(src_mac);
        frame[12..14].copy_from_slice(&ethertype.to_be_bytes());
        frame[ETHERNET_HEADER_SIZE..].copy_from_slice(payload);

        frame
    }
}
