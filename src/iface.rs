//! Router interface registry
//!
//! The set of named interfaces is loaded by the embedding process at
//! startup and never changes afterwards, so lookups need no locking.

use std::fmt;
use std::net::Ipv4Addr;

/// One router interface: a name, a MAC and an IPv4 address with netmask.
#[derive(Debug, Clone)]
pub struct Interface {
    /// Interface name, short ASCII (e.g. `eth1`)
    pub name: String,
    /// MAC address
    pub addr: [u8; 6],
    /// IPv4 address
    pub ip: Ipv4Addr,
    /// Netmask
    pub mask: Ipv4Addr,
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.addr;
        write!(
            f,
            "{} {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x} {}/{}",
            self.name,
            m[0],
            m[1],
            m[2],
            m[3],
            m[4],
            m[5],
            self.ip,
            u32::from(self.mask).leading_ones()
        )
    }
}

/// Immutable registry of the router's interfaces, in configuration order.
#[derive(Debug, Default)]
pub struct InterfaceTable {
    interfaces: Vec<Interface>,
}

impl InterfaceTable {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        InterfaceTable { interfaces }
    }

    /// Look up an interface by name.
    pub fn by_name(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| iface.name == name)
    }

    /// The interface that owns `ip`, if any. A hit means the packet is
    /// addressed to the router itself.
    pub fn by_ip(&self, ip: Ipv4Addr) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| iface.ip == ip)
    }

    /// All interfaces in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }
}
