//! Static routing table with longest-prefix-match lookup

use std::fmt;
use std::net::Ipv4Addr;

/// One static route. A gateway of `0.0.0.0` marks an on-link destination.
#[derive(Debug, Clone)]
pub struct Route {
    /// Destination network
    pub dest: Ipv4Addr,
    /// Network mask
    pub mask: Ipv4Addr,
    /// Next-hop gateway, or `0.0.0.0` for on-link
    pub gateway: Ipv4Addr,
    /// Name of the egress interface
    pub iface: String,
}

impl Route {
    /// Whether `ip` falls inside this route's network.
    fn matches(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(ip) & mask == u32::from(self.dest) & mask
    }

    /// Number of leading 1-bits in the mask.
    fn prefix_len(&self) -> u32 {
        u32::from(self.mask).leading_ones()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} via {} dev {}",
            self.dest,
            self.prefix_len(),
            self.gateway,
            self.iface
        )
    }
}

/// The routing table, read-only after startup.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        RouteTable { routes }
    }

    /// All routes in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Longest-prefix-match lookup.
    ///
    /// Scans every entry; among the networks containing `dst` the longest
    /// mask wins, with ties broken by table order. `None` means the
    /// destination is unrouteable.
    pub fn lookup(&self, dst: Ipv4Addr) -> Option<&Route> {
        let mut best: Option<&Route> = None;
        for route in &self.routes {
            if !route.matches(dst) {
                continue;
            }
            if best.map_or(true, |b| route.prefix_len() > b.prefix_len()) {
                best = Some(route);
            }
        }
        best
    }
}
