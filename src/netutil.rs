//! Address derivation for node host subnets
//!
//! Every node subnet reserves its first few host addresses for the
//! infrastructure ports OVN creates on the node:
//! - `.1` the gateway (router port) address
//! - `.2` the management port address
//! - `.3` the hybrid overlay address (only when that feature is enabled)
//!
//! Router port MACs are derived from the gateway address so they are stable
//! across restarts without being stored anywhere.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;

/// A 48-bit Ethernet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Returns `true` for IPv6 subnets
pub fn is_ipv6(subnet: &IpNet) -> bool {
    matches!(subnet, IpNet::V6(_))
}

/// Offset the network address of `subnet` by `offset`, keeping its prefix length
fn host_at(subnet: &IpNet, offset: u32) -> IpNet {
    let addr = match subnet.network() {
        IpAddr::V4(net) => IpAddr::V4(Ipv4Addr::from(u32::from(net).wrapping_add(offset))),
        IpAddr::V6(net) => {
            IpAddr::V6(Ipv6Addr::from(u128::from(net).wrapping_add(offset as u128)))
        }
    };
    // prefix length comes from a valid IpNet, so this cannot fail
    IpNet::new(addr, subnet.prefix_len()).unwrap_or(*subnet)
}

/// Gateway interface address of a node subnet (first host, subnet prefix)
pub fn gateway_if_addr(subnet: &IpNet) -> IpNet {
    host_at(subnet, 1)
}

/// Management port address of a node subnet (second host, subnet prefix)
pub fn management_if_addr(subnet: &IpNet) -> IpNet {
    host_at(subnet, 2)
}

/// Hybrid overlay address of a node subnet (third host, subnet prefix)
pub fn hybrid_overlay_if_addr(subnet: &IpNet) -> IpNet {
    host_at(subnet, 3)
}

/// Derive a MAC address from an IP: `0a:58` followed by the last four
/// bytes of the address
pub fn ip_to_hw_addr(ip: IpAddr) -> MacAddr {
    let tail: [u8; 4] = match ip {
        IpAddr::V4(v4) => v4.octets(),
        IpAddr::V6(v6) => {
            let o = v6.octets();
            [o[12], o[13], o[14], o[15]]
        }
    };
    MacAddr([0x0a, 0x58, tail[0], tail[1], tail[2], tail[3]])
}

/// IPv6 link-local address for a MAC (modified EUI-64)
pub fn hw_addr_to_ipv6_lla(mac: MacAddr) -> Ipv6Addr {
    let m = mac.0;
    Ipv6Addr::from([
        0xfe,
        0x80,
        0,
        0,
        0,
        0,
        0,
        0,
        m[0] ^ 0x02,
        m[1],
        m[2],
        0xff,
        0xfe,
        m[3],
        m[4],
        m[5],
    ])
}

/// Router port MAC for a set of node subnets: taken from the first IPv4
/// subnet's gateway, or from the first IPv6 subnet's gateway if the node is
/// IPv6-only. Returns `None` for an empty list.
pub fn router_port_mac(subnets: &[IpNet]) -> Option<MacAddr> {
    subnets
        .iter()
        .find(|s| !is_ipv6(s))
        .or_else(|| subnets.iter().find(|s| is_ipv6(s)))
        .map(|s| ip_to_hw_addr(gateway_if_addr(s).addr()))
}

/// Join subnets into a comma-separated string for log and error messages
pub fn join_subnets(subnets: &[IpNet]) -> String {
    subnets
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_reserved_addresses_v4() {
        let subnet = net("10.244.0.0/24");
        assert_eq!(gateway_if_addr(&subnet).to_string(), "10.244.0.1/24");
        assert_eq!(management_if_addr(&subnet).to_string(), "10.244.0.2/24");
        assert_eq!(hybrid_overlay_if_addr(&subnet).to_string(), "10.244.0.3/24");
    }

    #[test]
    fn test_reserved_addresses_v6() {
        let subnet = net("fd00:10:244:1::/64");
        assert_eq!(gateway_if_addr(&subnet).to_string(), "fd00:10:244:1::1/64");
        assert_eq!(management_if_addr(&subnet).to_string(), "fd00:10:244:1::2/64");
    }

    #[test]
    fn test_ip_to_hw_addr() {
        let mac = ip_to_hw_addr("10.244.0.1".parse().unwrap());
        assert_eq!(mac.to_string(), "0a:58:0a:f4:00:01");

        let mac = ip_to_hw_addr("fd00::a:b0c:1".parse().unwrap());
        assert_eq!(mac.to_string(), "0a:58:0b:0c:00:01");
    }

    #[test]
    fn test_hw_addr_to_ipv6_lla() {
        let mac = MacAddr([0x0a, 0x58, 0x0a, 0xf4, 0x00, 0x01]);
        assert_eq!(
            hw_addr_to_ipv6_lla(mac).to_string(),
            "fe80::858:aff:fef4:1"
        );
    }

    #[test]
    fn test_router_port_mac_prefers_ipv4() {
        let subnets = vec![net("fd00:10:244:1::/64"), net("10.244.1.0/24")];
        let mac = router_port_mac(&subnets).unwrap();
        assert_eq!(mac.to_string(), "0a:58:0a:f4:01:01");
    }

    #[test]
    fn test_router_port_mac_ipv6_only() {
        let subnets = vec![net("fd00:10:244:1::/64")];
        let mac = router_port_mac(&subnets).unwrap();
        assert_eq!(mac.to_string(), "0a:58:00:00:00:01");
        assert!(router_port_mac(&[]).is_none());
    }
}
