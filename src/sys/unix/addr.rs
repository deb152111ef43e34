use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::types::ProtocolStack;

/// Parses a textual address and reconciles it against the requested
/// [`ProtocolStack`], the way the source's `Platform::get_sockaddr` does:
///
/// - an IPv4 literal is only accepted under `IPv4Only` or `DualStack`
///   (`DualStack` maps it to its IPv4-mapped IPv6 form so a single
///   `AF_INET6` socket can still accept it);
/// - an IPv6 literal is accepted under `IPv6Only` or `DualStack` as-is, and
///   rejected under `IPv4Only`;
/// - an empty host binds to `INADDR_ANY`/`in6addr_any` depending on stack.
///
/// Returns `None` on anything the stack can't reconcile (e.g. an IPv6
/// literal requested under `IPv4Only`), mirroring the source's "can't
/// build a sockaddr for this combination" failure path.
pub(crate) fn parse_address(host: &str, port: u16, stack: ProtocolStack) -> Option<SocketAddr> {
    if host.is_empty() {
        return Some(any_address(stack, port));
    }

    if let Ok(v4) = host.parse::<Ipv4Addr>() {
        return match stack {
            ProtocolStack::IPv4Only => Some(SocketAddr::new(IpAddr::V4(v4), port)),
            ProtocolStack::DualStack => {
                Some(SocketAddr::new(IpAddr::V6(v4.to_ipv6_mapped()), port))
            }
            ProtocolStack::IPv6Only => None,
        };
    }

    if let Ok(v6) = host.parse::<Ipv6Addr>() {
        return match stack {
            ProtocolStack::IPv6Only | ProtocolStack::DualStack => {
                Some(SocketAddr::new(IpAddr::V6(v6), port))
            }
            ProtocolStack::IPv4Only => None,
        };
    }

    None
}

fn any_address(stack: ProtocolStack, port: u16) -> SocketAddr {
    match stack {
        ProtocolStack::IPv4Only => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        ProtocolStack::IPv6Only | ProtocolStack::DualStack => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_literal_rejected_under_ipv6_only() {
        assert_eq!(
            parse_address("127.0.0.1", 9000, ProtocolStack::IPv6Only),
            None
        );
    }

    #[test]
    fn v4_literal_maps_to_v6_under_dual_stack() {
        let addr = parse_address("127.0.0.1", 9000, ProtocolStack::DualStack).unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 9000);
    }

    #[test]
    fn v6_literal_rejected_under_ipv4_only() {
        assert_eq!(parse_address("::1", 9000, ProtocolStack::IPv4Only), None);
    }

    #[test]
    fn empty_host_binds_any() {
        let addr = parse_address("", 9000, ProtocolStack::IPv4Only).unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
