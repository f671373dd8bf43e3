//! Address range to CIDR deaggregation.
//!
//! Delegation files describe IPv4 blocks as a first address plus a host count,
//! which need not be a power of two nor aligned. IPv6 blocks carry a prefix
//! length in the count column instead.

use ipnet::{IpNet, Ipv4Subnets, Ipv6Net, Ipv6Subnets};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::ParseError;

/// Split the inclusive range `[start, end]` into the minimal list of aligned
/// prefixes whose union is exactly that range, in ascending order.
///
/// # Examples
/// ```
/// use rirdex::cidr::deaggregate;
///
/// let nets = deaggregate("1.0.0.0".parse().unwrap(), "1.0.2.255".parse().unwrap()).unwrap();
/// let nets: Vec<String> = nets.iter().map(|n| n.to_string()).collect();
/// assert_eq!(nets, ["1.0.0.0/23", "1.0.2.0/24"]);
/// ```
pub fn deaggregate(start: IpAddr, end: IpAddr) -> Result<Vec<IpNet>, ParseError> {
    match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => {
            if s > e {
                return Err(ParseError::EmptyRange);
            }
            Ok(Ipv4Subnets::new(s, e, 0).map(IpNet::V4).collect())
        }
        (IpAddr::V6(s), IpAddr::V6(e)) => {
            if s > e {
                return Err(ParseError::EmptyRange);
            }
            Ok(Ipv6Subnets::new(s, e, 0).map(IpNet::V6).collect())
        }
        _ => Err(ParseError::FamilyMismatch(end.to_string())),
    }
}

/// Prefixes covering an IPv4 block of `count` hosts starting at `start`.
pub fn ipv4_block(start: Ipv4Addr, count: u64) -> Result<Vec<IpNet>, ParseError> {
    if count == 0 {
        return Err(ParseError::EmptyRange);
    }

    let last = u64::from(u32::from(start)) + count - 1;
    let last = u32::try_from(last).map_err(|_| ParseError::RangeOverflow)?;

    deaggregate(IpAddr::V4(start), IpAddr::V4(Ipv4Addr::from(last)))
}

/// The single prefix of an IPv6 block whose count column is a prefix length.
pub fn ipv6_block(start: Ipv6Addr, prefix_len: u64) -> Result<IpNet, ParseError> {
    let len = u8::try_from(prefix_len).map_err(|_| ParseError::InvalidPrefixLength(prefix_len))?;
    Ipv6Net::new(start, len)
        .map(IpNet::V6)
        .map_err(|_| ParseError::InvalidPrefixLength(prefix_len))
}

/// Check whether any prefix in the list contains the address.
pub fn any_contains(prefixes: &[IpNet], addr: IpAddr) -> bool {
    prefixes.iter().any(|net| net.contains(&addr))
}
