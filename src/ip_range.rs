//! IP range arithmetic for bans.
//!
//! Bans are stored as an inclusive `[start, end]` address range. A bare
//! address bans exactly itself, a CIDR bans its whole network. The reverse
//! direction, [`get_ip_range_subnet`], recovers the smallest prefix that
//! describes a stored range for display in the staff UI.
//!
//! IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are folded to IPv4 by
//! [`normalize_ip`] before anything is stored or compared.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

/// Errors from parsing addresses and ranges.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpRangeError {
    /// The address part could not be parsed.
    #[error("invalid IP address: {0:?}")]
    InvalidIp(String),

    /// The prefix length is malformed or out of range for the family.
    #[error("invalid subnet: {0:?}")]
    InvalidSubnet(String),

    /// Range endpoints belong to different address families.
    #[error("address family mismatch between {start} and {end}")]
    FamilyMismatch {
        /// Range start.
        start: IpAddr,
        /// Range end.
        end: IpAddr,
    },
}

/// An inclusive address range within one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    /// First address in the range.
    pub start: IpAddr,
    /// Last address in the range.
    pub end: IpAddr,
}

impl IpRange {
    /// Whether `ip` lies within the range. Addresses of the other family never do.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = normalize_ip(ip);
        match (self.start, self.end, ip) {
            (IpAddr::V4(s), IpAddr::V4(e), IpAddr::V4(a)) => s <= a && a <= e,
            (IpAddr::V6(s), IpAddr::V6(e), IpAddr::V6(a)) => s <= a && a <= e,
            _ => false,
        }
    }

    /// Whether the range covers a single address.
    pub fn is_single(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A network prefix anchored at an address.
///
/// The anchor is kept as given, host bits included, so that a subnet computed
/// from a stored range displays its original start address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    addr: IpAddr,
    prefix: u8,
}

impl Subnet {
    /// The anchor address.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Prefix length in bits.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether `ip` shares the first `prefix` bits with the anchor.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, normalize_ip(ip)) {
            (IpAddr::V4(a), IpAddr::V4(b)) => {
                let mask = v4_mask(self.prefix);
                u32::from(a) & mask == u32::from(b) & mask
            }
            (IpAddr::V6(a), IpAddr::V6(b)) => {
                let mask = v6_mask(self.prefix);
                u128::from(a) & mask == u128::from(b) & mask
            }
            _ => false,
        }
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Fold an IPv4-mapped IPv6 address to plain IPv4.
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Parse and normalize a single address.
pub fn parse_ip(input: &str) -> Result<IpAddr, IpRangeError> {
    input
        .trim()
        .parse::<IpAddr>()
        .map(normalize_ip)
        .map_err(|_| IpRangeError::InvalidIp(input.to_string()))
}

/// Parse a bare address or a CIDR into an inclusive range.
///
/// `192.168.56.0/24` yields `192.168.56.0..=192.168.56.255`. A mapped IPv6
/// CIDR with a prefix of at least 96 bits is folded into the equivalent IPv4
/// network.
pub fn parse_ip_range(input: &str) -> Result<IpRange, IpRangeError> {
    let input = input.trim();
    let mut parts = input.split('/');
    let addr_part = parts.next().unwrap_or_default();
    let bits_part = parts.next();
    if parts.next().is_some() {
        return Err(IpRangeError::InvalidSubnet(input.to_string()));
    }

    let addr: IpAddr = addr_part
        .parse()
        .map_err(|_| IpRangeError::InvalidIp(addr_part.to_string()))?;

    let Some(bits_part) = bits_part else {
        let ip = normalize_ip(addr);
        return Ok(IpRange { start: ip, end: ip });
    };

    let bits: u8 = bits_part
        .parse()
        .map_err(|_| IpRangeError::InvalidSubnet(input.to_string()))?;

    match addr {
        IpAddr::V4(v4) => {
            if bits > 32 {
                return Err(IpRangeError::InvalidSubnet(input.to_string()));
            }
            let (start, end) = v4_bounds(v4, bits);
            Ok(IpRange {
                start: IpAddr::V4(start),
                end: IpAddr::V4(end),
            })
        }
        IpAddr::V6(v6) => {
            if bits > 128 {
                return Err(IpRangeError::InvalidSubnet(input.to_string()));
            }
            if let (Some(v4), true) = (v6.to_ipv4_mapped(), bits >= 96) {
                let (start, end) = v4_bounds(v4, bits - 96);
                return Ok(IpRange {
                    start: IpAddr::V4(start),
                    end: IpAddr::V4(end),
                });
            }
            let mask = v6_mask(bits);
            let start = u128::from(v6) & mask;
            Ok(IpRange {
                start: IpAddr::V6(Ipv6Addr::from(start)),
                end: IpAddr::V6(Ipv6Addr::from(start | !mask)),
            })
        }
    }
}

/// Compute the subnet described by a `[start, end]` pair.
///
/// The prefix is the number of leading bits on which both addresses agree;
/// identical addresses give /32 or /128. The subnet is anchored at `start`.
pub fn get_ip_range_subnet(start: &str, end: &str) -> Result<Subnet, IpRangeError> {
    range_subnet(parse_ip(start)?, parse_ip(end)?)
}

/// [`get_ip_range_subnet`] over already parsed addresses.
pub fn range_subnet(start: IpAddr, end: IpAddr) -> Result<Subnet, IpRangeError> {
    let (start, end) = (normalize_ip(start), normalize_ip(end));
    let prefix = match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => (u32::from(s) ^ u32::from(e)).leading_zeros(),
        (IpAddr::V6(s), IpAddr::V6(e)) => (u128::from(s) ^ u128::from(e)).leading_zeros(),
        _ => return Err(IpRangeError::FamilyMismatch { start, end }),
    };
    Ok(Subnet {
        addr: start,
        prefix: prefix as u8,
    })
}

/// Big-endian byte form used for stored range bounds.
///
/// Byte strings of equal length compare in the same order as the addresses.
pub fn ip_to_bytes(ip: IpAddr) -> Vec<u8> {
    match normalize_ip(ip) {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Inverse of [`ip_to_bytes`]. Returns `None` unless given 4 or 16 bytes.
pub fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

fn v4_mask(bits: u8) -> u32 {
    match bits {
        0 => 0,
        b if b >= 32 => u32::MAX,
        b => u32::MAX << (32 - b),
    }
}

fn v6_mask(bits: u8) -> u128 {
    match bits {
        0 => 0,
        b if b >= 128 => u128::MAX,
        b => u128::MAX << (128 - b),
    }
}

fn v4_bounds(addr: Ipv4Addr, bits: u8) -> (Ipv4Addr, Ipv4Addr) {
    let mask = v4_mask(bits);
    let start = u32::from(addr) & mask;
    (Ipv4Addr::from(start), Ipv4Addr::from(start | !mask))
}
