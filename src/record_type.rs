//! Delegation record type definitions.

use std::fmt;

/// RecordType is the resource kind a delegation line describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    /// Block of autonomous system numbers
    Asn,
    /// IPv4 address block
    Ipv4,
    /// IPv6 address block
    Ipv6,
}

impl RecordType {
    /// All record types, in the order they are grouped for output.
    pub const ALL: [RecordType; 3] = [RecordType::Ipv4, RecordType::Ipv6, RecordType::Asn];

    /// Parse a record type from the literal type token.
    ///
    /// Tokens in delegation files are lower-case; matching is exact.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asn" => Some(RecordType::Asn),
            "ipv4" => Some(RecordType::Ipv4),
            "ipv6" => Some(RecordType::Ipv6),
            _ => None,
        }
    }

    /// Get the type token as written in delegation files.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Asn => "asn",
            RecordType::Ipv4 => "ipv4",
            RecordType::Ipv6 => "ipv6",
        }
    }

    /// Returns `true` for the two address families.
    pub fn is_ip(&self) -> bool {
        matches!(self, RecordType::Ipv4 | RecordType::Ipv6)
    }

    /// Position used when grouping rows by type (IPv4, IPv6, ASN).
    pub fn group_order(&self) -> u8 {
        match self {
            RecordType::Ipv4 => 0,
            RecordType::Ipv6 => 1,
            RecordType::Asn => 2,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
