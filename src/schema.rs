//! Index schema: key spaces and key encodings.
//!
//! Six logical indices share one LMDB environment, each in its own named
//! database:
//!
//! ```text
//! rows    RowIndex(u32 BE)                    -> raw delegation line
//! asn     ASN(u32 BE)                         -> RowIndex
//! v4      first address (4 bytes, net order)  -> RowIndex
//! v6      first address (16 bytes, net order) -> RowIndex
//! id2ix   registry 0x00 org-id 0x00 RowIndex  -> ()
//! asname  ASN(u32 BE)                         -> AS name bytes
//! ```
//!
//! All integer keys are big-endian so byte-wise key order equals numeric
//! order. The association index is a flat set keyed by a composite key; the
//! trailing separator after the org id keeps `ORG1` from prefix-matching
//! `ORG10`.

use std::fmt;
use std::net::IpAddr;

/// Separator between the parts of an association key.
pub const KEY_SEPARATOR: u8 = 0x00;

/// Surrogate primary key of one stored delegation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowIndex(pub u32);

impl RowIndex {
    /// Big-endian key bytes.
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Decode from big-endian key bytes.
    pub fn from_be_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 4] = bytes.try_into().ok()?;
        Some(Self(u32::from_be_bytes(bytes)))
    }

    /// Get the raw value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RowIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The six named key spaces of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Primary row store
    Rows,
    /// ASN to row index
    Asn,
    /// IPv4 range start to row index
    Ipv4,
    /// IPv6 range start to row index
    Ipv6,
    /// Organization association set
    Associations,
    /// ASN to AS name
    AsNames,
}

impl Namespace {
    /// All namespaces, in creation order.
    pub const ALL: [Namespace; 6] = [
        Namespace::Rows,
        Namespace::Asn,
        Namespace::Ipv4,
        Namespace::Ipv6,
        Namespace::Associations,
        Namespace::AsNames,
    ];

    /// Database name inside the environment.
    pub fn name(&self) -> &'static str {
        match self {
            Namespace::Rows => "rows",
            Namespace::Asn => "asn",
            Namespace::Ipv4 => "v4",
            Namespace::Ipv6 => "v6",
            Namespace::Associations => "id2ix",
            Namespace::AsNames => "asname",
        }
    }

    /// The address index for an address family.
    pub fn for_ip(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Namespace::Ipv4,
            IpAddr::V6(_) => Namespace::Ipv6,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Network-order address bytes: 4 for IPv4, 16 for IPv6.
pub fn ip_key(addr: &IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Prefix shared by every association entry of one organization.
///
/// key = `registry` | 0x00 | `org-id` | 0x00
pub fn association_prefix(registry: &str, org_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(registry.len() + org_id.len() + 2);
    key.extend_from_slice(registry.as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(org_id.as_bytes());
    key.push(KEY_SEPARATOR);
    key
}

/// Association entry for one row.
///
/// key = `registry` | 0x00 | `org-id` | 0x00 | `row-index(4 BE)`
pub fn association_key(registry: &str, org_id: &str, ix: RowIndex) -> Vec<u8> {
    let mut key = association_prefix(registry, org_id);
    key.extend_from_slice(&ix.to_be_bytes());
    key
}

/// Row index encoded in the tail of an association key.
pub fn association_row(key: &[u8]) -> Option<RowIndex> {
    let tail = key.len().checked_sub(4)?;
    RowIndex::from_be_slice(&key[tail..])
}
