//! Delegation record parsing.
//!
//! A delegation line has eight pipe-delimited fields:
//!
//! ```text
//! registry|cc|type|start|count|date|status|org-id
//! arin|US|ipv4|192.0.2.0|256|20100101|assigned|ORG-EXAMPLE
//! ```
//!
//! The parser is a pure transform from one such line to a [`Row`]; it never
//! touches the store.

use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;

use crate::cidr;
use crate::error::ParseError;
use crate::RecordType;

/// Field delimiter of delegation lines.
pub const FIELD_DELIMITER: char = '|';

/// Statuses whose rows are indexed.
pub const INDEXED_STATUSES: [&str; 2] = ["assigned", "allocated"];

/// Lines of the non-extended format carry no org-id column.
const MIN_FIELDS: usize = 7;

/// The typed resource a row delegates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// First ASN of the block
    Asn(u32),
    /// First address of the block
    Ip(IpAddr),
}

/// One delegation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Registry code, e.g. `arin`
    pub registry: String,
    /// Raw country-code column
    pub country_code: String,
    pub record_type: RecordType,
    /// Start column as written
    pub start: String,
    /// ASN or host count; prefix length for IPv6
    pub count: u64,
    pub date: String,
    pub status: String,
    /// Registry-assigned organization id, may be empty
    pub org_id: String,
    pub resource: Resource,
    /// Prefixes covering the block, only filled when requested at parse time
    pub prefixes: Vec<IpNet>,
    /// AS name, looked up separately from the ASN-name index
    pub as_name: Option<String>,
}

impl Row {
    /// Parse one trimmed, non-comment delegation line.
    ///
    /// When `fill_range` is set the covering CIDR prefixes of an IP block are
    /// materialized into [`Row::prefixes`]; the block is validated either way.
    pub fn parse(line: &str, fill_range: bool) -> Result<Self, ParseError> {
        let fields: Vec<&str> = line.split(FIELD_DELIMITER).map(str::trim).collect();
        if fields.len() < MIN_FIELDS {
            return Err(ParseError::MissingFields {
                expected: MIN_FIELDS,
                found: fields.len(),
            });
        }

        let count: u64 = fields[4]
            .parse()
            .map_err(|_| ParseError::InvalidCount(fields[4].to_string()))?;

        let record_type = RecordType::parse(fields[2])
            .ok_or_else(|| ParseError::UnknownType(fields[2].to_string()))?;

        let start = fields[3];
        let mut prefixes = Vec::new();
        let resource = match record_type {
            RecordType::Asn => {
                let asn: u32 = start
                    .parse()
                    .map_err(|_| ParseError::InvalidAsn(start.to_string()))?;
                if u64::from(asn) + count > u64::from(u32::MAX) + 1 {
                    return Err(ParseError::RangeOverflow);
                }
                Resource::Asn(asn)
            }
            RecordType::Ipv4 | RecordType::Ipv6 => {
                let ip: IpAddr = start
                    .parse()
                    .map_err(|_| ParseError::InvalidAddress(start.to_string()))?;

                let nets = match (record_type, ip) {
                    (RecordType::Ipv4, IpAddr::V4(v4)) => cidr::ipv4_block(v4, count)?,
                    (RecordType::Ipv6, IpAddr::V6(v6)) => vec![cidr::ipv6_block(v6, count)?],
                    _ => return Err(ParseError::FamilyMismatch(start.to_string())),
                };
                if fill_range {
                    prefixes = nets;
                }
                Resource::Ip(ip)
            }
        };

        Ok(Self {
            registry: fields[0].to_string(),
            country_code: fields[1].to_string(),
            record_type,
            start: start.to_string(),
            count,
            date: fields[5].to_string(),
            status: fields[6].to_string(),
            org_id: fields.get(7).map(|s| s.to_string()).unwrap_or_default(),
            resource,
            prefixes,
            as_name: None,
        })
    }

    /// Parse a raw stored or streamed line.
    pub fn parse_bytes(line: &[u8], fill_range: bool) -> Result<Self, ParseError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
        Self::parse(line.trim(), fill_range)
    }

    /// First ASN of the block, for ASN rows.
    pub fn asn(&self) -> Option<u32> {
        match self.resource {
            Resource::Asn(asn) => Some(asn),
            Resource::Ip(_) => None,
        }
    }

    /// Last ASN of the block, for ASN rows with a non-zero count.
    pub fn asn_last(&self) -> Option<u32> {
        let first = self.asn()?;
        if self.count == 0 {
            return None;
        }
        u32::try_from(u64::from(first) + self.count - 1).ok()
    }

    /// First address of the block, for IP rows.
    pub fn ip_start(&self) -> Option<IpAddr> {
        match self.resource {
            Resource::Ip(ip) => Some(ip),
            Resource::Asn(_) => None,
        }
    }

    /// Check whether the materialized prefixes contain the address.
    pub fn contains(&self, addr: IpAddr) -> bool {
        cidr::any_contains(&self.prefixes, addr)
    }

    /// The association key, when both registry and org id are present.
    pub fn org_key(&self) -> Option<OrgKey> {
        if self.registry.is_empty() || self.org_id.is_empty() {
            return None;
        }
        Some(OrgKey {
            registry: self.registry.clone(),
            org_id: self.org_id.clone(),
        })
    }

    /// Serialize back to a delegation line with all eight fields.
    pub fn to_line(&self) -> String {
        [
            self.registry.as_str(),
            self.country_code.as_str(),
            self.record_type.as_str(),
            self.start.as_str(),
            &self.count.to_string(),
            self.date.as_str(),
            self.status.as_str(),
            self.org_id.as_str(),
        ]
        .join("|")
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// Check whether a status column value is indexed.
pub fn is_indexed_status(status: &str) -> bool {
    INDEXED_STATUSES.contains(&status)
}

/// Identity of an organization within one registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrgKey {
    pub registry: String,
    pub org_id: String,
}

/// Distinct organization keys of the given rows, sorted.
///
/// Rows without an org id are skipped.
pub fn unique_org_keys(rows: &[Row]) -> Vec<OrgKey> {
    let mut keys: Vec<OrgKey> = rows.iter().filter_map(Row::org_key).collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Order rows IPv4 first, then IPv6, then ASN, keeping input order within a type.
pub fn sort_rows_by_type(rows: &mut [Row]) {
    rows.sort_by_key(|row| row.record_type.group_order());
}
