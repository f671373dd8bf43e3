//! Query grammar.
//!
//! ```text
//! as N [+]        rows of the ASN block containing N
//! ip ADDR [+]     row of the address block containing ADDR
//! na REGEX [+]    rows whose AS name matches REGEX (case-insensitive)
//! cc XX           rows with country code XX
//! all             every row
//! ```
//!
//! A trailing `+` widens the result to every row of the same organization.
//! Keywords are case-insensitive. Parsing never touches the store.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::net::IpAddr;

use crate::error::{Error, Result};
use crate::row::{sort_rows_by_type, unique_org_keys, Row};
use crate::store::IndexStore;

static ASN_QUERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*ASN?\s+(\S+?)\s*(\+)?\s*$").expect("valid regex"));
static IP_QUERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*IP\s+(\S+?)\s*(\+)?\s*$").expect("valid regex"));
static NAME_QUERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*NA(?:ME)?\s+(.*?)\s*$").expect("valid regex"));
static COUNTRY_QUERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*CC\s+([A-Z]{2})\s*$").expect("valid regex"));
static ALL_QUERY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*ALL\s*$").expect("valid regex"));

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Asn { asn: u32, associated: bool },
    Ip { addr: IpAddr, associated: bool },
    Name { pattern: String, associated: bool },
    Country(String),
    All,
}

impl Query {
    /// Parse one query line.
    pub fn parse(input: &str) -> Result<Self> {
        if let Some(caps) = ASN_QUERY.captures(input) {
            let asn = caps[1]
                .parse()
                .map_err(|_| Error::InvalidQuery(format!("invalid ASN: {}", &caps[1])))?;
            return Ok(Query::Asn {
                asn,
                associated: caps.get(2).is_some(),
            });
        }

        if let Some(caps) = IP_QUERY.captures(input) {
            let addr = caps[1]
                .parse()
                .map_err(|_| Error::InvalidAddress(caps[1].to_string()))?;
            return Ok(Query::Ip {
                addr,
                associated: caps.get(2).is_some(),
            });
        }

        if let Some(caps) = NAME_QUERY.captures(input) {
            // `+` is the association flag only when set apart by whitespace
            let rest = &caps[1];
            let (pattern, associated) = match rest.strip_suffix('+') {
                Some(head) if head.is_empty() || head.ends_with(char::is_whitespace) => {
                    (head.trim_end(), true)
                }
                _ => (rest, false),
            };
            if pattern.is_empty() {
                return Err(Error::InvalidQuery("empty name pattern".to_string()));
            }
            return Ok(Query::Name {
                pattern: pattern.to_string(),
                associated,
            });
        }

        if let Some(caps) = COUNTRY_QUERY.captures(input) {
            return Ok(Query::Country(caps[1].to_ascii_uppercase()));
        }

        if ALL_QUERY.is_match(input) {
            return Ok(Query::All);
        }

        Err(Error::InvalidQuery(input.trim().to_string()))
    }

    /// Returns `true` when the result is widened to associated rows.
    pub fn is_associated(&self) -> bool {
        match self {
            Query::Asn { associated, .. }
            | Query::Ip { associated, .. }
            | Query::Name { associated, .. } => *associated,
            Query::Country(_) | Query::All => false,
        }
    }

    /// Run the query.
    ///
    /// Rows come back grouped IPv4, IPv6, then ASN, with AS names attached.
    /// An empty result of a point lookup, name scan or country scan is
    /// reported as [`Error::NotFound`].
    pub fn run(&self, store: &IndexStore) -> Result<Vec<Row>> {
        let rows = match self {
            Query::Asn { asn, .. } => vec![store.find_by_asn(*asn)?],
            Query::Ip { addr, .. } => vec![store.find_by_ip(*addr)?],
            Query::Name { pattern, .. } => store.find_by_name(pattern)?,
            Query::Country(cc) => store.find_by_country(cc)?,
            Query::All => store.all_rows()?,
        };
        if rows.is_empty() && !matches!(self, Query::All) {
            return Err(Error::NotFound);
        }

        let mut rows = if self.is_associated() {
            expand_associated(store, rows)?
        } else {
            rows
        };
        sort_rows_by_type(&mut rows);
        store.attach_as_names(&mut rows)?;
        Ok(rows)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plus = if self.is_associated() { " +" } else { "" };
        match self {
            Query::Asn { asn, .. } => write!(f, "as {}{}", asn, plus),
            Query::Ip { addr, .. } => write!(f, "ip {}{}", addr, plus),
            Query::Name { pattern, .. } => write!(f, "na {}{}", pattern, plus),
            Query::Country(cc) => write!(f, "cc {}", cc),
            Query::All => f.write_str("all"),
        }
    }
}

/// Replace rows by every row of their organizations.
///
/// Rows without an org id are kept as they are.
pub fn expand_associated(store: &IndexStore, rows: Vec<Row>) -> Result<Vec<Row>> {
    let keys = unique_org_keys(&rows);
    let mut expanded: Vec<Row> = rows.into_iter().filter(|r| r.org_key().is_none()).collect();
    for key in keys {
        expanded.extend(store.find_associated(&key.registry, &key.org_id)?);
    }
    Ok(expanded)
}

/// Pipe-delimited output lines for one row.
///
/// ASN rows print `registry|cc|type|first|last|date|status|name`, with `last`
/// empty for single-ASN blocks. IP rows print one
/// `registry|cc|type|prefix|date|status` line per covering prefix.
pub fn output_lines(row: &Row) -> Vec<String> {
    if let Some(first) = row.asn() {
        let last = match row.asn_last() {
            Some(last) if row.count > 1 => last.to_string(),
            _ => String::new(),
        };
        return vec![[
            row.registry.as_str(),
            row.country_code.as_str(),
            row.record_type.as_str(),
            &first.to_string(),
            &last,
            row.date.as_str(),
            row.status.as_str(),
            row.as_name.as_deref().unwrap_or(""),
        ]
        .join("|")];
    }

    row.prefixes
        .iter()
        .map(|net| {
            [
                row.registry.as_str(),
                row.country_code.as_str(),
                row.record_type.as_str(),
                &net.to_string(),
                row.date.as_str(),
                row.status.as_str(),
            ]
            .join("|")
        })
        .collect()
}
