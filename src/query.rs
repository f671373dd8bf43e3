//! Read-only lookups against a built index.
//!
//! Every method opens its own read transaction, so a shared [`IndexStore`]
//! can be queried from several threads at once. Point lookups report
//! [`Error::NotFound`]; scans return an empty list instead.

use memchr::memmem;
use regex::bytes::RegexBuilder;
use std::net::IpAddr;

use crate::error::{Error, Result};
use crate::row::Row;
use crate::schema::{association_prefix, association_row, ip_key, RowIndex};
use crate::store::IndexStore;

impl IndexStore {
    /// Find the row whose ASN block contains `asn`.
    pub fn find_by_asn(&self, asn: u32) -> Result<Row> {
        let rtxn = self.env.read_txn()?;
        let ix = self.asn.get(&rtxn, &asn)?.ok_or(Error::NotFound)?;
        self.load_row(&rtxn, RowIndex(ix), true)
    }

    /// Find the row whose address block contains `addr`.
    ///
    /// Seeks the first block starting at or after `addr`. If that block does
    /// not contain the address, the block immediately before it is tried
    /// once. When every block starts before `addr`, only the last block is
    /// considered.
    pub fn find_by_ip(&self, addr: IpAddr) -> Result<Row> {
        let rtxn = self.env.read_txn()?;
        let index = self.ip_index(&addr);
        let target = ip_key(&addr);

        let Some((found_key, ix)) = index.get_greater_than_or_equal_to(&rtxn, &target)? else {
            let (_, ix) = index.last(&rtxn)?.ok_or(Error::NotFound)?;
            let row = self.load_row(&rtxn, RowIndex(ix), true)?;
            return if row.contains(addr) {
                Ok(row)
            } else {
                Err(Error::NotFound)
            };
        };

        let row = self.load_row(&rtxn, RowIndex(ix), true)?;
        if row.contains(addr) {
            return Ok(row);
        }

        // single step back
        if let Some((_, ix)) = index.get_lower_than(&rtxn, found_key)? {
            let row = self.load_row(&rtxn, RowIndex(ix), true)?;
            if row.contains(addr) {
                return Ok(row);
            }
        }

        Err(Error::NotFound)
    }

    /// Parse `addr` and look it up with [`IndexStore::find_by_ip`].
    pub fn find_by_ip_str(&self, addr: &str) -> Result<Row> {
        let addr: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(addr.to_string()))?;
        self.find_by_ip(addr)
    }

    /// All rows registered to `org_id` within `registry`, in RowIndex order.
    pub fn find_associated(&self, registry: &str, org_id: &str) -> Result<Vec<Row>> {
        if registry.is_empty() || org_id.is_empty() {
            return Ok(Vec::new());
        }

        let rtxn = self.env.read_txn()?;
        let prefix = association_prefix(registry, org_id);
        let mut rows = Vec::new();
        for entry in self.associations.prefix_iter(&rtxn, &prefix)? {
            let (key, ()) = entry?;
            let ix = association_row(key).ok_or_else(|| {
                Error::InvalidQuery(format!("malformed association key for {registry}/{org_id}"))
            })?;
            rows.push(self.load_row(&rtxn, ix, true)?);
        }
        Ok(rows)
    }

    /// Rows sharing the organization of `row`, including `row` itself.
    ///
    /// Rows without an org id have no associations.
    pub fn associated(&self, row: &Row) -> Result<Vec<Row>> {
        match row.org_key() {
            Some(key) => self.find_associated(&key.registry, &key.org_id),
            None => Ok(Vec::new()),
        }
    }

    /// Linear scan for rows with country code `cc`.
    pub fn find_by_country(&self, cc: &str) -> Result<Vec<Row>> {
        let needle = format!("|{}|", cc);
        let needle = needle.as_bytes();
        let mut rows = Vec::new();
        self.walk_rows(|_, raw| {
            if !contains_bytes(raw, needle) {
                return Ok(());
            }
            let row = Row::parse_bytes(raw, true)?;
            if row.country_code == cc {
                rows.push(row);
            }
            Ok(())
        })?;
        Ok(rows)
    }

    /// Scan AS names for a case-insensitive regex match.
    ///
    /// Each matching ASN is resolved to its row; only a row whose first ASN
    /// equals the matching ASN is kept, so a multi-ASN block is returned at
    /// most once. Names whose ASN has no delegation are ignored.
    pub fn find_by_name(&self, pattern: &str) -> Result<Vec<Row>> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::InvalidQuery(e.to_string()))?;

        let rtxn = self.env.read_txn()?;
        let mut rows = Vec::new();
        for entry in self.as_names.iter(&rtxn)? {
            let (asn, name) = entry?;
            if !regex.is_match(name) {
                continue;
            }
            let Some(ix) = self.asn.get(&rtxn, &asn)? else {
                continue;
            };
            let mut row = self.load_row(&rtxn, RowIndex(ix), false)?;
            if row.asn() == Some(asn) {
                row.as_name = Some(String::from_utf8_lossy(name).into_owned());
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Look up the AS name of a single ASN.
    pub fn as_name(&self, asn: u32) -> Result<Option<String>> {
        let rtxn = self.env.read_txn()?;
        Ok(self
            .as_names
            .get(&rtxn, &asn)?
            .map(|name| String::from_utf8_lossy(name).into_owned()))
    }

    /// Fill [`Row::as_name`] for ASN rows that don't have one yet.
    pub fn attach_as_names(&self, rows: &mut [Row]) -> Result<()> {
        let rtxn = self.env.read_txn()?;
        for row in rows.iter_mut().filter(|r| r.as_name.is_none()) {
            if let Some(asn) = row.asn() {
                row.as_name = self
                    .as_names
                    .get(&rtxn, &asn)?
                    .map(|name| String::from_utf8_lossy(name).into_owned());
            }
        }
        Ok(())
    }

    /// Visit every stored line in RowIndex (load) order.
    ///
    /// The walk stops at the first error returned by `visit`.
    pub fn walk_rows<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(RowIndex, &[u8]) -> Result<()>,
    {
        let rtxn = self.env.read_txn()?;
        for entry in self.rows.iter(&rtxn)? {
            let (ix, raw) = entry?;
            visit(RowIndex(ix), raw)?;
        }
        Ok(())
    }

    /// Every stored row, in load order.
    pub fn all_rows(&self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        self.walk_rows(|_, raw| {
            rows.push(Row::parse_bytes(raw, true)?);
            Ok(())
        })?;
        Ok(rows)
    }
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    memmem::find(haystack, needle).is_some()
}
