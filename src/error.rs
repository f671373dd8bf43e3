//! Error types for rirdex.

use thiserror::Error;

/// Error type for rirdex operations.
///
/// `NotFound`, `InvalidAddress` and `InvalidQuery` are ordinary outcomes of a
/// lookup and are meant to be matched on by callers; the remaining variants
/// report a broken source line or a failure of the underlying store.
#[derive(Error, Debug)]
pub enum Error {
    /// The lookup was well formed but no record matches
    #[error("no matches found")]
    NotFound,

    /// Malformed IP literal supplied to a query
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Malformed query or lookup key
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A delegation line violates the record grammar
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// LMDB environment, transaction or database failure
    #[error("store error: {0}")]
    Store(#[from] heed3::Error),

    /// A secondary index points at a row that is not in the row store
    #[error("index references missing row {0}")]
    MissingRow(u32),

    /// The 32-bit row index space ran out during a rebuild
    #[error("row index space exhausted")]
    RowIndexExhausted,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Download error
    #[error("download error: {0}")]
    Download(String),
}

impl Error {
    /// Returns `true` for the `NotFound` kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

/// Result type alias for rirdex operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for delegation record parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Fewer delimited fields than a record needs
    #[error("expected at least {expected} fields, found {found}")]
    MissingFields { expected: usize, found: usize },

    /// Count column is not a non-negative integer
    #[error("col 5, number expected: {0:?}")]
    InvalidCount(String),

    /// Type column is not asn, ipv4 or ipv6
    #[error("unknown record type: {0:?}")]
    UnknownType(String),

    /// Start column of an ASN record is not a 32-bit number
    #[error("invalid ASN number: {0:?}")]
    InvalidAsn(String),

    /// Start column of an IP record is not an address
    #[error("col 4, ip addr expected: {0:?}")]
    InvalidAddress(String),

    /// Start address family disagrees with the record type
    #[error("ip address / label version mismatch: {0:?}")]
    FamilyMismatch(String),

    /// IPv6 prefix length outside 0..=128
    #[error("invalid IPv6 prefix length: {0}")]
    InvalidPrefixLength(u64),

    /// IPv4 block with a zero host count
    #[error("empty address range")]
    EmptyRange,

    /// Block extends past the end of its number space
    #[error("range overflows the address or ASN space")]
    RangeOverflow,

    /// Line is not valid UTF-8
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}
