//! rirdex - An offline index of regional Internet registry delegations.
//!
//! This crate turns the pipe-delimited delegation files published by the
//! five RIRs into an LMDB-backed index answering point lookups by ASN, by IP
//! address (range containment) and by organization, without rescanning the
//! source text.
//!
//! # Features
//!
//! - **ASN lookup**: exact lookup of any ASN inside a delegated block
//! - **IP lookup**: IPv4 and IPv6 range containment over sorted block starts
//! - **Associations**: every resource registered to the same organization
//! - **Scans**: country code, AS-name regex and full walks
//! - **Snapshot reads**: queries from many threads, each in its own read transaction
//!
//! # Quick Start
//!
//! ```ignore
//! use rirdex::{default_sources, rebuild_index, IndexConfig, LogObserver};
//!
//! let config = IndexConfig::new("/var/cache/rirdex");
//! let sources = default_sources(&config.data_dir);
//! let (store, _meta) = rebuild_index(&config, &sources, &mut LogObserver)?;
//!
//! let row = store.find_by_ip_str("192.0.2.137")?;
//! println!("{}", row);
//!
//! for row in store.associated(&row)? {
//!     println!("{}", row);
//! }
//! ```
//!
//! # Load Semantics
//!
//! Each source file is loaded in one write transaction. A line that fails to
//! parse is reported and skipped; the rest of the file commits together.
//! Only `assigned` and `allocated` rows of type `asn`, `ipv4` or `ipv6` are
//! indexed.

mod error;
mod record_type;

pub mod cidr;
pub mod command;
pub mod config;
pub mod loader;
pub mod metadata;
mod query;
pub mod row;
pub mod schema;
pub mod source;
pub mod store;

// Re-export core types
pub use error::{Error, ParseError, Result};
pub use record_type::RecordType;
pub use row::{Resource, Row};
pub use schema::{Namespace, RowIndex};

// Re-export store and loading entry points
pub use config::IndexConfig;
pub use loader::{
    rebuild_index, scan_lines, BulkLoader, LineError, LineSource, LoadObserver, LoadProgress,
    LoadStats, LogObserver,
};
pub use store::{IndexStore, StoreStats};

// Re-export query grammar
pub use command::Query;

// Re-export sources and metadata
pub use metadata::IndexMetadata;
pub use source::{default_sources, Fetcher, Registry, SourceFile, SourceKind};
