//! LMDB-backed index store.
//!
//! One environment directory holds the six named databases listed in
//! [`crate::schema`]. Writers go through [`crate::loader::BulkLoader`]; every
//! query opens its own read transaction.

use heed3::byteorder::BE;
use heed3::types::{Bytes, Unit, U32};
use heed3::{Database, Env, EnvOpenOptions, RoTxn, WithoutTls};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::schema::{Namespace, RowIndex};
use crate::Row;

/// Primary row store: RowIndex -> raw line.
pub type RowsDb = Database<U32<BE>, Bytes>;
/// ASN -> RowIndex.
pub type AsnDb = Database<U32<BE>, U32<BE>>;
/// First address -> RowIndex.
pub type IpDb = Database<Bytes, U32<BE>>;
/// Composite association key -> ().
pub type AssociationDb = Database<Bytes, Unit>;
/// ASN -> AS name.
pub type AsNameDb = Database<U32<BE>, Bytes>;

/// Entry counts per namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub rows: u64,
    pub asn: u64,
    pub ipv4: u64,
    pub ipv6: u64,
    pub associations: u64,
    pub as_names: u64,
}

impl StoreStats {
    /// Count for one namespace.
    pub fn get(&self, namespace: Namespace) -> u64 {
        match namespace {
            Namespace::Rows => self.rows,
            Namespace::Asn => self.asn,
            Namespace::Ipv4 => self.ipv4,
            Namespace::Ipv6 => self.ipv6,
            Namespace::Associations => self.associations,
            Namespace::AsNames => self.as_names,
        }
    }
}

/// Handle to an opened index.
///
/// The handle is `Sync`; queries from several threads share it and each
/// opens an independent snapshot. Read transactions don't use thread-local
/// reader slots, so a query may run while another read is open on the same
/// thread.
pub struct IndexStore {
    pub(crate) env: Env<WithoutTls>,
    path: PathBuf,
    pub(crate) rows: RowsDb,
    pub(crate) asn: AsnDb,
    pub(crate) ipv4: IpDb,
    pub(crate) ipv6: IpDb,
    pub(crate) associations: AssociationDb,
    pub(crate) as_names: AsNameDb,
}

impl IndexStore {
    /// Open the store at `path`, creating the directory and any missing
    /// namespace.
    pub fn open(path: impl AsRef<Path>, config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .read_txn_without_tls()
                .map_size(config.map_size)
                .max_dbs(Namespace::ALL.len() as u32)
                .max_readers(config.max_readers)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;

        let rows: RowsDb = env
            .database_options()
            .types::<U32<BE>, Bytes>()
            .name(Namespace::Rows.name())
            .create(&mut wtxn)?;

        let asn: AsnDb = env
            .database_options()
            .types::<U32<BE>, U32<BE>>()
            .name(Namespace::Asn.name())
            .create(&mut wtxn)?;

        let ipv4: IpDb = env
            .database_options()
            .types::<Bytes, U32<BE>>()
            .name(Namespace::Ipv4.name())
            .create(&mut wtxn)?;

        let ipv6: IpDb = env
            .database_options()
            .types::<Bytes, U32<BE>>()
            .name(Namespace::Ipv6.name())
            .create(&mut wtxn)?;

        let associations: AssociationDb = env
            .database_options()
            .types::<Bytes, Unit>()
            .name(Namespace::Associations.name())
            .create(&mut wtxn)?;

        let as_names: AsNameDb = env
            .database_options()
            .types::<U32<BE>, Bytes>()
            .name(Namespace::AsNames.name())
            .create(&mut wtxn)?;

        wtxn.commit()?;

        log::debug!(
            "Opened index store at {} ({} namespaces)",
            path.display(),
            Namespace::ALL.len()
        );

        Ok(Self {
            env,
            path: path.to_path_buf(),
            rows,
            asn,
            ipv4,
            ipv6,
            associations,
            as_names,
        })
    }

    /// Open a store that a previous rebuild has produced.
    ///
    /// Fails with [`Error::Config`] when the directory does not exist.
    pub fn open_existing(path: impl AsRef<Path>, config: &IndexConfig) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(Error::Config(format!(
                "no index at {}, rebuild it first",
                path.display()
            )));
        }
        Self::open(path, config)
    }

    /// Delete the store at `path` and recreate all six namespaces empty.
    pub fn rebuild(path: impl AsRef<Path>, config: &IndexConfig) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            log::debug!("Removing index store at {}", path.display());
            fs::remove_dir_all(path)?;
        }
        Self::open(path, config)
    }

    /// Get the environment directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry counts of every namespace, from one snapshot.
    pub fn stats(&self) -> Result<StoreStats> {
        let rtxn = self.env.read_txn()?;
        Ok(StoreStats {
            rows: self.rows.len(&rtxn)?,
            asn: self.asn.len(&rtxn)?,
            ipv4: self.ipv4.len(&rtxn)?,
            ipv6: self.ipv6.len(&rtxn)?,
            associations: self.associations.len(&rtxn)?,
            as_names: self.as_names.len(&rtxn)?,
        })
    }

    /// The address index for the family of `addr`.
    pub(crate) fn ip_index(&self, addr: &IpAddr) -> &IpDb {
        match addr {
            IpAddr::V4(_) => &self.ipv4,
            IpAddr::V6(_) => &self.ipv6,
        }
    }

    /// Dereference a row index and parse the stored line.
    ///
    /// A secondary index entry without its row is reported as
    /// [`Error::MissingRow`].
    pub(crate) fn load_row(&self, txn: &RoTxn, ix: RowIndex, fill_range: bool) -> Result<Row> {
        let raw = self
            .rows
            .get(txn, &ix.get())?
            .ok_or(Error::MissingRow(ix.get()))?;
        Ok(Row::parse_bytes(raw, fill_range)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_config() -> IndexConfig {
        IndexConfig::default().with_map_size(16 * 1024 * 1024)
    }

    #[test]
    fn test_open_creates_empty_namespaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rirdex.db");
        let store = IndexStore::open(&path, &small_config()).unwrap();
        assert!(path.is_dir());
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn test_open_existing_requires_directory() {
        let dir = tempdir().unwrap();
        let result = IndexStore::open_existing(dir.path().join("missing"), &small_config());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_row_missing() {
        let dir = tempdir().unwrap();
        let store = IndexStore::open(dir.path().join("db"), &small_config()).unwrap();
        let rtxn = store.env.read_txn().unwrap();
        let result = store.load_row(&rtxn, RowIndex(42), false);
        assert!(matches!(result, Err(Error::MissingRow(42))));
    }

    #[test]
    fn test_rebuild_wipes_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let store = IndexStore::open(&path, &small_config()).unwrap();
            let mut wtxn = store.env.write_txn().unwrap();
            store
                .rows
                .put(&mut wtxn, &1, b"arin|US|asn|1|1|20200101|assigned|O")
                .unwrap();
            wtxn.commit().unwrap();
            assert_eq!(store.stats().unwrap().rows, 1);
        }

        let store = IndexStore::rebuild(&path, &small_config()).unwrap();
        assert_eq!(store.stats().unwrap().get(Namespace::Rows), 0);
    }

    #[test]
    fn test_invalid_config() {
        let dir = tempdir().unwrap();
        let config = small_config().with_max_readers(0);
        assert!(matches!(
            IndexStore::open(dir.path().join("db"), &config),
            Err(Error::Config(_))
        ));
    }
}
