//! Source files and their download.
//!
//! Every registry publishes an extended delegation file; RIPE also publishes
//! the AS-name list. Downloads are stored gzip-compressed in the data
//! directory and replaced atomically.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Host and path of the RIPE AS-name list.
const AS_NAMES_HOST: &str = "ftp.ripe.net";
const AS_NAMES_PATH: &str = "ripe/asnames/asn.txt";
const AS_NAMES_FILE: &str = "asn.txt.gz";

/// Default HTTP timeout for one download.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Regional Internet registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Registry {
    Afrinic,
    Apnic,
    Arin,
    Lacnic,
    RipeNcc,
}

impl Registry {
    /// All registries.
    pub const ALL: [Registry; 5] = [
        Registry::Afrinic,
        Registry::Apnic,
        Registry::Arin,
        Registry::Lacnic,
        Registry::RipeNcc,
    ];

    /// Registry code as used in the first column of delegation lines.
    pub fn key(&self) -> &'static str {
        match self {
            Registry::Afrinic => "afrinic",
            Registry::Apnic => "apnic",
            Registry::Arin => "arin",
            Registry::Lacnic => "lacnic",
            Registry::RipeNcc => "ripencc",
        }
    }

    /// Host serving the registry's statistics files.
    pub fn host(&self) -> &'static str {
        match self {
            Registry::Afrinic => "ftp.afrinic.net",
            Registry::Apnic => "ftp.apnic.net",
            Registry::Arin => "ftp.arin.net",
            Registry::Lacnic => "ftp.lacnic.net",
            Registry::RipeNcc => "ftp.ripe.net",
        }
    }

    /// URL of the extended delegation file.
    pub fn delegation_url(&self) -> String {
        format!(
            "https://{host}/pub/stats/{key}/delegated-{key}-extended-latest",
            host = self.host(),
            key = self.key()
        )
    }

    /// Local file name of the downloaded delegation file.
    pub fn file_name(&self) -> String {
        format!("delegated-{}-extended-latest.txt.gz", self.key())
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Registry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "afrinic" => Ok(Registry::Afrinic),
            "apnic" => Ok(Registry::Apnic),
            "arin" => Ok(Registry::Arin),
            "lacnic" => Ok(Registry::Lacnic),
            "ripencc" | "ripe" => Ok(Registry::RipeNcc),
            _ => Err(Error::InvalidQuery(format!("unknown registry: {}", s))),
        }
    }
}

/// What a source file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Pipe-delimited delegation records
    Delegations,
    /// `ASN<whitespace>Name` lines
    AsNames,
}

/// A source file: where it comes from and where it lives locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub url: String,
    pub path: PathBuf,
    pub kind: SourceKind,
}

impl SourceFile {
    /// The extended delegation file of a registry.
    pub fn delegations(registry: Registry, data_dir: &Path) -> Self {
        Self {
            name: registry.key().to_string(),
            url: registry.delegation_url(),
            path: data_dir.join(registry.file_name()),
            kind: SourceKind::Delegations,
        }
    }

    /// The RIPE AS-name list.
    pub fn as_names(data_dir: &Path) -> Self {
        Self {
            name: "asnames".to_string(),
            url: format!("https://{}/{}", AS_NAMES_HOST, AS_NAMES_PATH),
            path: data_dir.join(AS_NAMES_FILE),
            kind: SourceKind::AsNames,
        }
    }

    /// Check whether the local copy exists.
    pub fn is_present(&self) -> bool {
        self.path.is_file()
    }
}

/// Every registry's delegation file followed by the AS-name list.
pub fn default_sources(data_dir: &Path) -> Vec<SourceFile> {
    Registry::ALL
        .iter()
        .map(|r| SourceFile::delegations(*r, data_dir))
        .chain(std::iter::once(SourceFile::as_names(data_dir)))
        .collect()
}

/// Downloads source files over HTTPS.
pub struct Fetcher {
    agent: ureq::Agent,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOAD_TIMEOUT)
    }
}

impl Fetcher {
    /// Create a fetcher with the given per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    /// Download one source, gzip it, and move it into place.
    ///
    /// The body is written to a temporary file next to the destination, so
    /// the previous copy stays intact until the download has finished.
    /// Returns the number of uncompressed bytes received.
    pub fn fetch(&self, source: &SourceFile) -> Result<u64> {
        log::info!("Downloading {}", source.url);

        let response = self
            .agent
            .get(&source.url)
            .call()
            .map_err(|e| Error::Download(format!("{}: {}", source.url, e)))?;
        if response.status() != 200 {
            return Err(Error::Download(format!(
                "{}: HTTP {}",
                source.url,
                response.status()
            )));
        }

        let dir = source
            .path
            .parent()
            .ok_or_else(|| Error::Config(format!("no parent for {}", source.path.display())))?;
        fs::create_dir_all(dir)?;

        let temp = tempfile::NamedTempFile::new_in(dir)?;
        let mut encoder = GzEncoder::new(temp, Compression::default());
        let copied = io::copy(&mut response.into_reader(), &mut encoder)?;
        let temp = encoder.finish()?;
        temp.as_file().sync_all()?;
        temp.persist(&source.path).map_err(|e| Error::Io(e.error))?;

        log::info!("Downloaded {}: {} bytes", source.name, copied);
        Ok(copied)
    }

    /// Download every source in order, stopping at the first failure.
    pub fn fetch_all(&self, sources: &[SourceFile]) -> Result<u64> {
        let mut total = 0;
        for source in sources {
            total += self.fetch(source)?;
        }
        Ok(total)
    }
}
