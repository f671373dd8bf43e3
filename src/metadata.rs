//! Rebuild metadata side-file.
//!
//! Written after the last source file of a rebuild has committed, so a store
//! without a matching metadata file is the remains of an interrupted rebuild.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use crate::error::{Error, Result};

/// Per-source summary recorded by a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Source file name
    pub name: String,
    /// Rows or names written from this file
    pub indexed: u64,
    /// Lines that failed to parse or write
    pub failed: u64,
}

/// Metadata describing the last completed rebuild.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexMetadata {
    #[serde(with = "system_time_serde")]
    pub built_at: Option<SystemTime>,
    /// Sources loaded, in load order
    #[serde(default)]
    pub sources: Vec<SourceSummary>,
    /// Total rows in the primary store
    #[serde(default)]
    pub rows: u64,
}

mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        time.map(|t| t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs())
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SystemTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<u64> = Option::deserialize(deserializer)?;
        Ok(secs.map(|s| UNIX_EPOCH + Duration::from_secs(s)))
    }
}

impl IndexMetadata {
    /// Create metadata stamped with the current time.
    pub fn now(sources: Vec<SourceSummary>, rows: u64) -> Self {
        Self {
            built_at: Some(SystemTime::now()),
            sources,
            rows,
        }
    }

    /// Load metadata from a file.
    ///
    /// Returns default (incomplete) metadata if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save metadata to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Remove the metadata file, if any.
    pub fn clear(path: impl AsRef<Path>) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns `true` once a rebuild has finished and recorded itself.
    pub fn is_complete(&self) -> bool {
        self.built_at.is_some()
    }

    /// Failed lines summed over all sources.
    pub fn failed_lines(&self) -> u64 {
        self.sources.iter().map(|s| s.failed).sum()
    }
}
