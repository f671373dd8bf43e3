//! Bulk loading of delegation and AS-name source files.
//!
//! Each source file is loaded inside one write transaction: lines that fail
//! to parse or write are reported through a [`LoadObserver`] and skipped, the
//! rest commit together.

use flate2::read::GzDecoder;
use heed3::RwTxn;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::config::IndexConfig;
use crate::error::{Error, ParseError, Result};
use crate::metadata::{IndexMetadata, SourceSummary};
use crate::row::{is_indexed_status, Resource, Row, FIELD_DELIMITER};
use crate::schema::{association_key, ip_key, RowIndex};
use crate::source::{SourceFile, SourceKind};
use crate::store::IndexStore;
use crate::RecordType;

/// Gzip member magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Suffix of per-type aggregate lines.
const SUMMARY_SUFFIX: &str = "|summary";

/// `ASN<whitespace>Name` lines of the AS-name source.
static AS_NAME_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([0-9]+)\s+(.+?)\s*$").expect("valid AS name regex"));

/// A decompressed line stream plus its expected size.
pub struct LineSource {
    name: String,
    reader: Box<dyn BufRead + Send>,
    total_bytes: u64,
}

impl LineSource {
    /// Open a source file, decompressing it when it starts with the gzip magic.
    ///
    /// The expected size is the gzip trailer's ISIZE field (decompressed
    /// length mod 2^32) or the plain file length.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut file = File::open(path)?;
        if is_gzip(&mut file)? {
            let total_bytes = gzip_size(&mut file)?;
            Ok(Self::from_reader(
                name,
                BufReader::new(GzDecoder::new(file)),
                total_bytes,
            ))
        } else {
            let total_bytes = file.metadata()?.len();
            Ok(Self::from_reader(name, BufReader::new(file), total_bytes))
        }
    }

    /// Wrap an already decompressed stream.
    pub fn from_reader(
        name: impl Into<String>,
        reader: impl BufRead + Send + 'static,
        total_bytes: u64,
    ) -> Self {
        Self {
            name: name.into(),
            reader: Box::new(reader),
            total_bytes,
        }
    }

    /// Get the source name used in reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the expected decompressed size in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

impl fmt::Debug for LineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineSource")
            .field("name", &self.name)
            .field("total_bytes", &self.total_bytes)
            .finish_non_exhaustive()
    }
}

/// Check the magic bytes, leaving the file positioned at its start.
fn is_gzip(file: &mut File) -> io::Result<bool> {
    let mut magic = [0u8; 2];
    let is_gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e),
    };
    file.seek(SeekFrom::Start(0))?;
    Ok(is_gzip)
}

/// Read ISIZE from the last four bytes, leaving the file positioned at its start.
fn gzip_size(file: &mut File) -> io::Result<u64> {
    file.seek(SeekFrom::End(-4))?;
    let mut size = [0u8; 4];
    file.read_exact(&mut size)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(u64::from(u32::from_le_bytes(size)))
}

/// Bytes consumed so far against the expected total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    pub bytes_read: u64,
    pub total_bytes: u64,
}

impl LoadProgress {
    /// Completion in percent, clamped to 100.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_read as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }
}

/// Counters for one loaded file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Physical lines read
    pub lines: u64,
    /// Blank, comment, header, summary and non-indexed lines
    pub skipped: u64,
    /// Rows or names written
    pub indexed: u64,
    /// Lines that failed to parse or write
    pub failed: u64,
    /// Decompressed bytes consumed
    pub bytes_read: u64,
}

/// A recovered per-line failure.
#[derive(Debug)]
pub struct LineError {
    pub source: String,
    /// 1-based physical line number
    pub line: u64,
    pub text: String,
    pub error: Error,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|line {}|\"{}\"|{}",
            self.source, self.line, self.text, self.error
        )
    }
}

/// Receives load events. Every method has a default.
pub trait LoadObserver {
    fn on_start(&mut self, _source: &str, _total_bytes: u64) {}

    fn on_progress(&mut self, _source: &str, _progress: LoadProgress) {}

    /// Called for every line that was skipped because of an error.
    fn on_line_error(&mut self, error: &LineError) {
        log::warn!("{}", error);
    }

    fn on_finish(&mut self, _source: &str, _stats: &LoadStats) {}
}

/// Observer that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl LoadObserver for LogObserver {
    fn on_start(&mut self, source: &str, total_bytes: u64) {
        log::info!("Loading {} ({} bytes)", source, total_bytes);
    }

    fn on_finish(&mut self, source: &str, stats: &LoadStats) {
        log::info!(
            "Loaded {}: {} indexed, {} skipped, {} failed",
            source,
            stats.indexed,
            stats.skipped,
            stats.failed
        );
    }
}

/// Position of a line within its stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinePos {
    /// 1-based physical line number
    pub number: u64,
    /// Bytes consumed up to and including this line
    pub bytes_read: u64,
}

/// Feed every line of `reader` to `handler`, without its line terminator.
///
/// Stops at the first error from the reader or the handler. Returns the
/// position after the last line.
pub fn scan_lines<R, F>(mut reader: R, mut handler: F) -> Result<LinePos>
where
    R: BufRead,
    F: FnMut(LinePos, &[u8]) -> Result<()>,
{
    let mut pos = LinePos::default();
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        pos.number += 1;
        pos.bytes_read += n as u64;

        let mut line = buf.as_slice();
        if let Some(rest) = line.strip_suffix(b"\n") {
            line = rest;
        }
        if let Some(rest) = line.strip_suffix(b"\r") {
            line = rest;
        }
        handler(pos, line)?;
    }
    Ok(pos)
}

/// Loader-local RowIndex generator for one rebuild session.
///
/// Starts at zero and pre-increments, so the first row gets index 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowIndexCounter {
    last: u32,
}

impl RowIndexCounter {
    /// Create a counter for a fresh store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next index.
    pub fn next_index(&mut self) -> Result<RowIndex> {
        self.last = self.last.checked_add(1).ok_or(Error::RowIndexExhausted)?;
        Ok(RowIndex(self.last))
    }

    /// The most recently allocated index, if any.
    pub fn last(&self) -> Option<RowIndex> {
        (self.last > 0).then_some(RowIndex(self.last))
    }
}

/// Writes source files into an [`IndexStore`].
pub struct BulkLoader<'s> {
    store: &'s IndexStore,
    counter: RowIndexCounter,
    progress_every: u64,
}

impl<'s> BulkLoader<'s> {
    /// Create a loader with a fresh RowIndex session.
    pub fn new(store: &'s IndexStore, progress_every: u64) -> Self {
        Self {
            store,
            counter: RowIndexCounter::new(),
            progress_every,
        }
    }

    /// The RowIndex session state.
    pub fn counter(&self) -> &RowIndexCounter {
        &self.counter
    }

    /// Load one delegation file in a single write transaction.
    pub fn load_delegations(
        &mut self,
        source: LineSource,
        observer: &mut dyn LoadObserver,
    ) -> Result<LoadStats> {
        let LineSource {
            name,
            reader,
            total_bytes,
        } = source;
        observer.on_start(&name, total_bytes);

        let store = self.store;
        let counter = &mut self.counter;
        let progress_every = self.progress_every;

        let mut wtxn = store.env.write_txn()?;
        let mut stats = LoadStats::default();
        let mut header_seen = false;

        let end = scan_lines(reader, |pos, raw| {
            stats.lines = pos.number;
            stats.bytes_read = pos.bytes_read;
            report_progress(observer, &name, pos, total_bytes, progress_every);

            // the header is skipped whatever its encoding
            let trimmed = raw.trim_ascii();
            if trimmed.is_empty() || trimmed.starts_with(b"#") {
                stats.skipped += 1;
                return Ok(());
            }
            if !header_seen {
                header_seen = true;
                stats.skipped += 1;
                return Ok(());
            }

            let text = match std::str::from_utf8(trimmed) {
                Ok(text) => text.trim(),
                Err(_) => {
                    stats.failed += 1;
                    observer.on_line_error(&LineError {
                        source: name.clone(),
                        line: pos.number,
                        text: String::from_utf8_lossy(trimmed).into_owned(),
                        error: ParseError::InvalidUtf8.into(),
                    });
                    return Ok(());
                }
            };

            if text.ends_with(SUMMARY_SUFFIX) || !is_indexable(text) {
                stats.skipped += 1;
                return Ok(());
            }

            let row = match Row::parse(text, false) {
                Ok(row) => row,
                Err(e) => {
                    stats.failed += 1;
                    observer.on_line_error(&LineError {
                        source: name.clone(),
                        line: pos.number,
                        text: text.to_string(),
                        error: e.into(),
                    });
                    return Ok(());
                }
            };

            let ix = counter.next_index()?;
            match write_row(store, &mut wtxn, ix, text, &row) {
                Ok(()) => stats.indexed += 1,
                Err(e) => {
                    stats.failed += 1;
                    observer.on_line_error(&LineError {
                        source: name.clone(),
                        line: pos.number,
                        text: text.to_string(),
                        error: e,
                    });
                }
            }
            Ok(())
        })?;

        observer.on_progress(&name, progress_at(end, total_bytes));
        wtxn.commit()?;

        log::debug!(
            "Committed {}: rows up to {}",
            name,
            counter.last().map(|ix| ix.get()).unwrap_or(0)
        );
        observer.on_finish(&name, &stats);
        Ok(stats)
    }

    /// Load one AS-name file in a single write transaction.
    ///
    /// Lines not of the form `ASN<whitespace>Name` are skipped silently.
    pub fn load_as_names(
        &mut self,
        source: LineSource,
        observer: &mut dyn LoadObserver,
    ) -> Result<LoadStats> {
        let LineSource {
            name,
            reader,
            total_bytes,
        } = source;
        observer.on_start(&name, total_bytes);

        let store = self.store;
        let progress_every = self.progress_every;
        let mut wtxn = store.env.write_txn()?;
        let mut stats = LoadStats::default();

        let end = scan_lines(reader, |pos, raw| {
            stats.lines = pos.number;
            stats.bytes_read = pos.bytes_read;
            report_progress(observer, &name, pos, total_bytes, progress_every);

            let Some((asn, as_name)) = parse_as_name_line(raw) else {
                stats.skipped += 1;
                return Ok(());
            };

            match store.as_names.put(&mut wtxn, &asn, as_name) {
                Ok(()) => stats.indexed += 1,
                Err(e) => {
                    stats.failed += 1;
                    observer.on_line_error(&LineError {
                        source: name.clone(),
                        line: pos.number,
                        text: String::from_utf8_lossy(raw).trim().to_string(),
                        error: e.into(),
                    });
                }
            }
            Ok(())
        })?;

        observer.on_progress(&name, progress_at(end, total_bytes));
        wtxn.commit()?;
        observer.on_finish(&name, &stats);
        Ok(stats)
    }
}

fn progress_at(pos: LinePos, total_bytes: u64) -> LoadProgress {
    LoadProgress {
        bytes_read: pos.bytes_read,
        total_bytes,
    }
}

fn report_progress(
    observer: &mut dyn LoadObserver,
    source: &str,
    pos: LinePos,
    total_bytes: u64,
    every: u64,
) {
    let periodic = every > 0 && pos.number % every == 0;
    if periodic || pos.bytes_read >= total_bytes {
        observer.on_progress(source, progress_at(pos, total_bytes));
    }
}

/// Status and type filter, applied before parsing.
///
/// Lines too short to carry both columns are left to the parser to reject.
fn is_indexable(line: &str) -> bool {
    let mut fields = line.split(FIELD_DELIMITER).map(str::trim);
    let record_type = fields.nth(2);
    let status = fields.nth(3);
    match (record_type, status) {
        (Some(record_type), Some(status)) => {
            RecordType::parse(record_type).is_some() && is_indexed_status(status)
        }
        _ => true,
    }
}

/// Write the row and every index entry derived from it.
fn write_row(
    store: &IndexStore,
    wtxn: &mut RwTxn,
    ix: RowIndex,
    line: &str,
    row: &Row,
) -> Result<()> {
    store.rows.put(wtxn, &ix.get(), line.as_bytes())?;

    if let Some(key) = row.org_key() {
        let key = association_key(&key.registry, &key.org_id, ix);
        store.associations.put(wtxn, &key, &())?;
    }

    match row.resource {
        Resource::Asn(first) => {
            let first = u64::from(first);
            for asn in first..first + row.count {
                let asn = u32::try_from(asn).map_err(|_| ParseError::RangeOverflow)?;
                store.asn.put(wtxn, &asn, &ix.get())?;
            }
        }
        Resource::Ip(addr) => {
            store.ip_index(&addr).put(wtxn, &ip_key(&addr), &ix.get())?;
        }
    }
    Ok(())
}

/// Split an AS-name line into its number and name.
fn parse_as_name_line(line: &[u8]) -> Option<(u32, &[u8])> {
    let caps = AS_NAME_LINE.captures(line)?;
    let asn = std::str::from_utf8(caps.get(1)?.as_bytes()).ok()?.parse().ok()?;
    Some((asn, caps.get(2)?.as_bytes()))
}

/// Wipe the store and load every source, delegations first.
///
/// The metadata file is removed before the wipe and written only after the
/// last source has committed, so an interrupted rebuild leaves no metadata.
pub fn rebuild_index(
    config: &IndexConfig,
    sources: &[SourceFile],
    observer: &mut dyn LoadObserver,
) -> Result<(IndexStore, IndexMetadata)> {
    let metadata_path = config.metadata_path();
    IndexMetadata::clear(&metadata_path)?;

    let store = IndexStore::rebuild(config.store_path(), config)?;
    let mut summaries = Vec::with_capacity(sources.len());
    {
        let mut loader = BulkLoader::new(&store, config.progress_every);
        for kind in [SourceKind::Delegations, SourceKind::AsNames] {
            for source in sources.iter().filter(|s| s.kind == kind) {
                let lines = LineSource::open(&source.path)?;
                let stats = match kind {
                    SourceKind::Delegations => loader.load_delegations(lines, observer)?,
                    SourceKind::AsNames => loader.load_as_names(lines, observer)?,
                };
                summaries.push(SourceSummary {
                    name: source.name.clone(),
                    indexed: stats.indexed,
                    failed: stats.failed,
                });
            }
        }
    }

    let metadata = IndexMetadata::now(summaries, store.stats()?.rows);
    metadata.save(&metadata_path)?;
    log::info!(
        "Rebuilt index at {}: {} rows, {} failed lines",
        store.path().display(),
        metadata.rows,
        metadata.failed_lines()
    );
    Ok((store, metadata))
}
