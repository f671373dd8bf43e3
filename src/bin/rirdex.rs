//! rirdex: offline lookup of RIR delegations by ASN, IP, name or country.

use clap::Parser;
use rirdex::command::output_lines;
use rirdex::{
    default_sources, rebuild_index, Error, Fetcher, IndexConfig, IndexMetadata, IndexStore,
    LoadObserver, LoadProgress, LoadStats, Query, SourceFile,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rirdex")]
#[command(version = "0.1.0")]
#[command(
    about = "Offline lookup of IP and ASN delegations from all regional Internet registries",
    long_about = None,
    after_help = QUERY_HELP
)]
struct Cli {
    /// Force a rebuild of the index
    #[arg(long)]
    reindex: bool,

    /// Force a download of every source file
    #[arg(long)]
    download: bool,

    /// Directory holding source files and the index
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Prepend the query to each output line
    #[arg(long)]
    prepend_query: bool,

    /// Queries to run; read from stdin when none are given
    queries: Vec<String>,
}

const QUERY_HELP: &str = "\
Queries:
  as ASN [+]      rows of the ASN block containing ASN
  ip ADDR [+]     row of the IPv4/IPv6 block containing ADDR
  na REGEX [+]    ASNs whose name matches REGEX (case-insensitive)
  cc CC           every row with country code CC
  all             every row

  A trailing '+' returns all rows registered to the same organization.";

/// Progress on stderr, overwriting one line per file.
struct StderrProgress;

impl LoadObserver for StderrProgress {
    fn on_start(&mut self, source: &str, _total_bytes: u64) {
        eprintln!("indexing {}", source);
    }

    fn on_progress(&mut self, _source: &str, progress: LoadProgress) {
        eprint!(
            "\t\x1b[2K{}/{} ({:5.1}%)\r",
            progress.bytes_read,
            progress.total_bytes,
            progress.percent()
        );
    }

    fn on_finish(&mut self, source: &str, stats: &LoadStats) {
        eprintln!();
        log::info!(
            "{}: {} rows indexed, {} lines failed",
            source,
            stats.indexed,
            stats.failed
        );
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> rirdex::Result<()> {
    let mut config = IndexConfig::default();
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }
    std::fs::create_dir_all(&config.data_dir)?;

    let sources = default_sources(&config.data_dir);
    let exit_when_done = (cli.reindex || cli.download) && cli.queries.is_empty();

    let mut reindex = cli.reindex;
    let missing: Vec<SourceFile> = sources
        .iter()
        .filter(|s| cli.download || !s.is_present())
        .cloned()
        .collect();
    if !missing.is_empty() {
        Fetcher::default().fetch_all(&missing)?;
        reindex = true;
    }

    if !reindex && !IndexMetadata::load(config.metadata_path())?.is_complete() {
        log::warn!("No complete index at {}", config.store_path().display());
        reindex = true;
    }

    let store = if reindex {
        let (store, _) = rebuild_index(&config, &sources, &mut StderrProgress)?;
        if exit_when_done {
            return Ok(());
        }
        store
    } else {
        IndexStore::open_existing(config.store_path(), &config)?
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if cli.queries.is_empty() {
        for line in io::stdin().lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            run_query(&store, &line, cli.prepend_query, &mut out)?;
        }
    } else {
        for query in &cli.queries {
            run_query(&store, query, cli.prepend_query, &mut out)?;
        }
    }
    Ok(())
}

/// Run one query, printing rows to `out` and query errors to stderr.
fn run_query(
    store: &IndexStore,
    text: &str,
    prepend_query: bool,
    out: &mut impl Write,
) -> rirdex::Result<()> {
    let rows = match Query::parse(text).and_then(|q| q.run(store)) {
        Ok(rows) => rows,
        Err(e @ (Error::Store(_) | Error::Io(_) | Error::MissingRow(_))) => return Err(e),
        Err(e) => {
            eprintln!("{}: {}", text.trim(), e);
            return Ok(());
        }
    };

    for row in &rows {
        for line in output_lines(row) {
            if prepend_query {
                writeln!(out, "{}|{}", text.trim(), line)?;
            } else {
                writeln!(out, "{}", line)?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
