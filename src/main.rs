//! CLI entry point for the Rzeszów GTFS converter.
//!
//! Provides a single-document conversion mode and the multi-file merge mode
//! that stitches all current and future schedule documents into one feed.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rzeszow_gtfs::cache::FeedCache;
use rzeszow_gtfs::catalog::{CatalogApi, PatternExtractor, SourceDocument};
use rzeszow_gtfs::convert::{DocumentConverter, ZipConverter};
use rzeszow_gtfs::fetch::BasicClient;
use rzeszow_gtfs::gtfs::GtfsTables;
use rzeszow_gtfs::infra::opendata::{DEFAULT_CATALOG_URL, OpenDataClient};
use rzeszow_gtfs::merge::FeedMerger;
use rzeszow_gtfs::output::append_rows;
use rzeszow_gtfs::package::{Publisher, package, write_static_tables};
use rzeszow_gtfs::plan::plan;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "rzeszow_gtfs")]
#[command(about = "Converts ZTM Rzeszów schedules to a merged GTFS feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one source document into one GTFS archive
    Single {
        /// URL of the source zip to convert
        #[arg(value_name = "URL")]
        url: String,

        /// Output GTFS path
        #[arg(short, long, default_value = "rzeszow.zip")]
        output: PathBuf,
    },
    /// Merge all current and future schedule documents into one feed
    Merge {
        /// Output GTFS path
        #[arg(short, long, default_value = "rzeszow.zip")]
        output: PathBuf,

        /// Directory for cached per-version archives
        #[arg(short, long, default_value = "cache")]
        cache_dir: PathBuf,

        /// Cap the last document's validity this many days past its start;
        /// omit for an open-ended final interval
        #[arg(long)]
        horizon_days: Option<u32>,

        /// Reconvert every source document, ignoring cache freshness
        #[arg(long, default_value_t = false)]
        force_reparse: bool,

        /// Rebuild the merged feed even when the cache is unchanged
        #[arg(long, default_value_t = false)]
        force_remerge: bool,

        /// Treat merge integrity warnings as fatal
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Override the feed publisher name in feed_info.txt
        #[arg(long)]
        publisher_name: Option<String>,

        /// Override the feed publisher URL in feed_info.txt
        #[arg(long)]
        publisher_url: Option<String>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/rzeszow_gtfs.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("rzeszow_gtfs.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Single { url, output } => convert_single(&url, &output),
        Commands::Merge {
            output,
            cache_dir,
            horizon_days,
            force_reparse,
            force_remerge,
            strict,
            publisher_name,
            publisher_url,
        } => {
            let mut publisher = Publisher::default();
            if let Some(name) = publisher_name {
                publisher.name = name;
            }
            if let Some(url) = publisher_url {
                publisher.url = url;
            }
            merge_all(
                &output,
                &cache_dir,
                horizon_days,
                force_reparse,
                force_remerge,
                strict,
                &publisher,
            )
        }
    }
}

/// One document, one archive, no date filtering.
fn convert_single(url: &str, output: &Path) -> Result<()> {
    let converter = ZipConverter::new(BasicClient::new()?);
    let document = SourceDocument {
        url: url.to_string(),
        nominal_version: Utc::now().date_naive(),
        last_modified: None,
    };
    let tables = converter.convert(&document)?;

    let staging = fresh_dir(&output.with_extension("staging"))?;
    stage_tables(&staging, &tables)?;
    write_static_tables(
        &staging,
        &Publisher::default(),
        &[document.version()],
        Utc::now(),
    )?;
    package(&staging, output)?;
    std::fs::remove_dir_all(&staging)?;
    Ok(())
}

fn merge_all(
    output: &Path,
    cache_dir: &Path,
    horizon_days: Option<u32>,
    force_reparse: bool,
    force_remerge: bool,
    strict: bool,
    publisher: &Publisher,
) -> Result<()> {
    let catalog_url =
        std::env::var("CATALOG_URL").unwrap_or_else(|_| DEFAULT_CATALOG_URL.to_string());
    let catalog = OpenDataClient::new(catalog_url, BasicClient::new()?, PatternExtractor::new());

    info!("Listing schedule documents from the catalog");
    let documents = catalog.list_documents()?;
    let today = Utc::now().date_naive();
    let planned = plan(documents, today, horizon_days)?;
    if planned.is_empty() {
        bail!("no current or future schedule documents in the catalog");
    }
    info!(feeds = planned.len(), "Validity intervals planned");

    let mut cache = FeedCache::new(cache_dir.to_path_buf())?.force(force_reparse);
    let converter = ZipConverter::new(BasicClient::new()?);

    let mut archives = Vec::new();
    for feed in &planned {
        let path = cache.ensure(feed, &converter)?;
        archives.push(path);
    }

    let retained: HashSet<String> = planned
        .iter()
        .map(|f| f.interval.version.clone())
        .collect();
    let pruned = cache.prune(&retained)?;

    // An eviction shrinks the planned set, so the merged feed must be
    // rebuilt even though nothing was reconverted.
    let version_key = planned
        .iter()
        .map(|f| f.interval.version.as_str())
        .collect::<Vec<_>>()
        .join("/");
    if !force_remerge
        && cache.regenerated() == 0
        && pruned == 0
        && is_up_to_date(output, &archives, &version_key)
    {
        info!(output = %output.display(), "Merged feed is up to date");
        return Ok(());
    }

    let staging = fresh_dir(&output.with_extension("staging"))?;
    let mut merger = FeedMerger::new(&staging, strict);
    for (feed, path) in planned.iter().zip(&archives) {
        let tables = GtfsTables::from_zip_path(path)
            .with_context(|| format!("loading cached archive {}", path.display()))?;
        merger.merge_archive(&feed.interval, &tables)?;
    }
    let versions = merger.finish()?;

    write_static_tables(&staging, publisher, &versions, Utc::now())?;
    package(&staging, output)?;
    std::fs::remove_dir_all(&staging)?;
    Ok(())
}

/// A previously merged feed can be reused only when it is newer than every
/// cached archive and was merged from exactly the planned version set.
fn is_up_to_date(output: &Path, archives: &[PathBuf], version_key: &str) -> bool {
    let Ok(meta) = std::fs::metadata(output) else {
        return false;
    };
    let Ok(output_mtime) = meta.modified() else {
        return false;
    };
    let fresh = archives.iter().all(|path| {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .is_ok_and(|mtime| mtime <= output_mtime)
    });
    if !fresh {
        return false;
    }
    // feed_version records which documents went into the merge; a plan over
    // a different set invalidates the output even with an untouched cache.
    let Ok(existing) = GtfsTables::from_zip_path(output) else {
        return false;
    };
    existing
        .feed_info
        .first()
        .is_some_and(|fi| fi.feed_version == version_key)
}

fn fresh_dir(dir: &Path) -> Result<PathBuf> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    Ok(dir.to_path_buf())
}

fn stage_tables(staging: &Path, tables: &GtfsTables) -> Result<()> {
    append_rows(staging, &tables.stops)?;
    append_rows(staging, &tables.routes)?;
    append_rows(staging, &tables.trips)?;
    append_rows(staging, &tables.stop_times)?;
    append_rows(staging, &tables.shapes)?;
    append_rows(staging, &tables.calendar_dates)?;
    Ok(())
}
