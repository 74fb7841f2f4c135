//! Final packaging: static tables, archive compression and the atomic swap
//! onto the target path.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;
use zip::write::FileOptions;

use crate::gtfs::{Agency, Attribution, FeedInfo};
use crate::output::append_rows;

pub const DATASET_URL: &str = "https://otwartedane.erzeszow.pl/dataset/rozklady-jazdy-gtfs";

/// Feed publisher metadata, overridable from the CLI.
#[derive(Debug, Clone)]
pub struct Publisher {
    pub name: String,
    pub url: String,
    pub lang: String,
}

impl Default for Publisher {
    fn default() -> Self {
        Self {
            name: "ZTM Rzeszów".to_string(),
            url: DATASET_URL.to_string(),
            lang: "pl".to_string(),
        }
    }
}

/// Writes agency.txt, feed_info.txt and attributions.txt into the staging
/// directory. `versions` become the feed_version, joined with `/`.
pub fn write_static_tables(
    staging: &Path,
    publisher: &Publisher,
    versions: &[String],
    retrieved_at: DateTime<Utc>,
) -> Result<()> {
    append_rows(
        staging,
        &[Agency {
            agency_id: "1".to_string(),
            agency_name: "ZTM Rzeszów".to_string(),
            agency_url: "http://ztm.rzeszow.pl".to_string(),
            agency_timezone: "Europe/Warsaw".to_string(),
            agency_lang: "pl".to_string(),
            agency_phone: String::new(),
        }],
    )?;

    append_rows(
        staging,
        &[FeedInfo {
            feed_publisher_name: publisher.name.clone(),
            feed_publisher_url: publisher.url.clone(),
            feed_lang: publisher.lang.clone(),
            feed_version: versions.join("/"),
        }],
    )?;

    append_rows(
        staging,
        &[Attribution {
            attribution_id: "1".to_string(),
            organization_name: format!(
                "Data provided by: ZTM Rzeszów (retrieved {})",
                retrieved_at.format("%Y-%m-%d %H:%M:%S")
            ),
            is_producer: 0,
            is_operator: 1,
            is_authority: 1,
            is_data_source: 1,
            attribution_url: DATASET_URL.to_string(),
        }],
    )?;

    Ok(())
}

/// Zips every `.txt` table in the staging directory and atomically replaces
/// `target` with the finished archive. Nothing partial ever lands on the
/// target path.
pub fn package(staging: &Path, target: &Path) -> Result<()> {
    let tmp = target.with_extension("zip.tmp");
    let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut entries: Vec<_> = std::fs::read_dir(staging)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("txt"))
        .collect();
    entries.sort();

    for path in &entries {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("non-utf8 table filename")?;
        zip.start_file(name, options)?;
        let mut contents = Vec::new();
        File::open(path)?.read_to_end(&mut contents)?;
        zip.write_all(&contents)?;
    }
    zip.finish()?;

    std::fs::rename(&tmp, target)
        .with_context(|| format!("replacing {}", target.display()))?;
    info!(target = %target.display(), tables = entries.len(), "Wrote GTFS archive");
    Ok(())
}
