//! Streaming-safe CSV table writing for the staging directory.
//!
//! The merger appends to the incremental tables once per archive; the header
//! is written only when a table file is first created, so re-appending never
//! duplicates it.

use anyhow::Result;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

use crate::gtfs::GtfsRecord;

/// Appends rows to `dir/<table>`, creating the file (with its header) on
/// first use. Appending an empty slice still materializes the header.
pub fn append_rows<T: GtfsRecord>(dir: &Path, rows: &[T]) -> Result<()> {
    let path = dir.join(T::TABLE);
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, rows = rows.len(), "Appending table rows");

    let file = OpenOptions::new().append(true).create(true).open(&path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(false) // IMPORTANT when appending
        .from_writer(file);

    if !file_exists {
        writer.write_record(T::COLUMNS)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}
