//! Typed GTFS tables and zip archive I/O.
//!
//! Field order in each record struct is exactly the column order the output
//! must carry; `csv` derives headers from the field names, so downstream
//! consumers see a stable layout.

mod calendar;
mod dates;
mod routes;
mod shapes;
mod static_tables;
mod stop_times;
mod stops;
mod trips;

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use zip::ZipArchive;
use zip::write::FileOptions;

pub use calendar::CalendarDate;
pub use dates::gtfs_date;
pub use routes::Route;
pub use shapes::Shape;
pub use static_tables::{Agency, Attribution, FeedInfo};
pub use stop_times::StopTime;
pub use stops::Stop;
pub use trips::Trip;

/// A record type belonging to one GTFS table. `COLUMNS` must match the
/// serde field names in declaration order; it exists so empty tables still
/// get a header row.
pub trait GtfsRecord: Serialize {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
}

/// One GTFS table set, either freshly converted from a source document or
/// loaded back from a cached archive.
#[derive(Debug, Default)]
pub struct GtfsTables {
    pub agencies: Vec<Agency>,
    pub routes: Vec<Route>,
    pub stops: Vec<Stop>,
    pub trips: Vec<Trip>,
    pub stop_times: Vec<StopTime>,
    pub shapes: Vec<Shape>,
    pub calendar_dates: Vec<CalendarDate>,
    pub feed_info: Vec<FeedInfo>,
    pub attributions: Vec<Attribution>,
}

impl GtfsTables {
    pub fn from_zip_path(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_zip_bytes(&bytes)
    }

    /// Reads a GTFS zip. Tables absent from the archive come back empty.
    pub fn from_zip_bytes(bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        Ok(Self {
            agencies: read_table(&mut archive, "agency.txt")?,
            routes: read_table(&mut archive, "routes.txt")?,
            stops: read_table(&mut archive, "stops.txt")?,
            trips: read_table(&mut archive, "trips.txt")?,
            stop_times: read_table(&mut archive, "stop_times.txt")?,
            shapes: read_table(&mut archive, "shapes.txt")?,
            calendar_dates: read_table(&mut archive, "calendar_dates.txt")?,
            feed_info: read_table(&mut archive, "feed_info.txt")?,
            attributions: read_table(&mut archive, "attributions.txt")?,
        })
    }

    /// Writes all nine tables to a zip archive at `path`, headers included
    /// even for empty tables.
    pub fn write_zip(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        let mut zip = zip::ZipWriter::new(file);
        let options =
            FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        write_table(&mut zip, options, "agency.txt", &self.agencies)?;
        write_table(&mut zip, options, "routes.txt", &self.routes)?;
        write_table(&mut zip, options, "stops.txt", &self.stops)?;
        write_table(&mut zip, options, "trips.txt", &self.trips)?;
        write_table(&mut zip, options, "stop_times.txt", &self.stop_times)?;
        write_table(&mut zip, options, "shapes.txt", &self.shapes)?;
        write_table(&mut zip, options, "calendar_dates.txt", &self.calendar_dates)?;
        write_table(&mut zip, options, "feed_info.txt", &self.feed_info)?;
        write_table(&mut zip, options, "attributions.txt", &self.attributions)?;

        zip.finish()?;
        Ok(())
    }
}

fn read_table<T: DeserializeOwned, R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<T>> {
    let mut contents = String::new();
    match archive.by_name(name) {
        Ok(mut entry) => {
            entry.read_to_string(&mut contents)?;
        }
        Err(zip::result::ZipError::FileNotFound) => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    }

    let mut rows = Vec::new();
    for rec in csv::Reader::from_reader(contents.as_bytes()).deserialize() {
        let rec: T = rec.with_context(|| format!("parsing {name}"))?;
        rows.push(rec);
    }
    Ok(rows)
}

fn write_table<T: GtfsRecord, W: Write + std::io::Seek>(
    zip: &mut zip::ZipWriter<W>,
    options: FileOptions,
    name: &str,
    rows: &[T],
) -> Result<()> {
    zip.start_file(name, options)?;
    let buf = table_to_csv(rows)?;
    zip.write_all(&buf)?;
    Ok(())
}

/// Serializes rows to CSV in the table's declared column order. The header
/// row is always present, even when there are no rows.
pub fn table_to_csv<T: GtfsRecord>(rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(T::COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("finalizing csv buffer: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::env;

    fn temp_path(name: &str) -> std::path::PathBuf {
        env::temp_dir().join(name)
    }

    #[test]
    fn test_zip_read_back_matches_written_tables() {
        let tables = GtfsTables {
            stops: vec![Stop {
                stop_id: "S1".to_string(),
                stop_name: "Dworzec Główny".to_string(),
                stop_lat: 50.04,
                stop_lon: 22.0,
            }],
            calendar_dates: vec![CalendarDate {
                date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                service_id: "C1".to_string(),
                exception_type: 1,
            }],
            ..Default::default()
        };

        let path = temp_path("rzeszow_gtfs_test_tables.zip");
        tables.write_zip(&path).unwrap();
        let read_back = GtfsTables::from_zip_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(read_back.stops.len(), 1);
        assert_eq!(read_back.stops[0].stop_id, "S1");
        assert_eq!(read_back.calendar_dates.len(), 1);
        assert_eq!(
            read_back.calendar_dates[0].date,
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
        );
        assert!(read_back.trips.is_empty());
    }

    #[test]
    fn test_missing_table_reads_as_empty() {
        // A zip with only stops.txt still loads; the other tables are empty.
        let tables = GtfsTables {
            stops: vec![Stop {
                stop_id: "S1".to_string(),
                stop_name: "Tesco".to_string(),
                stop_lat: 50.0,
                stop_lon: 22.0,
            }],
            ..Default::default()
        };
        let path = temp_path("rzeszow_gtfs_test_partial.zip");
        tables.write_zip(&path).unwrap();

        let read_back = GtfsTables::from_zip_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(read_back.shapes.is_empty());
        assert!(read_back.feed_info.is_empty());
    }

    #[test]
    fn test_csv_header_order_is_field_order() {
        let rows = vec![Route {
            agency_id: "1".to_string(),
            route_id: "1_0".to_string(),
            route_short_name: "0".to_string(),
            route_long_name: String::new(),
            route_type: 3,
            route_color: Some("DD3300".to_string()),
            route_text_color: Some("FFFFFF".to_string()),
        }];
        let csv = String::from_utf8(table_to_csv(&rows).unwrap()).unwrap();
        let header = csv.lines().next().unwrap();
        assert_eq!(
            header,
            "agency_id,route_id,route_short_name,route_long_name,route_type,route_color,route_text_color"
        );
    }
}
