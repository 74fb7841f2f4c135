//! Domain error taxonomy for the conversion and merge pipeline.
//!
//! Anything fatal bubbles up through `anyhow` to `main`, which exits
//! non-zero; these variants exist so diagnostics can name the offending
//! document or version.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Catalog endpoint unreachable, or returned malformed/empty data.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// A resource's name/description contains no recognizable date.
    #[error("failed to extract start date from name={name:?} description={description:?}")]
    DateExtraction { name: String, description: String },

    /// Two source documents claim the same nominal version date.
    #[error("ambiguous version {version}: both {first_url} and {second_url}")]
    AmbiguousVersion {
        version: String,
        first_url: String,
        second_url: String,
    },

    /// A source document failed to download or parse into GTFS tables.
    #[error("conversion of version {version} failed: {source}")]
    Conversion {
        version: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A row references an identifier never registered for its archive.
    /// Only raised in strict mode; otherwise the row is dropped with a
    /// warning.
    #[error("merge integrity: {table} row in archive {version} references unknown {field} {value}")]
    MergeIntegrity {
        version: String,
        table: &'static str,
        field: &'static str,
        value: String,
    },
}
