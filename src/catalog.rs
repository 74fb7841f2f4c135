//! Trait and types for listing source schedule documents from the city's
//! open-data catalog.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Error;

/// Raw resource descriptor as the catalog endpoint returns it. The start
/// date of the schedule is buried in free text (`description` or `name`).
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub description: String,
    pub file: String,
    pub extension: String,
    pub modified: Option<DateTime<Utc>>,
}

/// One dated source document, ready for planning. Identity is the URL.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub url: String,
    pub nominal_version: NaiveDate,
    pub last_modified: Option<DateTime<Utc>>,
}

impl SourceDocument {
    /// The version key used for cache filenames and identifier prefixes.
    pub fn version(&self) -> String {
        self.nominal_version.format("%Y-%m-%d").to_string()
    }
}

/// Abstraction over the schedule catalog (e.g. otwartedane.erzeszow.pl).
pub trait CatalogApi {
    /// Returns all zip schedule documents the catalog currently lists.
    fn list_documents(&self) -> anyhow::Result<Vec<SourceDocument>>;
}

/// Strategy for digging the nominal start date out of a resource's free
/// text. The catalog has changed its phrasing before; keeping this pluggable
/// isolates the pattern matching from everything downstream.
pub trait VersionExtractor {
    fn extract(&self, resource: &Resource) -> Result<NaiveDate, Error>;
}

/// Default extractor: `od DD.MM.YYYY` in the description, falling back to
/// `[DD-MM-YYYY` in the name.
pub struct PatternExtractor {
    in_description: regex::Regex,
    in_name: regex::Regex,
}

impl PatternExtractor {
    pub fn new() -> Self {
        Self {
            in_description: regex::Regex::new(r"od ([0-9]{2})\.([0-9]{2})\.([0-9]{4})").unwrap(),
            in_name: regex::Regex::new(r"\[([0-9]{2})-([0-9]{2})-([0-9]{4})").unwrap(),
        }
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionExtractor for PatternExtractor {
    fn extract(&self, resource: &Resource) -> Result<NaiveDate, Error> {
        let captures = self
            .in_description
            .captures(&resource.description)
            .or_else(|| self.in_name.captures(&resource.name));

        captures
            .and_then(|m| {
                let day = m[1].parse().ok()?;
                let month = m[2].parse().ok()?;
                let year = m[3].parse().ok()?;
                NaiveDate::from_ymd_opt(year, month, day)
            })
            .ok_or_else(|| Error::DateExtraction {
                name: resource.name.clone(),
                description: resource.description.clone(),
            })
    }
}
