//! Turns the unordered catalog listing into an ordered, non-overlapping
//! sequence of validity intervals, one per source document.

use chrono::{Days, NaiveDate};
use tracing::debug;

use crate::catalog::SourceDocument;
use crate::error::Error;

/// Date range (inclusive on both ends) during which one source document is
/// authoritative. `version` doubles as the cache key and identifier prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityInterval {
    pub version: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ValidityInterval {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// A source document paired with the interval the planner assigned to it.
#[derive(Debug, Clone)]
pub struct PlannedFeed {
    pub document: SourceDocument,
    pub interval: ValidityInterval,
}

/// Assigns each document the window from its own nominal date to the day
/// before the next document's, then discards wholly past windows.
///
/// The last document's window either runs `horizon_days` past its start or,
/// when `horizon_days` is `None`, stays open-ended.
pub fn plan(
    mut documents: Vec<SourceDocument>,
    today: NaiveDate,
    horizon_days: Option<u32>,
) -> anyhow::Result<Vec<PlannedFeed>> {
    documents.sort_by_key(|d| d.nominal_version);

    for pair in documents.windows(2) {
        if pair[0].nominal_version == pair[1].nominal_version {
            return Err(Error::AmbiguousVersion {
                version: pair[0].version(),
                first_url: pair[0].url.clone(),
                second_url: pair[1].url.clone(),
            }
            .into());
        }
    }

    let ends: Vec<NaiveDate> = documents
        .iter()
        .enumerate()
        .map(|(i, doc)| match documents.get(i + 1) {
            Some(next) => next.nominal_version - Days::new(1),
            None => match horizon_days {
                Some(days) => doc.nominal_version + Days::new(u64::from(days)),
                None => NaiveDate::MAX,
            },
        })
        .collect();

    let planned: Vec<PlannedFeed> = documents
        .into_iter()
        .zip(ends)
        .filter(|(_, end)| *end >= today)
        .map(|(document, end_date)| {
            let interval = ValidityInterval {
                version: document.version(),
                start_date: document.nominal_version,
                end_date,
            };
            debug!(
                version = %interval.version,
                start = %interval.start_date,
                end = %interval.end_date,
                "Planned validity interval"
            );
            PlannedFeed { document, interval }
        })
        .collect();

    Ok(planned)
}
