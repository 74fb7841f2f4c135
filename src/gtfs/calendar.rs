use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{GtfsRecord, gtfs_date};

/// The source feeds express calendars exclusively through calendar_dates
/// exceptions, so there is no calendar.txt table anywhere in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarDate {
    #[serde(with = "gtfs_date")]
    pub date: NaiveDate,
    pub service_id: String,
    pub exception_type: u8,
}

impl GtfsRecord for CalendarDate {
    const TABLE: &'static str = "calendar_dates.txt";
    const COLUMNS: &'static [&'static str] = &["date", "service_id", "exception_type"];
}
