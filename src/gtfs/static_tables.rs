//! Records for the tables the packager writes once per feed.

use serde::{Deserialize, Serialize};

use super::GtfsRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agency {
    pub agency_id: String,
    pub agency_name: String,
    pub agency_url: String,
    pub agency_timezone: String,
    #[serde(default)]
    pub agency_lang: String,
    #[serde(default)]
    pub agency_phone: String,
}

impl GtfsRecord for Agency {
    const TABLE: &'static str = "agency.txt";
    const COLUMNS: &'static [&'static str] = &[
        "agency_id",
        "agency_name",
        "agency_url",
        "agency_timezone",
        "agency_lang",
        "agency_phone",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedInfo {
    pub feed_publisher_name: String,
    pub feed_publisher_url: String,
    pub feed_lang: String,
    #[serde(default)]
    pub feed_version: String,
}

impl GtfsRecord for FeedInfo {
    const TABLE: &'static str = "feed_info.txt";
    const COLUMNS: &'static [&'static str] = &[
        "feed_publisher_name",
        "feed_publisher_url",
        "feed_lang",
        "feed_version",
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub attribution_id: String,
    pub organization_name: String,
    pub is_producer: u8,
    pub is_operator: u8,
    pub is_authority: u8,
    pub is_data_source: u8,
    #[serde(default)]
    pub attribution_url: String,
}

impl GtfsRecord for Attribution {
    const TABLE: &'static str = "attributions.txt";
    const COLUMNS: &'static [&'static str] = &[
        "attribution_id",
        "organization_name",
        "is_producer",
        "is_operator",
        "is_authority",
        "is_data_source",
        "attribution_url",
    ];
}
