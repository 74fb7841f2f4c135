use serde::{Deserialize, Serialize};

use super::GtfsRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: String,
    #[serde(default)]
    pub stop_name: String,
    pub stop_lat: f64,
    pub stop_lon: f64,
}

impl GtfsRecord for Stop {
    const TABLE: &'static str = "stops.txt";
    const COLUMNS: &'static [&'static str] = &["stop_id", "stop_name", "stop_lat", "stop_lon"];
}
