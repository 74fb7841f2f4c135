use serde::{Deserialize, Serialize};

use super::GtfsRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopTime {
    pub trip_id: String,
    pub stop_sequence: u32,
    pub stop_id: String,
    pub arrival_time: String,
    pub departure_time: String,
    #[serde(default)]
    pub pickup_type: u8,
    #[serde(default)]
    pub drop_off_type: u8,
}

impl GtfsRecord for StopTime {
    const TABLE: &'static str = "stop_times.txt";
    const COLUMNS: &'static [&'static str] = &[
        "trip_id",
        "stop_sequence",
        "stop_id",
        "arrival_time",
        "departure_time",
        "pickup_type",
        "drop_off_type",
    ];
}
