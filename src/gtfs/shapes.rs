use serde::{Deserialize, Serialize};

use super::GtfsRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub shape_id: String,
    pub shape_pt_sequence: u32,
    pub shape_pt_lat: f64,
    pub shape_pt_lon: f64,
}

impl GtfsRecord for Shape {
    const TABLE: &'static str = "shapes.txt";
    const COLUMNS: &'static [&'static str] = &[
        "shape_id",
        "shape_pt_sequence",
        "shape_pt_lat",
        "shape_pt_lon",
    ];
}
