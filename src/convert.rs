//! Downloads one source document and converts it into a curated GTFS table
//! set. Identifiers come out untouched; all namespacing happens later, in
//! the merger.

use std::collections::BTreeMap;
use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::info;

use crate::catalog::SourceDocument;
use crate::error::Error;
use crate::fetch::{HttpClient, fetch_bytes};
use crate::gtfs::{GtfsTables, Route};

/// Produces one GTFS table set per source document. Implementations must
/// output one row per logical entity and referentially closed tables; the
/// merger relies on that without re-checking.
pub trait DocumentConverter {
    fn convert(&self, document: &SourceDocument) -> Result<GtfsTables>;
}

/// The production converter: fetches the authority's GTFS zip and applies
/// the Rzeszów-specific curation passes.
pub struct ZipConverter<C> {
    http: C,
}

impl<C: HttpClient> ZipConverter<C> {
    pub fn new(http: C) -> Self {
        Self { http }
    }
}

impl<C: HttpClient> DocumentConverter for ZipConverter<C> {
    fn convert(&self, document: &SourceDocument) -> Result<GtfsTables> {
        let run = || -> Result<GtfsTables> {
            let bytes = fetch_bytes(&self.http, &document.url)
                .with_context(|| format!("downloading {}", document.url))?;
            let mut tables = GtfsTables::from_zip_bytes(&bytes)?;
            curate(&mut tables);
            Ok(tables)
        };
        let tables = run().map_err(|source| Error::Conversion {
            version: document.version(),
            source: source.into(),
        })?;
        info!(
            version = %document.version(),
            trips = tables.trips.len(),
            stops = tables.stops.len(),
            "Converted source document"
        );
        Ok(tables)
    }
}

/// All curation passes, in the order the original feed tooling ran them.
pub fn curate(tables: &mut GtfsTables) {
    merge_routes_by_short_name(tables);
    set_route_colors(tables);
    flag_request_stops(tables);
    strip_request_stop_suffix(tables);
    generate_trip_headsigns(tables);
    clean_headsigns(tables);
}

/// The authority publishes a separate route row per variant; collapse all
/// rows sharing a short name into one route `1_<short_name>`.
fn merge_routes_by_short_name(tables: &mut GtfsTables) {
    let mut short_name_to_ids: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for route in &tables.routes {
        short_name_to_ids
            .entry(route.route_short_name.clone())
            .or_default()
            .push(route.route_id.clone());
    }

    let mut remap = BTreeMap::new();
    let mut merged = Vec::new();
    for (short_name, old_ids) in short_name_to_ids {
        let new_id = format!("1_{short_name}");
        for old_id in old_ids {
            remap.insert(old_id, new_id.clone());
        }
        merged.push(Route {
            agency_id: "1".to_string(),
            route_id: new_id,
            route_short_name: short_name,
            route_long_name: String::new(),
            route_type: 3,
            route_color: None,
            route_text_color: None,
        });
    }

    for trip in &mut tables.trips {
        if let Some(new_id) = remap.get(&trip.route_id) {
            trip.route_id = new_id.clone();
        }
    }
    tables.routes = merged;
}

/// Night lines (N-prefixed) are black; everything else gets the ZTM orange.
fn set_route_colors(tables: &mut GtfsTables) {
    for route in &mut tables.routes {
        let color = if route.route_short_name.starts_with('N') {
            "000000"
        } else {
            "DD3300"
        };
        route.route_color = Some(color.to_string());
        route.route_text_color = Some("FFFFFF".to_string());
    }
}

/// Stops whose name carries the `nż` marker are request stops; their
/// stop_times get pickup/drop-off type 3.
fn flag_request_stops(tables: &mut GtfsTables) {
    let request_stops: HashSet<&str> = tables
        .stops
        .iter()
        .filter(|s| s.stop_name.ends_with("nż"))
        .map(|s| s.stop_id.as_str())
        .collect();

    for st in &mut tables.stop_times {
        let flag = if request_stops.contains(st.stop_id.as_str()) {
            3
        } else {
            0
        };
        st.pickup_type = flag;
        st.drop_off_type = flag;
    }
}

fn strip_request_stop_suffix(tables: &mut GtfsTables) {
    for stop in &mut tables.stops {
        if let Some(stripped) = stop.stop_name.strip_suffix(" nż") {
            stop.stop_name = stripped.to_string();
        }
    }
}

/// Fills missing trip headsigns with the name of the trip's last stop.
fn generate_trip_headsigns(tables: &mut GtfsTables) {
    let stop_names: BTreeMap<&str, &str> = tables
        .stops
        .iter()
        .map(|s| (s.stop_id.as_str(), s.stop_name.as_str()))
        .collect();

    let mut last_stop: BTreeMap<&str, (u32, &str)> = BTreeMap::new();
    for st in &tables.stop_times {
        let entry = last_stop
            .entry(st.trip_id.as_str())
            .or_insert((st.stop_sequence, st.stop_id.as_str()));
        if st.stop_sequence >= entry.0 {
            *entry = (st.stop_sequence, st.stop_id.as_str());
        }
    }

    let headsigns: BTreeMap<String, String> = last_stop
        .into_iter()
        .filter_map(|(trip_id, (_, stop_id))| {
            let name = stop_names.get(stop_id)?;
            Some((trip_id.to_string(), name.to_string()))
        })
        .collect();

    for trip in &mut tables.trips {
        let missing = trip
            .trip_headsign
            .as_deref()
            .is_none_or(|h| h.trim().is_empty());
        if missing {
            if let Some(name) = headsigns.get(&trip.trip_id) {
                trip.trip_headsign = Some(name.clone());
            }
        }
    }
}

/// Drops the trailing stop-indicator number and a trailing "pętla" from
/// headsigns.
fn clean_headsigns(tables: &mut GtfsTables) {
    let trailing_number = regex::Regex::new(r"\s*\d+$").unwrap();
    let trailing_petla = regex::Regex::new(r"\s*pętla$").unwrap();

    for trip in &mut tables.trips {
        if let Some(headsign) = trip.trip_headsign.take() {
            let cleaned = trailing_number.replace(&headsign, "");
            let cleaned = trailing_petla.replace(&cleaned, "");
            trip.trip_headsign = Some(cleaned.into_owned());
        }
    }
}
