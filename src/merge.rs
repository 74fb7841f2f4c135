//! Merges the per-interval GTFS archives into one consistent feed.
//!
//! Archives are processed strictly in ascending start-date order; that order
//! decides every first-write-wins tie. Stops coalesce across archives when
//! they are geographically the same; trips, services and shapes never
//! coalesce and are namespaced with their archive's version instead.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::gtfs::{CalendarDate, GtfsTables, Route, Shape, Stop, StopTime, Trip};
use crate::output::append_rows;
use crate::plan::ValidityInterval;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Stops closer than this are the same physical stop.
const STOP_MERGE_THRESHOLD_KM: f64 = 0.01;

/// Great-circle distance in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// All cross-archive state of one merge run. Owned by the [`FeedMerger`];
/// nothing else mutates it.
#[derive(Default)]
pub struct MergeContext {
    /// Registered merged stops, in registration order. Written once at the
    /// end of the run.
    stops: Vec<Stop>,
    /// Raw stop id -> indices into `stops` carrying that raw id (the
    /// original entry plus any `raw:N` disambiguations).
    by_raw_id: HashMap<String, Vec<usize>>,
    /// (archive version, raw stop id) -> final stop id.
    stop_mapping: HashMap<(String, String), String>,
    /// Every final stop id handed out so far, raw and synthesized alike.
    stop_ids: HashSet<String>,
    /// First-write-wins route registry.
    routes: Vec<Route>,
    route_ids: HashSet<String>,
}

impl MergeContext {
    /// Registers one stop of `version`, folding it into an existing merged
    /// stop when one with the same raw id sits within the merge threshold.
    fn register_stop(&mut self, version: &str, stop: &Stop) {
        let Some(indices) = self.by_raw_id.get(&stop.stop_id) else {
            // A raw id like `X:1` can still clash with an id synthesized for
            // another stop.
            let final_id = if self.stop_ids.contains(&stop.stop_id) {
                self.unused_suffixed_id(&stop.stop_id)
            } else {
                stop.stop_id.clone()
            };
            self.push_stop(version, stop, final_id);
            return;
        };

        let nearby = indices
            .iter()
            .map(|&idx| &self.stops[idx])
            .find(|existing| {
                haversine_km(
                    existing.stop_lat,
                    existing.stop_lon,
                    stop.stop_lat,
                    stop.stop_lon,
                ) <= STOP_MERGE_THRESHOLD_KM
            })
            .map(|existing| existing.stop_id.clone());

        match nearby {
            Some(final_id) => {
                self.stop_mapping
                    .insert((version.to_string(), stop.stop_id.clone()), final_id);
            }
            None => {
                // Same raw id, but it moved: synthesize a suffixed id.
                let final_id = self.unused_suffixed_id(&stop.stop_id);
                self.push_stop(version, stop, final_id);
            }
        }
    }

    fn push_stop(&mut self, version: &str, stop: &Stop, final_id: String) {
        self.stop_mapping.insert(
            (version.to_string(), stop.stop_id.clone()),
            final_id.clone(),
        );
        self.by_raw_id
            .entry(stop.stop_id.clone())
            .or_default()
            .push(self.stops.len());
        self.stop_ids.insert(final_id.clone());
        self.stops.push(Stop {
            stop_id: final_id,
            stop_name: stop.stop_name.clone(),
            stop_lat: stop.stop_lat,
            stop_lon: stop.stop_lon,
        });
    }

    /// Smallest `raw:N` not colliding with any final id handed out so far.
    fn unused_suffixed_id(&self, raw_id: &str) -> String {
        (1..)
            .map(|n| format!("{raw_id}:{n}"))
            .find(|candidate| !self.stop_ids.contains(candidate))
            .unwrap()
    }

    fn register_route(&mut self, route: &Route) {
        if self.route_ids.insert(route.route_id.clone()) {
            self.routes.push(route.clone());
        }
    }

    fn final_stop_id(&self, version: &str, raw_id: &str) -> Option<&str> {
        self.stop_mapping
            .get(&(version.to_string(), raw_id.to_string()))
            .map(String::as_str)
    }
}

pub struct FeedMerger {
    ctx: MergeContext,
    staging: PathBuf,
    strict: bool,
    merged_versions: Vec<String>,
}

impl FeedMerger {
    pub fn new(staging: &Path, strict: bool) -> Self {
        Self {
            ctx: MergeContext::default(),
            staging: staging.to_path_buf(),
            strict,
            merged_versions: Vec::new(),
        }
    }

    /// Folds one archive into the merged feed. Callers must pass archives in
    /// ascending `interval.start_date` order.
    ///
    /// The calendar/trip/stop-time/shape tables are appended to the staging
    /// directory immediately; stops and routes accumulate until [`finish`].
    ///
    /// [`finish`]: FeedMerger::finish
    pub fn merge_archive(
        &mut self,
        interval: &ValidityInterval,
        tables: &GtfsTables,
    ) -> Result<()> {
        let version = &interval.version;

        for stop in &tables.stops {
            self.ctx.register_stop(version, stop);
        }
        for route in &tables.routes {
            self.ctx.register_route(route);
        }

        // Calendar rows outside the archive's window belong to a neighbouring
        // archive and are dropped here; the services they activate follow.
        let mut active_services = HashSet::new();
        let calendar_dates: Vec<CalendarDate> = tables
            .calendar_dates
            .iter()
            .filter(|row| interval.contains(row.date))
            .map(|row| {
                active_services.insert(row.service_id.clone());
                CalendarDate {
                    date: row.date,
                    service_id: format!("{version}:{}", row.service_id),
                    exception_type: row.exception_type,
                }
            })
            .collect();

        let mut active_trips = HashSet::new();
        let mut active_shapes = HashSet::new();
        let trips: Vec<Trip> = tables
            .trips
            .iter()
            .filter(|trip| active_services.contains(&trip.service_id))
            .map(|trip| {
                active_trips.insert(trip.trip_id.clone());
                if let Some(shape_id) = &trip.shape_id {
                    active_shapes.insert(shape_id.clone());
                }
                Trip {
                    trip_id: format!("{version}:{}", trip.trip_id),
                    route_id: trip.route_id.clone(),
                    service_id: format!("{version}:{}", trip.service_id),
                    trip_headsign: trip.trip_headsign.clone(),
                    direction_id: trip.direction_id,
                    block_id: trip.block_id.clone(),
                    shape_id: trip.shape_id.as_ref().map(|s| format!("{version}:{s}")),
                }
            })
            .collect();

        let mut stop_times = Vec::with_capacity(tables.stop_times.len());
        for st in &tables.stop_times {
            if !active_trips.contains(&st.trip_id) {
                continue;
            }
            let stop_id = match self.ctx.final_stop_id(version, &st.stop_id) {
                Some(id) => id.to_string(),
                None => {
                    // The converter guarantees closure, so this indicates a
                    // broken source archive.
                    if self.strict {
                        return Err(Error::MergeIntegrity {
                            version: version.clone(),
                            table: "stop_times",
                            field: "stop_id",
                            value: st.stop_id.clone(),
                        }
                        .into());
                    }
                    warn!(
                        version = %version,
                        stop_id = %st.stop_id,
                        "stop_time references a stop missing from its archive, dropping row"
                    );
                    continue;
                }
            };
            stop_times.push(StopTime {
                trip_id: format!("{version}:{}", st.trip_id),
                stop_sequence: st.stop_sequence,
                stop_id,
                arrival_time: st.arrival_time.clone(),
                departure_time: st.departure_time.clone(),
                pickup_type: st.pickup_type,
                drop_off_type: st.drop_off_type,
            });
        }

        let shapes: Vec<Shape> = tables
            .shapes
            .iter()
            .filter(|shape| active_shapes.contains(&shape.shape_id))
            .map(|shape| Shape {
                shape_id: format!("{version}:{}", shape.shape_id),
                shape_pt_sequence: shape.shape_pt_sequence,
                shape_pt_lat: shape.shape_pt_lat,
                shape_pt_lon: shape.shape_pt_lon,
            })
            .collect();

        debug!(
            version = %version,
            services = active_services.len(),
            trips = trips.len(),
            stop_times = stop_times.len(),
            "Archive filtered to its validity window"
        );

        append_rows(&self.staging, &calendar_dates)?;
        append_rows(&self.staging, &trips)?;
        append_rows(&self.staging, &stop_times)?;
        append_rows(&self.staging, &shapes)?;

        info!(
            version = %version,
            start = %interval.start_date,
            end = %interval.end_date,
            trips = trips.len(),
            "Merged archive"
        );
        self.merged_versions.push(version.clone());
        Ok(())
    }

    /// Writes the accumulated stop and route tables and returns the merged
    /// versions, in processing order.
    pub fn finish(self) -> Result<Vec<String>> {
        append_rows(&self.staging, &self.ctx.stops)?;
        append_rows(&self.staging, &self.ctx.routes)?;
        info!(
            stops = self.ctx.stops.len(),
            routes = self.ctx.routes.len(),
            archives = self.merged_versions.len(),
            "Merge complete"
        );
        Ok(self.merged_versions)
    }

    #[cfg(test)]
    fn context(&self) -> &MergeContext {
        &self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::env;
    use std::fs;

    fn stop(id: &str, lat: f64, lon: f64) -> Stop {
        Stop {
            stop_id: id.to_string(),
            stop_name: id.to_string(),
            stop_lat: lat,
            stop_lon: lon,
        }
    }

    fn route(id: &str, short: &str, long: &str) -> Route {
        Route {
            agency_id: "1".to_string(),
            route_id: id.to_string(),
            route_short_name: short.to_string(),
            route_long_name: long.to_string(),
            route_type: 3,
            route_color: None,
            route_text_color: None,
        }
    }

    fn interval(version: &str, start: &str, end: &str) -> ValidityInterval {
        ValidityInterval {
            version: version.to_string(),
            start_date: start.parse().unwrap(),
            end_date: end.parse().unwrap(),
        }
    }

    fn calendar(service: &str, date: &str) -> CalendarDate {
        CalendarDate {
            date: date.parse::<NaiveDate>().unwrap(),
            service_id: service.to_string(),
            exception_type: 1,
        }
    }

    fn trip(id: &str, service: &str, shape: Option<&str>) -> Trip {
        Trip {
            trip_id: id.to_string(),
            route_id: "1_0".to_string(),
            service_id: service.to_string(),
            trip_headsign: None,
            direction_id: None,
            block_id: None,
            shape_id: shape.map(str::to_string),
        }
    }

    fn stop_time(trip_id: &str, seq: u32, stop_id: &str) -> StopTime {
        StopTime {
            trip_id: trip_id.to_string(),
            stop_sequence: seq,
            stop_id: stop_id.to_string(),
            arrival_time: "08:00:00".to_string(),
            departure_time: "08:00:00".to_string(),
            pickup_type: 0,
            drop_off_type: 0,
        }
    }

    fn merger(name: &str) -> FeedMerger {
        let dir = env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        FeedMerger::new(&dir, false)
    }

    #[test]
    fn test_haversine_known_distance() {
        // Rzeszów main station to the city center is roughly 1 km.
        let d = haversine_km(50.0427, 22.0051, 50.0374, 21.9990);
        assert!(d > 0.5 && d < 1.5, "got {d}");
        assert_eq!(haversine_km(50.0, 22.0, 50.0, 22.0), 0.0);
    }

    #[test]
    fn test_nearby_stops_merge_into_one() {
        let mut m = merger("rzeszow_gtfs_test_merge_nearby");
        // ~5m apart
        m.ctx.register_stop("2024-01-01", &stop("X", 50.0, 22.0));
        m.ctx.register_stop("2024-04-01", &stop("X", 50.00004, 22.00004));

        assert_eq!(m.context().stops.len(), 1);
        assert_eq!(m.ctx.final_stop_id("2024-04-01", "X"), Some("X"));
    }

    #[test]
    fn test_distant_stops_get_suffixed_ids() {
        let mut m = merger("rzeszow_gtfs_test_merge_distant");
        // ~50m apart
        m.ctx.register_stop("2024-01-01", &stop("X", 50.0, 22.0));
        m.ctx.register_stop("2024-04-01", &stop("X", 50.00045, 22.0));

        assert_eq!(m.context().stops.len(), 2);
        assert_eq!(m.ctx.final_stop_id("2024-01-01", "X"), Some("X"));
        assert_eq!(m.ctx.final_stop_id("2024-04-01", "X"), Some("X:1"));

        // A third distinct location takes the next free suffix.
        m.ctx.register_stop("2024-07-01", &stop("X", 50.001, 22.001));
        assert_eq!(m.ctx.final_stop_id("2024-07-01", "X"), Some("X:2"));
    }

    #[test]
    fn test_literal_raw_id_never_collides_with_a_synthesized_id() {
        let mut m = merger("rzeszow_gtfs_test_merge_literal_suffix");
        // "X" moved, so the second location synthesizes "X:1".
        m.ctx.register_stop("2024-01-01", &stop("X", 50.0, 22.0));
        m.ctx.register_stop("2024-04-01", &stop("X", 50.00045, 22.0));
        // A source stop literally named "X:1" must not reuse that id.
        m.ctx.register_stop("2024-04-01", &stop("X:1", 50.1, 22.1));

        let ids: HashSet<&str> = m
            .context()
            .stops
            .iter()
            .map(|s| s.stop_id.as_str())
            .collect();
        assert_eq!(ids.len(), m.context().stops.len(), "duplicate merged stop ids");
        assert_eq!(m.ctx.final_stop_id("2024-04-01", "X:1"), Some("X:1:1"));
    }

    #[test]
    fn test_stop_dedup_count_is_order_independent() {
        let a = stop("X", 50.0, 22.0);
        let b = stop("X", 50.00004, 22.00004);

        let mut forward = merger("rzeszow_gtfs_test_merge_sym_fwd");
        forward.ctx.register_stop("v1", &a);
        forward.ctx.register_stop("v2", &b);

        let mut backward = merger("rzeszow_gtfs_test_merge_sym_bwd");
        backward.ctx.register_stop("v1", &b);
        backward.ctx.register_stop("v2", &a);

        assert_eq!(forward.context().stops.len(), backward.context().stops.len());
    }

    #[test]
    fn test_earlier_archive_route_definition_wins() {
        let mut m = merger("rzeszow_gtfs_test_merge_routes");
        m.ctx.register_route(&route("1_0", "0", "first definition"));
        m.ctx.register_route(&route("1_0", "0", "second definition"));

        assert_eq!(m.context().routes.len(), 1);
        assert_eq!(m.context().routes[0].route_long_name, "first definition");
    }

    #[test]
    fn test_calendar_rows_outside_window_drop_their_trips() {
        let mut m = merger("rzeszow_gtfs_test_merge_window");
        let tables = GtfsTables {
            stops: vec![stop("s1", 50.0, 22.0)],
            calendar_dates: vec![
                calendar("IN", "2024-02-01"),
                calendar("OUT", "2024-05-01"),
            ],
            trips: vec![trip("t_in", "IN", None), trip("t_out", "OUT", None)],
            stop_times: vec![stop_time("t_in", 1, "s1"), stop_time("t_out", 1, "s1")],
            ..Default::default()
        };
        m.merge_archive(&interval("2024-01-01", "2024-01-01", "2024-03-31"), &tables)
            .unwrap();

        let staged = fs::read_to_string(m.staging.join("trips.txt")).unwrap();
        assert!(staged.contains("2024-01-01:t_in"));
        assert!(!staged.contains("t_out"));

        let staged = fs::read_to_string(m.staging.join("stop_times.txt")).unwrap();
        assert_eq!(staged.lines().count(), 2); // header + the retained row

        let staged = fs::read_to_string(m.staging.join("calendar_dates.txt")).unwrap();
        assert!(staged.contains("20240201,2024-01-01:IN,1"));
        assert!(!staged.contains("OUT"));
    }

    #[test]
    fn test_shapes_follow_their_trips() {
        let mut m = merger("rzeszow_gtfs_test_merge_shapes");
        let tables = GtfsTables {
            stops: vec![stop("s1", 50.0, 22.0)],
            calendar_dates: vec![calendar("S", "2024-02-01")],
            trips: vec![trip("t1", "S", Some("sh1")), trip("t2", "GONE", Some("sh2"))],
            stop_times: vec![stop_time("t1", 1, "s1")],
            shapes: vec![
                Shape {
                    shape_id: "sh1".to_string(),
                    shape_pt_sequence: 1,
                    shape_pt_lat: 50.0,
                    shape_pt_lon: 22.0,
                },
                Shape {
                    shape_id: "sh2".to_string(),
                    shape_pt_sequence: 1,
                    shape_pt_lat: 50.0,
                    shape_pt_lon: 22.0,
                },
            ],
            ..Default::default()
        };
        m.merge_archive(&interval("2024-01-01", "2024-01-01", "2024-03-31"), &tables)
            .unwrap();

        let staged = fs::read_to_string(m.staging.join("shapes.txt")).unwrap();
        assert!(staged.contains("2024-01-01:sh1"));
        assert!(!staged.contains("sh2"));
    }

    #[test]
    fn test_dangling_stop_reference_drops_the_row_when_lenient() {
        let mut m = merger("rzeszow_gtfs_test_merge_dangling");
        let tables = GtfsTables {
            stops: vec![stop("s1", 50.0, 22.0)],
            calendar_dates: vec![calendar("S", "2024-02-01")],
            trips: vec![trip("t1", "S", None)],
            stop_times: vec![stop_time("t1", 1, "s1"), stop_time("t1", 2, "ghost")],
            ..Default::default()
        };
        m.merge_archive(&interval("2024-01-01", "2024-01-01", "2024-03-31"), &tables)
            .unwrap();

        // The broken row is gone, its healthy sibling survives.
        let staged = fs::read_to_string(m.staging.join("stop_times.txt")).unwrap();
        assert!(!staged.contains("ghost"));
        assert_eq!(staged.lines().count(), 2); // header + the s1 row
        assert!(staged.contains(",s1,"));
    }

    #[test]
    fn test_dangling_stop_reference_is_fatal_in_strict_mode() {
        let dir = env::temp_dir().join("rzeszow_gtfs_test_merge_strict");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let mut m = FeedMerger::new(&dir, true);

        let tables = GtfsTables {
            calendar_dates: vec![calendar("S", "2024-02-01")],
            trips: vec![trip("t1", "S", None)],
            stop_times: vec![stop_time("t1", 1, "ghost")],
            ..Default::default()
        };
        let err = m
            .merge_archive(&interval("2024-01-01", "2024-01-01", "2024-03-31"), &tables)
            .unwrap_err();
        assert!(matches!(
            err.downcast::<Error>().unwrap(),
            Error::MergeIntegrity { .. }
        ));
    }

    #[test]
    fn test_finish_writes_stop_and_route_tables_once() {
        let mut m = merger("rzeszow_gtfs_test_merge_finish");
        m.ctx.register_stop("v", &stop("X", 50.0, 22.0));
        m.ctx.register_route(&route("1_0", "0", ""));
        let staging = m.staging.clone();

        let versions = m.finish().unwrap();
        assert!(versions.is_empty());

        let stops = fs::read_to_string(staging.join("stops.txt")).unwrap();
        assert_eq!(stops.lines().count(), 2);
        let routes = fs::read_to_string(staging.join("routes.txt")).unwrap();
        assert_eq!(routes.lines().count(), 2);
    }
}
