//! Geospatial locator: station reference tables and radius search.
//!
//! Coordinates come from the pay-station table, dwell limits and space counts
//! from the capacity table. The two are inner-joined on the station id and
//! filtered by great-circle distance from the query point.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Mean Earth radius in miles.
pub const EARTH_RADIUS_MILES: f64 = 3963.0;

/// Space Needle, the default destination.
pub const SPACE_NEEDLE: GeoPoint = GeoPoint {
    latitude: 47.6205,
    longitude: -122.3493,
};

/// A point on the Earth's surface in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    fn to_radians(self) -> (f64, f64) {
        (self.latitude / 180.0 * PI, self.longitude / 180.0 * PI)
    }
}

/// Row of the station coordinate table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StationCoord {
    #[serde(rename = "ELMNTKEY", alias = "id", alias = "sourceelementkey")]
    pub id: i64,
    #[serde(rename = "SHAPE_LAT", alias = "latitude")]
    pub latitude: Option<f64>,
    #[serde(rename = "SHAPE_LNG", alias = "longitude")]
    pub longitude: Option<f64>,
}

/// Row of the station capacity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StationCapacity {
    #[serde(rename = "elmntkey", alias = "id")]
    pub id: i64,
    pub time_limit_min: u32,
    pub time_limit_max: u32,
    pub space_count: u32,
}

/// A parking station resolved for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub time_limit_min: u32,
    pub time_limit_max: u32,
    /// Always at least 1
    pub space_count: u32,
    /// Distance from the query point in miles.
    pub distance_miles: f64,
}

impl Location {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Great-circle distance in miles between two points.
///
/// Uses the spherical dot-product identity. The cosine is clamped to [-1, 1]
/// so coincident points give exactly zero instead of NaN.
pub fn great_circle_miles(a: GeoPoint, b: GeoPoint) -> f64 {
    if a == b {
        return 0.0;
    }

    let (lat, lng) = a.to_radians();
    let (lat0, lng0) = b.to_radians();

    let cos_angle = lat.cos() * lat0.cos() * (lng - lng0).cos() + lat.sin() * lat0.sin();
    cos_angle.clamp(-1.0, 1.0).acos() * EARTH_RADIUS_MILES
}

/// Find stations within `radius_miles` of `query_point`, nearest first.
///
/// Stations missing from either table, or with no parking spaces, are
/// dropped. Ties keep the order of the coordinate table. An empty result is not an error.
pub fn find_nearby(
    query_point: GeoPoint,
    radius_miles: f64,
    location_table: &[StationCoord],
    capacity_table: &[StationCapacity],
) -> Result<Vec<Location>> {
    if !radius_miles.is_finite() || radius_miles <= 0.0 {
        return Err(PipelineError::InvalidQuery(format!(
            "radius must be a positive number of miles, got {radius_miles}"
        )));
    }

    let mut capacity: HashMap<i64, &StationCapacity> =
        HashMap::with_capacity(capacity_table.len());
    for row in capacity_table {
        capacity.entry(row.id).or_insert(row);
    }

    let mut nearby: Vec<Location> = location_table
        .iter()
        .filter_map(|coord| {
            let (Some(latitude), Some(longitude)) = (coord.latitude, coord.longitude) else {
                tracing::debug!("Station {} has no coordinates, skipping", coord.id);
                return None;
            };
            let cap = capacity.get(&coord.id)?;
            if cap.space_count == 0 {
                tracing::debug!("Station {} has no parking spaces, skipping", coord.id);
                return None;
            }
            let distance_miles =
                great_circle_miles(GeoPoint::new(latitude, longitude), query_point);

            (distance_miles <= radius_miles).then(|| Location {
                id: coord.id,
                latitude,
                longitude,
                time_limit_min: cap.time_limit_min,
                time_limit_max: cap.time_limit_max,
                space_count: cap.space_count,
                distance_miles,
            })
        })
        .collect();

    // sort_by is stable, so equal distances keep table order
    nearby.sort_by(|a, b| a.distance_miles.total_cmp(&b.distance_miles));

    tracing::debug!(
        "{} of {} stations within {:.3} mi of ({:.5}, {:.5})",
        nearby.len(),
        location_table.len(),
        radius_miles,
        query_point.latitude,
        query_point.longitude
    );

    Ok(nearby)
}

/// Read the station coordinate table from a CSV file.
pub fn read_station_coords(path: &Path) -> Result<Vec<StationCoord>> {
    let file = open_table(path)?;
    read_station_coords_from(file).map_err(|e| PipelineError::csv(path, e))
}

/// Read the station capacity table from a CSV file.
pub fn read_station_capacity(path: &Path) -> Result<Vec<StationCapacity>> {
    let file = open_table(path)?;
    read_station_capacity_from(file).map_err(|e| PipelineError::csv(path, e))
}

pub fn read_station_coords_from<R: Read>(
    reader: R,
) -> std::result::Result<Vec<StationCoord>, csv::Error> {
    csv::Reader::from_reader(reader).deserialize().collect()
}

pub fn read_station_capacity_from<R: Read>(
    reader: R,
) -> std::result::Result<Vec<StationCapacity>, csv::Error> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
        .deserialize()
        .collect()
}

fn open_table(path: &Path) -> Result<std::fs::File> {
    if !path.exists() {
        return Err(PipelineError::DataUnavailable(format!(
            "reference table {} not found",
            path.display()
        )));
    }
    std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))
}
