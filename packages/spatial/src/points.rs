//! Turns trip coordinates into point geometries.
//!
//! Every trip becomes a pair of points tagged `EPSG:4326` and then
//! normalized into the canonical projected system. Trips with an
//! out-of-range start or end are dropped whole and reported through
//! [`PointsOutcome::rejected`].

use bysykkel_crs::{Crs, CrsError, GeoTable, normalize};
use bysykkel_district_models::{LonLat, Rejections, TripPoints, TripRecord};
use geo::Point;
use serde::Serialize;

/// A coordinate that cannot be turned into a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, thiserror::Error)]
pub enum CoordinateError {
    /// Latitude outside [-90, 90], longitude outside [-180, 180], or
    /// either component not finite.
    #[error("coordinate out of range: lat={lat}, lon={lon}")]
    OutOfRange {
        /// Latitude as read.
        lat: f64,
        /// Longitude as read.
        lon: f64,
    },
}

/// Which end of a trip was invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TripEnd {
    /// The start coordinate.
    Start,
    /// The end coordinate.
    End,
}

/// A trip dropped during geometry construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedTrip {
    /// Position of the trip in the input.
    pub index: usize,
    /// Which end was invalid first.
    pub end: TripEnd,
    /// Why it was dropped.
    pub error: CoordinateError,
}

/// Trip points in the canonical system plus the trips that were dropped.
#[derive(Debug)]
pub struct PointsOutcome {
    /// One row per valid trip, in input order.
    pub table: GeoTable<TripPoints>,
    /// Trips with an out-of-range coordinate.
    pub rejected: Rejections<RejectedTrip>,
}

/// Validates a coordinate pair and returns it as an `(x = lon, y = lat)`
/// point.
///
/// # Errors
///
/// Returns [`CoordinateError::OutOfRange`] if either component is out of
/// range or not finite.
pub fn to_point(coord: LonLat) -> Result<Point<f64>, CoordinateError> {
    if coord.is_valid() {
        Ok(Point::new(coord.lon, coord.lat))
    } else {
        Err(CoordinateError::OutOfRange {
            lat: coord.lat,
            lon: coord.lon,
        })
    }
}

/// Builds start and end points for every trip and normalizes them.
///
/// # Errors
///
/// Returns [`CrsError`] if normalization fails.
pub fn trip_points(trips: Vec<TripRecord>) -> Result<PointsOutcome, CrsError> {
    let total = trips.len();
    let mut rejected = Rejections::default();
    let mut rows = Vec::with_capacity(total);

    for (index, trip) in trips.into_iter().enumerate() {
        let start = match to_point(trip.start) {
            Ok(p) => p,
            Err(error) => {
                rejected.record(RejectedTrip {
                    index,
                    end: TripEnd::Start,
                    error,
                });
                continue;
            }
        };
        let end = match to_point(trip.end) {
            Ok(p) => p,
            Err(error) => {
                rejected.record(RejectedTrip {
                    index,
                    end: TripEnd::End,
                    error,
                });
                continue;
            }
        };
        rows.push(TripPoints { trip, start, end });
    }

    if !rejected.is_empty() {
        log::warn!(
            "Dropped {} of {total} trips with out-of-range coordinates",
            rejected.count()
        );
        for sample in rejected.samples() {
            log::debug!("  trip {}: {:?} {}", sample.index, sample.end, sample.error);
        }
    }

    let table = normalize(GeoTable::new("trip points", Crs::Wgs84, rows))?;

    Ok(PointsOutcome { table, rejected })
}
