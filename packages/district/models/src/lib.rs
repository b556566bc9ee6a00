#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Record types shared across the bike-share analysis pipeline.
//!
//! Trips, districts and building footprints are explicit structs with
//! typed fields, so a missing or mistyped column fails at load time
//! instead of deep inside aggregation. Records carrying geometry
//! implement [`Reprojectable`] so they can live in a
//! [`bysykkel_crs::GeoTable`].

pub mod indicators;

use std::fmt;

use bysykkel_crs::{CrsError, Reprojectable, Transform};
use chrono::{DateTime, FixedOffset};
use geo::{MultiPolygon, Point};
use serde::{Deserialize, Serialize};

/// Label given to buildings without a specific type tag.
pub const UNCLASSIFIED: &str = "unclassified";

/// Identifier of a district. Lower ids win boundary ties.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DistrictId(pub u32);

impl fmt::Display for DistrictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An administrative district with its boundary and population.
#[derive(Debug, Clone, PartialEq)]
pub struct District {
    /// Stable identifier.
    pub id: DistrictId,
    /// District name (e.g. "Grünerløkka").
    pub name: String,
    /// Resident population.
    pub population: u64,
    /// Boundary in the owning table's reference system.
    pub boundary: MultiPolygon<f64>,
}

impl Reprojectable for District {
    fn reproject(&mut self, transform: &Transform) -> Result<(), CrsError> {
        self.boundary.reproject(transform)
    }
}

/// A longitude/latitude pair as read from the source data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
}

impl LonLat {
    /// Whether both components are finite and inside the valid ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.lat.abs() <= 90.0
            && self.lon.abs() <= 180.0
    }
}

/// Optional station metadata attached to a trip end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    /// Station identifier.
    pub id: Option<String>,
    /// Station display name.
    pub name: Option<String>,
}

impl Station {
    /// Whether neither field is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.id.is_none() && self.name.is_none()
    }
}

/// One bike-share rental as loaded from the trip dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    /// When the rental started.
    pub started_at: DateTime<FixedOffset>,
    /// When the rental ended.
    pub ended_at: DateTime<FixedOffset>,
    /// Where the rental started.
    pub start: LonLat,
    /// Where the rental ended.
    pub end: LonLat,
    /// Start station, if the source has one.
    pub start_station: Option<Station>,
    /// End station, if the source has one.
    pub end_station: Option<Station>,
    /// Duration in seconds, if the source reports it.
    pub duration_secs: Option<u64>,
}

/// A trip with its start and end as point geometries.
#[derive(Debug, Clone, PartialEq)]
pub struct TripPoints {
    /// The source record.
    pub trip: TripRecord,
    /// Start point in the owning table's reference system.
    pub start: Point<f64>,
    /// End point in the owning table's reference system.
    pub end: Point<f64>,
}

impl Reprojectable for TripPoints {
    fn reproject(&mut self, transform: &Transform) -> Result<(), CrsError> {
        self.start.reproject(transform)?;
        self.end.reproject(transform)
    }
}

/// Result of attributing a geometry to a district.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum Assignment {
    /// The geometry belongs to this district.
    District(DistrictId),
    /// The geometry lies outside every district.
    Unassigned,
}

impl Assignment {
    /// Returns the district, or `None` when unassigned.
    #[must_use]
    pub const fn district(self) -> Option<DistrictId> {
        match self {
            Self::District(id) => Some(id),
            Self::Unassigned => None,
        }
    }

    /// Whether the geometry was attributed to `id`.
    #[must_use]
    pub fn is(self, id: DistrictId) -> bool {
        self == Self::District(id)
    }
}

/// A trip with its start and end districts resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedTrip {
    /// The source record.
    pub trip: TripRecord,
    /// Start point in the canonical reference system.
    pub start: Point<f64>,
    /// End point in the canonical reference system.
    pub end: Point<f64>,
    /// District the trip started in.
    pub start_district: Assignment,
    /// District the trip ended in.
    pub end_district: Assignment,
}

/// A building footprint with its type label.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingFootprint {
    /// Source identifier (an OSM way or relation id).
    pub source_id: i64,
    /// Type label; [`UNCLASSIFIED`] when the source had none.
    pub kind: String,
    /// Footprint in the owning table's reference system.
    pub geometry: MultiPolygon<f64>,
}

impl BuildingFootprint {
    /// Creates a footprint, labelling a missing, empty or generic
    /// (`yes`) type tag as [`UNCLASSIFIED`].
    #[must_use]
    pub fn new(source_id: i64, tag: Option<&str>, geometry: MultiPolygon<f64>) -> Self {
        let kind = match tag.map(str::trim) {
            None | Some("" | "yes") => UNCLASSIFIED.to_string(),
            Some(kind) => kind.to_ascii_lowercase(),
        };
        Self {
            source_id,
            kind,
            geometry,
        }
    }
}

impl Reprojectable for BuildingFootprint {
    fn reproject(&mut self, transform: &Transform) -> Result<(), CrsError> {
        self.geometry.reproject(transform)
    }
}

/// A clipped footprint attributed to exactly one district.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedBuilding {
    /// The clipped footprint.
    pub footprint: BuildingFootprint,
    /// District the whole footprint is attributed to.
    pub district: DistrictId,
    /// Planar area of the clipped footprint in square metres.
    pub area_m2: f64,
}

/// Side channel for rows or geometries dropped during a stage.
///
/// Keeps an exact count plus the first few samples so callers can audit
/// data loss without holding every offending row.
///
/// Serializes as `{ count, samples }`; the sample cap stays with the
/// stage that collected it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejections<T> {
    count: usize,
    samples: Vec<T>,
    #[serde(skip)]
    max_samples: usize,
}

impl<T> Rejections<T> {
    /// Default number of samples kept.
    pub const DEFAULT_MAX_SAMPLES: usize = 20;

    /// Creates an empty log keeping at most `max_samples` samples.
    #[must_use]
    pub const fn with_max_samples(max_samples: usize) -> Self {
        Self {
            count: 0,
            samples: Vec::new(),
            max_samples,
        }
    }

    /// Records one rejected item.
    pub fn record(&mut self, sample: T) {
        self.count += 1;
        if self.samples.len() < self.max_samples {
            self.samples.push(sample);
        }
    }

    /// Total number of rejected items.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// The retained samples, oldest first.
    #[must_use]
    pub fn samples(&self) -> &[T] {
        &self.samples
    }

    /// Whether nothing was rejected.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl<T> Default for Rejections<T> {
    fn default() -> Self {
        Self::with_max_samples(Self::DEFAULT_MAX_SAMPLES)
    }
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;

    fn square() -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]])
    }

    #[test]
    fn missing_building_tag_is_unclassified() {
        assert_eq!(BuildingFootprint::new(1, None, square()).kind, UNCLASSIFIED);
        assert_eq!(BuildingFootprint::new(2, Some(" "), square()).kind, UNCLASSIFIED);
        assert_eq!(BuildingFootprint::new(3, Some("yes"), square()).kind, UNCLASSIFIED);
        assert_eq!(
            BuildingFootprint::new(4, Some("Residential"), square()).kind,
            "residential"
        );
    }

    #[test]
    fn validates_coordinate_ranges() {
        assert!(LonLat { lon: 10.0, lat: 59.9 }.is_valid());
        assert!(!LonLat { lon: 10.0, lat: 95.0 }.is_valid());
        assert!(!LonLat { lon: 181.0, lat: 0.0 }.is_valid());
        assert!(!LonLat { lon: f64::NAN, lat: 0.0 }.is_valid());
    }

    #[test]
    fn rejections_cap_samples_but_not_count() {
        let mut rejections = Rejections::with_max_samples(2);
        for i in 0..5 {
            rejections.record(i);
        }
        assert_eq!(rejections.count(), 5);
        assert_eq!(rejections.samples(), &[0, 1]);
    }

    #[test]
    fn rejections_serialize_count_and_samples_only() {
        let mut rejections = Rejections::with_max_samples(1);
        rejections.record("line 3");
        rejections.record("line 9");

        let json = serde_json::to_value(&rejections).unwrap();
        assert_eq!(json, serde_json::json!({ "count": 2, "samples": ["line 3"] }));
    }

    #[test]
    fn assignment_exposes_district() {
        let a = Assignment::District(DistrictId(3));
        assert_eq!(a.district(), Some(DistrictId(3)));
        assert!(a.is(DistrictId(3)));
        assert_eq!(Assignment::Unassigned.district(), None);
    }
}
