#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-district aggregation of joined trips and buildings.
//!
//! All functions are pure: they read the joined records and the district
//! table and return fresh indicator records, in the district table's
//! order. A district with zero area or zero population does not abort
//! the run; the affected normalized values are left empty and listed as
//! [`IndicatorFailure`]s.

pub mod buildings;
pub mod mobility;
pub mod profile;

use bysykkel_crs::{CANONICAL_CRS, Crs, CrsError, GeoTable};
use bysykkel_district_models::District;
use bysykkel_district_models::indicators::{DegenerateReason, IndicatorFailure, IndicatorKind};
use geo::Area as _;

pub use buildings::{BuildingReport, building_indicators};
pub use mobility::{MobilityReport, mobility_indicators};
pub use profile::{directional_profile, hourly_profiles};

/// Square metres per square kilometre.
pub const M2_PER_KM2: f64 = 1_000_000.0;

/// Errors that can occur while computing indicators.
#[derive(Debug, thiserror::Error)]
pub enum IndicatorError {
    /// A district cannot be normalized by area or population.
    #[error("District '{district_name}' ({district_id}) is degenerate: {reason}")]
    DegenerateDistrict {
        /// District identifier.
        district_id: bysykkel_district_models::DistrictId,
        /// District name.
        district_name: String,
        /// What is zero.
        reason: DegenerateReason,
    },

    /// Areas were requested on a table outside the canonical metric system.
    #[error("Areas need {expected}, but {table} is in {found}")]
    NotProjected {
        /// Table name.
        table: String,
        /// The table's reference system.
        found: Crs,
        /// The required reference system.
        expected: Crs,
    },

    /// The district table has no declared reference system.
    #[error(transparent)]
    Crs(#[from] CrsError),
}

/// District area in km².
#[must_use]
pub fn area_km2(district: &District) -> f64 {
    district.boundary.unsigned_area() / M2_PER_KM2
}

/// Areas of every district in km², in table order.
///
/// # Errors
///
/// Returns [`IndicatorError::NotProjected`] unless the table is in the
/// canonical projected system.
pub fn district_areas(districts: &GeoTable<District>) -> Result<Vec<f64>, IndicatorError> {
    let found = districts.require_crs()?;
    if found != CANONICAL_CRS {
        return Err(IndicatorError::NotProjected {
            table: districts.name().to_string(),
            found,
            expected: CANONICAL_CRS,
        });
    }
    Ok(districts.iter().map(area_km2).collect())
}

/// Returns `area_km2` if it can divide.
///
/// # Errors
///
/// Returns [`IndicatorError::DegenerateDistrict`] for a zero (or
/// non-finite) area.
pub fn require_area(district: &District, area_km2: f64) -> Result<f64, IndicatorError> {
    if area_km2 > 0.0 && area_km2.is_finite() {
        Ok(area_km2)
    } else {
        Err(degenerate(district, DegenerateReason::ZeroArea))
    }
}

/// Returns the population as a divisor.
///
/// # Errors
///
/// Returns [`IndicatorError::DegenerateDistrict`] for a zero population.
#[allow(clippy::cast_precision_loss)]
pub fn require_population(district: &District) -> Result<f64, IndicatorError> {
    if district.population > 0 {
        Ok(district.population as f64)
    } else {
        Err(degenerate(district, DegenerateReason::ZeroPopulation))
    }
}

/// `value / area_km2`.
///
/// # Errors
///
/// Returns [`IndicatorError::DegenerateDistrict`] for a zero area.
pub fn per_km2(value: f64, district: &District, area_km2: f64) -> Result<f64, IndicatorError> {
    require_area(district, area_km2).map(|area| value / area)
}

/// `value / population`.
///
/// # Errors
///
/// Returns [`IndicatorError::DegenerateDistrict`] for a zero population.
pub fn per_capita(value: f64, district: &District) -> Result<f64, IndicatorError> {
    require_population(district).map(|population| value / population)
}

fn degenerate(district: &District, reason: DegenerateReason) -> IndicatorError {
    IndicatorError::DegenerateDistrict {
        district_id: district.id,
        district_name: district.name.clone(),
        reason,
    }
}

/// Collects skipped normalizations instead of aborting.
#[derive(Debug, Default)]
struct FailureLog(Vec<IndicatorFailure>);

impl FailureLog {
    /// Passes values through and turns degenerate-district errors into
    /// recorded failures.
    fn check(
        &mut self,
        indicator: IndicatorKind,
        result: Result<f64, IndicatorError>,
    ) -> Result<Option<f64>, IndicatorError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(IndicatorError::DegenerateDistrict {
                district_id,
                district_name,
                reason,
            }) => {
                log::warn!("{district_name} ({district_id}): skipping {indicator}, {reason}");
                self.0.push(IndicatorFailure {
                    district_id,
                    district_name,
                    indicator,
                    reason,
                });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn into_inner(self) -> Vec<IndicatorFailure> {
        self.0
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(count: u64) -> f64 {
    count as f64
}

#[cfg(test)]
pub(crate) mod test_support {
    use bysykkel_crs::{CANONICAL_CRS, GeoTable};
    use bysykkel_district_models::{Assignment, District, DistrictId, JoinedTrip, LonLat, TripRecord};
    use chrono::DateTime;
    use geo::{MultiPolygon, Point, polygon};

    pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
        ]])
    }

    pub fn district(id: u32, name: &str, population: u64, boundary: MultiPolygon<f64>) -> District {
        District {
            id: DistrictId(id),
            name: name.to_string(),
            population,
            boundary,
        }
    }

    /// A: 10 km², 50 000 residents. B: 2 km², 20 000 residents.
    pub fn districts() -> GeoTable<District> {
        GeoTable::new(
            "districts",
            CANONICAL_CRS,
            vec![
                district(1, "A", 50_000, rect(0.0, 0.0, 5000.0, 2000.0)),
                district(2, "B", 20_000, rect(5000.0, 0.0, 6000.0, 2000.0)),
            ],
        )
    }

    pub fn joined(start: Assignment, end: Assignment, start_hour: u32, end_hour: u32) -> JoinedTrip {
        let at = |hour: u32| {
            DateTime::parse_from_rfc3339(&format!("2024-05-01T{hour:02}:30:00+02:00")).unwrap()
        };
        let here = LonLat { lon: 10.75, lat: 59.91 };
        JoinedTrip {
            trip: TripRecord {
                started_at: at(start_hour),
                ended_at: at(end_hour),
                start: here,
                end: here,
                start_station: None,
                end_station: None,
                duration_secs: None,
            },
            start: Point::new(0.0, 0.0),
            end: Point::new(0.0, 0.0),
            start_district: start,
            end_district: end,
        }
    }
}
