//! Trip counts per district and their area and population normalizations.

use std::collections::BTreeMap;

use bysykkel_crs::GeoTable;
use bysykkel_district_models::indicators::{IndicatorFailure, IndicatorKind, MobilityIndicators};
use bysykkel_district_models::{District, DistrictId, JoinedTrip};
use serde::Serialize;

use crate::{
    FailureLog, IndicatorError, as_f64, district_areas, per_km2, require_area, require_population,
};

/// Mobility indicators for every district plus the skipped normalizations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MobilityReport {
    /// One row per district, in the district table's order.
    pub indicators: Vec<MobilityIndicators>,
    /// Normalizations that could not be computed.
    pub failures: Vec<IndicatorFailure>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    started: u64,
    ended: u64,
}

/// Counts trips started and ended per district and normalizes them.
///
/// Trips assigned to no district, or to a district missing from the
/// table, are ignored.
///
/// # Errors
///
/// Returns [`IndicatorError::NotProjected`] if `districts` is not in the
/// canonical projected system.
pub fn mobility_indicators(
    trips: &[JoinedTrip],
    districts: &GeoTable<District>,
) -> Result<MobilityReport, IndicatorError> {
    let areas = district_areas(districts)?;

    let mut counts: BTreeMap<DistrictId, Counts> = BTreeMap::new();
    for trip in trips {
        if let Some(id) = trip.start_district.district() {
            counts.entry(id).or_default().started += 1;
        }
        if let Some(id) = trip.end_district.district() {
            counts.entry(id).or_default().ended += 1;
        }
    }

    let mut failures = FailureLog::default();
    let mut indicators = Vec::with_capacity(districts.len());

    for (district, &area_km2) in districts.iter().zip(&areas) {
        let Counts { started, ended } = counts.get(&district.id).copied().unwrap_or_default();
        let net_trips = signed(started) - signed(ended);
        let total_trips = started + ended;

        let population_density_km2 = failures.check(
            IndicatorKind::PopulationDensity,
            per_km2(as_f64(district.population), district, area_km2),
        )?;

        let area = failures.check(IndicatorKind::TripsPerKm2, require_area(district, area_km2))?;
        let population =
            failures.check(IndicatorKind::TripsPerCapita, require_population(district))?;
        let by_area = |value: f64| area.map(|a| value / a);
        let by_capita = |value: f64| population.map(|p| value / p);

        #[allow(clippy::cast_precision_loss)]
        let net = net_trips as f64;

        indicators.push(MobilityIndicators {
            district_id: district.id,
            district_name: district.name.clone(),
            area_km2,
            population: district.population,
            population_density_km2,
            trips_started: started,
            trips_ended: ended,
            net_trips,
            total_trips,
            trips_started_per_km2: by_area(as_f64(started)),
            trips_ended_per_km2: by_area(as_f64(ended)),
            net_trips_per_km2: by_area(net),
            total_trips_per_km2: by_area(as_f64(total_trips)),
            trips_started_per_capita: by_capita(as_f64(started)),
            trips_ended_per_capita: by_capita(as_f64(ended)),
            net_trips_per_capita: by_capita(net),
            total_trips_per_capita: by_capita(as_f64(total_trips)),
        });
    }

    log::info!(
        "Computed mobility indicators for {} districts from {} trips",
        indicators.len(),
        trips.len()
    );

    Ok(MobilityReport {
        indicators,
        failures: failures.into_inner(),
    })
}

fn signed(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}
