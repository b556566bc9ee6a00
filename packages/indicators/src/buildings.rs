//! Building counts, areas and type mix per district.

use std::collections::BTreeMap;

use bysykkel_crs::GeoTable;
use bysykkel_district_models::indicators::{BuildingIndicators, IndicatorFailure, IndicatorKind};
use bysykkel_district_models::{AssignedBuilding, District, DistrictId};
use serde::Serialize;

use crate::{FailureLog, IndicatorError, M2_PER_KM2, as_f64, district_areas, require_area};

/// Building indicators for every district plus the skipped normalizations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingReport {
    /// One row per district, in the district table's order.
    pub indicators: Vec<BuildingIndicators>,
    /// Normalizations that could not be computed.
    pub failures: Vec<IndicatorFailure>,
}

#[derive(Debug, Default)]
struct Totals {
    count: u64,
    area_m2: f64,
    types: BTreeMap<String, u64>,
}

/// Aggregates attributed footprints per district.
///
/// Buildings attributed to a district missing from the table are
/// ignored.
///
/// # Errors
///
/// Returns [`IndicatorError::NotProjected`] if `districts` is not in the
/// canonical projected system.
pub fn building_indicators(
    buildings: &[AssignedBuilding],
    districts: &GeoTable<District>,
) -> Result<BuildingReport, IndicatorError> {
    let areas = district_areas(districts)?;

    let mut totals: BTreeMap<DistrictId, Totals> = BTreeMap::new();
    for building in buildings {
        let entry = totals.entry(building.district).or_default();
        entry.count += 1;
        entry.area_m2 += building.area_m2;
        *entry.types.entry(building.footprint.kind.clone()).or_default() += 1;
    }

    let mut failures = FailureLog::default();
    let mut indicators = Vec::with_capacity(districts.len());

    for (district, &area_km2) in districts.iter().zip(&areas) {
        let Totals {
            count,
            area_m2,
            types,
        } = totals.remove(&district.id).unwrap_or_default();

        let building_area_per_km2 = failures
            .check(IndicatorKind::BuildingAreaPerKm2, require_area(district, area_km2))?
            .map(|area| area_m2 / area);
        let buildings_per_km2 = failures
            .check(IndicatorKind::BuildingsPerKm2, require_area(district, area_km2))?
            .map(|area| as_f64(count) / area);
        let built_up_area_percent = failures
            .check(IndicatorKind::BuiltUpAreaPercent, require_area(district, area_km2))?
            .map(|area| area_m2 / (area * M2_PER_KM2) * 100.0);

        let avg_building_area_m2 = if count > 0 {
            area_m2 / as_f64(count)
        } else {
            0.0
        };

        let type_distribution = types
            .iter()
            .map(|(kind, &n)| (kind.clone(), as_f64(n) / as_f64(count) * 100.0))
            .collect();

        indicators.push(BuildingIndicators {
            district_id: district.id,
            district_name: district.name.clone(),
            area_km2,
            building_count: count,
            total_building_area_m2: area_m2,
            building_area_per_km2,
            buildings_per_km2,
            built_up_area_percent,
            avg_building_area_m2,
            type_counts: types,
            type_distribution,
        });
    }

    if !totals.is_empty() {
        log::warn!(
            "Ignored buildings attributed to {} districts outside the table",
            totals.len()
        );
    }

    log::info!(
        "Computed building indicators for {} districts from {} buildings",
        indicators.len(),
        buildings.len()
    );

    Ok(BuildingReport {
        indicators,
        failures: failures.into_inner(),
    })
}
