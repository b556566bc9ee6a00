//! Per-district indicator records produced by the indicator engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::DistrictId;

/// Number of hour-of-day buckets.
pub const HOURS_PER_DAY: usize = 24;

/// Mobility indicators for one district.
///
/// Normalized values are `None` when the district is degenerate for that
/// normalization (zero area or zero population); the reason is reported
/// in [`IndicatorFailure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobilityIndicators {
    /// District identifier.
    pub district_id: DistrictId,
    /// District name.
    pub district_name: String,
    /// District area in km².
    pub area_km2: f64,
    /// Resident population.
    pub population: u64,
    /// Residents per km².
    pub population_density_km2: Option<f64>,
    /// Trips that started in the district.
    pub trips_started: u64,
    /// Trips that ended in the district.
    pub trips_ended: u64,
    /// `trips_started - trips_ended`.
    pub net_trips: i64,
    /// `trips_started + trips_ended`.
    pub total_trips: u64,
    /// Trips started per km².
    pub trips_started_per_km2: Option<f64>,
    /// Trips ended per km².
    pub trips_ended_per_km2: Option<f64>,
    /// Net trips per km².
    pub net_trips_per_km2: Option<f64>,
    /// Total trips per km².
    pub total_trips_per_km2: Option<f64>,
    /// Trips started per resident.
    pub trips_started_per_capita: Option<f64>,
    /// Trips ended per resident.
    pub trips_ended_per_capita: Option<f64>,
    /// Net trips per resident.
    pub net_trips_per_capita: Option<f64>,
    /// Total trips per resident.
    pub total_trips_per_capita: Option<f64>,
}

/// Building indicators for one district.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingIndicators {
    /// District identifier.
    pub district_id: DistrictId,
    /// District name.
    pub district_name: String,
    /// District area in km².
    pub area_km2: f64,
    /// Number of footprints attributed to the district.
    pub building_count: u64,
    /// Summed footprint area in m².
    pub total_building_area_m2: f64,
    /// Building area (m²) per km² of district.
    pub building_area_per_km2: Option<f64>,
    /// Buildings per km².
    pub buildings_per_km2: Option<f64>,
    /// Share of the district covered by buildings, in percent.
    pub built_up_area_percent: Option<f64>,
    /// Mean footprint area in m²; 0 for a district without buildings.
    pub avg_building_area_m2: f64,
    /// Footprint count per type label.
    pub type_counts: BTreeMap<String, u64>,
    /// Percentage share per type label; sums to 100 when any buildings
    /// exist, empty otherwise.
    pub type_distribution: BTreeMap<String, f64>,
}

/// Hour-of-day trip histograms for one district.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyProfile {
    /// District identifier.
    pub district_id: DistrictId,
    /// District name.
    pub district_name: String,
    /// Trip starts per hour (0-23) of the start timestamp.
    pub started: [u64; HOURS_PER_DAY],
    /// Trip ends per hour (0-23) of the end timestamp.
    pub ended: [u64; HOURS_PER_DAY],
}

/// Which normalized indicator could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndicatorKind {
    /// Residents per km².
    PopulationDensity,
    /// Trip counts per km².
    TripsPerKm2,
    /// Trip counts per resident.
    TripsPerCapita,
    /// Building area per km².
    BuildingAreaPerKm2,
    /// Buildings per km².
    BuildingsPerKm2,
    /// Built-up area share.
    BuiltUpAreaPercent,
}

/// Why a district cannot be normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DegenerateReason {
    /// The district has zero population.
    ZeroPopulation,
    /// The district has zero area.
    ZeroArea,
}

/// A normalized indicator that was skipped for one district.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorFailure {
    /// District identifier.
    pub district_id: DistrictId,
    /// District name.
    pub district_name: String,
    /// The indicator that was skipped.
    pub indicator: IndicatorKind,
    /// Why it was skipped.
    pub reason: DegenerateReason,
}
