//! Hour-of-day trip histograms.
//!
//! Hours are read from each timestamp in its own UTC offset, as recorded
//! in the source data.

use std::collections::BTreeMap;

use bysykkel_crs::GeoTable;
use bysykkel_district_models::indicators::{HOURS_PER_DAY, HourlyProfile};
use bysykkel_district_models::{District, DistrictId, JoinedTrip};
use chrono::Timelike as _;

type Histogram = [u64; HOURS_PER_DAY];

fn hour_bucket(hour: u32) -> usize {
    usize::try_from(hour).map_or(0, |h| h.min(HOURS_PER_DAY - 1))
}

/// Trip-start and trip-end histograms per district, in the district
/// table's order.
#[must_use]
pub fn hourly_profiles(trips: &[JoinedTrip], districts: &GeoTable<District>) -> Vec<HourlyProfile> {
    let mut started: BTreeMap<DistrictId, Histogram> = BTreeMap::new();
    let mut ended: BTreeMap<DistrictId, Histogram> = BTreeMap::new();

    for trip in trips {
        if let Some(id) = trip.start_district.district() {
            started.entry(id).or_insert([0; HOURS_PER_DAY])[hour_bucket(trip.trip.started_at.hour())] += 1;
        }
        if let Some(id) = trip.end_district.district() {
            ended.entry(id).or_insert([0; HOURS_PER_DAY])[hour_bucket(trip.trip.ended_at.hour())] += 1;
        }
    }

    districts
        .iter()
        .map(|d| HourlyProfile {
            district_id: d.id,
            district_name: d.name.clone(),
            started: started.get(&d.id).copied().unwrap_or([0; HOURS_PER_DAY]),
            ended: ended.get(&d.id).copied().unwrap_or([0; HOURS_PER_DAY]),
        })
        .collect()
}

/// Trips from district `from` to district `to`, bucketed by start hour.
#[must_use]
pub fn directional_profile(trips: &[JoinedTrip], from: DistrictId, to: DistrictId) -> Histogram {
    let mut histogram = [0; HOURS_PER_DAY];
    for trip in trips
        .iter()
        .filter(|t| t.start_district.is(from) && t.end_district.is(to))
    {
        histogram[hour_bucket(trip.trip.started_at.hour())] += 1;
    }
    histogram
}
