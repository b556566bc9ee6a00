//! Attribution of trips and building footprints to districts.
//!
//! Both joins require the inputs to share one declared reference system
//! and are pure functions of their inputs.

use bysykkel_crs::GeoTable;
use bysykkel_district_models::{
    AssignedBuilding, Assignment, BuildingFootprint, District, JoinedTrip, TripPoints,
};
use geo::{Area as _, Point};
use serde::Serialize;

use crate::{DistrictIndex, JoinError};

/// Counts reported by [`join_trips`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSummary {
    /// Trips joined.
    pub total: usize,
    /// Trips whose start lies outside every district.
    pub start_unassigned: usize,
    /// Trips whose end lies outside every district.
    pub end_unassigned: usize,
}

/// Trips with both ends attributed.
#[derive(Debug)]
pub struct TripJoin {
    /// One row per input trip, in input order.
    pub trips: Vec<JoinedTrip>,
    /// Unassigned counts.
    pub summary: JoinSummary,
}

/// Footprints attributed to districts.
#[derive(Debug)]
pub struct BuildingJoin {
    /// Footprints inside a district, in input order.
    pub buildings: Vec<AssignedBuilding>,
    /// Footprints overlapping no district.
    pub unassigned: usize,
}

/// Assigns each point to the district containing it.
///
/// # Errors
///
/// Returns [`JoinError::Crs`] if `districts` has no declared reference
/// system.
pub fn assign_points(
    points: &[Point<f64>],
    districts: &GeoTable<District>,
) -> Result<Vec<Assignment>, JoinError> {
    let index = DistrictIndex::build(districts)?;
    Ok(points.iter().map(|p| index.lookup_point(*p)).collect())
}

/// Attributes the start and end of every trip.
///
/// # Errors
///
/// Returns [`JoinError`] if either table is untagged or the two are in
/// different reference systems.
pub fn join_trips(
    trips: GeoTable<TripPoints>,
    districts: &GeoTable<District>,
) -> Result<TripJoin, JoinError> {
    let index = DistrictIndex::build(districts)?;
    index.check_crs(&trips)?;

    let mut summary = JoinSummary::default();
    let joined: Vec<JoinedTrip> = trips
        .into_records()
        .into_iter()
        .map(|row| {
            let start_district = index.lookup_point(row.start);
            let end_district = index.lookup_point(row.end);

            summary.total += 1;
            if start_district == Assignment::Unassigned {
                summary.start_unassigned += 1;
            }
            if end_district == Assignment::Unassigned {
                summary.end_unassigned += 1;
            }

            JoinedTrip {
                trip: row.trip,
                start: row.start,
                end: row.end,
                start_district,
                end_district,
            }
        })
        .collect();

    log::info!(
        "Joined {} trips: {} starts and {} ends outside the study districts",
        summary.total,
        summary.start_unassigned,
        summary.end_unassigned
    );

    Ok(TripJoin {
        trips: joined,
        summary,
    })
}

/// Attributes every footprint whole to the district it overlaps most.
///
/// The recorded area is the planar area of the footprint as given, so
/// callers clip footprints to the study area first.
///
/// # Errors
///
/// Returns [`JoinError`] if either table is untagged or the two are in
/// different reference systems.
pub fn join_buildings(
    buildings: GeoTable<BuildingFootprint>,
    districts: &GeoTable<District>,
) -> Result<BuildingJoin, JoinError> {
    let index = DistrictIndex::build(districts)?;
    index.check_crs(&buildings)?;

    let mut unassigned = 0usize;
    let mut assigned = Vec::with_capacity(buildings.len());

    for footprint in buildings.into_records() {
        match index.lookup_polygon(&footprint.geometry) {
            Assignment::District(district) => {
                let area_m2 = footprint.geometry.unsigned_area();
                assigned.push(AssignedBuilding {
                    footprint,
                    district,
                    area_m2,
                });
            }
            Assignment::Unassigned => {
                log::debug!("Building {} overlaps no district", footprint.source_id);
                unassigned += 1;
            }
        }
    }

    log::info!(
        "Attributed {} buildings to districts ({unassigned} outside)",
        assigned.len()
    );

    Ok(BuildingJoin {
        buildings: assigned,
        unassigned,
    })
}

#[cfg(test)]
mod tests {
    use bysykkel_crs::{CANONICAL_CRS, Crs, CrsError};
    use bysykkel_district_models::DistrictId;

    use super::*;
    use crate::points::trip_points;
    use crate::test_support::{rect, trip, two_districts};

    fn points_table(points: &[((f64, f64), (f64, f64))]) -> GeoTable<TripPoints> {
        let rows = points
            .iter()
            .map(|&(start, end)| TripPoints {
                trip: trip((10.75, 59.91), (10.75, 59.91)),
                start: Point::new(start.0, start.1),
                end: Point::new(end.0, end.1),
            })
            .collect();
        GeoTable::new("trips", CANONICAL_CRS, rows)
    }

    #[test]
    fn every_point_gets_exactly_one_assignment() {
        let points: Vec<Point<f64>> = (0..=40)
            .flat_map(|i| (0..=20).map(move |j| Point::new(f64::from(i) * 50.0, f64::from(j) * 50.0)))
            .chain([Point::new(-1.0, 0.0), Point::new(2001.0, 500.0)])
            .collect();

        let assignments = assign_points(&points, &two_districts()).unwrap();
        assert_eq!(assignments.len(), points.len());

        for (p, a) in points.iter().zip(&assignments) {
            let inside = (0.0..=2000.0).contains(&p.x()) && (0.0..=1000.0).contains(&p.y());
            match a {
                Assignment::District(DistrictId(1)) => assert!(p.x() <= 1000.0),
                Assignment::District(DistrictId(2)) => assert!(p.x() > 1000.0),
                Assignment::District(other) => panic!("unknown district {other}"),
                Assignment::Unassigned => assert!(!inside),
            }
        }
    }

    #[test]
    fn boundary_point_is_repeatably_assigned_to_lower_id() {
        let districts = two_districts();
        let first = assign_points(&[Point::new(1000.0, 500.0)], &districts).unwrap();
        let reversed = GeoTable::new(
            "districts",
            CANONICAL_CRS,
            districts.records().iter().rev().cloned().collect(),
        );
        let second = assign_points(&[Point::new(1000.0, 500.0)], &reversed).unwrap();

        assert_eq!(first, vec![Assignment::District(DistrictId(1))]);
        assert_eq!(first, second);
    }

    #[test]
    fn joins_trip_ends_and_counts_unassigned() {
        let trips = points_table(&[
            ((100.0, 100.0), (1500.0, 100.0)),
            ((1500.0, 100.0), (5000.0, 5000.0)),
            ((-5.0, 100.0), (100.0, 100.0)),
        ]);

        let join = join_trips(trips, &two_districts()).unwrap();
        assert_eq!(join.trips.len(), 3);
        assert_eq!(
            join.summary,
            JoinSummary {
                total: 3,
                start_unassigned: 1,
                end_unassigned: 1,
            }
        );
        assert!(join.trips[0].start_district.is(DistrictId(1)));
        assert!(join.trips[0].end_district.is(DistrictId(2)));
        assert_eq!(join.trips[1].end_district, Assignment::Unassigned);
    }

    #[test]
    fn refuses_to_join_across_reference_systems() {
        let outcome = trip_points(vec![trip((10.75, 59.91), (10.76, 59.92))]).unwrap();
        let geographic = outcome.table.to_crs(Crs::Wgs84).unwrap();

        let err = join_trips(geographic, &two_districts()).unwrap_err();
        assert!(matches!(
            err,
            JoinError::CrsMismatch {
                found: Crs::Wgs84,
                ..
            }
        ));
    }

    #[test]
    fn refuses_untagged_trips() {
        let trips = GeoTable::untagged("trips", points_table(&[]).into_records());
        assert!(matches!(
            join_trips(trips, &two_districts()),
            Err(JoinError::Crs(CrsError::MissingCrs { .. }))
        ));
    }

    #[test]
    fn attributes_buildings_and_counts_outside() {
        let buildings = GeoTable::new(
            "buildings",
            CANONICAL_CRS,
            vec![
                BuildingFootprint::new(1, Some("house"), rect(10.0, 10.0, 20.0, 20.0)),
                BuildingFootprint::new(2, None, rect(1980.0, 10.0, 2000.0, 20.0)),
                BuildingFootprint::new(3, Some("shed"), rect(3000.0, 10.0, 3010.0, 20.0)),
            ],
        );

        let join = join_buildings(buildings, &two_districts()).unwrap();
        assert_eq!(join.unassigned, 1);
        assert_eq!(join.buildings.len(), 2);
        assert_eq!(join.buildings[0].district, DistrictId(1));
        assert!((join.buildings[0].area_m2 - 100.0).abs() < 1e-9);
        assert_eq!(join.buildings[1].district, DistrictId(2));
        assert_eq!(join.buildings[1].footprint.kind, "unclassified");
    }
}
