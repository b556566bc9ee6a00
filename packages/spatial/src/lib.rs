#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index for district attribution.
//!
//! Builds an R-tree over district polygons and answers point-in-polygon
//! and footprint-overlap lookups. [`points`] turns raw trip coordinates
//! into point geometries; [`join`] attributes whole tables of trips and
//! buildings to districts.

pub mod join;
pub mod points;

use bysykkel_crs::{Crs, CrsError, GeoTable};
use bysykkel_district_models::{Assignment, District, DistrictId};
use geo::{Area as _, BooleanOps as _, BoundingRect as _, Intersects as _, MultiPolygon, Point};
use rstar::{AABB, RTree, RTreeObject};

/// Errors that can occur while joining geometries to districts.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    /// An input table has no declared reference system.
    #[error(transparent)]
    Crs(#[from] CrsError),

    /// The two inputs are in different reference systems.
    #[error("CRS mismatch: {table} is in {found}, districts are in {expected}")]
    CrsMismatch {
        /// Name of the table being joined.
        table: String,
        /// That table's reference system.
        found: Crs,
        /// The districts' reference system.
        expected: Crs,
    },
}

/// A district polygon stored in the R-tree.
struct DistrictEntry {
    id: DistrictId,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for DistrictEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over the district polygons of one table.
///
/// Lookups are pure functions of the index contents: the same input
/// always yields the same [`Assignment`].
pub struct DistrictIndex {
    crs: Crs,
    districts: RTree<DistrictEntry>,
}

impl DistrictIndex {
    /// Builds the index from a district table.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::Crs`] if the table has no declared reference
    /// system.
    pub fn build(districts: &GeoTable<District>) -> Result<Self, JoinError> {
        let crs = districts.require_crs()?;

        let entries: Vec<DistrictEntry> = districts
            .iter()
            .map(|d| DistrictEntry {
                id: d.id,
                envelope: compute_envelope(&d.boundary),
                polygon: d.boundary.clone(),
            })
            .collect();

        log::debug!(
            "Indexed {} districts from {} in {crs}",
            entries.len(),
            districts.name()
        );

        Ok(Self {
            crs,
            districts: RTree::bulk_load(entries),
        })
    }

    /// Reference system of the indexed polygons.
    #[must_use]
    pub const fn crs(&self) -> Crs {
        self.crs
    }

    /// Fails unless `table` is in the same reference system as the index.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::Crs`] for an untagged table and
    /// [`JoinError::CrsMismatch`] for a table in another system.
    pub fn check_crs<R>(&self, table: &GeoTable<R>) -> Result<(), JoinError> {
        let found = table.require_crs()?;
        if found == self.crs {
            Ok(())
        } else {
            Err(JoinError::CrsMismatch {
                table: table.name().to_string(),
                found,
                expected: self.crs,
            })
        }
    }

    /// Looks up the district containing `point`.
    ///
    /// Boundaries count as inside, so a point on a shared edge touches
    /// several districts; the lowest id wins.
    #[must_use]
    pub fn lookup_point(&self, point: Point<f64>) -> Assignment {
        let query_env = AABB::from_point([point.x(), point.y()]);

        self.districts
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.polygon.intersects(&point))
            .map(|entry| entry.id)
            .min()
            .map_or(Assignment::Unassigned, Assignment::District)
    }

    /// Looks up the district a footprint belongs to.
    ///
    /// The footprint goes whole to the district it overlaps most; equal
    /// overlaps go to the lowest id.
    #[must_use]
    pub fn lookup_polygon(&self, footprint: &MultiPolygon<f64>) -> Assignment {
        let query_env = compute_envelope(footprint);

        let mut candidates: Vec<(DistrictId, f64)> = self
            .districts
            .locate_in_envelope_intersecting(&query_env)
            .map(|entry| (entry.id, entry.polygon.intersection(footprint).unsigned_area()))
            .filter(|(_, overlap)| *overlap > 0.0)
            .collect();

        candidates.sort_by_key(|(id, _)| *id);

        let mut best: Option<(DistrictId, f64)> = None;
        for (id, overlap) in candidates {
            match best {
                Some((_, current)) if overlap <= current => {}
                _ => best = Some((id, overlap)),
            }
        }

        best.map_or(Assignment::Unassigned, |(id, _)| Assignment::District(id))
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}


#[cfg(test)]
mod tests {
    use super::test_support::{rect, two_districts};
    use super::*;

    #[test]
    fn finds_containing_district() {
        let index = DistrictIndex::build(&two_districts()).unwrap();
        assert_eq!(
            index.lookup_point(Point::new(500.0, 500.0)),
            Assignment::District(DistrictId(1))
        );
        assert_eq!(
            index.lookup_point(Point::new(1500.0, 500.0)),
            Assignment::District(DistrictId(2))
        );
    }

    #[test]
    fn shared_boundary_goes_to_lowest_id() {
        let index = DistrictIndex::build(&two_districts()).unwrap();
        for _ in 0..3 {
            assert_eq!(
                index.lookup_point(Point::new(1000.0, 500.0)),
                Assignment::District(DistrictId(1))
            );
        }
    }

    #[test]
    fn outside_points_are_unassigned() {
        let index = DistrictIndex::build(&two_districts()).unwrap();
        assert_eq!(
            index.lookup_point(Point::new(-10.0, 500.0)),
            Assignment::Unassigned
        );
        assert_eq!(
            index.lookup_point(Point::new(500.0, 5000.0)),
            Assignment::Unassigned
        );
    }

    #[test]
    fn footprint_goes_to_largest_overlap() {
        let index = DistrictIndex::build(&two_districts()).unwrap();
        // 30 m in A, 10 m in B.
        let straddling = rect(970.0, 100.0, 1010.0, 110.0);
        assert_eq!(
            index.lookup_polygon(&straddling),
            Assignment::District(DistrictId(1))
        );
        // 10 m in A, 30 m in B.
        let mostly_b = rect(990.0, 100.0, 1030.0, 110.0);
        assert_eq!(
            index.lookup_polygon(&mostly_b),
            Assignment::District(DistrictId(2))
        );
    }

    #[test]
    fn equal_overlap_goes_to_lowest_id() {
        let index = DistrictIndex::build(&two_districts()).unwrap();
        let centred = rect(990.0, 100.0, 1010.0, 110.0);
        assert_eq!(
            index.lookup_polygon(&centred),
            Assignment::District(DistrictId(1))
        );
    }

    #[test]
    fn footprint_outside_is_unassigned() {
        let index = DistrictIndex::build(&two_districts()).unwrap();
        assert_eq!(
            index.lookup_polygon(&rect(5000.0, 5000.0, 5010.0, 5010.0)),
            Assignment::Unassigned
        );
    }

    #[test]
    fn untagged_districts_cannot_be_indexed() {
        let table = GeoTable::untagged("districts", two_districts().into_records());
        assert!(matches!(
            DistrictIndex::build(&table),
            Err(JoinError::Crs(CrsError::MissingCrs { .. }))
        ));
    }
}
