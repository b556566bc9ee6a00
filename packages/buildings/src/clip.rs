//! Clipping footprints to the study area.

use bysykkel_crs::GeoTable;
use bysykkel_district_models::{BuildingFootprint, District};
use geo::{Area as _, BooleanOps as _, MultiPolygon};

use crate::BuildingError;

/// Footprints cut to the study area.
#[derive(Debug)]
pub struct ClipOutcome {
    /// Clipped footprints in the districts' reference system, in input
    /// order.
    pub table: GeoTable<BuildingFootprint>,
    /// Footprints with no area inside any district.
    pub outside: usize,
}

/// Union of every district boundary.
#[must_use]
pub fn study_area(districts: &GeoTable<District>) -> MultiPolygon<f64> {
    districts
        .iter()
        .fold(MultiPolygon::new(vec![]), |area, d| area.union(&d.boundary))
}

/// Cuts every footprint to the union of `districts`.
///
/// Footprints are moved into the districts' reference system first. Parts
/// outside the study area are dropped; footprints entirely outside are
/// dropped and counted.
///
/// # Errors
///
/// Returns [`BuildingError::Crs`] if either table is untagged.
pub fn clip_to_districts(
    footprints: GeoTable<BuildingFootprint>,
    districts: &GeoTable<District>,
) -> Result<ClipOutcome, BuildingError> {
    let target = districts.require_crs()?;
    let footprints = footprints.to_crs(target)?;
    let name = footprints.name().to_string();
    let area = study_area(districts);

    let mut outside = 0usize;
    let mut clipped = Vec::with_capacity(footprints.len());

    for mut footprint in footprints.into_records() {
        let inside = footprint.geometry.intersection(&area);
        if inside.unsigned_area() > 0.0 {
            footprint.geometry = inside;
            clipped.push(footprint);
        } else {
            outside += 1;
        }
    }

    log::info!(
        "Clipped {} building footprints to the study area ({outside} entirely outside)",
        clipped.len()
    );

    Ok(ClipOutcome {
        table: GeoTable::new(name, target, clipped),
        outside,
    })
}

#[cfg(test)]
mod tests {
    use bysykkel_crs::CANONICAL_CRS;
    use bysykkel_district_models::DistrictId;
    use geo::polygon;

    use super::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
        ]])
    }

    fn districts() -> GeoTable<District> {
        GeoTable::new(
            "districts",
            CANONICAL_CRS,
            vec![
                District {
                    id: DistrictId(1),
                    name: "A".to_string(),
                    population: 1,
                    boundary: rect(0.0, 0.0, 1000.0, 1000.0),
                },
                District {
                    id: DistrictId(2),
                    name: "B".to_string(),
                    population: 1,
                    boundary: rect(1000.0, 0.0, 2000.0, 1000.0),
                },
            ],
        )
    }

    #[test]
    fn study_area_covers_all_districts() {
        assert!((study_area(&districts()).unsigned_area() - 2_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn cuts_overhanging_parts_and_counts_outside() {
        let footprints = GeoTable::new(
            "buildings",
            CANONICAL_CRS,
            vec![
                // Straddles the shared edge: kept whole.
                BuildingFootprint::new(1, Some("house"), rect(990.0, 10.0, 1010.0, 20.0)),
                // Hangs 10 m over the outer edge.
                BuildingFootprint::new(2, Some("garage"), rect(1990.0, 10.0, 2010.0, 20.0)),
                // Entirely outside.
                BuildingFootprint::new(3, None, rect(3000.0, 10.0, 3010.0, 20.0)),
            ],
        );

        let outcome = clip_to_districts(footprints, &districts()).unwrap();
        assert_eq!(outcome.outside, 1);
        assert_eq!(outcome.table.len(), 2);
        assert_eq!(outcome.table.crs(), Some(CANONICAL_CRS));

        let areas: Vec<f64> = outcome
            .table
            .iter()
            .map(|f| f.geometry.unsigned_area())
            .collect();
        assert!((areas[0] - 200.0).abs() < 1e-6);
        assert!((areas[1] - 100.0).abs() < 1e-6);
    }

    #[test]
    fn untagged_footprints_are_rejected() {
        let footprints = GeoTable::untagged(
            "buildings",
            vec![BuildingFootprint::new(1, None, rect(0.0, 0.0, 1.0, 1.0))],
        );
        assert!(matches!(
            clip_to_districts(footprints, &districts()),
            Err(BuildingError::Crs(_))
        ));
    }
}
