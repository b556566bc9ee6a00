//! Coordinate transformations between supported reference systems.
//!
//! Backed by PROJ through `geo`'s `use-proj` feature. Definitions are
//! looked up by EPSG code and normalized for visualization, so `x` is
//! always longitude or easting.

use std::fmt;

use geo::Coord;
use geo::algorithm::proj::Proj;

use crate::{Crs, CrsError};

/// A coordinate transformation between two reference systems.
///
/// Transforming a system to itself never touches PROJ.
pub struct Transform {
    source: Crs,
    target: Crs,
    proj: Option<Proj>,
}

impl Transform {
    /// Creates the transformation from `source` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CrsError::Projection`] if PROJ cannot build a pipeline
    /// between the two systems.
    pub fn new(source: Crs, target: Crs) -> Result<Self, CrsError> {
        let proj = if source == target {
            None
        } else {
            let proj = Proj::new_known_crs(&source.to_string(), &target.to_string(), None)
                .map_err(|e| CrsError::Projection {
                    from: source,
                    to: target,
                    message: e.to_string(),
                })?;
            Some(proj)
        };

        Ok(Self {
            source,
            target,
            proj,
        })
    }

    /// Source reference system.
    #[must_use]
    pub const fn source(&self) -> Crs {
        self.source
    }

    /// Target reference system.
    #[must_use]
    pub const fn target(&self) -> Crs {
        self.target
    }

    /// Whether the transformation leaves coordinates untouched.
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.proj.is_none()
    }

    /// Transforms a single coordinate (x = longitude/easting).
    ///
    /// # Errors
    ///
    /// Returns [`CrsError::Projection`] if PROJ rejects the coordinate.
    pub fn apply(&self, c: Coord<f64>) -> Result<Coord<f64>, CrsError> {
        let Some(proj) = &self.proj else {
            return Ok(c);
        };

        let (x, y) = proj
            .convert((c.x, c.y))
            .map_err(|e| CrsError::Projection {
                from: self.source,
                to: self.target,
                message: format!("({}, {}): {e}", c.x, c.y),
            })?;
        Ok(Coord { x, y })
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::CANONICAL_CRS;

    use super::*;

    #[test]
    fn projects_oslo_into_zone_33() {
        let t = Transform::new(Crs::Wgs84, CANONICAL_CRS).unwrap();
        let c = t.apply(Coord { x: 10.7528, y: 59.9111 }).unwrap();
        assert!((c.x - 262_573.98).abs() < 0.05, "easting was {}", c.x);
        assert!((c.y - 6_649_130.03).abs() < 0.05, "northing was {}", c.y);
    }

    #[test]
    fn central_meridian_maps_to_false_easting() {
        let t = Transform::new(Crs::Wgs84, CANONICAL_CRS).unwrap();
        let c = t.apply(Coord { x: 15.0, y: 60.0 }).unwrap();
        assert!((c.x - 500_000.0).abs() < 1e-3, "easting was {}", c.x);
        assert!((c.y - 6_651_411.19).abs() < 0.05, "northing was {}", c.y);
    }

    #[test]
    fn inverse_recovers_geographic_coordinates() {
        let forward = Transform::new(Crs::Wgs84, CANONICAL_CRS).unwrap();
        let inverse = Transform::new(CANONICAL_CRS, Crs::Wgs84).unwrap();
        for (lon, lat) in [(10.0, 59.0), (11.2, 60.2), (18.0, 70.0), (15.0, 45.5)] {
            let projected = forward.apply(Coord { x: lon, y: lat }).unwrap();
            let back = inverse.apply(projected).unwrap();
            assert!((lon - back.x).abs() < 1e-8, "lon {lon} -> {}", back.x);
            assert!((lat - back.y).abs() < 1e-8, "lat {lat} -> {}", back.y);
        }
    }

    #[test]
    fn identity_transform_returns_input() {
        let t = Transform::new(CANONICAL_CRS, CANONICAL_CRS).unwrap();
        let c = Coord {
            x: 262_000.0,
            y: 6_650_000.0,
        };
        assert!(t.is_identity());
        assert_eq!(t.apply(c).unwrap(), c);
    }

    #[test]
    fn transforms_between_utm_zones() {
        let to_32 = Transform::new(CANONICAL_CRS, Crs::Etrs89Utm(32)).unwrap();
        let back = Transform::new(Crs::Etrs89Utm(32), CANONICAL_CRS).unwrap();
        let c = Coord {
            x: 262_573.98,
            y: 6_649_130.03,
        };
        let there = to_32.apply(c).unwrap();
        // Oslo sits near the middle of zone 32.
        assert!((there.x - 597_000.0).abs() < 2_000.0, "easting was {}", there.x);
        let again = back.apply(there).unwrap();
        assert!((again.x - c.x).abs() < 1e-3);
        assert!((again.y - c.y).abs() < 1e-3);
    }

    #[test]
    fn wgs84_utm_zone_is_supported() {
        let t = Transform::new(Crs::Wgs84, Crs::Wgs84Utm(33)).unwrap();
        let c = t.apply(Coord { x: 10.7528, y: 59.9111 }).unwrap();
        assert!((c.x - 262_573.98).abs() < 2.0, "easting was {}", c.x);
        assert_eq!(t.source(), Crs::Wgs84);
        assert_eq!(t.target(), Crs::Wgs84Utm(33));
    }
}
