//! Geometry tables tagged with their reference system.

use geo::{Geometry, LineString, MapCoordsInPlace as _, MultiPolygon, Point, Polygon};

use crate::{CANONICAL_CRS, Crs, CrsError, Transform};

/// A record whose geometries can be moved to another reference system.
pub trait Reprojectable {
    /// Applies `transform` to every coordinate the record holds.
    ///
    /// # Errors
    ///
    /// Returns [`CrsError::Projection`] if a coordinate cannot be
    /// transformed.
    fn reproject(&mut self, transform: &Transform) -> Result<(), CrsError>;
}

macro_rules! impl_reprojectable_for_geo {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Reprojectable for $ty {
                fn reproject(&mut self, transform: &Transform) -> Result<(), CrsError> {
                    self.try_map_coords_in_place(|c| transform.apply(c))
                }
            }
        )*
    };
}

impl_reprojectable_for_geo!(
    Point<f64>,
    LineString<f64>,
    Polygon<f64>,
    MultiPolygon<f64>,
    Geometry<f64>,
);

/// An ordered table of records that share one coordinate reference system.
///
/// The `name` is only used in log and error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTable<R> {
    name: String,
    crs: Option<Crs>,
    records: Vec<R>,
}

impl<R> GeoTable<R> {
    /// Creates a table tagged with `crs`.
    #[must_use]
    pub fn new(name: impl Into<String>, crs: Crs, records: Vec<R>) -> Self {
        Self {
            name: name.into(),
            crs: Some(crs),
            records,
        }
    }

    /// Creates a table with no declared reference system.
    #[must_use]
    pub fn untagged(name: impl Into<String>, records: Vec<R>) -> Self {
        Self {
            name: name.into(),
            crs: None,
            records,
        }
    }

    /// Table name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared reference system, if any.
    #[must_use]
    pub const fn crs(&self) -> Option<Crs> {
        self.crs
    }

    /// Returns the declared reference system.
    ///
    /// # Errors
    ///
    /// Returns [`CrsError::MissingCrs`] if the table is untagged.
    pub fn require_crs(&self) -> Result<Crs, CrsError> {
        self.crs.ok_or_else(|| CrsError::MissingCrs {
            table: self.name.clone(),
        })
    }

    /// Declares the reference system the coordinates are already in.
    ///
    /// Does not touch coordinates; use [`GeoTable::to_crs`] to move them.
    #[must_use]
    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    /// Records in insertion order.
    #[must_use]
    pub fn records(&self) -> &[R] {
        &self.records
    }

    /// Iterates the records in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.records.iter()
    }

    /// Consumes the table, returning its records.
    #[must_use]
    pub fn into_records(self) -> Vec<R> {
        self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maps every record, keeping the name and reference system.
    #[must_use]
    pub fn map_records<S>(self, f: impl FnMut(R) -> S) -> GeoTable<S> {
        GeoTable {
            name: self.name,
            crs: self.crs,
            records: self.records.into_iter().map(f).collect(),
        }
    }

    /// Keeps only records matching `keep`, preserving order.
    #[must_use]
    pub fn retain(mut self, keep: impl FnMut(&R) -> bool) -> Self {
        self.records.retain(keep);
        self
    }
}

impl<R: Reprojectable> GeoTable<R> {
    /// Reprojects every record into `target`.
    ///
    /// A table already in `target` is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CrsError::MissingCrs`] if the table has no declared
    /// reference system, or [`CrsError::Projection`] if PROJ fails.
    pub fn to_crs(mut self, target: Crs) -> Result<Self, CrsError> {
        let source = self.require_crs()?;

        if source == target {
            log::debug!("{}: already in {target}, nothing to do", self.name);
            return Ok(self);
        }

        let transform = Transform::new(source, target)?;
        for record in &mut self.records {
            record.reproject(&transform)?;
        }
        self.crs = Some(target);

        log::debug!(
            "{}: reprojected {} records from {source} to {target}",
            self.name,
            self.records.len()
        );

        Ok(self)
    }
}

impl<'a, R> IntoIterator for &'a GeoTable<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Reprojects `table` into [`CANONICAL_CRS`].
///
/// Idempotent: a table already in the canonical system is returned as is.
///
/// # Errors
///
/// Returns [`CrsError::MissingCrs`] if the table has no declared
/// reference system.
pub fn normalize<R: Reprojectable>(table: GeoTable<R>) -> Result<GeoTable<R>, CrsError> {
    table.to_crs(CANONICAL_CRS)
}

#[cfg(test)]
mod tests {
    use geo::{Coord, polygon};

    use super::*;

    fn oslo_points() -> GeoTable<Point<f64>> {
        GeoTable::new(
            "points",
            Crs::Wgs84,
            vec![Point::new(10.7528, 59.9111), Point::new(10.80, 59.93)],
        )
    }

    #[test]
    fn untagged_table_is_rejected() {
        let table = GeoTable::untagged("trips", vec![Point::new(10.0, 59.0)]);
        let err = normalize(table).unwrap_err();
        assert!(matches!(err, CrsError::MissingCrs { ref table } if table == "trips"));
    }

    #[test]
    fn normalizes_geographic_points() {
        let table = normalize(oslo_points()).unwrap();
        assert_eq!(table.crs(), Some(CANONICAL_CRS));
        let p = table.records()[0];
        assert!((p.x() - 262_573.98).abs() < 0.05);
        assert!((p.y() - 6_649_130.03).abs() < 0.05);
    }

    #[test]
    fn normalizing_twice_is_a_no_op() {
        let once = normalize(oslo_points()).unwrap();
        let twice = normalize(once.clone()).unwrap();
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a.x() - b.x()).abs() < 1e-9);
            assert!((a.y() - b.y()).abs() < 1e-9);
        }
        assert_eq!(once, twice);
    }

    #[test]
    fn reprojects_polygons_and_back() {
        let square = polygon![
            (x: 10.70, y: 59.90),
            (x: 10.80, y: 59.90),
            (x: 10.80, y: 59.95),
            (x: 10.70, y: 59.95),
        ];
        let table = GeoTable::new("districts", Crs::Wgs84, vec![square.clone()]);
        let back = normalize(table).unwrap().to_crs(Crs::Wgs84).unwrap();

        let original: Vec<Coord<f64>> = square.exterior().coords().copied().collect();
        let roundtrip: Vec<Coord<f64>> = back.records()[0].exterior().coords().copied().collect();
        for (a, b) in original.iter().zip(&roundtrip) {
            assert!((a.x - b.x).abs() < 1e-8);
            assert!((a.y - b.y).abs() < 1e-8);
        }
    }

    #[test]
    fn retain_and_map_keep_the_tag() {
        let table = oslo_points()
            .retain(|p| p.y() > 59.92)
            .map_records(Geometry::Point);
        assert_eq!(table.len(), 1);
        assert_eq!(table.crs(), Some(Crs::Wgs84));
        assert_eq!(table.name(), "points");
    }
}
