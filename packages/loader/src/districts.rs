//! Extraction of district polygons from a feature table.
//!
//! Uses [`DistrictFields`] to find the name, population and (optional) id
//! attributes regardless of the source's property naming. Features
//! without an id attribute are numbered from 1 in file order.

use std::collections::BTreeSet;

use bysykkel_crs::GeoTable;
use bysykkel_district_models::{District, DistrictId};
use geo::{Geometry, MultiPolygon};
use serde::{Deserialize, Serialize};

use crate::LoadError;
use crate::geometry::Feature;

/// Property names holding district attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DistrictFields {
    /// District name property.
    pub name: String,
    /// Numeric district id property; features are numbered in file order
    /// when absent.
    pub id: Option<String>,
    /// Population property.
    pub population: String,
}

impl Default for DistrictFields {
    fn default() -> Self {
        Self {
            name: "bydel".to_string(),
            id: None,
            population: "befolkning_2024".to_string(),
        }
    }
}

/// Converts features into districts, keeping the table's reference system.
///
/// # Errors
///
/// Returns [`LoadError::MalformedRecord`] if a feature lacks a name or a
/// non-negative integer population, has a non-areal geometry, or
/// repeats an id.
pub fn districts_from_features(
    table: GeoTable<Feature>,
    fields: &DistrictFields,
) -> Result<GeoTable<District>, LoadError> {
    let source_name = table.name().to_string();
    let crs = table.crs();
    let malformed = |message: String| LoadError::MalformedRecord {
        source_name: source_name.clone(),
        message,
    };

    let mut seen = BTreeSet::new();
    let mut districts = Vec::with_capacity(table.len());

    for (i, feature) in table.into_records().into_iter().enumerate() {
        let name = feature
            .properties
            .get(&fields.name)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed(format!("feature {i} has no '{}' name", fields.name)))?
            .to_string();

        let population = feature
            .properties
            .get(&fields.population)
            .and_then(as_count)
            .ok_or_else(|| {
                malformed(format!(
                    "district '{name}' has no valid '{}' population",
                    fields.population
                ))
            })?;

        let id = match &fields.id {
            Some(id_field) => feature
                .properties
                .get(id_field)
                .and_then(as_count)
                .and_then(|id| u32::try_from(id).ok())
                .ok_or_else(|| malformed(format!("district '{name}' has no valid '{id_field}' id")))?,
            None => u32::try_from(i + 1).map_err(|_| malformed("too many districts".to_string()))?,
        };

        if !seen.insert(id) {
            return Err(malformed(format!("duplicate district id {id}")));
        }

        let boundary = into_multipolygon(feature.geometry)
            .ok_or_else(|| malformed(format!("district '{name}' geometry is not a polygon")))?;

        districts.push(District {
            id: DistrictId(id),
            name,
            population,
            boundary,
        });
    }

    log::info!("{source_name}: {} districts", districts.len());

    let table = GeoTable::untagged(source_name, districts);
    Ok(match crs {
        Some(crs) => table.with_crs(crs),
        None => table,
    })
}

/// Keeps the named districts, in the table's order.
///
/// An empty `names` list keeps every district.
///
/// # Errors
///
/// Returns [`LoadError::UnknownDistrict`] if a requested name is absent.
pub fn select_districts(
    table: GeoTable<District>,
    names: &[String],
) -> Result<GeoTable<District>, LoadError> {
    if names.is_empty() {
        return Ok(table);
    }

    for name in names {
        if !table.iter().any(|d| d.name.eq_ignore_ascii_case(name)) {
            return Err(LoadError::UnknownDistrict { name: name.clone() });
        }
    }

    Ok(table.retain(|d| names.iter().any(|n| d.name.eq_ignore_ascii_case(n))))
}

/// Reads a non-negative integer from a number or numeric string
/// (`"58 123"` and `"58123"` both work).
fn as_count(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().or_else(|| {
            let f = n.as_f64()?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let count = f as u64;
            (f >= 0.0 && f.fract() == 0.0).then_some(count)
        }),
        serde_json::Value::String(s) => s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .parse()
            .ok(),
        _ => None,
    }
}

fn into_multipolygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        Geometry::MultiPolygon(mp) => Some(mp),
        Geometry::GeometryCollection(gc) => {
            let mut polygons = Vec::new();
            for g in gc {
                polygons.extend(into_multipolygon(g)?);
            }
            Some(MultiPolygon(polygons))
        }
        _ => None,
    }
}
