//! Geometry file loader.
//!
//! Reads `GeoJSON` files into a [`GeoTable`] of [`Feature`]s. A legacy
//! top-level `crs` member is honoured; without one the table is tagged
//! `EPSG:4326`, the only reference system RFC 7946 allows.

use std::path::Path;

use bysykkel_crs::{Crs, CrsError, GeoTable, Reprojectable, Transform};
use geojson::GeoJson;

use crate::LoadError;

/// A geometry with its attribute properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Feature geometry in the owning table's reference system.
    pub geometry: geo::Geometry<f64>,
    /// Attribute properties, empty if the feature had none.
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Reprojectable for Feature {
    fn reproject(&mut self, transform: &Transform) -> Result<(), CrsError> {
        self.geometry.reproject(transform)
    }
}

/// Loads a geometry file, dispatching on its extension.
///
/// # Errors
///
/// Returns [`LoadError::UnsupportedFormat`] for extensions other than
/// `.geojson` and `.json`, or another [`LoadError`] if the file cannot
/// be read or parsed.
pub fn load_geometry_file(path: &Path) -> Result<GeoTable<Feature>, LoadError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("geojson" | "json") => {
            let text = std::fs::read_to_string(path)?;
            parse_geojson(&text, &path.display().to_string())
        }
        _ => Err(LoadError::UnsupportedFormat {
            path: path.display().to_string(),
        }),
    }
}

/// Parses `GeoJSON` text into a feature table named `name`.
///
/// Features with a null geometry are skipped with a warning.
///
/// # Errors
///
/// Returns [`LoadError`] if the text is not valid `GeoJSON` or declares
/// an unsupported reference system.
pub fn parse_geojson(text: &str, name: &str) -> Result<GeoTable<Feature>, LoadError> {
    let geojson: GeoJson = text.parse()?;

    let (crs, raw_features) = match geojson {
        GeoJson::FeatureCollection(fc) => {
            let crs = declared_crs(fc.foreign_members.as_ref())?;
            (crs, fc.features)
        }
        GeoJson::Feature(feature) => {
            let crs = declared_crs(feature.foreign_members.as_ref())?;
            (crs, vec![feature])
        }
        GeoJson::Geometry(geometry) => {
            let crs = declared_crs(geometry.foreign_members.as_ref())?;
            let feature = geojson::Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: None,
                foreign_members: None,
            };
            (crs, vec![feature])
        }
    };

    let mut features = Vec::with_capacity(raw_features.len());
    let mut skipped = 0usize;

    for feature in raw_features {
        let Some(geometry) = feature.geometry else {
            skipped += 1;
            continue;
        };
        let geometry: geo::Geometry<f64> = geometry.try_into()?;
        features.push(Feature {
            geometry,
            properties: feature.properties.unwrap_or_default(),
        });
    }

    if skipped > 0 {
        log::warn!("{name}: skipped {skipped} features without geometry");
    }

    let crs = crs.unwrap_or(Crs::Wgs84);
    log::info!("{name}: loaded {} features in {crs}", features.len());

    Ok(GeoTable::new(name, crs, features))
}

/// Reads a legacy `"crs": {"type": "name", "properties": {"name": ...}}`
/// member.
fn declared_crs(members: Option<&geojson::JsonObject>) -> Result<Option<Crs>, LoadError> {
    let Some(crs) = members.and_then(|m| m.get("crs")) else {
        return Ok(None);
    };

    let name = crs
        .get("properties")
        .and_then(|p| p.get("name"))
        .and_then(serde_json::Value::as_str);

    match name {
        Some(name) => Ok(Some(Crs::parse(name)?)),
        None => {
            log::warn!("Ignoring unrecognised crs member: {crs}");
            Ok(None)
        }
    }
}
