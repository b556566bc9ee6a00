//! Flat output files for the presentation layer.
//!
//! Tables go to CSV, the whole report to `indicators.json`, and the
//! districts with their indicators to a WGS 84 `districts.geojson` ready
//! for a choropleth renderer.

use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use bysykkel_crs::{Crs, CrsError, GeoTable};
use bysykkel_district_models::District;
use bysykkel_district_models::indicators::{BuildingIndicators, MobilityIndicators};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};

use crate::pipeline::Report;

/// Errors that can occur while writing outputs.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Districts could not be projected back to WGS 84.
    #[error(transparent)]
    Crs(#[from] CrsError),
}

/// Writes every output file into `dir`, creating it if needed, and
/// returns the paths written.
///
/// Building files are only written when the report has building
/// indicators.
///
/// # Errors
///
/// Returns [`OutputError`] if a file cannot be written.
pub fn write_outputs(
    dir: &Path,
    districts: &GeoTable<District>,
    report: &Report,
) -> Result<Vec<PathBuf>, OutputError> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let path = dir.join("mobility.csv");
    write_mobility_csv(&path, &report.mobility.indicators)?;
    written.push(path);

    let path = dir.join("hourly.csv");
    write_hourly_csv(&path, report)?;
    written.push(path);

    if let Some(buildings) = &report.buildings {
        let path = dir.join("buildings.csv");
        write_buildings_csv(&path, &buildings.report.indicators)?;
        written.push(path);

        let path = dir.join("building_types.csv");
        write_building_types_csv(&path, &buildings.report.indicators)?;
        written.push(path);
    }

    let path = dir.join("indicators.json");
    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.flush()?;
    written.push(path);

    let path = dir.join("districts.geojson");
    std::fs::write(&path, districts_geojson(districts, report)?.to_string())?;
    written.push(path);

    for path in &written {
        log::info!("Wrote {}", path.display());
    }
    Ok(written)
}

fn opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_mobility_csv(path: &Path, rows: &[MobilityIndicators]) -> Result<(), OutputError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "district_id",
        "district_name",
        "area_km2",
        "population",
        "population_density_km2",
        "trips_started",
        "trips_ended",
        "net_trips",
        "total_trips",
        "trips_started_per_km2",
        "trips_ended_per_km2",
        "net_trips_per_km2",
        "total_trips_per_km2",
        "trips_started_per_capita",
        "trips_ended_per_capita",
        "net_trips_per_capita",
        "total_trips_per_capita",
    ])?;

    for row in rows {
        writer.write_record([
            row.district_id.to_string(),
            row.district_name.clone(),
            row.area_km2.to_string(),
            row.population.to_string(),
            opt(row.population_density_km2),
            row.trips_started.to_string(),
            row.trips_ended.to_string(),
            row.net_trips.to_string(),
            row.total_trips.to_string(),
            opt(row.trips_started_per_km2),
            opt(row.trips_ended_per_km2),
            opt(row.net_trips_per_km2),
            opt(row.total_trips_per_km2),
            opt(row.trips_started_per_capita),
            opt(row.trips_ended_per_capita),
            opt(row.net_trips_per_capita),
            opt(row.total_trips_per_capita),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn write_buildings_csv(path: &Path, rows: &[BuildingIndicators]) -> Result<(), OutputError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "district_id",
        "district_name",
        "area_km2",
        "building_count",
        "total_building_area_m2",
        "building_area_per_km2",
        "buildings_per_km2",
        "built_up_area_percent",
        "avg_building_area_m2",
    ])?;

    for row in rows {
        writer.write_record([
            row.district_id.to_string(),
            row.district_name.clone(),
            row.area_km2.to_string(),
            row.building_count.to_string(),
            row.total_building_area_m2.to_string(),
            opt(row.building_area_per_km2),
            opt(row.buildings_per_km2),
            opt(row.built_up_area_percent),
            row.avg_building_area_m2.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Long format: one row per district and type label.
fn write_building_types_csv(path: &Path, rows: &[BuildingIndicators]) -> Result<(), OutputError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["district_id", "district_name", "type", "count", "percent"])?;

    for row in rows {
        for (kind, count) in &row.type_counts {
            let percent = row.type_distribution.get(kind).copied().unwrap_or(0.0);
            writer.write_record([
                row.district_id.to_string(),
                row.district_name.clone(),
                kind.clone(),
                count.to_string(),
                percent.to_string(),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Long format: one row per district and hour.
fn write_hourly_csv(path: &Path, report: &Report) -> Result<(), OutputError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["district_id", "district_name", "hour", "started", "ended"])?;

    for profile in &report.hourly {
        for (hour, (started, ended)) in profile.started.iter().zip(&profile.ended).enumerate() {
            writer.write_record([
                profile.district_id.to_string(),
                profile.district_name.clone(),
                hour.to_string(),
                started.to_string(),
                ended.to_string(),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Districts in WGS 84 with their mobility and building indicators as
/// feature properties.
fn districts_geojson(
    districts: &GeoTable<District>,
    report: &Report,
) -> Result<FeatureCollection, OutputError> {
    let wgs84 = districts.clone().to_crs(Crs::Wgs84)?;

    let mut features = Vec::with_capacity(wgs84.len());
    for district in wgs84.iter() {
        let mut properties = JsonObject::new();
        properties.insert("districtId".to_string(), district.id.0.into());
        properties.insert("districtName".to_string(), district.name.clone().into());
        properties.insert("population".to_string(), district.population.into());

        if let Some(row) = report
            .mobility
            .indicators
            .iter()
            .find(|r| r.district_id == district.id)
        {
            merge(&mut properties, serde_json::to_value(row)?);
        }

        if let Some(buildings) = &report.buildings
            && let Some(row) = buildings
                .report
                .indicators
                .iter()
                .find(|r| r.district_id == district.id)
        {
            merge(&mut properties, serde_json::to_value(row)?);
        }

        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(geojson::Value::from(&district.boundary))),
            id: Some(geojson::feature::Id::Number(district.id.0.into())),
            properties: Some(properties),
            foreign_members: None,
        });
    }

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

fn merge(properties: &mut JsonObject, value: serde_json::Value) {
    if let serde_json::Value::Object(map) = value {
        properties.extend(map);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bysykkel_crs::CANONICAL_CRS;
    use bysykkel_district_models::indicators::{HOURS_PER_DAY, HourlyProfile};
    use bysykkel_district_models::{DistrictId, Rejections};
    use bysykkel_indicators::{BuildingReport, MobilityReport};
    use bysykkel_spatial::join::JoinSummary;
    use geo::{MultiPolygon, polygon};

    use super::*;
    use crate::pipeline::{BuildingSummary, TripSummary};

    fn districts() -> GeoTable<District> {
        // 1 km² around Oslo Central Station, in zone 33.
        let square = MultiPolygon(vec![polygon![
            (x: 262_000.0, y: 6_649_000.0),
            (x: 263_000.0, y: 6_649_000.0),
            (x: 263_000.0, y: 6_650_000.0),
            (x: 262_000.0, y: 6_650_000.0),
        ]]);
        GeoTable::new(
            "districts",
            CANONICAL_CRS,
            vec![District {
                id: DistrictId(1),
                name: "Sentrum".to_string(),
                population: 0,
                boundary: square,
            }],
        )
    }

    fn mobility() -> MobilityIndicators {
        MobilityIndicators {
            district_id: DistrictId(1),
            district_name: "Sentrum".to_string(),
            area_km2: 1.0,
            population: 0,
            population_density_km2: Some(0.0),
            trips_started: 12,
            trips_ended: 10,
            net_trips: 2,
            total_trips: 22,
            trips_started_per_km2: Some(12.0),
            trips_ended_per_km2: Some(10.0),
            net_trips_per_km2: Some(2.0),
            total_trips_per_km2: Some(22.0),
            trips_started_per_capita: None,
            trips_ended_per_capita: None,
            net_trips_per_capita: None,
            total_trips_per_capita: None,
        }
    }

    fn report(with_buildings: bool) -> Report {
        let mut started = [0; HOURS_PER_DAY];
        started[8] = 12;
        let buildings = with_buildings.then(|| BuildingSummary {
            fetched: 3,
            outside: 1,
            unassigned: 0,
            report: BuildingReport {
                indicators: vec![BuildingIndicators {
                    district_id: DistrictId(1),
                    district_name: "Sentrum".to_string(),
                    area_km2: 1.0,
                    building_count: 2,
                    total_building_area_m2: 500.0,
                    building_area_per_km2: Some(500.0),
                    buildings_per_km2: Some(2.0),
                    built_up_area_percent: Some(0.05),
                    avg_building_area_m2: 250.0,
                    type_counts: BTreeMap::from([
                        ("apartments".to_string(), 1),
                        ("unclassified".to_string(), 1),
                    ]),
                    type_distribution: BTreeMap::from([
                        ("apartments".to_string(), 50.0),
                        ("unclassified".to_string(), 50.0),
                    ]),
                }],
                failures: vec![],
            },
        });

        Report {
            crs: CANONICAL_CRS.to_string(),
            trips: TripSummary {
                loaded: 23,
                rejected_rows: Rejections::default(),
                invalid_coordinates: Rejections::default(),
                join: JoinSummary {
                    total: 22,
                    start_unassigned: 0,
                    end_unassigned: 2,
                },
            },
            mobility: MobilityReport {
                indicators: vec![mobility()],
                failures: vec![],
            },
            hourly: vec![HourlyProfile {
                district_id: DistrictId(1),
                district_name: "Sentrum".to_string(),
                started,
                ended: [0; HOURS_PER_DAY],
            }],
            buildings,
            building_error: None,
        }
    }

    fn out_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bysykkel_output_{name}"));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    #[test]
    fn writes_every_file_with_buildings() {
        let dir = out_dir("full");
        let written = write_outputs(&dir, &districts(), &report(true)).unwrap();

        let names: Vec<_> = written
            .iter()
            .filter_map(|p| p.file_name()?.to_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "mobility.csv",
                "hourly.csv",
                "buildings.csv",
                "building_types.csv",
                "indicators.json",
                "districts.geojson",
            ]
        );

        let types = std::fs::read_to_string(dir.join("building_types.csv")).unwrap();
        assert_eq!(types.lines().count(), 3);
        assert!(types.contains("1,Sentrum,unclassified,1,50"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn skips_building_files_without_buildings() {
        let dir = out_dir("mobility_only");
        write_outputs(&dir, &districts(), &report(false)).unwrap();
        assert!(dir.join("mobility.csv").exists());
        assert!(!dir.join("buildings.csv").exists());
        assert!(!dir.join("building_types.csv").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_per_capita_values_are_empty_cells() {
        let dir = out_dir("mobility_csv");
        write_outputs(&dir, &districts(), &report(false)).unwrap();

        let text = std::fs::read_to_string(dir.join("mobility.csv")).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.starts_with("1,Sentrum,1,0,0,12,10,2,22,12,10,2,22"));
        assert!(row.ends_with(",,,,"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn hourly_csv_has_one_row_per_hour() {
        let dir = out_dir("hourly");
        write_outputs(&dir, &districts(), &report(false)).unwrap();

        let text = std::fs::read_to_string(dir.join("hourly.csv")).unwrap();
        assert_eq!(text.lines().count(), 1 + HOURS_PER_DAY);
        assert!(text.contains("\n1,Sentrum,8,12,0\n"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn geojson_is_wgs84_with_indicator_properties() {
        let collection = districts_geojson(&districts(), &report(true)).unwrap();
        let feature = &collection.features[0];

        let properties = feature.properties.as_ref().unwrap();
        assert_eq!(properties["districtName"], "Sentrum");
        assert_eq!(properties["tripsStarted"], 12);
        assert_eq!(properties["buildingCount"], 2);
        assert!(properties["tripsStartedPerCapita"].is_null());

        let Some(geojson::Value::MultiPolygon(polygons)) =
            feature.geometry.as_ref().map(|g| &g.value)
        else {
            panic!("expected a multipolygon");
        };
        for position in &polygons[0][0] {
            assert!((10.7..10.8).contains(&position[0]), "lon {}", position[0]);
            assert!((59.85..59.95).contains(&position[1]), "lat {}", position[1]);
        }
    }

    #[test]
    fn json_report_keeps_failures_and_summary() {
        let dir = out_dir("json");
        write_outputs(&dir, &districts(), &report(false)).unwrap();

        let text = std::fs::read_to_string(dir.join("indicators.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["crs"], "EPSG:25833");
        assert_eq!(json["trips"]["join"]["endUnassigned"], 2);
        assert_eq!(json["trips"]["rejectedRows"]["count"], 0);
        assert!(json["buildings"].is_null());

        std::fs::remove_dir_all(&dir).ok();
    }
}
