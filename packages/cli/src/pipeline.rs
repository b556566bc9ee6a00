//! Pipeline stages shared by the `run`, `districts` and `profile`
//! commands.
//!
//! Each stage consumes the previous stage's output and returns a fresh
//! value. The building path is the only one allowed to fail without
//! aborting the run: its error is logged and recorded in the [`Report`]
//! while the mobility indicators are still produced.

use std::time::Instant;

use bysykkel_buildings::{
    BuildingError, BuildingFetch, OverpassSource, SavedResponseSource, fetch_buildings,
};
use bysykkel_cli_utils::{MultiProgress, RowCounter, StageBar};
use bysykkel_crs::{CANONICAL_CRS, CrsError, GeoTable, normalize};
use bysykkel_district_models::indicators::HourlyProfile;
use bysykkel_district_models::{AssignedBuilding, District, Rejections};
use bysykkel_indicators::{
    BuildingReport, IndicatorError, MobilityReport, building_indicators, hourly_profiles,
    mobility_indicators,
};
use bysykkel_loader::LoadError;
use bysykkel_loader::districts::{districts_from_features, select_districts};
use bysykkel_loader::geometry::load_geometry_file;
use bysykkel_loader::progress::LoadProgress;
use bysykkel_loader::trips::{RowIssue, TripLoad, load_trips};
use bysykkel_spatial::JoinError;
use bysykkel_spatial::join::{BuildingJoin, JoinSummary, TripJoin, join_buildings, join_trips};
use bysykkel_spatial::points::{PointsOutcome, RejectedTrip, trip_points};
use serde::Serialize;

use crate::config::{BuildingsConfig, ConfigError, PipelineConfig};

/// Errors that abort a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An input file could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Reprojection failed.
    #[error(transparent)]
    Crs(#[from] CrsError),

    /// Spatial join failed.
    #[error(transparent)]
    Join(#[from] JoinError),

    /// Building retrieval failed.
    #[error(transparent)]
    Buildings(#[from] BuildingError),

    /// Indicator computation failed.
    #[error(transparent)]
    Indicators(#[from] IndicatorError),

    /// A district named on the command line does not exist.
    #[error("Unknown district: {0}")]
    UnknownDistrict(String),
}

/// What happened to the trip rows on their way to the join.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSummary {
    /// Rows parsed from the trip file.
    pub loaded: usize,
    /// Rows skipped because a field did not parse.
    pub rejected_rows: Rejections<RowIssue>,
    /// Trips dropped for out-of-range coordinates.
    pub invalid_coordinates: Rejections<RejectedTrip>,
    /// Unassigned counts of the join.
    pub join: JoinSummary,
}

/// Joined trips plus their audit trail.
#[derive(Debug)]
pub struct TripStage {
    /// Trips with both ends attributed.
    pub join: TripJoin,
    /// Row counts and rejections.
    pub summary: TripSummary,
}

/// Footprints attributed to districts.
#[derive(Debug)]
pub struct BuildingStage {
    /// Footprints the source returned.
    pub fetched: usize,
    /// Footprints entirely outside the districts.
    pub outside: usize,
    /// Clipped footprints overlapping no single district.
    pub unassigned: usize,
    /// Attributed footprints.
    pub buildings: Vec<AssignedBuilding>,
}

/// Building section of the [`Report`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingSummary {
    /// Footprints the source returned.
    pub fetched: usize,
    /// Footprints entirely outside the districts.
    pub outside: usize,
    /// Clipped footprints overlapping no single district.
    pub unassigned: usize,
    /// Indicators and skipped normalizations.
    #[serde(flatten)]
    pub report: BuildingReport,
}

/// Everything a run produces.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Reference system all areas were computed in.
    pub crs: String,
    /// Trip row counts and rejections.
    pub trips: TripSummary,
    /// Mobility indicators and skipped normalizations.
    pub mobility: MobilityReport,
    /// Hour-of-day histograms per district.
    pub hourly: Vec<HourlyProfile>,
    /// Building indicators; absent when the building path was disabled
    /// or failed.
    pub buildings: Option<BuildingSummary>,
    /// Why the building path failed, if it did.
    pub building_error: Option<String>,
}

/// Loads, filters and normalizes the district polygons.
///
/// # Errors
///
/// Returns [`PipelineError`] if the file cannot be loaded, a selected
/// district is missing, or reprojection fails.
pub fn load_districts(config: &PipelineConfig) -> Result<GeoTable<District>, PipelineError> {
    let features = load_geometry_file(&config.districts.path)?;
    let districts = districts_from_features(features, &config.districts.fields)?;
    let selected = select_districts(districts, &config.districts.select)?;
    let districts = normalize(selected)?;

    log::info!(
        "Loaded {} districts from {}",
        districts.len(),
        config.districts.path.display()
    );
    Ok(districts)
}

/// Loads the trip file and attributes both ends of every valid trip.
///
/// # Errors
///
/// Returns [`PipelineError`] if the config has no `[trips]` section, the
/// trip file cannot be loaded, or the join fails.
pub fn join_trip_file(
    config: &PipelineConfig,
    districts: &GeoTable<District>,
    progress: &dyn LoadProgress,
) -> Result<TripStage, PipelineError> {
    let trips = config.trips()?;
    let TripLoad { records, rejected } =
        load_trips(&trips.path, &trips.columns, trips.delimiter()?, progress)?;
    let loaded = records.len();
    if !rejected.is_empty() {
        log::warn!("Skipped {} unparsable trip rows", rejected.count());
    }

    let PointsOutcome {
        table,
        rejected: invalid_coordinates,
    } = trip_points(records)?;
    if !invalid_coordinates.is_empty() {
        log::warn!(
            "Excluded {} trips with out-of-range coordinates",
            invalid_coordinates.count()
        );
    }

    let join = join_trips(table, districts)?;

    Ok(TripStage {
        summary: TripSummary {
            loaded,
            rejected_rows: rejected,
            invalid_coordinates,
            join: join.summary,
        },
        join,
    })
}

/// Fetches, clips and attributes the building footprints.
///
/// # Errors
///
/// Returns [`PipelineError::Buildings`] if retrieval fails, or another
/// [`PipelineError`] if the join fails.
pub async fn attribute_buildings(
    config: &BuildingsConfig,
    districts: &GeoTable<District>,
) -> Result<BuildingStage, PipelineError> {
    let options = config.fetch_options();

    let BuildingFetch {
        table,
        fetched,
        outside,
    } = if let Some(path) = &config.saved_response {
        fetch_buildings(&SavedResponseSource::new(path), districts, &options).await?
    } else {
        let source = OverpassSource::new(
            config.endpoint.clone(),
            config.request_timeout(),
            config.retry_policy(),
        )?;
        fetch_buildings(&source, districts, &options).await?
    };

    let BuildingJoin {
        buildings,
        unassigned,
    } = join_buildings(table, districts)?;

    log::info!(
        "Attributed {} of {fetched} buildings ({outside} outside, {unassigned} unassigned)",
        buildings.len()
    );

    Ok(BuildingStage {
        fetched,
        outside,
        unassigned,
        buildings,
    })
}

const STAGES: [&str; 4] = [
    "Loading districts",
    "Joining trips",
    "Computing mobility indicators",
    "Fetching buildings",
];

/// Runs every stage and returns the report.
///
/// With `with_buildings` false the building path is skipped entirely.
///
/// # Errors
///
/// Returns [`PipelineError`] if any stage other than building retrieval
/// fails.
pub async fn run(
    config: &PipelineConfig,
    with_buildings: bool,
    multi: &MultiProgress,
) -> Result<(GeoTable<District>, Report), PipelineError> {
    let start = Instant::now();
    let stages = StageBar::new(multi, &STAGES);

    stages.begin(0);
    let districts = load_districts(config)?;

    stages.begin(1);
    let rows = RowCounter::new(multi, "Reading trips");
    let trips = join_trip_file(config, &districts, &rows)?;

    stages.begin(2);
    let mobility = mobility_indicators(&trips.join.trips, &districts)?;
    let hourly = hourly_profiles(&trips.join.trips, &districts);

    stages.begin(3);
    let mut building_error = None;
    let buildings = if with_buildings {
        match attribute_buildings(&config.buildings, &districts).await {
            Ok(stage) => {
                let report = building_indicators(&stage.buildings, &districts)?;
                Some(BuildingSummary {
                    fetched: stage.fetched,
                    outside: stage.outside,
                    unassigned: stage.unassigned,
                    report,
                })
            }
            Err(PipelineError::Buildings(e)) => {
                log::error!("Building indicators skipped: {e}");
                building_error = Some(e.to_string());
                None
            }
            Err(e) => return Err(e),
        }
    } else {
        log::info!("Building path disabled");
        None
    };

    stages.finish(start.elapsed());

    let report = Report {
        crs: CANONICAL_CRS.to_string(),
        trips: trips.summary,
        mobility,
        hourly,
        buildings,
        building_error,
    };

    Ok((districts, report))
}

/// Finds a district by name, ignoring ASCII case.
///
/// # Errors
///
/// Returns [`PipelineError::UnknownDistrict`] if no district matches.
pub fn find_district<'a>(
    districts: &'a GeoTable<District>,
    name: &str,
) -> Result<&'a District, PipelineError> {
    districts
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| PipelineError::UnknownDistrict(name.to_string()))
}
