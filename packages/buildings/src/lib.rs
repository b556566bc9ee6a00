#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Building footprints for the study area.
//!
//! Computes a WGS 84 bounding box around the study districts, retrieves
//! building footprints from a [`BuildingSource`] (the Overpass API or a
//! saved response), normalizes them and clips them to the districts.
//! Network failures are retried a bounded number of times; the whole
//! retrieval runs under a caller-supplied timeout.

pub mod clip;
pub mod overpass;
pub mod retry;

use std::fmt;
use std::time::Duration;

use bysykkel_crs::{CANONICAL_CRS, Crs, CrsError, GeoTable, Transform, normalize};
use bysykkel_district_models::{BuildingFootprint, District};
use geo::{BoundingRect as _, Coord};

pub use clip::{ClipOutcome, clip_to_districts, study_area};
pub use overpass::{OverpassSource, SavedResponseSource};
pub use retry::RetryPolicy;

/// Errors that can occur while retrieving building footprints.
#[derive(Debug, thiserror::Error)]
pub enum BuildingError {
    /// The building service could not deliver data.
    #[error("Building data source '{service}' unavailable after {attempts} attempt(s): {message}")]
    DataSourceUnavailable {
        /// Name of the source.
        service: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last failure.
        message: String,
    },

    /// The study area has no extent to query.
    #[error("Study area is empty")]
    EmptyStudyArea,

    /// Reprojection failed.
    #[error(transparent)]
    Crs(#[from] CrsError),

    /// A response could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The HTTP client could not be set up.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A WGS 84 bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Minimum latitude.
    pub south: f64,
    /// Minimum longitude.
    pub west: f64,
    /// Maximum latitude.
    pub north: f64,
    /// Maximum longitude.
    pub east: f64,
}

/// Formats as `south,west,north,east`, the Overpass bbox order.
impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.south, self.west, self.north, self.east)
    }
}

/// A provider of building footprints.
pub trait BuildingSource: Send + Sync {
    /// Fetches every footprint intersecting `bbox`, in WGS 84
    /// (`x` = longitude, `y` = latitude).
    ///
    /// # Errors
    ///
    /// Returns [`BuildingError::DataSourceUnavailable`] if the source
    /// cannot be reached, or another [`BuildingError`] if its response
    /// cannot be decoded.
    fn fetch(
        &self,
        bbox: BoundingBox,
    ) -> impl std::future::Future<Output = Result<Vec<BuildingFootprint>, BuildingError>> + Send;

    /// Source name used in logs and errors.
    fn name(&self) -> &str;
}

/// Knobs for [`fetch_buildings`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchOptions {
    /// Margin added around the districts' extent, in metres.
    pub margin_m: f64,
    /// Upper bound on the whole retrieval, retries included.
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            margin_m: 100.0,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Footprints ready for the spatial join.
#[derive(Debug)]
pub struct BuildingFetch {
    /// Clipped footprints in the canonical reference system.
    pub table: GeoTable<BuildingFootprint>,
    /// Footprints the source returned.
    pub fetched: usize,
    /// Footprints entirely outside the districts.
    pub outside: usize,
}

/// WGS 84 box around `districts` grown by `margin_m` metres.
///
/// # Errors
///
/// Returns [`BuildingError::Crs`] if the table is untagged and
/// [`BuildingError::EmptyStudyArea`] if it has no geometry.
pub fn study_area_bbox(
    districts: &GeoTable<District>,
    margin_m: f64,
) -> Result<BoundingBox, BuildingError> {
    let projected = normalize(districts.clone())?;
    let rect = study_area(&projected)
        .bounding_rect()
        .ok_or(BuildingError::EmptyStudyArea)?;

    let margin = margin_m.max(0.0);
    let (min, max) = (rect.min(), rect.max());
    let to_wgs84 = Transform::new(CANONICAL_CRS, Crs::Wgs84)?;

    // Grid north differs from true north away from the central meridian,
    // so every corner is projected.
    let corners = [
        (min.x - margin, min.y - margin),
        (min.x - margin, max.y + margin),
        (max.x + margin, min.y - margin),
        (max.x + margin, max.y + margin),
    ];

    let mut bbox = BoundingBox {
        south: f64::INFINITY,
        west: f64::INFINITY,
        north: f64::NEG_INFINITY,
        east: f64::NEG_INFINITY,
    };
    for (x, y) in corners {
        let c = to_wgs84.apply(Coord { x, y })?;
        bbox.south = bbox.south.min(c.y);
        bbox.west = bbox.west.min(c.x);
        bbox.north = bbox.north.max(c.y);
        bbox.east = bbox.east.max(c.x);
    }

    Ok(bbox)
}

/// Retrieves, normalizes and clips the footprints covering `districts`.
///
/// # Errors
///
/// Returns [`BuildingError::DataSourceUnavailable`] if the source fails
/// or the timeout elapses, or another [`BuildingError`] if the inputs
/// cannot be projected.
pub async fn fetch_buildings(
    source: &impl BuildingSource,
    districts: &GeoTable<District>,
    options: &FetchOptions,
) -> Result<BuildingFetch, BuildingError> {
    let bbox = study_area_bbox(districts, options.margin_m)?;
    log::info!("Fetching buildings from {} for {bbox}", source.name());

    let footprints = tokio::time::timeout(options.timeout, source.fetch(bbox))
        .await
        .map_err(|_| BuildingError::DataSourceUnavailable {
            service: source.name().to_string(),
            attempts: 0,
            message: format!("timed out after {:?}", options.timeout),
        })??;

    let fetched = footprints.len();
    let table = normalize(GeoTable::new("buildings", Crs::Wgs84, footprints))?;
    let projected = normalize(districts.clone())?;
    let ClipOutcome { table, outside } = clip_to_districts(table, &projected)?;

    Ok(BuildingFetch {
        table,
        fetched,
        outside,
    })
}
