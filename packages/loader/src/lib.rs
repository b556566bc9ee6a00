#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Loaders for the trip dataset and the district geodata.
//!
//! [`trips`] reads the delimited trip export into typed
//! [`TripRecord`](bysykkel_district_models::TripRecord)s, flagging rows it
//! cannot parse instead of aborting. [`geometry`] reads `GeoJSON` into a
//! CRS-tagged [`GeoTable`](bysykkel_crs::GeoTable) of features, and
//! [`districts`] turns those features into district polygons.

pub mod districts;
pub mod geometry;
pub mod progress;
pub mod trips;

use bysykkel_crs::CrsError;

/// Errors that can occur while loading input files.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// I/O error (file open/read).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// `GeoJSON` parsing failed.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] Box<geojson::Error>),

    /// A required field is missing or has the wrong type.
    #[error("Malformed record in {source_name}: {message}")]
    MalformedRecord {
        /// File or table the record came from.
        source_name: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The file extension is not a supported geometry format.
    #[error("Unsupported geometry format: {path}")]
    UnsupportedFormat {
        /// Path as given.
        path: String,
    },

    /// A requested district does not exist in the district table.
    #[error("Unknown district: {name}")]
    UnknownDistrict {
        /// The requested name.
        name: String,
    },

    /// The declared reference system could not be understood.
    #[error(transparent)]
    Crs(#[from] CrsError),
}

impl From<geojson::Error> for LoadError {
    fn from(e: geojson::Error) -> Self {
        Self::GeoJson(Box::new(e))
    }
}
