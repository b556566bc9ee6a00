#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Coordinate reference systems for the bike-share analysis pipeline.
//!
//! Every geometry table carries an explicit [`Crs`] tag. Areas and
//! densities are only meaningful in the projected [`CANONICAL_CRS`]
//! (ETRS89 / UTM zone 33N, `EPSG:25833`), so every table passes through
//! [`normalize`] before any metric computation. Normalization is an
//! explicit step: an untagged table is rejected, never assumed.

pub mod projection;
pub mod table;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use projection::Transform;
pub use table::{GeoTable, Reprojectable, normalize};

/// The projected system all areas and distances are computed in.
pub const CANONICAL_CRS: Crs = Crs::Etrs89Utm(33);

/// Errors raised while parsing or applying coordinate reference systems.
#[derive(Debug, Error)]
pub enum CrsError {
    /// The table has no declared reference system.
    #[error("{table} has no declared coordinate reference system")]
    MissingCrs {
        /// Name of the offending table.
        table: String,
    },

    /// The reference system is not one the projection engine supports.
    #[error("Unsupported coordinate reference system: {value}")]
    UnsupportedCrs {
        /// The value as given.
        value: String,
    },

    /// PROJ could not build or run the transformation.
    #[error("Cannot transform from {from} to {to}: {message}")]
    Projection {
        /// Source reference system.
        from: Crs,
        /// Target reference system.
        to: Crs,
        /// PROJ's diagnostic.
        message: String,
    },
}

/// A supported coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// Geographic WGS 84 longitude/latitude (`EPSG:4326`).
    Wgs84,
    /// ETRS89 / UTM zone N (`EPSG:258NN`).
    Etrs89Utm(u8),
    /// WGS 84 / UTM zone N, northern hemisphere (`EPSG:326NN`).
    Wgs84Utm(u8),
}

impl Crs {
    /// Returns the EPSG code.
    #[must_use]
    pub fn epsg(self) -> u32 {
        match self {
            Self::Wgs84 => 4326,
            Self::Etrs89Utm(zone) => 25_800 + u32::from(zone),
            Self::Wgs84Utm(zone) => 32_600 + u32::from(zone),
        }
    }

    /// Looks up a system by EPSG code.
    ///
    /// # Errors
    ///
    /// Returns [`CrsError::UnsupportedCrs`] for codes outside the
    /// supported families.
    pub fn from_epsg(code: u32) -> Result<Self, CrsError> {
        match code {
            4326 => Ok(Self::Wgs84),
            25_828..=25_838 => Ok(Self::Etrs89Utm(zone_of(code - 25_800))),
            32_601..=32_660 => Ok(Self::Wgs84Utm(zone_of(code - 32_600))),
            _ => Err(CrsError::UnsupportedCrs {
                value: format!("EPSG:{code}"),
            }),
        }
    }

    /// Whether coordinates are longitude/latitude degrees.
    #[must_use]
    pub const fn is_geographic(self) -> bool {
        matches!(self, Self::Wgs84)
    }

    /// Parses `EPSG:25833`, `urn:ogc:def:crs:EPSG::25833`, `OGC:CRS84`
    /// or a bare EPSG number.
    ///
    /// # Errors
    ///
    /// Returns [`CrsError::UnsupportedCrs`] if the value is not
    /// recognized.
    pub fn parse(value: &str) -> Result<Self, CrsError> {
        let upper = value.trim().to_ascii_uppercase();
        let unsupported = || CrsError::UnsupportedCrs {
            value: value.to_string(),
        };

        if upper.ends_with("CRS84") {
            return Ok(Self::Wgs84);
        }

        let code = if upper.starts_with("EPSG:") || upper.starts_with("URN:OGC:DEF:CRS:EPSG:") {
            upper.rsplit(':').next().unwrap_or_default()
        } else {
            upper.as_str()
        };

        let code: u32 = code.parse().map_err(|_| unsupported())?;
        Self::from_epsg(code).map_err(|_| unsupported())
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn zone_of(offset: u32) -> u8 {
    offset as u8
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = CrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Crs {
    type Error = CrsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}
