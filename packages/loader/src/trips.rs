//! Trip dataset loader.
//!
//! Reads a delimited trip export (one row per rental). Column names are
//! configurable through [`TripColumns`]; the defaults match the Oslo City
//! Bike open-data export. A missing required column fails the whole load
//! with [`LoadError::MalformedRecord`]. A row whose timestamps or
//! coordinates cannot be parsed, or whose fields are not valid UTF-8, is
//! skipped and recorded in [`TripLoad::rejected`].

use std::fs::File;
use std::io::Read;
use std::path::Path;

use bysykkel_district_models::{LonLat, Rejections, Station, TripRecord};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use csv::{ByteRecord, StringRecord};
use serde::{Deserialize, Serialize};

use crate::LoadError;
use crate::progress::LoadProgress;

/// Number of rows between progress updates.
const PROGRESS_STEP: u64 = 10_000;

/// Column names of the trip dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TripColumns {
    /// Start timestamp column.
    pub started_at: String,
    /// End timestamp column.
    pub ended_at: String,
    /// Start latitude column.
    pub start_lat: String,
    /// Start longitude column.
    pub start_lon: String,
    /// End latitude column.
    pub end_lat: String,
    /// End longitude column.
    pub end_lon: String,
    /// Optional start station id column.
    pub start_station_id: Option<String>,
    /// Optional start station name column.
    pub start_station_name: Option<String>,
    /// Optional end station id column.
    pub end_station_id: Option<String>,
    /// Optional end station name column.
    pub end_station_name: Option<String>,
    /// Optional trip duration column (seconds).
    pub duration: Option<String>,
}

impl Default for TripColumns {
    fn default() -> Self {
        Self {
            started_at: "started_at".to_string(),
            ended_at: "ended_at".to_string(),
            start_lat: "start_station_latitude".to_string(),
            start_lon: "start_station_longitude".to_string(),
            end_lat: "end_station_latitude".to_string(),
            end_lon: "end_station_longitude".to_string(),
            start_station_id: Some("start_station_id".to_string()),
            start_station_name: Some("start_station_name".to_string()),
            end_station_id: Some("end_station_id".to_string()),
            end_station_name: Some("end_station_name".to_string()),
            duration: Some("duration".to_string()),
        }
    }
}

/// A trip row that was skipped during loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowIssue {
    /// 1-based line number in the source file (header is line 1).
    pub line: u64,
    /// Column that failed to parse.
    pub column: String,
    /// Raw value found in that column, lossily decoded.
    pub value: String,
}

/// Result of loading a trip dataset.
#[derive(Debug, Clone, Default)]
pub struct TripLoad {
    /// Successfully parsed trips in file order.
    pub records: Vec<TripRecord>,
    /// Rows skipped because a field did not decode or parse.
    pub rejected: Rejections<RowIssue>,
}

/// Resolved column positions for one file.
struct ColumnIndex {
    started_at: usize,
    ended_at: usize,
    start_lat: usize,
    start_lon: usize,
    end_lat: usize,
    end_lon: usize,
    start_station_id: Option<usize>,
    start_station_name: Option<usize>,
    end_station_id: Option<usize>,
    end_station_name: Option<usize>,
    duration: Option<usize>,
}

impl ColumnIndex {
    fn resolve(
        headers: &StringRecord,
        columns: &TripColumns,
        source_name: &str,
    ) -> Result<Self, LoadError> {
        let position = |name: &str| headers.iter().position(|h| h.trim() == name);

        let required = |name: &str| {
            position(name).ok_or_else(|| LoadError::MalformedRecord {
                source_name: source_name.to_string(),
                message: format!("required column '{name}' is missing"),
            })
        };

        let optional = |name: Option<&String>| {
            let name = name?;
            let found = position(name);
            if found.is_none() {
                log::warn!("{source_name}: optional column '{name}' not found, ignoring");
            }
            found
        };

        Ok(Self {
            started_at: required(&columns.started_at)?,
            ended_at: required(&columns.ended_at)?,
            start_lat: required(&columns.start_lat)?,
            start_lon: required(&columns.start_lon)?,
            end_lat: required(&columns.end_lat)?,
            end_lon: required(&columns.end_lon)?,
            start_station_id: optional(columns.start_station_id.as_ref()),
            start_station_name: optional(columns.start_station_name.as_ref()),
            end_station_id: optional(columns.end_station_id.as_ref()),
            end_station_name: optional(columns.end_station_name.as_ref()),
            duration: optional(columns.duration.as_ref()),
        })
    }
}

/// Loads trips from a delimited file on disk.
///
/// # Errors
///
/// Returns [`LoadError`] if the file cannot be opened, is not valid CSV,
/// or lacks a required column.
pub fn load_trips(
    path: &Path,
    columns: &TripColumns,
    delimiter: u8,
    progress: &dyn LoadProgress,
) -> Result<TripLoad, LoadError> {
    let file = File::open(path)?;
    if let Ok(meta) = file.metadata() {
        log::debug!("Reading {} bytes from {}", meta.len(), path.display());
    }
    read_trips(file, columns, delimiter, &path.display().to_string(), progress)
}

/// Reads trips from any reader. `source_name` is used in diagnostics.
///
/// # Errors
///
/// Returns [`LoadError`] if the input is not valid CSV or lacks a
/// required column.
pub fn read_trips<R: Read>(
    reader: R,
    columns: &TripColumns,
    delimiter: u8,
    source_name: &str,
    progress: &dyn LoadProgress,
) -> Result<TripLoad, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let index = ColumnIndex::resolve(&headers, columns, source_name)?;

    let mut load = TripLoad::default();
    let mut row_count: u64 = 0;

    for result in reader.byte_records() {
        let record = result?;
        row_count += 1;
        // Header occupies line 1.
        let line = row_count + 1;

        let row = Row {
            record: &record,
            headers: &headers,
        };
        match parse_row(&row, &index) {
            Ok(trip) => load.records.push(trip),
            Err((column, value)) => {
                log::debug!("{source_name}: skipping line {line}, bad '{column}' value {value:?}");
                load.rejected.record(RowIssue {
                    line,
                    column,
                    value,
                });
            }
        }

        if row_count % PROGRESS_STEP == 0 {
            progress.rows_read(PROGRESS_STEP);
        }
    }

    progress.rows_read(row_count % PROGRESS_STEP);
    progress.finished(load.records.len(), load.rejected.count());

    if load.rejected.is_empty() {
        log::info!("{source_name}: loaded {} trips", load.records.len());
    } else {
        log::warn!(
            "{source_name}: loaded {} trips, skipped {} unparsable rows",
            load.records.len(),
            load.rejected.count()
        );
    }

    Ok(load)
}

/// One data row, read as raw bytes, with the file's header names.
struct Row<'r> {
    record: &'r ByteRecord,
    headers: &'r StringRecord,
}

impl<'r> Row<'r> {
    /// Column name and lossily decoded value of field `i`.
    fn issue(&self, i: usize) -> (String, String) {
        let raw = self.record.get(i).unwrap_or_default();
        (
            self.headers.get(i).unwrap_or("").trim().to_string(),
            String::from_utf8_lossy(raw).trim().to_string(),
        )
    }

    /// Trimmed text of field `i`. A missing field reads as empty.
    fn text(&self, i: usize) -> Result<&'r str, (String, String)> {
        let raw = self.record.get(i).unwrap_or_default();
        std::str::from_utf8(raw)
            .map(str::trim)
            .map_err(|_| self.issue(i))
    }
}

/// Parses one row; on failure returns the offending column and value.
fn parse_row(row: &Row<'_>, index: &ColumnIndex) -> Result<TripRecord, (String, String)> {
    let timestamp = |i: usize| -> Result<DateTime<FixedOffset>, (String, String)> {
        parse_timestamp(row.text(i)?).ok_or_else(|| row.issue(i))
    };
    let number = |i: usize| -> Result<f64, (String, String)> {
        row.text(i)?.parse::<f64>().map_err(|_| row.issue(i))
    };

    let started_at = timestamp(index.started_at)?;
    let ended_at = timestamp(index.ended_at)?;
    let start = LonLat {
        lat: number(index.start_lat)?,
        lon: number(index.start_lon)?,
    };
    let end = LonLat {
        lat: number(index.end_lat)?,
        lon: number(index.end_lon)?,
    };

    let text = |i: Option<usize>| -> Result<Option<String>, (String, String)> {
        let Some(i) = i else {
            return Ok(None);
        };
        let value = row.text(i)?;
        Ok((!value.is_empty()).then(|| value.to_string()))
    };
    let station = |id: Option<usize>,
                   name: Option<usize>|
     -> Result<Option<Station>, (String, String)> {
        let station = Station {
            id: text(id)?,
            name: text(name)?,
        };
        Ok((!station.is_empty()).then_some(station))
    };

    let duration_secs = match index.duration {
        Some(i) => parse_duration(row.text(i)?),
        None => None,
    };

    Ok(TripRecord {
        started_at,
        ended_at,
        start,
        end,
        start_station: station(index.start_station_id, index.start_station_name)?,
        end_station: station(index.end_station_id, index.end_station_name)?,
        duration_secs,
    })
}

/// Parses a trip timestamp, keeping its UTC offset.
///
/// Accepts RFC 3339, `2024-06-01 03:00:14.123000+00:00`, and naive
/// timestamps (read as UTC).
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    for format in [
        "%Y-%m-%d %H:%M:%S%.f%:z",
        "%Y-%m-%d %H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S%.f%z",
        "%Y-%m-%d %H:%M:%S%z",
    ] {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    None
}

/// Parses a duration in whole or fractional seconds.
fn parse_duration(s: &str) -> Option<u64> {
    if let Ok(secs) = s.parse::<u64>() {
        return Some(secs);
    }
    let secs = s.parse::<f64>().ok()?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = secs.round() as u64;
    (secs.is_finite() && secs >= 0.0).then_some(whole)
}
