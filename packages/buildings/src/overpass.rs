//! Overpass API client and response decoding.
//!
//! Buildings are requested with `out geom tags`, so every way carries its
//! node coordinates inline and every relation carries the geometry of its
//! member ways. The response is decoded into transport DTOs first and then
//! assembled into footprints in one pass.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use bysykkel_district_models::BuildingFootprint;
use geo::{Contains as _, Coord, LineString, MultiPolygon, Polygon};
use serde::Deserialize;

use crate::retry::{AttemptError, RetryPolicy, with_retry};
use crate::{BoundingBox, BuildingError, BuildingSource};

/// Public Overpass endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://overpass-api.de/api/interpreter";

/// Default per-request timeout, also sent as the query's server-side
/// `[timeout:N]`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Deserialize)]
struct OverpassResponseDto {
    #[serde(default)]
    elements: Vec<OverpassElementDto>,
}

#[derive(Debug, Deserialize)]
struct OverpassElementDto {
    #[serde(rename = "type")]
    element_type: String,
    id: i64,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    geometry: Vec<LatLonDto>,
    #[serde(default)]
    members: Vec<OverpassMemberDto>,
}

#[derive(Debug, Deserialize)]
struct OverpassMemberDto {
    #[serde(rename = "type")]
    member_type: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    geometry: Vec<LatLonDto>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct LatLonDto {
    lat: f64,
    lon: f64,
}

impl From<LatLonDto> for Coord<f64> {
    fn from(p: LatLonDto) -> Self {
        Self { x: p.lon, y: p.lat }
    }
}

impl OverpassElementDto {
    fn into_footprint(self) -> Option<BuildingFootprint> {
        let geometry = match self.element_type.as_str() {
            "way" => closed_ring(self.geometry.into_iter().map(Coord::from).collect())
                .map(|ring| MultiPolygon(vec![Polygon::new(ring, vec![])])),
            "relation" => relation_polygons(self.members),
            _ => None,
        }?;

        let tag = self.tags.get("building").map(String::as_str);
        Some(BuildingFootprint::new(self.id, tag, geometry))
    }
}

/// Builds the Overpass QL query for every building way and relation in
/// `bbox`.
#[must_use]
pub fn build_query(bbox: &BoundingBox, timeout: Duration) -> String {
    format!(
        "[out:json][timeout:{timeout}];\n\
         (\n  \
           way[\"building\"]({bbox});\n  \
           relation[\"building\"]({bbox});\n\
         );\n\
         out geom tags;",
        timeout = timeout.as_secs().max(1),
    )
}

/// Decodes an Overpass JSON response into WGS 84 footprints.
///
/// Elements without a usable polygon are skipped and counted in the log.
///
/// # Errors
///
/// Returns [`BuildingError::Json`] if `text` is not an Overpass JSON
/// document.
pub fn parse_response(text: &str) -> Result<Vec<BuildingFootprint>, BuildingError> {
    let response: OverpassResponseDto = serde_json::from_str(text)?;
    let total = response.elements.len();

    let footprints: Vec<BuildingFootprint> = response
        .elements
        .into_iter()
        .filter_map(OverpassElementDto::into_footprint)
        .collect();

    let skipped = total - footprints.len();
    if skipped > 0 {
        log::warn!("Skipped {skipped} of {total} Overpass elements without a usable polygon");
    }

    Ok(footprints)
}

/// Closes `coords` into a ring, or `None` if it cannot enclose an area.
fn closed_ring(mut coords: Vec<Coord<f64>>) -> Option<LineString<f64>> {
    if coords.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return None;
    }
    if coords.first() != coords.last() {
        let first = *coords.first()?;
        coords.push(first);
    }
    (coords.len() >= 4).then(|| LineString::new(coords))
}

/// Assembles a multipolygon relation from its member ways.
///
/// Outer ways split across several members are stitched end to end; each
/// inner ring becomes a hole of the outer ring that contains it.
fn relation_polygons(members: Vec<OverpassMemberDto>) -> Option<MultiPolygon<f64>> {
    let mut outer = Vec::new();
    let mut inner = Vec::new();

    for member in members {
        if member.member_type != "way" || member.geometry.len() < 2 {
            continue;
        }
        let coords: Vec<Coord<f64>> = member.geometry.into_iter().map(Coord::from).collect();
        if member.role == "inner" {
            inner.push(coords);
        } else {
            outer.push(coords);
        }
    }

    let mut polygons: Vec<Polygon<f64>> = stitch_rings(outer)
        .into_iter()
        .map(|ring| Polygon::new(ring, vec![]))
        .collect();

    if polygons.is_empty() {
        return None;
    }

    for hole in stitch_rings(inner) {
        let hole_polygon = Polygon::new(hole.clone(), vec![]);
        if let Some(parent) = polygons
            .iter_mut()
            .find(|p| p.contains(&hole_polygon))
        {
            parent.interiors_push(hole);
        }
    }

    Some(MultiPolygon(polygons))
}

/// Joins open way segments that share endpoints into closed rings.
/// Segments that never close are dropped.
fn stitch_rings(mut segments: Vec<Vec<Coord<f64>>>) -> Vec<LineString<f64>> {
    let mut rings = Vec::new();

    while let Some(mut current) = segments.pop() {
        loop {
            if current.len() >= 2 && current.first() == current.last() {
                break;
            }
            let (Some(&head), Some(&tail)) = (current.first(), current.last()) else {
                break;
            };

            let next = segments.iter().position(|s| {
                s.first() == Some(&tail)
                    || s.last() == Some(&tail)
                    || s.first() == Some(&head)
                    || s.last() == Some(&head)
            });
            let Some(i) = next else {
                break;
            };

            let mut segment = segments.swap_remove(i);
            if segment.first() == Some(&tail) {
                current.extend(segment.into_iter().skip(1));
            } else if segment.last() == Some(&tail) {
                segment.reverse();
                current.extend(segment.into_iter().skip(1));
            } else if segment.last() == Some(&head) {
                segment.extend(current.into_iter().skip(1));
                current = segment;
            } else {
                segment.reverse();
                segment.extend(current.into_iter().skip(1));
                current = segment;
            }
        }

        if current.first() == current.last()
            && let Some(ring) = closed_ring(current)
        {
            rings.push(ring);
        }
    }

    rings
}

/// Fetches building footprints from an Overpass API endpoint.
pub struct OverpassSource {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl OverpassSource {
    /// Creates a client for `endpoint` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildingError::Http`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, BuildingError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bysykkel/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
            retry,
        })
    }

    async fn attempt(&self, query: &str) -> Result<Vec<BuildingFootprint>, AttemptError> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("data", query)])
            .send()
            .await
            .map_err(|e| AttemptError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::from_status(status));
        }

        let text = response
            .text()
            .await
            .map_err(|e| AttemptError::from_reqwest(&e))?;

        // Overpass answers rate limiting and server timeouts with a 200
        // and a non-JSON body.
        parse_response(&text).map_err(|e| {
            let preview: String = text.chars().take(200).collect();
            AttemptError::Transient(format!("undecodable response ({e}): {preview}"))
        })
    }
}

impl BuildingSource for OverpassSource {
    async fn fetch(&self, bbox: BoundingBox) -> Result<Vec<BuildingFootprint>, BuildingError> {
        let query = build_query(&bbox, self.timeout);
        log::info!("Querying {} for buildings in {bbox}", self.endpoint);
        log::debug!("Overpass query:\n{query}");

        let footprints = with_retry(self.name(), &self.retry, |_| self.attempt(&query)).await?;

        log::info!("Overpass returned {} building footprints", footprints.len());
        Ok(footprints)
    }

    fn name(&self) -> &str {
        "overpass"
    }
}

/// Reads a previously saved Overpass JSON response instead of querying
/// the network. The bounding box is ignored.
pub struct SavedResponseSource {
    path: PathBuf,
}

impl SavedResponseSource {
    /// Creates a source reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BuildingSource for SavedResponseSource {
    async fn fetch(&self, _bbox: BoundingBox) -> Result<Vec<BuildingFootprint>, BuildingError> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            BuildingError::DataSourceUnavailable {
                service: self.name().to_string(),
                attempts: 1,
                message: format!("{}: {e}", self.path.display()),
            }
        })?;
        log::info!("Reading saved building response {}", self.path.display());
        parse_response(&text)
    }

    fn name(&self) -> &str {
        "saved overpass response"
    }
}

#[cfg(test)]
mod tests {
    use geo::Area as _;

    use super::*;

    const RESPONSE: &str = r#"{
        "version": 0.6,
        "elements": [
            {
                "type": "way",
                "id": 101,
                "tags": {"building": "apartments"},
                "geometry": [
                    {"lat": 59.910, "lon": 10.750},
                    {"lat": 59.910, "lon": 10.751},
                    {"lat": 59.911, "lon": 10.751},
                    {"lat": 59.911, "lon": 10.750},
                    {"lat": 59.910, "lon": 10.750}
                ]
            },
            {
                "type": "way",
                "id": 102,
                "tags": {"building": "yes"},
                "geometry": [
                    {"lat": 59.920, "lon": 10.760},
                    {"lat": 59.920, "lon": 10.761},
                    {"lat": 59.921, "lon": 10.761}
                ]
            },
            {
                "type": "way",
                "id": 103,
                "tags": {},
                "geometry": [{"lat": 59.92, "lon": 10.76}, {"lat": 59.93, "lon": 10.76}]
            },
            {
                "type": "relation",
                "id": 201,
                "tags": {"building": "school", "type": "multipolygon"},
                "members": [
                    {"type": "way", "ref": 1, "role": "outer", "geometry": [
                        {"lat": 0.0, "lon": 0.0}, {"lat": 0.0, "lon": 10.0}, {"lat": 10.0, "lon": 10.0}
                    ]},
                    {"type": "way", "ref": 2, "role": "outer", "geometry": [
                        {"lat": 0.0, "lon": 0.0}, {"lat": 10.0, "lon": 0.0}, {"lat": 10.0, "lon": 10.0}
                    ]},
                    {"type": "way", "ref": 3, "role": "inner", "geometry": [
                        {"lat": 4.0, "lon": 4.0}, {"lat": 4.0, "lon": 6.0}, {"lat": 6.0, "lon": 6.0},
                        {"lat": 6.0, "lon": 4.0}, {"lat": 4.0, "lon": 4.0}
                    ]},
                    {"type": "node", "ref": 9, "role": "entrance"}
                ]
            }
        ]
    }"#;

    #[test]
    fn decodes_ways_and_relations() {
        let footprints = parse_response(RESPONSE).unwrap();
        let ids: Vec<i64> = footprints.iter().map(|f| f.source_id).collect();
        assert_eq!(ids, vec![101, 102, 201]);

        assert_eq!(footprints[0].kind, "apartments");
        assert_eq!(footprints[1].kind, "unclassified");
        assert_eq!(footprints[2].kind, "school");

        // Open way is closed automatically.
        let ring = footprints[1].geometry.0[0].exterior();
        assert_eq!(ring.0.first(), ring.0.last());
    }

    #[test]
    fn stitches_relation_outers_and_keeps_holes() {
        let footprints = parse_response(RESPONSE).unwrap();
        let school = &footprints[2].geometry;
        assert_eq!(school.0.len(), 1);
        assert_eq!(school.0[0].interiors().len(), 1);
        assert!((school.unsigned_area() - 96.0).abs() < 1e-9);
    }

    #[test]
    fn empty_response_has_no_buildings() {
        assert!(parse_response(r#"{"elements": []}"#).unwrap().is_empty());
        assert!(parse_response("{}").unwrap().is_empty());
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_response("<html>rate limited</html>"),
            Err(BuildingError::Json(_))
        ));
    }

    #[test]
    fn query_targets_bbox_in_overpass_order() {
        let bbox = BoundingBox {
            south: 59.9,
            west: 10.7,
            north: 59.95,
            east: 10.8,
        };
        let query = build_query(&bbox, Duration::from_secs(60));
        assert!(query.starts_with("[out:json][timeout:60];"));
        assert!(query.contains("way[\"building\"](59.9,10.7,59.95,10.8);"));
        assert!(query.contains("relation[\"building\"](59.9,10.7,59.95,10.8);"));
        assert!(query.ends_with("out geom tags;"));
    }

    #[tokio::test]
    async fn missing_saved_response_is_unavailable() {
        let source = SavedResponseSource::new("/nonexistent/overpass.json");
        let bbox = BoundingBox {
            south: 0.0,
            west: 0.0,
            north: 1.0,
            east: 1.0,
        };
        assert!(matches!(
            source.fetch(bbox).await,
            Err(BuildingError::DataSourceUnavailable { .. })
        ));
    }
}
