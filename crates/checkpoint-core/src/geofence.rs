//! Geofence validation: postcode allow-list plus great-circle radius check.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Mean Earth radius used by the haversine formula, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Floating-point slack on the radius comparison, far below GPS precision.
const BOUNDARY_TOLERANCE_METERS: f64 = 1e-3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeofenceError {
    #[error("unknown location")]
    UnknownLocation,
    #[error(
        "{distance_meters:.0} m from {location_id}, \
         {overage_meters} m outside the {radius_meters} m radius"
    )]
    OutOfRange {
        location_id: String,
        distance_meters: f64,
        radius_meters: u32,
        overage_meters: u64,
    },
    #[error("invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
    #[error("invalid location list: {0}")]
    InvalidLocations(String),
}

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Build a point, rejecting latitudes outside [-90, 90] and longitudes outside [-180, 180].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeofenceError> {
        let point = Self { latitude, longitude };
        if !point.is_valid() {
            return Err(GeofenceError::InvalidCoordinates { latitude, longitude });
        }
        Ok(point)
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Great-circle distance in meters.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let h = h.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().atan2((1.0 - h).sqrt())
}

/// A permitted work location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    #[serde(default)]
    pub center: Option<GeoPoint>,
    pub radius_meters: u32,
    pub postcode: String,
}

impl Location {
    fn matches_postcode(&self, postcode: &str) -> bool {
        normalize_postcode(&self.postcode) == normalize_postcode(postcode)
    }
}

/// Uppercase with all whitespace removed, so "sw1a 1aa" and "SW1A1AA" compare equal.
fn normalize_postcode(postcode: &str) -> String {
    postcode
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// The allow-list as stored in TOML (`[[location]]` entries).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationList {
    #[serde(default, rename = "location")]
    pub locations: Vec<Location>,
}

impl LocationList {
    pub fn from_toml_str(src: &str) -> Result<Self, GeofenceError> {
        let list: LocationList =
            toml::from_str(src).map_err(|e| GeofenceError::InvalidLocations(e.to_string()))?;
        for loc in &list.locations {
            if loc.radius_meters == 0 {
                return Err(GeofenceError::InvalidLocations(format!(
                    "location {} has a zero radius",
                    loc.id
                )));
            }
            if let Some(center) = loc.center {
                if !center.is_valid() {
                    return Err(GeofenceError::InvalidLocations(format!(
                        "location {} has an invalid center ({}, {})",
                        loc.id, center.latitude, center.longitude
                    )));
                }
            }
        }
        Ok(list)
    }
}

/// Why a claim was accepted or refused.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeofenceReason {
    /// Within the matched location's radius.
    Within,
    /// Postcode matched; no coordinates to measure against.
    PostcodeMatched,
    UnknownLocation,
    OutOfRange { overage_meters: u64 },
    InvalidCoordinates { latitude: f64, longitude: f64 },
}

impl fmt::Display for GeofenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeofenceReason::Within => f.write_str("within permitted radius"),
            GeofenceReason::PostcodeMatched => f.write_str("postcode matched"),
            GeofenceReason::UnknownLocation => f.write_str("unknown location"),
            GeofenceReason::OutOfRange { overage_meters } => {
                write!(f, "{overage_meters} m outside the permitted radius")
            }
            GeofenceReason::InvalidCoordinates { .. } => f.write_str("invalid coordinates"),
        }
    }
}

/// Outcome of [`check_location`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeofenceResult {
    pub allowed: bool,
    /// Absent when no distance could be measured; never a stand-in zero.
    pub distance_meters: Option<f64>,
    pub location_id: Option<String>,
    pub radius_meters: Option<u32>,
    pub reason: GeofenceReason,
}

impl GeofenceResult {
    fn denied(reason: GeofenceReason) -> Self {
        Self {
            allowed: false,
            distance_meters: None,
            location_id: None,
            radius_meters: None,
            reason,
        }
    }

    /// Convert a refusal into the matching [`GeofenceError`].
    pub fn into_result(self) -> Result<Self, GeofenceError> {
        if self.allowed {
            return Ok(self);
        }
        match &self.reason {
            GeofenceReason::OutOfRange { overage_meters } => Err(GeofenceError::OutOfRange {
                location_id: self.location_id.clone().unwrap_or_default(),
                distance_meters: self.distance_meters.unwrap_or(f64::NAN),
                radius_meters: self.radius_meters.unwrap_or(0),
                overage_meters: *overage_meters,
            }),
            GeofenceReason::InvalidCoordinates {
                latitude,
                longitude,
            } => Err(GeofenceError::InvalidCoordinates {
                latitude: *latitude,
                longitude: *longitude,
            }),
            _ => Err(GeofenceError::UnknownLocation),
        }
    }
}

/// Decide whether a claimed position is inside an allowed location.
///
/// A supplied postcode must match an entry (case and spacing ignored). When the
/// claim carries coordinates and a matching entry has a center, the radius of
/// the nearest such entry is enforced; otherwise the postcode match alone
/// admits the claim. Without a postcode the point is measured against the
/// nearest entry that has a center.
pub fn check_location(
    claimed: Option<GeoPoint>,
    postcode: Option<&str>,
    allowed: &[Location],
) -> GeofenceResult {
    if let Some(point) = claimed {
        if !point.is_valid() {
            return GeofenceResult::denied(GeofenceReason::InvalidCoordinates {
                latitude: point.latitude,
                longitude: point.longitude,
            });
        }
    }

    let postcode = postcode.map(str::trim).filter(|p| !p.is_empty());
    let result = match (postcode, claimed) {
        (Some(code), point) => {
            let matches: Vec<&Location> = allowed
                .iter()
                .filter(|loc| loc.matches_postcode(code))
                .collect();
            match (matches.first(), point.and_then(|p| nearest(matches.iter().copied(), p))) {
                (None, _) => GeofenceResult::denied(GeofenceReason::UnknownLocation),
                (_, Some((loc, center, point))) => measure(loc, center, point),
                (Some(loc), None) => GeofenceResult {
                    allowed: true,
                    distance_meters: None,
                    location_id: Some(loc.id.clone()),
                    radius_meters: Some(loc.radius_meters),
                    reason: GeofenceReason::PostcodeMatched,
                },
            }
        }
        (None, Some(point)) => nearest(allowed.iter(), point)
            .map(|(loc, center, point)| measure(loc, center, point))
            .unwrap_or_else(|| GeofenceResult::denied(GeofenceReason::UnknownLocation)),
        (None, None) => GeofenceResult::denied(GeofenceReason::UnknownLocation),
    };

    tracing::info!(
        allowed = result.allowed,
        location = result.location_id.as_deref().unwrap_or("-"),
        distance_m = ?result.distance_meters,
        reason = %result.reason,
        "geofence checked"
    );
    result
}

/// The entry whose center is closest to `point`, ignoring entries without one.
fn nearest<'a>(
    locations: impl Iterator<Item = &'a Location>,
    point: GeoPoint,
) -> Option<(&'a Location, GeoPoint, GeoPoint)> {
    locations
        .filter_map(|loc| loc.center.map(|c| (loc, c, haversine_distance(c, point))))
        .min_by(|a, b| a.2.total_cmp(&b.2))
        .map(|(loc, center, _)| (loc, center, point))
}

fn measure(loc: &Location, center: GeoPoint, point: GeoPoint) -> GeofenceResult {
    let distance = haversine_distance(center, point);
    let radius = loc.radius_meters as f64;
    let allowed = distance <= radius + BOUNDARY_TOLERANCE_METERS;
    let reason = if allowed {
        GeofenceReason::Within
    } else {
        GeofenceReason::OutOfRange {
            overage_meters: (distance - radius).round().max(1.0) as u64,
        }
    };
    GeofenceResult {
        allowed,
        distance_meters: Some(distance),
        location_id: Some(loc.id.clone()),
        radius_meters: Some(loc.radius_meters),
        reason,
    }
}
