use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Accuracy reported for IP-based fixes. Deliberately coarse so consumers
/// never mistake a city-level guess for a device fix.
pub const IP_ACCURACY_METERS: f64 = 50_000.0;

/// Current time at millisecond precision, matching the stored format.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// How a location was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Gps,
    Ip,
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationSource::Gps => write!(f, "gps"),
            LocationSource::Ip => write!(f, "ip"),
        }
    }
}

/// A resolved location.
///
/// Serialized with camelCase keys and an epoch-millisecond timestamp, which is
/// the format the web front end keeps under the storage key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LocationData {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(rename = "countryCode", default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub timestamp: DateTime<Utc>,
    pub source: LocationSource,
}

impl LocationData {
    /// Build a device-sourced location. A zero accuracy means the device did
    /// not report one.
    pub fn from_gps(position: &DevicePosition, place: PlaceDetails) -> Self {
        Self {
            latitude: position.latitude,
            longitude: position.longitude,
            country: place.country,
            country_code: place.country_code,
            city: place.city,
            region: place.region,
            accuracy: position.accuracy.filter(|a| *a > 0.0),
            timestamp: now_millis(),
            source: LocationSource::Gps,
        }
    }

    /// Build an IP-sourced location. Missing coordinates fall back to 0,0.
    pub fn from_ip(ip: IpLocationData) -> Self {
        Self {
            latitude: ip.latitude.unwrap_or(0.0),
            longitude: ip.longitude.unwrap_or(0.0),
            country: Some(ip.country),
            country_code: Some(ip.country_code),
            city: ip.city,
            region: ip.region,
            accuracy: Some(IP_ACCURACY_METERS),
            timestamp: now_millis(),
            source: LocationSource::Ip,
        }
    }

    /// Whether the fields agree with how the location was obtained: IP fixes
    /// carry exactly the sentinel accuracy, device fixes a positive one or
    /// none, and coordinates are in range.
    pub fn is_consistent(&self) -> bool {
        let accuracy_ok = match self.source {
            LocationSource::Ip => self.accuracy == Some(IP_ACCURACY_METERS),
            LocationSource::Gps => self.accuracy.map_or(true, |a| a.is_finite() && a > 0.0),
        };
        accuracy_ok
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// "City, Region, Country" using whichever parts are known.
    pub fn place_display(&self) -> String {
        let parts: Vec<&str> = [&self.city, &self.region, &self.country]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            format!("{:.4}, {:.4}", self.latitude, self.longitude)
        } else {
            parts.join(", ")
        }
    }
}

/// Normalized output of an IP geolocation provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct IpLocationData {
    pub country: String,
    #[serde(rename = "countryCode")]
    pub country_code: String,
    pub city: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
}

/// Place names from reverse geocoding. Every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceDetails {
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
}

/// A fix reported by the device locator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DevicePosition {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

/// Device geolocation failures, numbered like the platform error codes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionError {
    #[error("User denied the request for geolocation")]
    PermissionDenied,

    #[error("Location information is unavailable")]
    PositionUnavailable,

    #[error("The request to get user location timed out")]
    Timeout,
}

impl PositionError {
    pub fn code(&self) -> i32 {
        match self {
            PositionError::PermissionDenied => LocationError::PERMISSION_DENIED,
            PositionError::PositionUnavailable => LocationError::POSITION_UNAVAILABLE,
            PositionError::Timeout => LocationError::TIMEOUT,
        }
    }
}

/// Error state surfaced to consumers.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[error("{message} (code {code})")]
pub struct LocationError {
    pub code: i32,
    pub message: String,
}

impl LocationError {
    pub const PERMISSION_DENIED: i32 = 1;
    pub const POSITION_UNAVAILABLE: i32 = 2;
    pub const TIMEOUT: i32 = 3;
    /// Every strategy (device and all IP providers) failed.
    pub const EXHAUSTED: i32 = -3;

    pub fn exhausted() -> Self {
        Self {
            code: Self::EXHAUSTED,
            message: "Unable to detect location. Please check your connection and try again."
                .to_string(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.code == Self::EXHAUSTED
    }
}

impl From<PositionError> for LocationError {
    fn from(err: PositionError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}
