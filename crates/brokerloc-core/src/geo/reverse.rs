//! Reverse geocoding: coordinates to country/city/region.
//!
//! Only used to decorate device fixes. Callers treat any failure as "no
//! place names", never as a failed resolution.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use super::country::lookup as code_for_country;
use crate::api::HttpClient;
use crate::models::PlaceDetails;

const BIGDATACLOUD_URL: &str = "https://api.bigdatacloud.net/data/reverse-geocode-client";

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<PlaceDetails>;
}

#[derive(Debug, Deserialize)]
pub struct BigDataCloudResponse {
    #[serde(rename = "countryName")]
    country_name: Option<String>,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    city: Option<String>,
    locality: Option<String>,
    #[serde(rename = "principalSubdivision")]
    principal_subdivision: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<BigDataCloudResponse> for PlaceDetails {
    fn from(r: BigDataCloudResponse) -> Self {
        let country = non_empty(r.country_name);
        let country_code = non_empty(r.country_code)
            .or_else(|| country.as_deref().and_then(code_for_country).map(str::to_string));
        Self {
            country,
            country_code,
            // Rural points often have no city, only a locality
            city: non_empty(r.city).or_else(|| non_empty(r.locality)),
            region: non_empty(r.principal_subdivision),
        }
    }
}

/// Client-side endpoint of BigDataCloud; no API key needed.
pub struct BigDataCloudGeocoder {
    http: HttpClient,
    base_url: String,
}

impl BigDataCloudGeocoder {
    pub fn new(http: HttpClient) -> Self {
        Self { http, base_url: BIGDATACLOUD_URL.to_string() }
    }

    fn url(&self, latitude: f64, longitude: f64) -> String {
        format!(
            "{}?latitude={}&longitude={}&localityLanguage=en",
            self.base_url, latitude, longitude
        )
    }
}

#[async_trait]
impl ReverseGeocoder for BigDataCloudGeocoder {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<PlaceDetails> {
        let response: BigDataCloudResponse = self.http.get_json(&self.url(latitude, longitude)).await?;
        Ok(response.into())
    }
}
