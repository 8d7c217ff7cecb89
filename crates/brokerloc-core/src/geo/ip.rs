//! IP geolocation with sequential provider fallback.
//!
//! Free-tier lookup services are rate limited and go down often, so the
//! client walks an ordered provider list one at a time and returns the first
//! success. Providers are never raced: each extra request counts against a
//! daily quota.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::api::{ApiError, HttpClient};
use crate::models::IpLocationData;

const IPAPI_CO_URL: &str = "https://ipapi.co/json/";
const IPINFO_IO_URL: &str = "https://ipinfo.io/json";
const IP_API_COM_URL: &str = "http://ip-api.com/json/";

/// One IP-to-location service.
#[async_trait]
pub trait IpLocationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn lookup(&self) -> Result<IpLocationData>;
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    non_empty(value).ok_or_else(|| anyhow!(ApiError::InvalidResponse(format!("missing {}", field))))
}

// ============================================================================
// ipapi.co
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IpApiCoResponse {
    #[serde(default)]
    error: bool,
    reason: Option<String>,
    country_name: Option<String>,
    country_code: Option<String>,
    city: Option<String>,
    region: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    timezone: Option<String>,
}

impl IpApiCoResponse {
    pub fn into_location(self) -> Result<IpLocationData> {
        if self.error {
            let reason = self.reason.unwrap_or_else(|| "API error".to_string());
            return Err(ApiError::Rejected(reason).into());
        }
        Ok(IpLocationData {
            country: required(self.country_name, "country_name")?,
            country_code: required(self.country_code, "country_code")?,
            city: non_empty(self.city),
            region: non_empty(self.region),
            latitude: self.latitude,
            longitude: self.longitude,
            timezone: non_empty(self.timezone),
        })
    }
}

/// Primary provider (free tier: 1000 requests/day).
pub struct IpApiCo {
    http: HttpClient,
    url: String,
}

impl IpApiCo {
    pub fn new(http: HttpClient) -> Self {
        Self { http, url: IPAPI_CO_URL.to_string() }
    }

    /// Point at a different endpoint (self-hosted mirror or test server).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl IpLocationProvider for IpApiCo {
    fn name(&self) -> &str {
        "ipapi.co"
    }

    async fn lookup(&self) -> Result<IpLocationData> {
        let response: IpApiCoResponse = self.http.get_json(&self.url).await?;
        response.into_location()
    }
}

// ============================================================================
// ipinfo.io
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IpInfoResponse {
    #[serde(default)]
    bogon: bool,
    /// Two-letter code; ipinfo does not return a country name.
    country: Option<String>,
    city: Option<String>,
    region: Option<String>,
    /// "lat,lng"
    loc: Option<String>,
    timezone: Option<String>,
}

fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lng) = loc.split_once(',')?;
    Some((lat.trim().parse().ok()?, lng.trim().parse().ok()?))
}

impl IpInfoResponse {
    pub fn into_location(self) -> Result<IpLocationData> {
        if self.bogon {
            return Err(ApiError::Rejected("Private IP address".to_string()).into());
        }
        let code = required(self.country, "country")?;
        let coords = self.loc.as_deref().and_then(parse_loc);
        Ok(IpLocationData {
            country: code.clone(),
            country_code: code,
            city: non_empty(self.city),
            region: non_empty(self.region),
            latitude: coords.map(|(lat, _)| lat),
            longitude: coords.map(|(_, lng)| lng),
            timezone: non_empty(self.timezone),
        })
    }
}

/// First fallback (free tier: 50,000 requests/month).
pub struct IpInfoIo {
    http: HttpClient,
    url: String,
}

impl IpInfoIo {
    pub fn new(http: HttpClient) -> Self {
        Self { http, url: IPINFO_IO_URL.to_string() }
    }

    /// Point at a different endpoint (self-hosted mirror or test server).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl IpLocationProvider for IpInfoIo {
    fn name(&self) -> &str {
        "ipinfo.io"
    }

    async fn lookup(&self) -> Result<IpLocationData> {
        let response: IpInfoResponse = self.http.get_json(&self.url).await?;
        response.into_location()
    }
}

// ============================================================================
// ip-api.com
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IpApiComResponse {
    status: Option<String>,
    message: Option<String>,
    country: Option<String>,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    city: Option<String>,
    #[serde(rename = "regionName")]
    region_name: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    timezone: Option<String>,
}

impl IpApiComResponse {
    pub fn into_location(self) -> Result<IpLocationData> {
        if self.status.as_deref() == Some("fail") {
            let message = self.message.unwrap_or_else(|| "API error".to_string());
            return Err(ApiError::Rejected(message).into());
        }
        Ok(IpLocationData {
            country: required(self.country, "country")?,
            country_code: required(self.country_code, "countryCode")?,
            city: non_empty(self.city),
            region: non_empty(self.region_name),
            latitude: self.lat,
            longitude: self.lon,
            timezone: non_empty(self.timezone),
        })
    }
}

/// Last fallback (free tier: 1000 requests/hour, plain HTTP only).
pub struct IpApiCom {
    http: HttpClient,
    url: String,
}

impl IpApiCom {
    pub fn new(http: HttpClient) -> Self {
        Self { http, url: IP_API_COM_URL.to_string() }
    }

    /// Point at a different endpoint (self-hosted mirror or test server).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl IpLocationProvider for IpApiCom {
    fn name(&self) -> &str {
        "ip-api.com"
    }

    async fn lookup(&self) -> Result<IpLocationData> {
        let response: IpApiComResponse = self.http.get_json(&self.url).await?;
        response.into_location()
    }
}

// ============================================================================
// Client
// ============================================================================

/// Ordered chain of IP providers.
pub struct IpGeolocationClient {
    providers: Vec<Box<dyn IpLocationProvider>>,
}

impl IpGeolocationClient {
    /// The standard chain: ipapi.co, then ipinfo.io, then ip-api.com.
    pub fn new(http: HttpClient) -> Self {
        Self::with_providers(vec![
            Box::new(IpApiCo::new(http.clone())),
            Box::new(IpInfoIo::new(http.clone())),
            Box::new(IpApiCom::new(http)),
        ])
    }

    pub fn with_providers(providers: Vec<Box<dyn IpLocationProvider>>) -> Self {
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Try each provider in order. Never fails; `None` means every provider did.
    pub async fn locate(&self) -> Option<IpLocationData> {
        for provider in &self.providers {
            match provider.lookup().await {
                Ok(location) => {
                    info!(
                        provider = provider.name(),
                        country = %location.country_code,
                        "IP geolocation successful"
                    );
                    return Some(location);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "IP geolocation service failed");
                }
            }
        }
        error!("All IP geolocation services failed");
        None
    }
}
