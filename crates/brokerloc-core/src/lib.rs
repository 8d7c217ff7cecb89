//! Core library for brokerloc.
//!
//! Resolves the visitor's location for the broker-comparison site using the
//! best available method (device fix first, IP lookup as fallback), caches
//! the result with a 30 minute time-to-live, and publishes resolution state to
//! consumers. Also hosts the canonical broker record and the Web Vitals
//! performance monitor shared by the front end.

pub mod api;
pub mod cache;
pub mod config;
pub mod geo;
pub mod location;
pub mod models;
pub mod perf;
pub mod search;

pub use cache::{FileStore, KeyValueStore, LocationCache, MemoryStore};
pub use config::Config;
pub use geo::{DeviceLocator, IpGeolocationClient, ReverseGeocoder};
pub use location::{LocationProvider, LocationResolver, LocationState, ProviderOptions, RequestOutcome};
pub use models::{IpLocationData, LocationData, LocationError, LocationSource};
