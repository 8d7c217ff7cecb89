//! HTTP plumbing shared by the geolocation providers.
//!
//! `HttpClient` wraps a pooled `reqwest::Client` with a request timeout and
//! maps non-success responses to `ApiError`.

pub mod client;
pub mod error;

pub use client::HttpClient;
pub use error::ApiError;
