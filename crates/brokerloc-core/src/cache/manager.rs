use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use tracing::{debug, warn};

use super::KeyValueStore;
use crate::models::LocationData;

/// Storage key shared with the web front end.
pub const LOCATION_STORAGE_KEY: &str = "broker_analysis_user_location";

/// Consider a cached location stale after 30 minutes.
pub const LOCATION_CACHE_TTL_MINUTES: i64 = 30;

/// The single cached location entry. The resolver is its only writer.
#[derive(Clone)]
pub struct LocationCache {
    store: Arc<dyn KeyValueStore>,
    key: String,
    ttl: Duration,
}

impl LocationCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            key: LOCATION_STORAGE_KEY.to_string(),
            ttl: Duration::minutes(LOCATION_CACHE_TTL_MINUTES),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entries from the future (clock skew) count as fresh.
    pub fn is_fresh(&self, location: &LocationData) -> bool {
        Utc::now() - location.timestamp < self.ttl
    }

    /// Load the cached location if it is younger than the TTL. Stale,
    /// unparseable and inconsistent entries are removed and reported as absent.
    pub fn load(&self) -> Option<LocationData> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read cached location");
                return None;
            }
        };

        match serde_json::from_str::<LocationData>(&raw) {
            Ok(location) if !location.is_consistent() => {
                warn!(key = %self.key, source = %location.source, accuracy = ?location.accuracy,
                    "Discarding inconsistent cached location");
                self.discard();
                None
            }
            Ok(location) if self.is_fresh(&location) => {
                debug!(key = %self.key, source = %location.source, "Using cached location");
                Some(location)
            }
            Ok(location) => {
                debug!(key = %self.key, freshness = %self.freshness_display(&location), "Cached location expired");
                self.discard();
                None
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Discarding malformed cached location");
                self.discard();
                None
            }
        }
    }

    /// Age of an entry relative to the TTL ("12m old, expires in 18m",
    /// "expired 5m ago").
    pub fn freshness_display(&self, location: &LocationData) -> String {
        let age = (Utc::now() - location.timestamp).num_minutes().max(0);
        let left = self.ttl.num_minutes() - age;
        if left <= 0 {
            format!("expired {}m ago", -left)
        } else if age == 0 {
            format!("just now, expires in {}m", left)
        } else {
            format!("{}m old, expires in {}m", age, left)
        }
    }

    pub fn save(&self, location: &LocationData) -> Result<()> {
        let contents = serde_json::to_string(location).context("Failed to serialize location")?;
        self.store.set(&self.key, &contents)
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(&self.key)
    }

    fn discard(&self) {
        if let Err(e) = self.clear() {
            warn!(key = %self.key, error = %e, "Failed to remove cached location");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
