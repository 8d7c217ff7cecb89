use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::LocationCache;
use crate::geo::{DeviceLocator, IpGeolocationClient, PositionOptions, ReverseGeocoder};
use crate::models::{LocationData, LocationError, LocationSource, PlaceDetails, PositionError};

/// Everything a consumer renders from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationState {
    pub location: Option<LocationData>,
    pub error: Option<LocationError>,
    pub loading: bool,
    pub has_permission: bool,
}

/// How a `request_location` call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Resolved(LocationSource),
    /// Device and every IP provider failed; also stored in `LocationState::error`.
    Failed(LocationError),
    /// Another request was still running; nothing was started.
    AlreadyInFlight,
    /// The caller's token was cancelled before the result was committed.
    Cancelled,
}

/// Releases the single-flight flag however the request future ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Resolves the user's location: device fix first, IP lookup as fallback,
/// with the result cached for the TTL.
pub struct LocationResolver {
    device: Arc<dyn DeviceLocator>,
    geocoder: Arc<dyn ReverseGeocoder>,
    ip: IpGeolocationClient,
    cache: LocationCache,
    options: PositionOptions,
    state: watch::Sender<LocationState>,
    in_flight: AtomicBool,
}

impl LocationResolver {
    pub fn new(
        device: Arc<dyn DeviceLocator>,
        geocoder: Arc<dyn ReverseGeocoder>,
        ip: IpGeolocationClient,
        cache: LocationCache,
    ) -> Self {
        let (state, _) = watch::channel(LocationState::default());
        Self {
            device,
            geocoder,
            ip,
            cache,
            options: PositionOptions::default(),
            state,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_position_options(mut self, options: PositionOptions) -> Self {
        self.options = options;
        self
    }

    // ===== State =====

    pub fn state(&self) -> LocationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LocationState> {
        self.state.subscribe()
    }

    pub fn location(&self) -> Option<LocationData> {
        self.state.borrow().location.clone()
    }

    pub fn error(&self) -> Option<LocationError> {
        self.state.borrow().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn has_permission(&self) -> bool {
        self.state.borrow().has_permission
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Apply a state update unless the caller has gone away.
    fn commit(&self, cancel: &CancellationToken, update: impl FnOnce(&mut LocationState)) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        self.state.send_modify(update);
        true
    }

    // ===== Mount =====

    /// Adopt a fresh cached location without touching the network.
    pub fn restore(&self) -> Option<LocationData> {
        let cached = self.cache.load()?;
        self.state.send_modify(|s| s.location = Some(cached.clone()));
        Some(cached)
    }

    /// Read the platform permission state, when it can report one.
    pub async fn sync_permission(&self) {
        if let Some(permission) = self.device.permission().await {
            debug!(?permission, "Geolocation permission state");
            self.state.send_modify(|s| s.has_permission = permission.is_granted());
        }
    }

    /// Follow permission changes until `cancel` fires. `None` when the
    /// platform has no change notifications.
    pub fn watch_permission(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut changes = self.device.permission_changes()?;
        let resolver = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let granted = changes.borrow_and_update().is_granted();
                        debug!(granted, "Geolocation permission changed");
                        resolver.state.send_modify(|s| s.has_permission = granted);
                    }
                }
            }
        }))
    }

    // ===== Resolution =====

    /// Resolve the location. Never fails: expected failures end up in the
    /// state's `error` field. Only one request runs at a time; a concurrent
    /// call returns `AlreadyInFlight` immediately.
    pub async fn request_location(&self, cancel: &CancellationToken) -> RequestOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Location request already in flight");
            return RequestOutcome::AlreadyInFlight;
        }
        let _guard = InFlightGuard(&self.in_flight);
        let previous_error = self.state.borrow().error.clone();

        if !self.commit(cancel, |s| {
            s.loading = true;
            s.error = None;
        }) {
            return RequestOutcome::Cancelled;
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => RequestOutcome::Cancelled,
            outcome = self.resolve(cancel) => outcome,
        };

        if outcome == RequestOutcome::Cancelled {
            debug!("Location request cancelled");
            self.state.send_modify(|s| {
                s.loading = false;
                s.error = previous_error;
            });
        }
        outcome
    }

    async fn resolve(&self, cancel: &CancellationToken) -> RequestOutcome {
        if self.device.is_available() {
            match self.device_fix().await {
                Ok(location) => return self.finish(cancel, location),
                Err(e) => {
                    warn!(code = e.code(), error = %e, "Device location failed, trying IP fallback");
                    if !self.commit(cancel, |s| s.has_permission = false) {
                        return RequestOutcome::Cancelled;
                    }
                }
            }
        }

        match self.ip.locate().await {
            Some(ip) => self.finish(cancel, LocationData::from_ip(ip)),
            None => {
                let err = LocationError::exhausted();
                error!(code = err.code, "All location detection methods failed");
                let failed = err.clone();
                if self.commit(cancel, |s| {
                    s.error = Some(failed);
                    s.loading = false;
                }) {
                    RequestOutcome::Failed(err)
                } else {
                    RequestOutcome::Cancelled
                }
            }
        }
    }

    async fn device_fix(&self) -> Result<LocationData, PositionError> {
        let position = tokio::time::timeout(
            self.options.timeout,
            self.device.current_position(&self.options),
        )
        .await
        .map_err(|_| PositionError::Timeout)??;

        let place = match self.geocoder.reverse(position.latitude, position.longitude).await {
            Ok(place) => place,
            Err(e) => {
                warn!(error = %e, "Reverse geocoding failed");
                PlaceDetails::default()
            }
        };

        Ok(LocationData::from_gps(&position, place))
    }

    fn finish(&self, cancel: &CancellationToken, location: LocationData) -> RequestOutcome {
        let source = location.source;
        let committed = location.clone();
        if !self.commit(cancel, |s| {
            s.location = Some(committed);
            s.loading = false;
            if source == LocationSource::Gps {
                s.has_permission = true;
            }
        }) {
            return RequestOutcome::Cancelled;
        }

        if let Err(e) = self.cache.save(&location) {
            warn!(error = %e, "Failed to cache location");
        }
        info!(%source, place = %location.place_display(), "Location resolved");
        RequestOutcome::Resolved(source)
    }

    /// Forget the location and any error, and drop the cache entry.
    pub fn clear_location(&self) {
        self.state.send_modify(|s| {
            s.location = None;
            s.error = None;
        });
        if let Err(e) = self.cache.clear() {
            warn!(error = %e, "Failed to remove cached location");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Notify;

    use crate::cache::{KeyValueStore, MemoryStore, LOCATION_STORAGE_KEY};
    use crate::geo::ip::tests::{austin, ScriptedProvider};
    use crate::geo::{FixedLocator, NoDeviceLocator, PermissionState};
    use crate::models::{DevicePosition, IP_ACCURACY_METERS};

    /// Device locator with a scripted answer and an optional gate to hold
    /// the query open.
    pub(crate) struct ScriptedDevice {
        pub result: Result<DevicePosition, PositionError>,
        pub gate: Option<Arc<Notify>>,
        pub hang: bool,
        pub calls: AtomicUsize,
    }

    impl ScriptedDevice {
        pub fn fix(latitude: f64, longitude: f64, accuracy: f64) -> Self {
            Self {
                result: Ok(DevicePosition { latitude, longitude, accuracy: Some(accuracy) }),
                gate: None,
                hang: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(err: PositionError) -> Self {
            Self { result: Err(err), gate: None, hang: false, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl DeviceLocator for ScriptedDevice {
        fn is_available(&self) -> bool {
            true
        }

        async fn current_position(&self, _options: &PositionOptions) -> Result<DevicePosition, PositionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.result
        }
    }

    pub(crate) struct ScriptedGeocoder(pub Option<PlaceDetails>);

    #[async_trait]
    impl ReverseGeocoder for ScriptedGeocoder {
        async fn reverse(&self, _latitude: f64, _longitude: f64) -> Result<PlaceDetails> {
            self.0.clone().ok_or_else(|| anyhow!("reverse geocode unavailable"))
        }
    }

    pub(crate) fn united_kingdom() -> ScriptedGeocoder {
        ScriptedGeocoder(Some(PlaceDetails {
            country: Some("United Kingdom".to_string()),
            ..PlaceDetails::default()
        }))
    }

    pub(crate) fn ip_chain(third: Option<crate::models::IpLocationData>) -> (IpGeolocationClient, Vec<Arc<AtomicUsize>>) {
        let providers = [
            ScriptedProvider::failing("one"),
            ScriptedProvider::failing("two"),
            match third {
                Some(data) => ScriptedProvider::succeeding("three", data),
                None => ScriptedProvider::failing("three"),
            },
        ];
        let counts = providers.iter().map(|p| p.calls.clone()).collect();
        let boxed = providers
            .into_iter()
            .map(|p| Box::new(p) as Box<dyn crate::geo::IpLocationProvider>)
            .collect();
        (IpGeolocationClient::with_providers(boxed), counts)
    }

    pub(crate) fn resolver(
        device: Arc<dyn DeviceLocator>,
        geocoder: ScriptedGeocoder,
        ip: IpGeolocationClient,
        store: Arc<MemoryStore>,
    ) -> LocationResolver {
        LocationResolver::new(device, Arc::new(geocoder), ip, LocationCache::new(store))
    }

    fn cached_entry(store: &MemoryStore, minutes_old: i64) -> LocationData {
        let pos = DevicePosition { latitude: 48.85, longitude: 2.35, accuracy: Some(20.0) };
        let mut loc = LocationData::from_gps(&pos, PlaceDetails::default());
        loc.timestamp = loc.timestamp - chrono::Duration::minutes(minutes_old);
        store.set(LOCATION_STORAGE_KEY, &serde_json::to_string(&loc).unwrap()).unwrap();
        loc
    }

    #[tokio::test]
    async fn test_restore_uses_fresh_cache_without_network() {
        let store = Arc::new(MemoryStore::new());
        let cached = cached_entry(&store, 10);
        let device = Arc::new(ScriptedDevice::fix(0.0, 0.0, 1.0));
        let (ip, counts) = ip_chain(None);
        let r = resolver(device.clone(), united_kingdom(), ip, store);

        assert_eq!(r.restore(), Some(cached.clone()));
        assert_eq!(r.location(), Some(cached));
        assert_eq!(device.calls.load(Ordering::SeqCst), 0);
        assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 0));
    }

    #[tokio::test]
    async fn test_restore_drops_stale_cache() {
        let store = Arc::new(MemoryStore::new());
        cached_entry(&store, 45);
        let (ip, _) = ip_chain(None);
        let r = resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip, store.clone());

        assert_eq!(r.restore(), None);
        assert_eq!(r.location(), None);
        assert_eq!(store.get(LOCATION_STORAGE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_gps_success_with_reverse_geocode() {
        let store = Arc::new(MemoryStore::new());
        let device = Arc::new(ScriptedDevice::fix(51.5, -0.12, 15.0));
        let (ip, counts) = ip_chain(Some(austin()));
        let r = resolver(device, united_kingdom(), ip, store.clone());

        let outcome = r.request_location(&CancellationToken::new()).await;

        assert_eq!(outcome, RequestOutcome::Resolved(LocationSource::Gps));
        let state = r.state();
        let loc = state.location.unwrap();
        assert_eq!(loc.source, LocationSource::Gps);
        assert_eq!(loc.accuracy, Some(15.0));
        assert_eq!(loc.country.as_deref(), Some("United Kingdom"));
        assert!(state.has_permission);
        assert!(!state.loading);
        assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 0));
        assert!(store.get(LOCATION_STORAGE_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reverse_geocode_failure_still_resolves() {
        let device = Arc::new(ScriptedDevice::fix(51.5, -0.12, 15.0));
        let (ip, _) = ip_chain(None);
        let r = resolver(device, ScriptedGeocoder(None), ip, Arc::new(MemoryStore::new()));

        let outcome = r.request_location(&CancellationToken::new()).await;

        assert_eq!(outcome, RequestOutcome::Resolved(LocationSource::Gps));
        let state = r.state();
        assert!(state.error.is_none());
        let loc = state.location.unwrap();
        assert_eq!(loc.country, None);
        assert_eq!(loc.latitude, 51.5);
    }

    #[tokio::test]
    async fn test_gps_failure_tries_ip_chain_once() {
        for err in [
            PositionError::PermissionDenied,
            PositionError::PositionUnavailable,
            PositionError::Timeout,
        ] {
            let device = Arc::new(ScriptedDevice::failing(err));
            let (ip, counts) = ip_chain(Some(austin()));
            let r = resolver(device, united_kingdom(), ip, Arc::new(MemoryStore::new()));

            let outcome = r.request_location(&CancellationToken::new()).await;

            assert_eq!(outcome, RequestOutcome::Resolved(LocationSource::Ip));
            assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 1));
            assert!(!r.has_permission());
        }
    }

    #[tokio::test]
    async fn test_ip_fallback_scenario() {
        let store = Arc::new(MemoryStore::new());
        let (ip, _) = ip_chain(Some(austin()));
        let r = resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip, store.clone());

        r.request_location(&CancellationToken::new()).await;

        let loc = r.location().unwrap();
        assert_eq!(loc.source, LocationSource::Ip);
        assert_eq!(loc.country.as_deref(), Some("US"));
        assert_eq!(loc.accuracy, Some(IP_ACCURACY_METERS));
        assert_eq!(loc.accuracy, Some(50_000.0));

        let stored: LocationData =
            serde_json::from_str(&store.get(LOCATION_STORAGE_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored, loc);
    }

    #[tokio::test]
    async fn test_all_strategies_exhausted() {
        let device = Arc::new(ScriptedDevice::failing(PositionError::PermissionDenied));
        let (ip, _) = ip_chain(None);
        let store = Arc::new(MemoryStore::new());
        let r = resolver(device, united_kingdom(), ip, store.clone());

        let outcome = r.request_location(&CancellationToken::new()).await;

        let state = r.state();
        assert!(matches!(outcome, RequestOutcome::Failed(ref e) if e.code == -3));
        assert_eq!(state.error.map(|e| e.code), Some(LocationError::EXHAUSTED));
        assert_eq!(state.location, None);
        assert!(!state.loading);
        assert_eq!(store.get(LOCATION_STORAGE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_device_timeout_falls_back_to_ip() {
        let device = Arc::new(ScriptedDevice {
            hang: true,
            ..ScriptedDevice::fix(1.0, 1.0, 1.0)
        });
        let (ip, _) = ip_chain(Some(austin()));
        let r = resolver(device, united_kingdom(), ip, Arc::new(MemoryStore::new()))
            .with_position_options(PositionOptions {
                timeout: Duration::from_millis(20),
                ..PositionOptions::default()
            });

        let outcome = r.request_location(&CancellationToken::new()).await;
        assert_eq!(outcome, RequestOutcome::Resolved(LocationSource::Ip));
    }

    #[tokio::test]
    async fn test_clear_location_resets_everything() {
        let store = Arc::new(MemoryStore::new());
        cached_entry(&store, 1);
        let (ip, _) = ip_chain(None);
        let r = resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip, store.clone());
        r.restore();
        r.request_location(&CancellationToken::new()).await;
        assert!(r.error().is_some());

        r.clear_location();

        let state = r.state();
        assert_eq!(state.location, None);
        assert_eq!(state.error, None);
        assert_eq!(store.get(LOCATION_STORAGE_KEY).unwrap(), None);

        // Clearing from idle is fine too
        r.clear_location();
        assert_eq!(r.state().location, None);
    }

    #[tokio::test]
    async fn test_second_request_while_in_flight_is_rejected() {
        let gate = Arc::new(Notify::new());
        let device = Arc::new(ScriptedDevice {
            gate: Some(gate.clone()),
            ..ScriptedDevice::fix(51.5, -0.12, 15.0)
        });
        let (ip, _) = ip_chain(None);
        let r = Arc::new(resolver(device.clone(), united_kingdom(), ip, Arc::new(MemoryStore::new())));

        let mut rx = r.subscribe();
        let first = {
            let r = Arc::clone(&r);
            tokio::spawn(async move { r.request_location(&CancellationToken::new()).await })
        };
        rx.wait_for(|s| s.loading).await.unwrap();

        assert!(r.is_in_flight());
        assert_eq!(
            r.request_location(&CancellationToken::new()).await,
            RequestOutcome::AlreadyInFlight
        );

        gate.notify_one();
        assert_eq!(first.await.unwrap(), RequestOutcome::Resolved(LocationSource::Gps));
        assert_eq!(device.calls.load(Ordering::SeqCst), 1);
        assert!(!r.is_in_flight());
    }

    #[tokio::test]
    async fn test_cancelled_request_commits_nothing() {
        let gate = Arc::new(Notify::new());
        let device = Arc::new(ScriptedDevice {
            gate: Some(gate.clone()),
            ..ScriptedDevice::fix(51.5, -0.12, 15.0)
        });
        let (ip, _) = ip_chain(Some(austin()));
        let store = Arc::new(MemoryStore::new());
        let r = Arc::new(resolver(device, united_kingdom(), ip, store.clone()));

        let token = CancellationToken::new();
        let mut rx = r.subscribe();
        let task = {
            let r = Arc::clone(&r);
            let token = token.clone();
            tokio::spawn(async move { r.request_location(&token).await })
        };
        rx.wait_for(|s| s.loading).await.unwrap();

        token.cancel();
        assert_eq!(task.await.unwrap(), RequestOutcome::Cancelled);

        let state = r.state();
        assert_eq!(state.location, None);
        assert!(!state.loading);
        assert!(!r.is_in_flight());
        assert_eq!(store.get(LOCATION_STORAGE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancelled_request_keeps_previous_error() {
        let gate = Arc::new(Notify::new());
        let device = Arc::new(ScriptedDevice {
            gate: Some(gate.clone()),
            ..ScriptedDevice::failing(PositionError::PositionUnavailable)
        });
        let (ip, _) = ip_chain(None);
        let r = Arc::new(resolver(device, united_kingdom(), ip, Arc::new(MemoryStore::new())));

        gate.notify_one();
        r.request_location(&CancellationToken::new()).await;
        assert_eq!(r.error().map(|e| e.code), Some(LocationError::EXHAUSTED));

        let token = CancellationToken::new();
        let mut rx = r.subscribe();
        let task = {
            let r = Arc::clone(&r);
            let token = token.clone();
            tokio::spawn(async move { r.request_location(&token).await })
        };
        rx.wait_for(|s| s.loading).await.unwrap();
        assert_eq!(r.error(), None);

        token.cancel();
        assert_eq!(task.await.unwrap(), RequestOutcome::Cancelled);

        let state = r.state();
        assert_eq!(state.error.map(|e| e.code), Some(LocationError::EXHAUSTED));
        assert_eq!(state.location, None);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_does_nothing() {
        let (ip, counts) = ip_chain(Some(austin()));
        let r = resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip, Arc::new(MemoryStore::new()));
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(r.request_location(&token).await, RequestOutcome::Cancelled);
        assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 0));
        assert_eq!(r.state(), LocationState::default());
    }

    #[tokio::test]
    async fn test_permission_sync_and_watch() {
        let locator = Arc::new(FixedLocator::parse("51.5,-0.12").unwrap());
        let (ip, _) = ip_chain(None);
        let r = Arc::new(resolver(locator.clone(), united_kingdom(), ip, Arc::new(MemoryStore::new())));

        r.sync_permission().await;
        assert!(r.has_permission());

        let token = CancellationToken::new();
        let task = r.watch_permission(token.clone()).unwrap();
        let mut rx = r.subscribe();

        locator.set_permission(PermissionState::Denied);
        rx.wait_for(|s| !s.has_permission).await.unwrap();

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_permission_api_leaves_flag_alone() {
        let (ip, _) = ip_chain(None);
        let r = Arc::new(resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip, Arc::new(MemoryStore::new())));
        r.sync_permission().await;
        assert!(!r.has_permission());
        assert!(r.watch_permission(CancellationToken::new()).is_none());
    }

    #[test]
    fn test_timestamp_is_recent() {
        let loc = LocationData::from_ip(austin());
        assert!((Utc::now() - loc.timestamp).num_seconds() < 5);
    }
}
