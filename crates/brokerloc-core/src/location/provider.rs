//! Scopes a `LocationResolver` to one consumer lifetime.
//!
//! Mounting restores the cache, syncs permission and optionally kicks off a
//! single auto-detect request. Dropping the provider cancels its token, so any
//! request it started stops before committing state.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{LocationResolver, LocationState, RequestOutcome};

#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderOptions {
    /// Request a location on mount when nothing is known yet.
    pub auto_detect: bool,
    /// Ignore any cached location on mount. The cache is still written by
    /// the next successful request.
    pub skip_restore: bool,
}

pub struct LocationProvider {
    resolver: Arc<LocationResolver>,
    token: CancellationToken,
    auto_detect_task: Option<JoinHandle<RequestOutcome>>,
}

impl LocationProvider {
    pub async fn mount(resolver: Arc<LocationResolver>, options: ProviderOptions) -> Self {
        if options.skip_restore {
            debug!("Skipping cached location restore");
        } else {
            resolver.restore();
        }
        resolver.sync_permission().await;

        let token = CancellationToken::new();
        // Ends when the token is cancelled on drop
        let _ = resolver.watch_permission(token.child_token());

        let mut provider = Self {
            resolver,
            token,
            auto_detect_task: None,
        };
        if options.auto_detect {
            provider.auto_detect_task = provider.auto_detect_location();
        }
        provider
    }

    /// Start a background request unless a location, an error or a running
    /// request already exists.
    pub fn auto_detect_location(&self) -> Option<JoinHandle<RequestOutcome>> {
        let state = self.resolver.state();
        if state.location.is_some() || state.error.is_some() || state.loading || self.resolver.is_in_flight() {
            debug!("Skipping auto-detect, location state already populated");
            return None;
        }
        let resolver = Arc::clone(&self.resolver);
        let token = self.token.clone();
        Some(tokio::spawn(async move { resolver.request_location(&token).await }))
    }

    /// Wait for the mount-time auto-detect request, if one was started.
    pub async fn auto_detect_finished(&mut self) -> Option<RequestOutcome> {
        let task = self.auto_detect_task.take()?;
        task.await.ok()
    }

    pub async fn request_location(&self) -> RequestOutcome {
        self.resolver.request_location(&self.token).await
    }

    pub fn clear_location(&self) {
        self.resolver.clear_location();
    }

    pub fn state(&self) -> LocationState {
        self.resolver.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<LocationState> {
        self.resolver.subscribe()
    }

    pub fn has_permission(&self) -> bool {
        self.resolver.has_permission()
    }

    pub fn resolver(&self) -> &Arc<LocationResolver> {
        &self.resolver
    }
}

impl Drop for LocationProvider {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use tokio::sync::Notify;

    use crate::cache::{KeyValueStore, MemoryStore, LOCATION_STORAGE_KEY};
    use crate::geo::ip::tests::austin;
    use crate::geo::{FixedLocator, NoDeviceLocator};
    use crate::location::resolver::tests::{ip_chain, resolver, united_kingdom, ScriptedDevice};
    use crate::models::{LocationError, LocationSource};

    #[tokio::test]
    async fn test_auto_detect_on_mount() {
        let (ip, _) = ip_chain(Some(austin()));
        let r = Arc::new(resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip, Arc::new(MemoryStore::new())));

        let mut provider = LocationProvider::mount(r, ProviderOptions { auto_detect: true, ..ProviderOptions::default() }).await;

        assert_eq!(
            provider.auto_detect_finished().await,
            Some(RequestOutcome::Resolved(LocationSource::Ip))
        );
        assert_eq!(provider.state().location.unwrap().country.as_deref(), Some("US"));
    }

    #[tokio::test]
    async fn test_no_auto_detect_when_disabled() {
        let (ip, counts) = ip_chain(Some(austin()));
        let r = Arc::new(resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip, Arc::new(MemoryStore::new())));

        let mut provider = LocationProvider::mount(r, ProviderOptions::default()).await;

        assert_eq!(provider.auto_detect_finished().await, None);
        assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 0));
    }

    #[tokio::test]
    async fn test_auto_detect_skipped_with_cached_location() {
        let store = Arc::new(MemoryStore::new());
        let (ip, counts) = ip_chain(Some(austin()));
        {
            let seed = resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip_chain(Some(austin())).0, store.clone());
            seed.request_location(&CancellationToken::new()).await;
        }
        let r = Arc::new(resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip, store));

        let mut provider = LocationProvider::mount(r, ProviderOptions { auto_detect: true, ..ProviderOptions::default() }).await;

        assert_eq!(provider.auto_detect_finished().await, None);
        assert!(provider.state().location.is_some());
        assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 0));
    }

    #[tokio::test]
    async fn test_skip_restore_resolves_fresh() {
        let store = Arc::new(MemoryStore::new());
        {
            let seed = resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip_chain(Some(austin())).0, store.clone());
            seed.request_location(&CancellationToken::new()).await;
        }
        let (ip, counts) = ip_chain(Some(austin()));
        let r = Arc::new(resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip, store.clone()));

        let mut provider = LocationProvider::mount(
            r,
            ProviderOptions { auto_detect: true, skip_restore: true },
        )
        .await;

        assert_eq!(
            provider.auto_detect_finished().await,
            Some(RequestOutcome::Resolved(LocationSource::Ip))
        );
        assert_eq!(counts[2].load(Ordering::SeqCst), 1);
        assert!(store.get(LOCATION_STORAGE_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_auto_detect_skipped_after_error() {
        let (ip, _) = ip_chain(None);
        let r = Arc::new(resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip, Arc::new(MemoryStore::new())));
        let provider = LocationProvider::mount(r, ProviderOptions::default()).await;

        let outcome = provider.request_location().await;
        assert!(matches!(outcome, RequestOutcome::Failed(ref e) if e.code == LocationError::EXHAUSTED));
        assert!(provider.auto_detect_location().is_none());
    }

    #[tokio::test]
    async fn test_mount_syncs_permission() {
        let locator = Arc::new(FixedLocator::parse("51.5,-0.12,15").unwrap());
        let (ip, _) = ip_chain(None);
        let r = Arc::new(resolver(locator, united_kingdom(), ip, Arc::new(MemoryStore::new())));

        let provider = LocationProvider::mount(r, ProviderOptions::default()).await;
        assert!(provider.has_permission());

        assert_eq!(
            provider.request_location().await,
            RequestOutcome::Resolved(LocationSource::Gps)
        );
        assert_eq!(provider.state().location.unwrap().accuracy, Some(15.0));
    }

    #[tokio::test]
    async fn test_unmount_cancels_in_flight_request() {
        let gate = Arc::new(Notify::new());
        let device = Arc::new(ScriptedDevice {
            gate: Some(gate.clone()),
            ..ScriptedDevice::fix(51.5, -0.12, 15.0)
        });
        let (ip, _) = ip_chain(Some(austin()));
        let store = Arc::new(MemoryStore::new());
        let r = Arc::new(resolver(device, united_kingdom(), ip, store.clone()));

        let mut provider = LocationProvider::mount(Arc::clone(&r), ProviderOptions { auto_detect: true, ..ProviderOptions::default() }).await;
        let mut rx = r.subscribe();
        rx.wait_for(|s| s.loading).await.unwrap();
        let task = provider.auto_detect_task.take().unwrap();

        drop(provider);
        gate.notify_one();

        assert_eq!(task.await.unwrap(), RequestOutcome::Cancelled);
        assert_eq!(r.location(), None);
        assert!(!r.is_loading());
        assert_eq!(store.get(LOCATION_STORAGE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_through_provider() {
        let (ip, _) = ip_chain(Some(austin()));
        let store = Arc::new(MemoryStore::new());
        let r = Arc::new(resolver(Arc::new(NoDeviceLocator), united_kingdom(), ip, store.clone()));
        let provider = LocationProvider::mount(r, ProviderOptions::default()).await;

        provider.request_location().await;
        assert!(store.get(LOCATION_STORAGE_KEY).unwrap().is_some());

        provider.clear_location();
        assert_eq!(provider.state().location, None);
        assert_eq!(store.get(LOCATION_STORAGE_KEY).unwrap(), None);
    }
}
