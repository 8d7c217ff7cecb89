//! Device geolocation.
//!
//! `DeviceLocator` is the seam for whatever can produce a real fix: a
//! browser bridge, an OS location service, or a fixed position supplied by
//! configuration. Permission state is reported separately and may change
//! while the resolver is alive.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::models::{DevicePosition, PositionError};

/// Upper bound on a single device query.
pub const POSITION_TIMEOUT: Duration = Duration::from_secs(10);

/// Oldest OS-cached fix the device may hand back instead of a fresh one.
pub const POSITION_MAXIMUM_AGE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: POSITION_TIMEOUT,
            maximum_age: POSITION_MAXIMUM_AGE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    Granted,
    Denied,
    #[default]
    Prompt,
}

impl PermissionState {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionState::Granted)
    }
}

#[async_trait]
pub trait DeviceLocator: Send + Sync {
    /// Whether this platform can produce a device fix at all.
    fn is_available(&self) -> bool;

    async fn current_position(&self, options: &PositionOptions) -> Result<DevicePosition, PositionError>;

    /// Current permission state, or `None` when the platform can't say.
    async fn permission(&self) -> Option<PermissionState> {
        None
    }

    /// Change notifications for the permission state, when supported.
    fn permission_changes(&self) -> Option<watch::Receiver<PermissionState>> {
        None
    }
}

/// Platform without device geolocation. Resolution goes straight to IP lookup.
#[derive(Debug, Default)]
pub struct NoDeviceLocator;

#[async_trait]
impl DeviceLocator for NoDeviceLocator {
    fn is_available(&self) -> bool {
        false
    }

    async fn current_position(&self, _options: &PositionOptions) -> Result<DevicePosition, PositionError> {
        Err(PositionError::PositionUnavailable)
    }
}

/// Reports a fixed, pre-approved position (e.g. coordinates from config).
#[derive(Debug)]
pub struct FixedLocator {
    position: DevicePosition,
    permission: watch::Sender<PermissionState>,
}

impl FixedLocator {
    pub fn new(position: DevicePosition) -> Self {
        let (permission, _) = watch::channel(PermissionState::Granted);
        Self { position, permission }
    }

    /// Parse "lat,lng" or "lat,lng,accuracy".
    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let parts: Vec<&str> = input.split(',').map(str::trim).collect();
        let number = |s: &str| -> anyhow::Result<f64> {
            s.parse::<f64>()
                .map_err(|_| anyhow::anyhow!("Invalid coordinate '{}' in '{}'", s, input))
        };
        let (latitude, longitude, accuracy) = match parts.as_slice() {
            [lat, lng] => (number(lat)?, number(lng)?, None),
            [lat, lng, acc] => (number(lat)?, number(lng)?, Some(number(acc)?)),
            _ => anyhow::bail!("Expected 'lat,lng[,accuracy]', got '{}'", input),
        };
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            anyhow::bail!("Coordinates out of range: {}", input);
        }
        Ok(Self::new(DevicePosition { latitude, longitude, accuracy }))
    }

    /// Revoke or restore permission; watchers are notified.
    pub fn set_permission(&self, state: PermissionState) {
        self.permission.send_replace(state);
    }
}

#[async_trait]
impl DeviceLocator for FixedLocator {
    fn is_available(&self) -> bool {
        true
    }

    async fn current_position(&self, _options: &PositionOptions) -> Result<DevicePosition, PositionError> {
        match *self.permission.borrow() {
            PermissionState::Denied => Err(PositionError::PermissionDenied),
            _ => Ok(self.position),
        }
    }

    async fn permission(&self) -> Option<PermissionState> {
        Some(*self.permission.borrow())
    }

    fn permission_changes(&self) -> Option<watch::Receiver<PermissionState>> {
        Some(self.permission.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = PositionOptions::default();
        assert!(opts.enable_high_accuracy);
        assert_eq!(opts.timeout, Duration::from_millis(10_000));
        assert_eq!(opts.maximum_age, Duration::from_millis(300_000));
    }

    #[test]
    fn test_parse_coords() {
        let locator = FixedLocator::parse("51.5, -0.12, 15").unwrap();
        assert_eq!(locator.position.accuracy, Some(15.0));
        assert!(FixedLocator::parse("51.5").is_err());
        assert!(FixedLocator::parse("95,0").is_err());
        assert!(FixedLocator::parse("abc,1").is_err());
    }

    #[tokio::test]
    async fn test_fixed_locator_respects_denied_permission() {
        let locator = FixedLocator::parse("1,2").unwrap();
        let mut changes = locator.permission_changes().unwrap();
        locator.set_permission(PermissionState::Denied);

        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), PermissionState::Denied);
        let err = locator.current_position(&PositionOptions::default()).await.unwrap_err();
        assert_eq!(err, PositionError::PermissionDenied);
    }

    #[tokio::test]
    async fn test_no_device_locator() {
        let locator = NoDeviceLocator;
        assert!(!locator.is_available());
        assert_eq!(locator.permission().await, None);
    }
}
