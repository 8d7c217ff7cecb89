//! Location sources.
//!
//! - `ip`: approximate location from the caller's IP via third-party services
//! - `device`: device fixes (permission-gated, may be unavailable)
//! - `reverse`: coordinates to place names, best-effort
//! - `country`: country-name to ISO code table

pub mod country;
pub mod device;
pub mod ip;
pub mod reverse;

pub use country::country_code;
pub use device::{DeviceLocator, FixedLocator, NoDeviceLocator, PermissionState, PositionOptions};
pub use ip::{IpApiCo, IpApiCom, IpGeolocationClient, IpInfoIo, IpLocationProvider};
pub use reverse::{BigDataCloudGeocoder, ReverseGeocoder};
