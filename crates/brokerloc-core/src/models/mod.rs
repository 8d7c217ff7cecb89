//! Data models shared across brokerloc.
//!
//! - `LocationData`, `LocationSource`, `LocationError`: resolved location state
//! - `IpLocationData`, `PlaceDetails`, `DevicePosition`: provider outputs
//! - `BrokerRecord`: canonical broker listing, normalized once at the data boundary

pub mod broker;
pub mod location;

pub use broker::{BrokerRecord, BrokerSortColumn, RawBrokerRecord};
pub use location::{
    DevicePosition, IpLocationData, LocationData, LocationError, LocationSource, PlaceDetails,
    PositionError, IP_ACCURACY_METERS,
};
