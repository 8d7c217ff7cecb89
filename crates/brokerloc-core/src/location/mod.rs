//! Location resolution and its consumer-facing provider.
//!
//! `LocationResolver` owns the resolution state machine (cache restore,
//! device fix, IP fallback, permission tracking). `LocationProvider` scopes a
//! resolver to one consumer lifetime and cancels in-flight work when dropped.

pub mod provider;
pub mod resolver;

pub use provider::{LocationProvider, ProviderOptions};
pub use resolver::{LocationResolver, LocationState, RequestOutcome};
