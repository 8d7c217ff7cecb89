//! Web Vitals performance monitoring.
//!
//! `PerformanceMonitor` is the seam; `WebVitalsMonitor` is the real
//! implementation and `NoopMonitor` the stand-in for tests. The process-wide
//! instance lives behind `global()` and must be started explicitly.

pub mod monitor;

pub use monitor::{
    global, install, MetricCallback, MetricName, NoopMonitor, PerformanceMetric, PerformanceMonitor, Rating, WebVitalsMonitor,
};
