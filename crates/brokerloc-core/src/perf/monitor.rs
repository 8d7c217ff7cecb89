use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricName {
    Lcp,
    Inp,
    Cls,
    Fcp,
    Ttfb,
}

impl MetricName {
    pub const ALL: [MetricName; 5] = [
        MetricName::Lcp,
        MetricName::Inp,
        MetricName::Cls,
        MetricName::Fcp,
        MetricName::Ttfb,
    ];

    /// (good, poor) thresholds. Milliseconds, except CLS which is unitless.
    pub fn thresholds(&self) -> (f64, f64) {
        match self {
            MetricName::Lcp => (2500.0, 4000.0),
            MetricName::Inp => (200.0, 500.0),
            MetricName::Cls => (0.1, 0.25),
            MetricName::Fcp => (1800.0, 3000.0),
            MetricName::Ttfb => (800.0, 1800.0),
        }
    }

    pub fn rate(&self, value: f64) -> Rating {
        let (good, poor) = self.thresholds();
        if value <= good {
            Rating::Good
        } else if value <= poor {
            Rating::NeedsImprovement
        } else {
            Rating::Poor
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricName::Lcp => "LCP",
            MetricName::Inp => "INP",
            MetricName::Cls => "CLS",
            MetricName::Fcp => "FCP",
            MetricName::Ttfb => "TTFB",
        };
        f.pad(name)
    }
}

impl FromStr for MetricName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        MetricName::ALL
            .into_iter()
            .find(|m| m.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("Unknown metric: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
    Good,
    NeedsImprovement,
    Poor,
}

impl Rating {
    fn score(&self) -> u32 {
        match self {
            Rating::Good => 100,
            Rating::NeedsImprovement => 50,
            Rating::Poor => 0,
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rating::Good => write!(f, "good"),
            Rating::NeedsImprovement => write!(f, "needs-improvement"),
            Rating::Poor => write!(f, "poor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub name: MetricName,
    pub value: f64,
    pub rating: Rating,
    pub timestamp: DateTime<Utc>,
}

pub type MetricCallback = Box<dyn Fn(&PerformanceMetric) + Send + Sync>;

pub trait PerformanceMonitor: Send + Sync {
    fn start(&self);

    /// Drops every callback; later samples are ignored until the next `start`.
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Rate and keep a sample. `None` when the monitor isn't running.
    fn record(&self, name: MetricName, value: f64) -> Option<PerformanceMetric>;

    /// Callbacks run under the monitor's lock and must not call back into it.
    fn on_metric(&self, callback: MetricCallback);

    fn metrics(&self) -> Vec<PerformanceMetric>;

    fn latest(&self, name: MetricName) -> Option<PerformanceMetric>;

    /// Mean of the latest rating per metric (good 100, needs-improvement 50,
    /// poor 0), rounded. 0 when nothing has been recorded.
    fn score(&self) -> u32;
}

#[derive(Default)]
struct MonitorInner {
    running: bool,
    metrics: Vec<PerformanceMetric>,
    callbacks: Vec<MetricCallback>,
}

#[derive(Default)]
pub struct WebVitalsMonitor {
    inner: Mutex<MonitorInner>,
}

impl WebVitalsMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut MonitorInner) -> R) -> R {
        // A panicking callback must not take monitoring down with it
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl PerformanceMonitor for WebVitalsMonitor {
    fn start(&self) {
        self.with_inner(|inner| inner.running = true);
        debug!("Performance monitoring started");
    }

    fn stop(&self) {
        self.with_inner(|inner| {
            inner.running = false;
            inner.callbacks.clear();
        });
        debug!("Performance monitoring stopped");
    }

    fn is_running(&self) -> bool {
        self.with_inner(|inner| inner.running)
    }

    fn record(&self, name: MetricName, value: f64) -> Option<PerformanceMetric> {
        if !value.is_finite() || value < 0.0 {
            warn!(metric = %name, value, "Ignoring invalid metric value");
            return None;
        }
        self.with_inner(|inner| {
            if !inner.running {
                return None;
            }
            let metric = PerformanceMetric {
                name,
                value,
                rating: name.rate(value),
                timestamp: Utc::now(),
            };
            debug!(metric = %name, value, rating = %metric.rating, "Recorded metric");
            inner.metrics.push(metric.clone());
            for callback in &inner.callbacks {
                callback(&metric);
            }
            Some(metric)
        })
    }

    fn on_metric(&self, callback: MetricCallback) {
        self.with_inner(|inner| inner.callbacks.push(callback));
    }

    fn metrics(&self) -> Vec<PerformanceMetric> {
        self.with_inner(|inner| inner.metrics.clone())
    }

    fn latest(&self, name: MetricName) -> Option<PerformanceMetric> {
        // Later samples win ties on timestamp
        self.with_inner(|inner| inner.metrics.iter().rev().find(|m| m.name == name).cloned())
    }

    fn score(&self) -> u32 {
        let latest: Vec<PerformanceMetric> =
            MetricName::ALL.iter().filter_map(|name| self.latest(*name)).collect();
        if latest.is_empty() {
            return 0;
        }
        let total: u32 = latest.iter().map(|m| m.rating.score()).sum();
        (f64::from(total) / latest.len() as f64).round() as u32
    }
}

/// Monitor that drops everything.
#[derive(Debug, Default)]
pub struct NoopMonitor;

impl PerformanceMonitor for NoopMonitor {
    fn start(&self) {}

    fn stop(&self) {}

    fn is_running(&self) -> bool {
        false
    }

    fn record(&self, _name: MetricName, _value: f64) -> Option<PerformanceMetric> {
        None
    }

    fn on_metric(&self, _callback: MetricCallback) {}

    fn metrics(&self) -> Vec<PerformanceMetric> {
        Vec::new()
    }

    fn latest(&self, _name: MetricName) -> Option<PerformanceMetric> {
        None
    }

    fn score(&self) -> u32 {
        0
    }
}

static GLOBAL_MONITOR: OnceLock<Arc<dyn PerformanceMonitor>> = OnceLock::new();

/// Install the process-wide monitor. Returns false if one was already set
/// (including by an earlier `global()` call).
pub fn install(monitor: Arc<dyn PerformanceMonitor>) -> bool {
    GLOBAL_MONITOR.set(monitor).is_ok()
}

/// The process-wide monitor; a `WebVitalsMonitor` unless `install` ran first.
pub fn global() -> Arc<dyn PerformanceMonitor> {
    GLOBAL_MONITOR
        .get_or_init(|| Arc::new(WebVitalsMonitor::new()))
        .clone()
}
