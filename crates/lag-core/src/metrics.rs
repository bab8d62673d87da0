//! Self-observability counters and timers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Ordered path segments of a metric, e.g. `["ingest", "messages"]`.
pub type MetricPath = Vec<String>;

pub const INGEST_MESSAGES: &[&str] = &["ingest", "messages"];
pub const INGEST_COMMITS: &[&str] = &["ingest", "commits"];
pub const INGEST_TOMBSTONES: &[&str] = &["ingest", "tombstones"];
pub const INGEST_GROUP_METADATA: &[&str] = &["ingest", "group_metadata"];
pub const INGEST_GROUP_METADATA_ERRORS: &[&str] = &["ingest", "group_metadata_errors"];
pub const INGEST_UNRECOGNIZED: &[&str] = &["ingest", "unrecognized"];
pub const INGEST_DECODE_ERRORS: &[&str] = &["ingest", "decode_errors"];
pub const INGEST_ERRORS: &[&str] = &["ingest", "errors"];
pub const INGEST_RECOVERIES: &[&str] = &["ingest", "recoveries"];
pub const REPORT_CYCLES: &[&str] = &["report", "cycles"];
pub const REPORT_ERRORS: &[&str] = &["report", "errors"];
pub const REPORT_SAMPLES: &[&str] = &["report", "samples"];
pub const REPORT_DURATION: &[&str] = &["report", "duration"];

fn to_path(path: &[&str]) -> MetricPath {
    path.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Default)]
struct TimerWindow {
    total_count: u64,
    count: u64,
    sum_ms: u64,
    min_ms: Option<u64>,
    max_ms: Option<u64>,
}

impl TimerWindow {
    fn record(&mut self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        self.total_count += 1;
        self.count += 1;
        self.sum_ms += ms;
        self.min_ms = Some(self.min_ms.map_or(ms, |min| min.min(ms)));
        self.max_ms = Some(self.max_ms.map_or(ms, |max| max.max(ms)));
    }

    fn restart(&mut self) -> TimerStats {
        let stats = TimerStats {
            count: self.total_count,
            min_ms: self.min_ms,
            max_ms: self.max_ms,
            avg_ms: (self.count > 0).then(|| self.sum_ms / self.count),
        };
        self.count = 0;
        self.sum_ms = 0;
        self.min_ms = None;
        self.max_ms = None;
        stats
    }
}

/// Timer readings; `count` is cumulative, the rest cover the window since the
/// previous [`MetricsRegistry::collect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerStats {
    pub count: u64,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub avg_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct Registry {
    counters: BTreeMap<MetricPath, u64>,
    timers: BTreeMap<MetricPath, TimerWindow>,
}

/// Shared registry of counters and timers.
///
/// Cloning yields another handle on the same registry.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increment the counter at `path`, creating it at zero first.
    pub fn increment(&self, path: &[&str]) {
        *self.lock().counters.entry(to_path(path)).or_insert(0) += 1;
    }

    /// Current value of one counter.
    pub fn counter(&self, path: &[&str]) -> u64 {
        self.lock()
            .counters
            .get(&to_path(path))
            .copied()
            .unwrap_or(0)
    }

    /// Copy of every counter. Counters are never reset.
    pub fn snapshot(&self) -> BTreeMap<MetricPath, u64> {
        self.lock().counters.clone()
    }

    /// Start timing an operation; the elapsed time is recorded when the guard
    /// is stopped or dropped.
    pub fn start_timer(&self, path: &[&str]) -> TimerGuard {
        TimerGuard {
            registry: self.clone(),
            path: to_path(path),
            started: Instant::now(),
            stopped: false,
        }
    }

    fn record(&self, path: MetricPath, elapsed: Duration) {
        self.lock().timers.entry(path).or_default().record(elapsed);
    }

    /// Timer readings, restarting each timer's window.
    pub fn collect_timers(&self) -> BTreeMap<MetricPath, TimerStats> {
        self.lock()
            .timers
            .iter_mut()
            .map(|(path, window)| (path.clone(), window.restart()))
            .collect()
    }

    /// Flattened readings for publishing: every counter, plus
    /// `<timer>.count`, `.min`, `.max` and `.avg` for every timer.
    pub fn collect(&self) -> BTreeMap<MetricPath, i64> {
        let mut result: BTreeMap<MetricPath, i64> = self
            .snapshot()
            .into_iter()
            .map(|(path, value)| (path, value as i64))
            .collect();

        for (path, stats) in self.collect_timers() {
            let readings = [
                ("count", Some(stats.count)),
                ("min", stats.min_ms),
                ("max", stats.max_ms),
                ("avg", stats.avg_ms),
            ];
            for (suffix, value) in readings {
                if let Some(value) = value {
                    let mut name = path.clone();
                    name.push(suffix.to_string());
                    result.insert(name, value as i64);
                }
            }
        }
        result
    }
}

/// A running timer started with [`MetricsRegistry::start_timer`].
#[derive(Debug)]
pub struct TimerGuard {
    registry: MetricsRegistry,
    path: MetricPath,
    started: Instant,
    stopped: bool,
}

impl TimerGuard {
    /// Stop the timer and record the elapsed time.
    pub fn stop(mut self) -> Duration {
        self.finish()
    }

    fn finish(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if !self.stopped {
            self.stopped = true;
            self.registry
                .record(std::mem::take(&mut self.path), elapsed);
        }
        elapsed
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> MetricPath {
        to_path(segments)
    }

    #[test]
    fn increments_counters() {
        let metrics = MetricsRegistry::new();
        metrics.increment(&["counter1"]);
        metrics.increment(&["path", "counter2"]);
        metrics.increment(&["counter1"]);

        let result = metrics.snapshot();
        assert_eq!(result[&path(&["counter1"])], 2);
        assert_eq!(result[&path(&["path", "counter2"])], 1);
        assert_eq!(metrics.counter(&["missing"]), 0);
    }

    #[test]
    fn snapshot_does_not_reset_and_is_a_copy() {
        let metrics = MetricsRegistry::new();
        metrics.increment(INGEST_MESSAGES);
        let first = metrics.snapshot();
        metrics.increment(INGEST_MESSAGES);

        assert_eq!(first[&path(INGEST_MESSAGES)], 1);
        assert_eq!(metrics.snapshot()[&path(INGEST_MESSAGES)], 2);
        assert_eq!(metrics.collect()[&path(INGEST_MESSAGES)], 2);
        assert_eq!(metrics.counter(INGEST_MESSAGES), 2);
    }

    #[test]
    fn clones_share_counters() {
        let metrics = MetricsRegistry::new();
        let other = metrics.clone();
        other.increment(REPORT_CYCLES);
        assert_eq!(metrics.counter(REPORT_CYCLES), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_timer_invocation() {
        let metrics = MetricsRegistry::new();
        let timer = metrics.start_timer(&["timer"]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        timer.stop();

        let result = metrics.collect();
        assert_eq!(result[&path(&["timer", "count"])], 1);
        let avg = result[&path(&["timer", "avg"])];
        assert!(avg >= 100);
        assert_eq!(result[&path(&["timer", "min"])], avg);
        assert_eq!(result[&path(&["timer", "max"])], avg);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_timer_invocations() {
        let metrics = MetricsRegistry::new();
        let timer1 = metrics.start_timer(&["timer"]);
        let timer2 = metrics.start_timer(&["timer"]);
        let timer3 = metrics.start_timer(&["timer"]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        timer1.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(timer2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        timer3.stop();

        let stats = metrics.collect_timers()[&path(&["timer"])];
        assert_eq!(stats.count, 3);
        let (min, max, avg) = (
            stats.min_ms.unwrap(),
            stats.max_ms.unwrap(),
            stats.avg_ms.unwrap(),
        );
        assert!(min >= 100);
        assert!(avg >= 150);
        assert!(max >= 300);
        assert!(min < avg && avg < max);
    }

    #[tokio::test(start_paused = true)]
    async fn collect_restarts_the_timer_window() {
        let metrics = MetricsRegistry::new();
        metrics.start_timer(REPORT_DURATION).stop();
        metrics.collect();

        let result = metrics.collect();
        assert_eq!(result[&path(&["report", "duration", "count"])], 1);
        assert!(!result.contains_key(&path(&["report", "duration", "avg"])));
        assert!(!result.contains_key(&path(&["report", "duration", "min"])));
    }
}
