//! Metrics collection: counters, gauges, bounded reservoirs, and exposition
//! in both Prometheus text format and a JSON performance snapshot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, System};

/// A bounded ring buffer of recent numeric samples.
///
/// Once full, the oldest sample is evicted on insert. Percentiles use the
/// nearest-rank method: `index = ceil(n * q) - 1`.
pub struct Reservoir {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl Reservoir {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn sorted(&self) -> Vec<f64> {
        let mut v: Vec<f64> = self.samples.iter().copied().collect();
        v.sort_by(|a, b| a.partial_cmp(b).unwrap());
        v
    }

    pub fn percentile(&self, q: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sorted = self.sorted();
        let n = sorted.len();
        let index = ((n as f64) * q).ceil() as usize;
        let index = index.saturating_sub(1).min(n - 1);
        sorted[index]
    }

    pub fn min(&self) -> f64 {
        self.samples.iter().cloned().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.samples
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn summary(&self) -> ReservoirSummary {
        if self.is_empty() {
            return ReservoirSummary::default();
        }
        ReservoirSummary {
            count: self.len(),
            min: self.min(),
            max: self.max(),
            avg: self.mean(),
            p50: self.percentile(0.50),
            p95: self.percentile(0.95),
            p99: self.percentile(0.99),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReservoirSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Default)]
struct Counters {
    tasks_created: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_retried: AtomicU64,
    tasks_timeout: AtomicU64,

    oss_uploads: AtomicU64,
    oss_upload_failures: AtomicU64,
    oss_deletes: AtomicU64,
    oss_delete_failures: AtomicU64,

    http_requests_total: AtomicU64,
    http_2xx: AtomicU64,
    http_4xx: AtomicU64,
    http_5xx: AtomicU64,
}

struct Gauges {
    queue_pending: AtomicU64,
    queue_processing: AtomicU64,
    queue_max_pending: AtomicU64,
    queue_max_processing: AtomicU64,
    peak_heap_bytes: AtomicU64,
    // Stored as milli-seconds-of-CPU-time to keep it integer-atomic.
    cpu_time_millis: AtomicU64,
}

impl Default for Gauges {
    fn default() -> Self {
        Self {
            queue_pending: AtomicU64::new(0),
            queue_processing: AtomicU64::new(0),
            queue_max_pending: AtomicU64::new(0),
            queue_max_processing: AtomicU64::new(0),
            peak_heap_bytes: AtomicU64::new(0),
            cpu_time_millis: AtomicU64::new(0),
        }
    }
}

/// Collects counters, gauges, and latency reservoirs for the task engine,
/// the object-store adapter, and the HTTP surface.
pub struct MetricsCollector {
    counters: Counters,
    gauges: Gauges,
    processing_time: Mutex<Reservoir>,
    upload_size: Mutex<Reservoir>,
    upload_duration: Mutex<Reservoir>,
    http_duration: Mutex<Reservoir>,
    started_at: Instant,
    pid: Pid,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            gauges: Gauges::default(),
            processing_time: Mutex::new(Reservoir::new(1000)),
            upload_size: Mutex::new(Reservoir::new(500)),
            upload_duration: Mutex::new(Reservoir::new(500)),
            http_duration: Mutex::new(Reservoir::new(1000)),
            started_at: Instant::now(),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    pub fn record_task_created(&self) {
        self.counters.tasks_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_completed(&self, duration_secs: f64) {
        self.counters.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.processing_time.lock().push(duration_secs);
    }

    pub fn record_task_failed(&self) {
        self.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A timeout only ever bumps the timeout counter. The task may still
    /// retry, so it is not yet a terminal failure; `record_task_failed` is
    /// the sole source of the `failed` counter, fired once per task that
    /// ultimately exhausts its retry budget.
    pub fn record_task_timeout(&self) {
        self.counters.tasks_timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_retried(&self) {
        self.counters.tasks_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload(&self, success: bool, size_bytes: u64, duration_secs: f64) {
        if success {
            self.counters.oss_uploads.fetch_add(1, Ordering::Relaxed);
            self.upload_size.lock().push(size_bytes as f64);
            self.upload_duration.lock().push(duration_secs);
        } else {
            self.counters
                .oss_upload_failures
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_delete(&self, success: bool) {
        if success {
            self.counters.oss_deletes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters
                .oss_delete_failures
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_http_request(&self, status: u16, duration_secs: f64) {
        self.counters
            .http_requests_total
            .fetch_add(1, Ordering::Relaxed);
        match status {
            200..=299 => self.counters.http_2xx.fetch_add(1, Ordering::Relaxed),
            400..=499 => self.counters.http_4xx.fetch_add(1, Ordering::Relaxed),
            _ => self.counters.http_5xx.fetch_add(1, Ordering::Relaxed),
        };
        self.http_duration.lock().push(duration_secs);
    }

    /// Refreshes queue depth gauges and process-level system gauges. Called
    /// on a fixed cadence by the task manager, not per-request, since
    /// `sysinfo` refreshes cost a syscall.
    pub fn refresh_gauges(&self, pending: u64, processing: u64, system: &mut System) {
        self.gauges.queue_pending.store(pending, Ordering::Relaxed);
        self.gauges
            .queue_processing
            .store(processing, Ordering::Relaxed);
        self.gauges
            .queue_max_pending
            .fetch_max(pending, Ordering::Relaxed);
        self.gauges
            .queue_max_processing
            .fetch_max(processing, Ordering::Relaxed);

        system.refresh_process(self.pid);
        if let Some(process) = system.process(self.pid) {
            let rss = process.memory();
            self.gauges.peak_heap_bytes.fetch_max(rss, Ordering::Relaxed);

            // Integrate instantaneous CPU% over the ~10s refresh interval to
            // approximate cumulative CPU-seconds; the nearest platform
            // equivalent to a native heap/CPU profiler hook.
            let cpu_percent = process.cpu_usage() as f64;
            let delta_millis = (cpu_percent / 100.0 * 10_000.0) as u64;
            self.gauges
                .cpu_time_millis
                .fetch_add(delta_millis, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            tasks: TaskCounters {
                created: self.counters.tasks_created.load(Ordering::Relaxed),
                completed: self.counters.tasks_completed.load(Ordering::Relaxed),
                failed: self.counters.tasks_failed.load(Ordering::Relaxed),
                retried: self.counters.tasks_retried.load(Ordering::Relaxed),
                timeout: self.counters.tasks_timeout.load(Ordering::Relaxed),
            },
            processing_time: self.processing_time.lock().summary(),
            queue: QueueGauges {
                pending: self.gauges.queue_pending.load(Ordering::Relaxed),
                processing: self.gauges.queue_processing.load(Ordering::Relaxed),
                max_pending: self.gauges.queue_max_pending.load(Ordering::Relaxed),
                max_processing: self.gauges.queue_max_processing.load(Ordering::Relaxed),
            },
            object_store: OssCounters {
                uploads: self.counters.oss_uploads.load(Ordering::Relaxed),
                upload_failures: self.counters.oss_upload_failures.load(Ordering::Relaxed),
                deletes: self.counters.oss_deletes.load(Ordering::Relaxed),
                delete_failures: self.counters.oss_delete_failures.load(Ordering::Relaxed),
                upload_size: self.upload_size.lock().summary(),
                upload_duration: self.upload_duration.lock().summary(),
            },
            http: HttpCounters {
                total: self.counters.http_requests_total.load(Ordering::Relaxed),
                status_2xx: self.counters.http_2xx.load(Ordering::Relaxed),
                status_4xx: self.counters.http_4xx.load(Ordering::Relaxed),
                status_5xx: self.counters.http_5xx.load(Ordering::Relaxed),
                duration: self.http_duration.lock().summary(),
            },
            system: SystemGauges {
                peak_heap_bytes: self.gauges.peak_heap_bytes.load(Ordering::Relaxed),
                cpu_time_seconds: self.gauges.cpu_time_millis.load(Ordering::Relaxed) as f64 / 1000.0,
            },
        }
    }

    /// Renders every family as Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::new();

        macro_rules! counter {
            ($name:expr, $help:expr, $value:expr) => {
                out.push_str(&format!("# HELP {} {}\n", $name, $help));
                out.push_str(&format!("# TYPE {} counter\n", $name));
                out.push_str(&format!("{} {}\n", $name, $value));
            };
        }
        macro_rules! gauge {
            ($name:expr, $help:expr, $value:expr) => {
                out.push_str(&format!("# HELP {} {}\n", $name, $help));
                out.push_str(&format!("# TYPE {} gauge\n", $name));
                out.push_str(&format!("{} {}\n", $name, $value));
            };
        }

        counter!(
            "echarts_tasks_created_total",
            "Total chart tasks created",
            snap.tasks.created
        );
        counter!(
            "echarts_tasks_completed_total",
            "Total chart tasks completed",
            snap.tasks.completed
        );
        counter!(
            "echarts_tasks_failed_total",
            "Total chart tasks failed",
            snap.tasks.failed
        );
        counter!(
            "echarts_tasks_retried_total",
            "Total chart task retries",
            snap.tasks.retried
        );
        counter!(
            "echarts_tasks_timeout_total",
            "Total chart tasks that exceeded their deadline",
            snap.tasks.timeout
        );

        gauge!(
            "echarts_queue_pending",
            "Current pending task count",
            snap.queue.pending
        );
        gauge!(
            "echarts_queue_processing",
            "Current in-flight task count",
            snap.queue.processing
        );
        gauge!(
            "echarts_queue_max_pending",
            "Historical maximum pending task count",
            snap.queue.max_pending
        );
        gauge!(
            "echarts_queue_max_processing",
            "Historical maximum in-flight task count",
            snap.queue.max_processing
        );

        counter!(
            "echarts_oss_uploads_total",
            "Total successful object-store uploads",
            snap.object_store.uploads
        );
        counter!(
            "echarts_oss_upload_failures_total",
            "Total failed object-store uploads",
            snap.object_store.upload_failures
        );
        counter!(
            "echarts_oss_deletes_total",
            "Total successful object-store deletes",
            snap.object_store.deletes
        );
        counter!(
            "echarts_oss_delete_failures_total",
            "Total failed object-store deletes",
            snap.object_store.delete_failures
        );

        counter!(
            "echarts_http_requests_total",
            "Total HTTP requests served",
            snap.http.total
        );

        out.push_str("# HELP echarts_task_processing_seconds Per-task processing duration quantiles\n");
        out.push_str("# TYPE echarts_task_processing_seconds gauge\n");
        out.push_str(&format!(
            "echarts_task_processing_seconds{{quantile=\"0.5\"}} {}\n",
            snap.processing_time.p50
        ));
        out.push_str(&format!(
            "echarts_task_processing_seconds{{quantile=\"0.95\"}} {}\n",
            snap.processing_time.p95
        ));
        out.push_str(&format!(
            "echarts_task_processing_seconds{{quantile=\"0.99\"}} {}\n",
            snap.processing_time.p99
        ));

        gauge!(
            "echarts_peak_heap_bytes",
            "Peak resident set size observed for this process",
            snap.system.peak_heap_bytes
        );
        gauge!(
            "echarts_cpu_time_seconds",
            "Approximate cumulative CPU time consumed by this process",
            snap.system.cpu_time_seconds
        );

        out.push_str("# HELP echarts_info Service build information\n");
        out.push_str("# TYPE echarts_info gauge\n");
        out.push_str(&format!(
            "echarts_info{{version=\"{}\"}} 1\n",
            env!("CARGO_PKG_VERSION")
        ));

        out
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub uptime_secs: u64,
    pub tasks: TaskCounters,
    pub processing_time: ReservoirSummary,
    pub queue: QueueGauges,
    pub object_store: OssCounters,
    pub http: HttpCounters,
    pub system: SystemGauges,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskCounters {
    pub created: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueGauges {
    pub pending: u64,
    pub processing: u64,
    pub max_pending: u64,
    pub max_processing: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OssCounters {
    pub uploads: u64,
    pub upload_failures: u64,
    pub deletes: u64,
    pub delete_failures: u64,
    pub upload_size: ReservoirSummary,
    pub upload_duration: ReservoirSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpCounters {
    pub total: u64,
    pub status_2xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub duration: ReservoirSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemGauges {
    pub peak_heap_bytes: u64,
    pub cpu_time_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_law_holds_for_identical_samples() {
        let mut reservoir = Reservoir::new(100);
        for _ in 0..20 {
            reservoir.push(42.0);
        }
        let summary = reservoir.summary();
        assert_eq!(summary.min, 42.0);
        assert_eq!(summary.max, 42.0);
        assert_eq!(summary.avg, 42.0);
        assert_eq!(summary.p50, 42.0);
        assert_eq!(summary.p95, 42.0);
        assert_eq!(summary.p99, 42.0);
    }

    #[test]
    fn reservoir_law_keeps_only_last_capacity_samples() {
        let mut reservoir = Reservoir::new(1000);
        for i in 0..1200 {
            reservoir.push(i as f64);
        }
        assert_eq!(reservoir.len(), 1000);
        assert_eq!(reservoir.min(), 200.0);
        assert_eq!(reservoir.max(), 1199.0);
    }

    #[test]
    fn counters_increment_monotonically() {
        let collector = MetricsCollector::new();
        collector.record_task_created();
        collector.record_task_created();
        collector.record_task_completed(1.5);
        let snap = collector.snapshot();
        assert_eq!(snap.tasks.created, 2);
        assert_eq!(snap.tasks.completed, 1);
    }

    #[test]
    fn prometheus_exposition_includes_expected_families() {
        let collector = MetricsCollector::new();
        collector.record_task_created();
        let text = collector.render_prometheus();
        assert!(text.contains("# TYPE echarts_tasks_created_total counter"));
        assert!(text.contains("echarts_tasks_created_total 1"));
        assert!(text.contains("quantile=\"0.95\""));
        assert!(text.contains("echarts_info{"));
    }
}
