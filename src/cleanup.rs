//! Daily retention-cleanup scheduler with bounded retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::manager::{CleanupResult, TaskManager};

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub cleanup_hour: u32,
    pub max_retries: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            cleanup_hour: 2,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CleanupStats {
    pub total_runs: u64,
    pub total_tasks_cleaned: u64,
    pub total_files_cleaned: u64,
    pub total_errors: u64,
    pub last_run_duration_ms: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CleanupStatus {
    pub is_running: bool,
    pub last_cleanup_time: Option<DateTime<Utc>>,
    pub next_cleanup_time: Option<DateTime<Utc>>,
    pub stats: CleanupStats,
}

struct SchedulerState {
    last_cleanup_time: Option<DateTime<Utc>>,
    next_cleanup_time: Option<DateTime<Utc>>,
    stats: CleanupStats,
}

/// Fires the manager's retention cleanup once per day at a configured local
/// hour, retrying a failed cycle with linear backoff.
pub struct CleanupScheduler {
    manager: Arc<TaskManager>,
    config: CleanupConfig,
    state: Mutex<SchedulerState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupScheduler {
    pub fn new(manager: Arc<TaskManager>, config: CleanupConfig) -> Arc<Self> {
        Arc::new(Self {
            manager,
            config,
            state: Mutex::new(SchedulerState {
                last_cleanup_time: None,
                next_cleanup_time: None,
                stats: CleanupStats::default(),
            }),
            handle: Mutex::new(None),
        })
    }

    /// Arms the recurring daily timer.
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let delay = this.delay_until_next_fire();
                {
                    let mut state = this.state.lock();
                    state.next_cleanup_time = Some(Utc::now() + delay);
                }
                tokio::time::sleep(delay).await;
                this.run_cycle_with_retry(true).await;
            }
        });
        *self.handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// Runs the cleanup immediately, outside the scheduled cadence. Updates
    /// the running totals but not the scheduled-cycle counter.
    pub async fn trigger_manual(&self) -> CleanupResult {
        self.run_cycle_with_retry(false).await
    }

    fn delay_until_next_fire(&self) -> Duration {
        let now = Local::now();
        let naive_fire_time = now
            .date_naive()
            .and_hms_opt(self.config.cleanup_hour, 0, 0)
            .expect("cleanup_hour is validated to be in 0..=23");
        let mut next = Local
            .from_local_datetime(&naive_fire_time)
            .single()
            .unwrap_or(now);
        if next <= now {
            next += chrono::Duration::days(1);
        }
        (next - now).to_std().unwrap_or(Duration::from_secs(60))
    }

    async fn run_cycle_with_retry(&self, counts_as_scheduled_cycle: bool) -> CleanupResult {
        let started = std::time::Instant::now();
        let mut attempt = 0u32;
        let mut last_result = None;

        loop {
            attempt += 1;
            let result = self.manager.cleanup_expired_tasks().await;
            if result.errors.is_empty() {
                last_result = Some(result);
                break;
            }
            tracing::warn!(attempt, errors = result.errors.len(), "cleanup cycle had errors");
            last_result = Some(result);
            if attempt > self.config.max_retries {
                break;
            }
            tokio::time::sleep(Duration::from_secs(5 * attempt as u64)).await;
        }

        let result = last_result.unwrap_or(CleanupResult {
            cleaned_tasks: 0,
            deleted_files: 0,
            errors: Vec::new(),
        });

        let mut state = self.state.lock();
        state.last_cleanup_time = Some(Utc::now());
        if counts_as_scheduled_cycle {
            state.stats.total_runs += 1;
        }
        state.stats.total_tasks_cleaned += result.cleaned_tasks as u64;
        state.stats.total_files_cleaned += result.deleted_files as u64;
        state.stats.total_errors += result.errors.len() as u64;
        state.stats.last_run_duration_ms = started.elapsed().as_millis() as u64;

        result
    }

    pub fn status(&self) -> CleanupStatus {
        let state = self.state.lock();
        CleanupStatus {
            is_running: self.handle.lock().is_some(),
            last_cleanup_time: state.last_cleanup_time,
            next_cleanup_time: state.next_cleanup_time,
            stats: state.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerConfig;
    use crate::oss::MemoryObjectStore;
    use crate::queue::QueueConfig;
    use crate::rasterizer::MockRasterizer;

    fn make_manager() -> Arc<TaskManager> {
        TaskManager::new(
            ManagerConfig {
                queue: QueueConfig::default(),
                task_retention_days: 7,
            },
            Arc::new(MockRasterizer::new()),
            Some(Arc::new(MemoryObjectStore::new())),
            Arc::new(crate::metrics::MetricsCollector::new()),
        )
    }

    #[tokio::test]
    async fn manual_trigger_updates_stats_without_incrementing_scheduled_runs() {
        let manager = make_manager();
        let scheduler = CleanupScheduler::new(manager, CleanupConfig::default());

        let result = scheduler.trigger_manual().await;
        assert_eq!(result.cleaned_tasks, 0);

        let status = scheduler.status();
        assert_eq!(status.stats.total_runs, 0);
        assert!(status.last_cleanup_time.is_some());
    }

    #[test]
    fn delay_until_next_fire_is_never_negative() {
        let manager_config = ManagerConfig {
            queue: QueueConfig::default(),
            task_retention_days: 7,
        };
        let manager = TaskManager::new(
            manager_config,
            Arc::new(MockRasterizer::new()),
            None,
            Arc::new(crate::metrics::MetricsCollector::new()),
        );
        let scheduler = CleanupScheduler::new(manager, CleanupConfig::default());
        let delay = scheduler.delay_until_next_fire();
        assert!(delay.as_secs() <= 24 * 3600);
    }
}
