//! The task manager: validates submissions, drives the queue, binds queue
//! events to rasterization and upload, and owns metrics/cleanup wiring.

use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::Engine;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::{Result, ServiceError};
use crate::metrics::MetricsCollector;
use crate::oss::{generate_file_name, ObjectStore};
use crate::queue::{QueueConfig, QueueObserver, QueueStatus, TaskQueue};
use crate::rasterizer::Rasterizer;
use crate::task::{ChartConfig, TaskId, TaskRecord};

/// Inputs that don't belong to the queue itself: retention and cleanup cadence.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub queue: QueueConfig,
    pub task_retention_days: u32,
}

/// Aggregated outcome of one retention sweep.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CleanupResult {
    pub cleaned_tasks: usize,
    pub deleted_files: usize,
    pub errors: Vec<FileDeleteError>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FileDeleteError {
    pub file_name: String,
    pub error: String,
}

const DELETE_BATCH_SIZE: usize = 10;
const DELETE_BATCH_PAUSE: Duration = Duration::from_millis(100);
const GAUGE_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Orchestrates the task lifecycle engine: owns the queue, the rasterizer,
/// the (optional) object-store adapter, and the metrics collector.
pub struct TaskManager {
    queue: Arc<TaskQueue>,
    rasterizer: Arc<dyn Rasterizer>,
    object_store: Option<Arc<dyn ObjectStore>>,
    metrics: Arc<MetricsCollector>,
    config: ManagerConfig,
    system: Mutex<sysinfo::System>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskManager {
    /// Constructs the manager and wires it to the queue as its observer via
    /// `Arc::new_cyclic`, avoiding a manual `Weak` plumbing step at call
    /// sites. Background timers are not started here — call `start()`.
    pub fn new(
        config: ManagerConfig,
        rasterizer: Arc<dyn Rasterizer>,
        object_store: Option<Arc<dyn ObjectStore>>,
        metrics: Arc<MetricsCollector>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<TaskManager>| {
            let observer: Arc<dyn QueueObserver> = Arc::new(ManagerObserver {
                manager: weak.clone(),
            });
            let queue = Arc::new(TaskQueue::new(config.queue.clone(), observer));
            Self {
                queue,
                rasterizer,
                object_store,
                metrics,
                config,
                system: Mutex::new(sysinfo::System::new()),
                background: Mutex::new(Vec::new()),
            }
        })
    }

    /// Spawns the recurring timeout sweep and gauge refresh loops.
    pub fn start(self: &Arc<Self>) {
        let queue = self.queue.clone();
        let sweep = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TIMEOUT_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                queue.sweep_timeouts();
            }
        });

        let this = self.clone();
        let gauges = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GAUGE_REFRESH_INTERVAL);
            loop {
                ticker.tick().await;
                let status = this.queue.status();
                let mut system = this.system.lock();
                this.metrics.refresh_gauges(
                    status.pending_count as u64,
                    status.processing_count as u64,
                    &mut system,
                );
            }
        });

        self.background.lock().extend([sweep, gauges]);
    }

    /// Stops recurring timers. The queue itself is dropped with the manager.
    pub fn destroy(&self) {
        for handle in self.background.lock().drain(..) {
            handle.abort();
        }
    }

    pub fn create_task(&self, config: ChartConfig) -> Result<TaskRecord> {
        let violations = config.validate();
        if !violations.is_empty() {
            return Err(ServiceError::Validation(violations.join("; ")));
        }

        let task = TaskRecord::new(config);
        self.queue.enqueue(task.clone());
        self.metrics.record_task_created();
        Ok(task)
    }

    pub fn get_task(&self, id: TaskId) -> Option<TaskRecord> {
        self.queue.get_task(id)
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Runs one retention sweep and, if an object store is configured,
    /// deletes the backing objects for every evicted, successfully
    /// completed task.
    pub async fn cleanup_expired_tasks(&self) -> CleanupResult {
        let removed = self
            .queue
            .cleanup_expired_tasks(self.config.task_retention_days);

        let file_names: Vec<String> = removed.iter().filter_map(|t| t.file_name.clone()).collect();

        if file_names.is_empty() || self.object_store.is_none() {
            return CleanupResult {
                cleaned_tasks: removed.len(),
                deleted_files: 0,
                errors: Vec::new(),
            };
        }

        let (deleted, errors) = self.delete_oss_files_with_error_handling(file_names).await;
        CleanupResult {
            cleaned_tasks: removed.len(),
            deleted_files: deleted,
            errors,
        }
    }

    /// Deletes a list of object-store filenames in batches of
    /// `DELETE_BATCH_SIZE`, pausing briefly between batches to throttle the
    /// external store. Returns (successful deletes, per-file errors).
    pub async fn delete_oss_files_with_error_handling(
        &self,
        file_names: Vec<String>,
    ) -> (usize, Vec<FileDeleteError>) {
        let Some(store) = self.object_store.clone() else {
            return (
                0,
                file_names
                    .into_iter()
                    .map(|file_name| FileDeleteError {
                        file_name,
                        error: "object store not configured".to_string(),
                    })
                    .collect(),
            );
        };

        let mut deleted = 0usize;
        let mut errors = Vec::new();

        let batches: Vec<&[String]> = file_names.chunks(DELETE_BATCH_SIZE).collect();
        let batch_count = batches.len();
        for (batch_index, batch) in batches.into_iter().enumerate() {
            let results = futures::future::join_all(batch.iter().map(|file_name| {
                let store = store.clone();
                let file_name = file_name.clone();
                async move {
                    let result = store.delete(&file_name).await;
                    (file_name, result)
                }
            }))
            .await;

            for (file_name, result) in results {
                match result {
                    Ok(()) => {
                        deleted += 1;
                        self.metrics.record_delete(true);
                    }
                    Err(e) => {
                        self.metrics.record_delete(false);
                        errors.push(FileDeleteError {
                            file_name,
                            error: e.to_string(),
                        });
                    }
                }
            }

            if batch_index + 1 < batch_count {
                tokio::time::sleep(DELETE_BATCH_PAUSE).await;
            }
        }

        (deleted, errors)
    }

    /// Handles a task that just transitioned into processing: rasterizes,
    /// optionally uploads, and feeds the outcome back into the queue.
    async fn process_task(
        queue: Arc<TaskQueue>,
        rasterizer: Arc<dyn Rasterizer>,
        object_store: Option<Arc<dyn ObjectStore>>,
        metrics: Arc<MetricsCollector>,
        task: TaskRecord,
    ) {
        let rendered = match rasterizer.render(&task.config).await {
            Ok(r) => r,
            Err(e) => {
                queue.fail_task(task.id, &e.to_string());
                return;
            }
        };

        match object_store {
            Some(store) => {
                let file_name = generate_file_name(&task.id.to_string(), rendered.extension);
                let size = rendered.buffer.len() as u64;
                let upload_started = std::time::Instant::now();
                match store
                    .upload(rendered.buffer, &file_name, rendered.content_type)
                    .await
                {
                    Ok(uploaded) => {
                        metrics.record_upload(true, size, upload_started.elapsed().as_secs_f64());
                        queue.complete_task(task.id, uploaded.url, Some(uploaded.stored_path));
                    }
                    Err(e) => {
                        metrics.record_upload(false, size, upload_started.elapsed().as_secs_f64());
                        queue.fail_task(task.id, &e.to_string());
                    }
                }
            }
            None => {
                let data_url = format!(
                    "data:{};base64,{}",
                    rendered.content_type,
                    base64::engine::general_purpose::STANDARD.encode(&rendered.buffer)
                );
                queue.complete_task(task.id, data_url, None);
            }
        }
    }
}

/// Bridges queue events back into the manager without creating an `Arc`
/// cycle: the queue holds this observer, the observer holds only a `Weak`
/// reference back to the manager it belongs to.
struct ManagerObserver {
    manager: Weak<TaskManager>,
}

impl QueueObserver for ManagerObserver {
    fn on_started(&self, task: &TaskRecord) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let queue = manager.queue.clone();
        let rasterizer = manager.rasterizer.clone();
        let object_store = manager.object_store.clone();
        let metrics = manager.metrics.clone();
        let task = task.clone();
        tokio::spawn(async move {
            TaskManager::process_task(queue, rasterizer, object_store, metrics, task).await;
        });
    }

    fn on_completed(&self, task: &TaskRecord) {
        if let Some(manager) = self.manager.upgrade() {
            let secs = task
                .started_at
                .zip(task.completed_at)
                .map(|(s, c)| (c - s).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0);
            manager.metrics.record_task_completed(secs);
        }
    }

    fn on_failed(&self, _task: &TaskRecord) {
        if let Some(manager) = self.manager.upgrade() {
            manager.metrics.record_task_failed();
        }
    }

    fn on_timeout(&self, _task: &TaskRecord) {
        if let Some(manager) = self.manager.upgrade() {
            manager.metrics.record_task_timeout();
        }
    }

    fn on_retry(&self, _task: &TaskRecord) {
        if let Some(manager) = self.manager.upgrade() {
            manager.metrics.record_task_retried();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oss::MemoryObjectStore;
    use crate::queue::QueueConfig;
    use crate::rasterizer::MockRasterizer;
    use serde_json::json;

    fn config_with_series() -> ChartConfig {
        ChartConfig {
            option: json!({"series": [{"type": "bar", "data": [1, 2, 3]}]}),
            output_type: None,
            width: Some(600),
            height: Some(400),
            download: false,
            oss_path: None,
        }
    }

    fn make_manager() -> Arc<TaskManager> {
        let manager_config = ManagerConfig {
            queue: QueueConfig {
                max_concurrent: 2,
                ..Default::default()
            },
            task_retention_days: 7,
        };
        TaskManager::new(
            manager_config,
            Arc::new(MockRasterizer::new()),
            Some(Arc::new(MemoryObjectStore::new())),
            Arc::new(MetricsCollector::new()),
        )
    }

    #[tokio::test]
    async fn happy_path_completes_with_uploaded_url() {
        let manager = make_manager();
        let task = manager.create_task(config_with_series()).unwrap();

        for _ in 0..50 {
            if let Some(t) = manager.get_task(task.id) {
                if t.state == crate::task::TaskState::Completed {
                    assert!(t.image_url.is_some());
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task did not complete in time");
    }

    #[tokio::test]
    async fn validation_rejects_bad_dimensions() {
        let manager = make_manager();
        let mut config = config_with_series();
        config.width = Some(0);
        let err = manager.create_task(config).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_task_id_returns_none() {
        let manager = make_manager();
        assert!(manager.get_task(TaskId::new()).is_none());
    }
}
