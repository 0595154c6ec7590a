//! The task queue: bounded-concurrency scheduling, retry, timeout sweep,
//! and retention cleanup.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::metrics::Reservoir;
use crate::task::{TaskId, TaskRecord, TaskState};

/// Bounds on queue behavior; every field mirrors a validated environment
/// variable (see `config::AppConfig`).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub task_timeout: Duration,
    pub retry_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            task_timeout: Duration::from_secs(300),
            retry_attempts: 3,
        }
    }
}

/// A point-in-time projection of the queue's load, suitable for the
/// `/api/system/queue-status` endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStatus {
    pub pending_count: usize,
    pub processing_count: usize,
    pub completed_count: usize,
    pub total_processed: u64,
    pub total_failed: u64,
    pub average_processing_time: f64,
    pub max_concurrent: usize,
}

/// Side effects a queue consumer cares about. Invoked synchronously, after
/// the queue's internal lock has been released but before the originating
/// queue method returns — so observer work runs to completion as part of
/// the mutation, without holding the lock while it runs.
pub trait QueueObserver: Send + Sync {
    fn on_enqueued(&self, _task: &TaskRecord) {}
    fn on_started(&self, _task: &TaskRecord) {}
    fn on_completed(&self, _task: &TaskRecord) {}
    fn on_failed(&self, _task: &TaskRecord) {}
    fn on_retry(&self, _task: &TaskRecord) {}
    fn on_timeout(&self, _task: &TaskRecord) {}
    fn on_cleaned_up(&self, _tasks: &[TaskRecord]) {}
    fn on_paused(&self) {}
    fn on_resumed(&self) {}
}

/// No-op observer for tests that don't care about queue events.
#[derive(Default)]
pub struct NoOpObserver;
impl QueueObserver for NoOpObserver {}

struct QueueInner {
    pending: VecDeque<TaskRecord>,
    processing: HashMap<TaskId, TaskRecord>,
    completed: HashMap<TaskId, TaskRecord>,
    processing_time: Reservoir,
    total_processed: u64,
    total_failed: u64,
    paused: bool,
}

impl QueueInner {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            processing: HashMap::new(),
            completed: HashMap::new(),
            processing_time: Reservoir::new(1000),
            total_processed: 0,
            total_failed: 0,
            paused: false,
        }
    }

    fn contains_id(&self, id: TaskId) -> bool {
        self.processing.contains_key(&id)
            || self.completed.contains_key(&id)
            || self.pending.iter().any(|t| t.id == id)
    }
}

/// What a mutation produced, so the public method can invoke observer
/// callbacks after releasing the lock.
enum Effect {
    Enqueued(TaskRecord),
    Started(TaskRecord),
    Completed(TaskRecord),
    Failed(TaskRecord),
    Retried(TaskRecord),
    Rejected,
    NoOp,
}

/// FIFO-admission, bounded-concurrency task scheduler.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    config: QueueConfig,
    observer: Arc<dyn QueueObserver>,
}

impl TaskQueue {
    pub fn new(config: QueueConfig, observer: Arc<dyn QueueObserver>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::new()),
            config,
            observer,
        }
    }

    /// Admits `task` at the tail of the pending deque, then attempts to
    /// schedule it (and any other admissible task) immediately.
    pub fn enqueue(&self, task: TaskRecord) -> bool {
        let effect = {
            let mut inner = self.inner.lock();
            if inner.contains_id(task.id) {
                Effect::Rejected
            } else {
                inner.pending.push_back(task.clone());
                Effect::Enqueued(task)
            }
        };

        let accepted = !matches!(effect, Effect::Rejected);
        self.apply_effect(effect);
        if accepted {
            self.process_next();
        }
        accepted
    }

    /// Admits at most one pending task into processing, if capacity allows.
    pub fn process_next(&self) {
        let effect = {
            let mut inner = self.inner.lock();
            if inner.paused || inner.processing.len() >= self.config.max_concurrent {
                Effect::NoOp
            } else if let Some(mut task) = inner.pending.pop_front() {
                task.state = TaskState::Processing;
                task.started_at = Some(Utc::now());
                inner.processing.insert(task.id, task.clone());
                Effect::Started(task)
            } else {
                Effect::NoOp
            }
        };
        self.apply_effect(effect);
    }

    pub fn complete_task(&self, id: TaskId, image_url: String, file_name: Option<String>) {
        let effect = {
            let mut inner = self.inner.lock();
            let Some(mut task) = inner.processing.remove(&id) else {
                return;
            };
            task.state = TaskState::Completed;
            task.image_url = Some(image_url);
            task.file_name = file_name;
            task.completed_at = Some(Utc::now());
            task.error = None;

            if let (Some(started), Some(completed)) = (task.started_at, task.completed_at) {
                let secs = (completed - started).num_milliseconds() as f64 / 1000.0;
                inner.processing_time.push(secs.max(0.0));
            }
            inner.total_processed += 1;
            inner.completed.insert(id, task.clone());
            Effect::Completed(task)
        };
        self.apply_effect(effect);
        self.process_next();
    }

    pub fn fail_task(&self, id: TaskId, reason: &str) {
        self.fail_task_inner(id, reason, false);
    }

    fn fail_task_inner(&self, id: TaskId, reason: &str, from_timeout: bool) {
        let effect = {
            let mut inner = self.inner.lock();
            let Some(mut task) = inner.processing.remove(&id) else {
                return;
            };

            if from_timeout {
                // Emitted in addition to the retry/fail transition below,
                // matching the timeout-then-retry-or-fail ordering.
                let timed_out = task.clone();
                drop(inner);
                self.observer.on_timeout(&timed_out);
                inner = self.inner.lock();
            }

            if task.retry_count < self.config.retry_attempts {
                task.retry_count += 1;
                task.state = TaskState::Pending;
                task.error = None;
                task.started_at = None;
                inner.pending.push_front(task.clone());
                Effect::Retried(task)
            } else {
                task.state = TaskState::Failed;
                task.error = Some(reason.to_string());
                task.completed_at = Some(Utc::now());
                inner.total_processed += 1;
                inner.total_failed += 1;
                inner.completed.insert(id, task.clone());
                Effect::Failed(task)
            }
        };
        self.apply_effect(effect);
        self.process_next();
    }

    /// Scans in-flight tasks for ones that have exceeded `task_timeout`,
    /// failing each through the normal retry path with reason "task timeout".
    pub fn sweep_timeouts(&self) {
        let expired: Vec<TaskId> = {
            let inner = self.inner.lock();
            let now = Utc::now();
            inner
                .processing
                .values()
                .filter(|t| {
                    t.started_at
                        .map(|started| {
                            (now - started).num_milliseconds() as u64
                                > self.config.task_timeout.as_millis() as u64
                        })
                        .unwrap_or(false)
                })
                .map(|t| t.id)
                .collect()
        };
        for id in expired {
            self.fail_task_inner(id, "task timeout", true);
        }
    }

    /// Evicts completed-archive entries older than `retention_days`,
    /// returning the removed records so the caller can delete their backing
    /// objects.
    pub fn cleanup_expired_tasks(&self, retention_days: u32) -> Vec<TaskRecord> {
        let removed = {
            let mut inner = self.inner.lock();
            let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
            let expired_ids: Vec<TaskId> = inner
                .completed
                .values()
                .filter(|t| t.created_at < cutoff)
                .map(|t| t.id)
                .collect();
            expired_ids
                .into_iter()
                .filter_map(|id| inner.completed.remove(&id))
                .collect::<Vec<_>>()
        };
        if !removed.is_empty() {
            self.observer.on_cleaned_up(&removed);
        }
        removed
    }

    pub fn get_task(&self, id: TaskId) -> Option<TaskRecord> {
        let inner = self.inner.lock();
        inner
            .processing
            .get(&id)
            .or_else(|| inner.completed.get(&id))
            .cloned()
            .or_else(|| inner.pending.iter().find(|t| t.id == id).cloned())
    }

    pub fn status(&self) -> QueueStatus {
        let inner = self.inner.lock();
        QueueStatus {
            pending_count: inner.pending.len(),
            processing_count: inner.processing.len(),
            completed_count: inner.completed.len(),
            total_processed: inner.total_processed,
            total_failed: inner.total_failed,
            average_processing_time: inner.processing_time.mean(),
            max_concurrent: self.config.max_concurrent,
        }
    }

    pub fn pause(&self) {
        self.inner.lock().paused = true;
        self.observer.on_paused();
    }

    pub fn resume(&self) {
        self.inner.lock().paused = false;
        self.observer.on_resumed();
        loop {
            let had_capacity = {
                let inner = self.inner.lock();
                !inner.pending.is_empty() && inner.processing.len() < self.config.max_concurrent
            };
            if !had_capacity {
                break;
            }
            self.process_next();
        }
    }

    fn apply_effect(&self, effect: Effect) {
        match effect {
            Effect::Enqueued(task) => self.observer.on_enqueued(&task),
            Effect::Started(task) => self.observer.on_started(&task),
            Effect::Completed(task) => self.observer.on_completed(&task),
            Effect::Failed(task) => self.observer.on_failed(&task),
            Effect::Retried(task) => self.observer.on_retry(&task),
            Effect::Rejected | Effect::NoOp => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ChartConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_config() -> ChartConfig {
        ChartConfig {
            option: json!({"series": []}),
            output_type: None,
            width: None,
            height: None,
            download: false,
            oss_path: None,
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        started: AtomicUsize,
        completed: AtomicUsize,
        failed: AtomicUsize,
        retried: AtomicUsize,
    }

    impl QueueObserver for CountingObserver {
        fn on_started(&self, _task: &TaskRecord) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_completed(&self, _task: &TaskRecord) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_failed(&self, _task: &TaskRecord) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_retry(&self, _task: &TaskRecord) {
            self.retried.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn admits_up_to_max_concurrent() {
        let config = QueueConfig {
            max_concurrent: 2,
            ..Default::default()
        };
        let observer = Arc::new(CountingObserver::default());
        let queue = TaskQueue::new(config, observer.clone());

        for _ in 0..5 {
            queue.enqueue(TaskRecord::new(make_config()));
        }

        let status = queue.status();
        assert_eq!(status.processing_count, 2);
        assert_eq!(status.pending_count, 3);
        assert_eq!(observer.started.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let queue = TaskQueue::new(QueueConfig::default(), Arc::new(NoOpObserver));
        let task = TaskRecord::new(make_config());
        assert!(queue.enqueue(task.clone()));
        assert!(!queue.enqueue(task));
    }

    #[test]
    fn completion_records_duration_and_frees_slot() {
        let config = QueueConfig {
            max_concurrent: 1,
            ..Default::default()
        };
        let queue = TaskQueue::new(config, Arc::new(NoOpObserver));
        let task = TaskRecord::new(make_config());
        let id = task.id;
        queue.enqueue(task);
        queue.enqueue(TaskRecord::new(make_config()));

        queue.complete_task(id, "https://example.com/a.png".to_string(), Some("a.png".to_string()));

        let status = queue.status();
        assert_eq!(status.processing_count, 1);
        assert_eq!(status.completed_count, 1);
        assert_eq!(status.total_processed, 1);
    }

    #[test]
    fn failure_retries_until_budget_exhausted() {
        let config = QueueConfig {
            max_concurrent: 1,
            retry_attempts: 1,
            ..Default::default()
        };
        let observer = Arc::new(CountingObserver::default());
        let queue = TaskQueue::new(config, observer.clone());
        let task = TaskRecord::new(make_config());
        let id = task.id;
        queue.enqueue(task);

        queue.fail_task(id, "boom");
        assert_eq!(observer.retried.load(Ordering::SeqCst), 1);
        let retried = queue.get_task(id).unwrap();
        assert_eq!(retried.state, TaskState::Processing);
        assert_eq!(retried.retry_count, 1);

        queue.fail_task(id, "boom again");
        assert_eq!(observer.failed.load(Ordering::SeqCst), 1);
        let failed = queue.get_task(id).unwrap();
        assert_eq!(failed.state, TaskState::Failed);
    }

    #[test]
    fn retention_cleanup_evicts_old_completed_tasks() {
        let queue = TaskQueue::new(QueueConfig::default(), Arc::new(NoOpObserver));
        let mut task = TaskRecord::new(make_config());
        task.created_at = Utc::now() - chrono::Duration::days(10);
        let id = task.id;
        queue.enqueue(task);
        queue.complete_task(id, "https://example.com/a.png".to_string(), None);

        let removed = queue.cleanup_expired_tasks(7);
        assert_eq!(removed.len(), 1);
        assert!(queue.get_task(id).is_none());
    }

    #[test]
    fn pause_suppresses_admission() {
        let queue = TaskQueue::new(QueueConfig::default(), Arc::new(NoOpObserver));
        queue.pause();
        queue.enqueue(TaskRecord::new(make_config()));
        assert_eq!(queue.status().processing_count, 0);
        assert_eq!(queue.status().pending_count, 1);

        queue.resume();
        assert_eq!(queue.status().processing_count, 1);
    }
}
