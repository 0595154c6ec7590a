//! Asynchronous chart-rendering service.
//!
//! Accepts chart-rendering submissions, drives them through a bounded-
//! concurrency task lifecycle engine (queue -> rasterize -> optional
//! upload), and exposes status, queue, and system-health endpoints over
//! HTTP. A background scheduler evicts completed tasks past their
//! retention window and deletes their backing objects.
//!
//! # Example
//! ```no_run
//! use echarts_render_service::{
//!     AppConfig, MetricsCollector, ManagerConfig, PlaceholderRasterizer, TaskManager,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let manager = TaskManager::new(
//!         ManagerConfig {
//!             queue: Default::default(),
//!             task_retention_days: config.task_retention_days,
//!         },
//!         Arc::new(PlaceholderRasterizer),
//!         None,
//!         Arc::new(MetricsCollector::new()),
//!     );
//!     manager.start();
//!     Ok(())
//! }
//! ```

pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod manager;
pub mod metrics;
pub mod oss;
pub mod queue;
pub mod rasterizer;
pub mod task;

pub use cleanup::{CleanupConfig, CleanupScheduler, CleanupStatus};
pub use config::{AppConfig, OssConfig};
pub use error::{Result, ServiceError};
pub use manager::{ManagerConfig, TaskManager};
pub use metrics::MetricsCollector;
pub use oss::{AliyunOssAdapter, MemoryObjectStore, ObjectStore};
pub use queue::{QueueConfig, QueueStatus, TaskQueue};
pub use rasterizer::{PlaceholderRasterizer, Rasterizer, RenderedImage};
pub use task::{ChartConfig, OutputFormat, TaskId, TaskRecord, TaskState};
