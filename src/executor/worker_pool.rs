//! # Worker Pool Executor
//!
//! A fixed set of worker coroutines sharing one job queue.
//!
//! ## Features
//!
//! - **Worker Pools**: N worker coroutines pull jobs from a shared queue
//! - **Unbounded Queue**: may's MPSC channel; the bound is enforced by reserving depth atomically
//! - **Backpressure**: `Shed` rejects immediately at the bound, `Block` waits for room
//! - **Metrics**: queue depth, dispatch, completion and shed counters
//!
//! ## Configuration
//!
//! - `WEBASYNC_POOL_WORKERS`: Number of worker coroutines (default: 4)
//! - `WEBASYNC_POOL_QUEUE_BOUND`: Maximum queued jobs (default: 1024)
//! - `WEBASYNC_BACKPRESSURE_MODE`: `block` or `shed` (default: block)
//! - `WEBASYNC_BACKPRESSURE_TIMEOUT_MS`: How long `block` waits for room (default: 50)

use may::sync::mpsc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{run_contained, Job, TaskExecutor, TaskHandle};
use crate::error::AsyncError;
use crate::ids::TaskId;

/// Configuration for worker pool backpressure behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    /// Wait up to the backpressure timeout for room, then reject
    #[default]
    Block,
    /// Reject the job immediately when the queue is full
    Shed,
}

impl BackpressureMode {
    /// Parse backpressure mode from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "block" => Some(Self::Block),
            "shed" => Some(Self::Shed),
            _ => None,
        }
    }
}

/// Configuration for a worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker coroutines
    pub num_workers: usize,
    /// Maximum queue depth
    pub queue_bound: usize,
    /// Backpressure mode
    pub backpressure_mode: BackpressureMode,
    /// Timeout for block mode in milliseconds
    pub backpressure_timeout_ms: u64,
    /// Stack size for worker coroutines
    pub stack_size: usize,
}

impl WorkerPoolConfig {
    /// Load configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let num_workers = std::env::var("WEBASYNC_POOL_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.num_workers);

        let queue_bound = std::env::var("WEBASYNC_POOL_QUEUE_BOUND")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.queue_bound);

        let backpressure_mode = std::env::var("WEBASYNC_BACKPRESSURE_MODE")
            .ok()
            .and_then(|s| BackpressureMode::parse(&s))
            .unwrap_or_default();

        let backpressure_timeout_ms = std::env::var("WEBASYNC_BACKPRESSURE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.backpressure_timeout_ms);

        let stack_size = std::env::var("WEBASYNC_STACK_SIZE")
            .ok()
            .and_then(|s| crate::config::parse_stack_size(&s))
            .unwrap_or(defaults.stack_size);

        Self {
            num_workers,
            queue_bound,
            backpressure_mode,
            backpressure_timeout_ms,
            stack_size,
        }
    }

    /// Create a custom configuration
    #[must_use]
    pub fn new(
        num_workers: usize,
        queue_bound: usize,
        backpressure_mode: BackpressureMode,
        backpressure_timeout_ms: u64,
        stack_size: usize,
    ) -> Self {
        Self {
            num_workers,
            queue_bound,
            backpressure_mode,
            backpressure_timeout_ms,
            stack_size,
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            queue_bound: 1024,
            backpressure_mode: BackpressureMode::Block,
            backpressure_timeout_ms: 50,
            stack_size: 0x10000, // 64KB
        }
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Number of jobs rejected due to queue overflow
    pub shed_count: AtomicU64,
    /// Current queue depth (queued or running)
    pub queue_depth: AtomicUsize,
    /// Total jobs dispatched
    pub dispatched_count: AtomicU64,
    /// Total jobs completed
    pub completed_count: AtomicU64,
}

impl WorkerPoolMetrics {
    /// Create new metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a shed event
    pub fn record_shed(&self) {
        self.shed_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Reserve a queue slot and count the dispatch, unless depth has reached `bound`.
    pub fn try_record_dispatch(&self, bound: usize) -> bool {
        let mut current = self.queue_depth.load(Ordering::Acquire);
        loop {
            if current >= bound {
                return false;
            }
            match self.queue_depth.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.dispatched_count.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Undo a dispatch whose send failed
    fn rollback_dispatch(&self) {
        self.dispatched_count.fetch_sub(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::AcqRel);
    }

    /// Record a completion event
    pub fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::AcqRel);
    }

    #[must_use]
    pub fn get_shed_count(&self) -> u64 {
        self.shed_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }
}

struct QueuedJob {
    task_id: TaskId,
    job: Job,
}

/// Executor backed by a pool of worker coroutines.
pub struct WorkerPoolExecutor {
    config: WorkerPoolConfig,
    sender: mpsc::Sender<QueuedJob>,
    metrics: Arc<WorkerPoolMetrics>,
    name: String,
}

impl WorkerPoolExecutor {
    /// Create a new worker pool and spawn its workers.
    ///
    /// Workers exit once the executor is dropped and the queue drains.
    #[must_use]
    pub fn new(name: impl Into<String>, config: WorkerPoolConfig) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<QueuedJob>();
        let metrics = Arc::new(WorkerPoolMetrics::new());

        // All workers share the receiver and load balance across queued jobs.
        let rx = Arc::new(rx);

        info!(
            pool = %name,
            num_workers = config.num_workers,
            queue_bound = config.queue_bound,
            backpressure_mode = ?config.backpressure_mode,
            stack_size = config.stack_size,
            "Creating worker pool"
        );

        for worker_id in 0..config.num_workers {
            let rx = Arc::clone(&rx);
            let pool_name = name.clone();
            let metrics = Arc::clone(&metrics);

            // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
            // Workers only own Send + 'static state (the shared receiver, metrics, name).
            #[allow(unsafe_code)]
            let spawn_result = unsafe {
                may::coroutine::Builder::new()
                    .name(format!("{name}-worker-{worker_id}"))
                    .stack_size(config.stack_size)
                    .spawn(move || {
                        debug!(pool = %pool_name, worker_id, "Worker coroutine started");

                        while let Ok(queued) = rx.recv() {
                            debug!(
                                pool = %pool_name,
                                worker_id,
                                task_id = %queued.task_id,
                                "Worker processing task"
                            );
                            run_contained(&pool_name, queued.task_id, queued.job);
                            metrics.record_completion();
                        }

                        debug!(pool = %pool_name, worker_id, "Worker coroutine exiting");
                    })
            };

            if let Err(e) = spawn_result {
                error!(
                    pool = %name,
                    worker_id,
                    error = %e,
                    "Failed to spawn worker coroutine"
                );
            }
        }

        Self {
            config,
            sender: tx,
            metrics,
            name,
        }
    }

    /// Get metrics for this worker pool
    #[must_use]
    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    /// Get configuration for this worker pool
    #[must_use]
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    fn try_reserve(&self) -> bool {
        self.metrics.try_record_dispatch(self.config.queue_bound)
    }

    fn reserve_with_timeout(&self) -> bool {
        let deadline = Instant::now() + Duration::from_millis(self.config.backpressure_timeout_ms);
        while !self.try_reserve() {
            if Instant::now() >= deadline {
                return false;
            }
            may::coroutine::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Send a job whose queue slot is already reserved.
    fn enqueue(&self, task_id: TaskId, job: Job) -> Result<(), AsyncError> {
        if let Err(e) = self.sender.send(QueuedJob { task_id, job }) {
            self.metrics.rollback_dispatch();
            error!(
                pool = %self.name,
                task_id = %task_id,
                error = %e,
                "Worker pool channel disconnected"
            );
            return Err(AsyncError::rejected("worker pool is not accepting tasks"));
        }
        Ok(())
    }
}

impl TaskExecutor for WorkerPoolExecutor {
    fn submit(&self, job: Job) -> Result<TaskHandle, AsyncError> {
        let admitted = match self.config.backpressure_mode {
            BackpressureMode::Shed => self.try_reserve(),
            BackpressureMode::Block => self.reserve_with_timeout(),
        };
        if !admitted {
            self.metrics.record_shed();
            warn!(
                pool = %self.name,
                queue_depth = self.metrics.get_queue_depth(),
                queue_bound = self.config.queue_bound,
                mode = ?self.config.backpressure_mode,
                "Worker pool saturated, rejecting task"
            );
            return Err(AsyncError::rejected(format!(
                "worker pool '{}' queue is full",
                self.name
            )));
        }

        let (handle, job) = TaskHandle::wrap(job);
        self.enqueue(handle.id(), job)?;
        Ok(handle)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
