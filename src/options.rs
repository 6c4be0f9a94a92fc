use core::time::Duration;
use std::sync::Arc;

use crate::ops::{Task, TaskOutput, run_task};

/// Row count at which offsets switch from a linear scan to the Fenwick index.
pub const DEFAULT_LARGE_DATASET_THRESHOLD: usize = 5_000;

/// Configuration for [`crate::Virtualizer`].
#[derive(Clone, Debug, PartialEq)]
pub struct VirtualizerOptions {
    pub count: usize,
    /// Height used for every row until measurements exist.
    pub estimated_item_height: f64,
    /// Extra rows rendered on each side of the viewport.
    pub buffer: usize,
    /// Free nodes kept in the pool beyond the current window size.
    pub max_pool_extra: usize,
    /// Minimum difference between an observed and a stored height for a re-measurement to count.
    pub measurement_threshold: f64,
    /// Row count at or above which the Fenwick index is used for offsets.
    pub large_dataset_threshold: usize,
}

impl VirtualizerOptions {
    pub fn new(count: usize, estimated_item_height: f64) -> Self {
        Self {
            count,
            estimated_item_height,
            buffer: 5,
            max_pool_extra: 10,
            measurement_threshold: 1.0,
            large_dataset_threshold: DEFAULT_LARGE_DATASET_THRESHOLD,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_max_pool_extra(mut self, max_pool_extra: usize) -> Self {
        self.max_pool_extra = max_pool_extra;
        self
    }

    pub fn with_measurement_threshold(mut self, threshold: f64) -> Self {
        self.measurement_threshold = threshold;
        self
    }

    pub fn with_large_dataset_threshold(mut self, threshold: usize) -> Self {
        self.large_dataset_threshold = threshold;
        self
    }

    /// Estimate used as a divisor; never zero or negative.
    pub(crate) fn sanitized_estimate(&self) -> f64 {
        if self.estimated_item_height.is_finite() && self.estimated_item_height > 0.0 {
            self.estimated_item_height
        } else {
            1.0
        }
    }
}

impl Default for VirtualizerOptions {
    fn default() -> Self {
        Self::new(0, 40.0)
    }
}

/// Task interpreter shared by the worker and the inline fallback.
pub type TaskRunner = Arc<dyn Fn(&Task) -> TaskOutput + Send + Sync>;

/// Configuration for [`crate::Executor`].
///
/// Cheap to clone: the runner is stored in an `Arc`.
#[derive(Clone)]
pub struct ExecutorOptions {
    /// Spawn a worker thread. When `false` every task runs inline.
    pub use_worker: bool,
    /// Timeout applied by [`crate::Executor::execute`] when the caller passes none.
    pub default_timeout: Duration,
    /// Spawn a fresh worker on the next call after a crash instead of staying inline.
    pub respawn_on_crash: bool,
    pub runner: TaskRunner,
}

impl ExecutorOptions {
    pub fn new() -> Self {
        Self {
            use_worker: true,
            default_timeout: Duration::from_secs(5),
            respawn_on_crash: true,
            runner: Arc::new(run_task),
        }
    }

    pub fn with_worker(mut self, use_worker: bool) -> Self {
        self.use_worker = use_worker;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_respawn_on_crash(mut self, respawn: bool) -> Self {
        self.respawn_on_crash = respawn;
        self
    }

    /// Replaces the interpreter. It must be pure for the fallback path to stay equivalent.
    pub fn with_runner(
        mut self,
        runner: impl Fn(&Task) -> TaskOutput + Send + Sync + 'static,
    ) -> Self {
        self.runner = Arc::new(runner);
        self
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ExecutorOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExecutorOptions")
            .field("use_worker", &self.use_worker)
            .field("default_timeout", &self.default_timeout)
            .field("respawn_on_crash", &self.respawn_on_crash)
            .finish_non_exhaustive()
    }
}
