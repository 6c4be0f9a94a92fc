/// Inclusive index range to materialize for a scroll position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Window {
    pub start_index: usize,
    pub end_index: usize, // inclusive
    /// Number of rows in the window; `0` for an empty dataset.
    pub size: usize,
}

impl Window {
    pub const EMPTY: Self = Self {
        start_index: 0,
        end_index: 0,
        size: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn contains(&self, index: usize) -> bool {
        !self.is_empty() && index >= self.start_index && index <= self.end_index
    }

    pub fn indices(&self) -> core::ops::Range<usize> {
        if self.is_empty() {
            return 0..0;
        }
        self.start_index..self.end_index + 1
    }
}

/// Height estimation mode of a [`crate::Virtualizer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// No row has been measured; every row uses the configured estimate.
    #[default]
    Estimating,
    /// At least one measurement exists; unmeasured rows use the running average.
    Measured,
}

/// Recycler telemetry. Advisory only.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub in_use: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// Measured row heights, as exported by [`crate::Virtualizer::export_measurements`].
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeightSnapshot {
    /// `(row index, measured height)`, ascending by index.
    pub entries: Vec<(usize, f64)>,
}

/// Lifecycle state of an [`crate::Executor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExecutorState {
    /// A worker thread is running and accepting tasks.
    WorkerReady,
    /// No worker; every task runs inline on the calling thread.
    FallbackOnly,
    /// The worker died and will not be respawned; tasks run inline.
    Crashed,
    /// `destroy()` was called.
    Destroyed,
}
