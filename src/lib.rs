//! A virtualized list rendering engine.
//!
//! Renders lists of any size inside a bounded viewport while keeping the number of live render
//! nodes constant:
//!
//! - [`HeightIndex`]: Fenwick tree over row heights (`O(log n)` offsets and offset → row lookup)
//! - [`Recycler`]: bounded pool of render nodes with LRU eviction of free nodes
//! - [`Virtualizer`]: maps a scroll position to the rows to materialize and drives node reuse and
//!   height measurement
//! - [`Executor`]: runs transform/search/filter/sort over the full dataset on a worker thread, with
//!   timeouts, crash recovery, and an equivalent inline fallback
//!
//! It is UI-agnostic. The host provides:
//! - viewport size and scroll offset
//! - an item accessor and a `populate` callback
//! - a [`Container`] that positions, parents and measures nodes
#![forbid(unsafe_code)]

#[macro_use]
mod macros;

mod error;
mod executor;
mod fenwick;
mod options;
mod recycler;
mod types;
mod virtualizer;

pub mod ops;


pub use error::{Result, TaskError};
pub use executor::{Executor, Pending};
pub use fenwick::HeightIndex;
pub use ops::{
    CompareOp, Predicate, SearchHit, SearchQuery, SortSpec, Task, TaskKind, TaskOutput,
    TransformOp,
};
pub use options::{
    DEFAULT_LARGE_DATASET_THRESHOLD, ExecutorOptions, TaskRunner, VirtualizerOptions,
};
pub use recycler::{NodeFactory, NodeId, Recyclable, Recycler};
pub use types::{ExecutorState, HeightSnapshot, Mode, PoolStats, Window};
pub use virtualizer::{Container, Virtualizer};
