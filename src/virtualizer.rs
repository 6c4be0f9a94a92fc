use core::cmp;
use std::collections::HashMap;

use crate::fenwick::HeightIndex;
use crate::recycler::{NodeId, Recyclable, Recycler};
use crate::{HeightSnapshot, Mode, PoolStats, VirtualizerOptions, Window};

/// Host-side render surface for one virtualized list.
///
/// The engine never touches UI objects directly: it hands pooled nodes to the container and asks
/// it for their measured heights.
pub trait Container<N> {
    /// Moves the rendered block so its first row sits at `offset` in list coordinates.
    fn translate(&mut self, offset: f64);

    /// Replaces the container's children with `children`, in row order.
    fn replace_children(&mut self, children: &[(usize, &N)]);

    /// Observed height of a rendered node.
    fn measure(&self, node: &N) -> f64;
}

/// Measured heights and measured-row counts, kept as two parallel Fenwick trees.
///
/// Offsets blend both: `measured(0..i) + unmeasured(0..i) * average_height`, so the running
/// average can move without rebuilding the trees.
#[derive(Clone, Debug)]
struct BlendedIndex {
    heights: HeightIndex,
    counts: HeightIndex,
}

impl BlendedIndex {
    fn new(len: usize) -> Self {
        Self {
            heights: HeightIndex::new(len),
            counts: HeightIndex::new(len),
        }
    }

    fn from_records(len: usize, records: &HashMap<usize, f64>) -> Self {
        let mut heights = vec![0.0; len];
        let mut counts = vec![0.0; len];
        for (&i, &h) in records {
            if i < len {
                heights[i] = h;
                counts[i] = 1.0;
            }
        }
        Self {
            heights: HeightIndex::from_values(&heights),
            counts: HeightIndex::from_values(&counts),
        }
    }

    fn resize(&mut self, len: usize) {
        self.heights.resize(len);
        self.counts.resize(len);
    }

    fn reset(&mut self) {
        self.heights.reset();
        self.counts.reset();
    }

    fn offset(&self, fill: f64, count: usize) -> f64 {
        self.heights.blended_prefix(&self.counts, fill, count)
    }

    fn row_at(&self, fill: f64, offset: f64) -> usize {
        self.heights.row_at_blended(&self.counts, fill, offset)
    }
}

/// Render window calculator and node driver for one list surface.
///
/// Single-threaded: owned and mutated by the UI thread.
pub struct Virtualizer<N> {
    options: VirtualizerOptions,
    recycler: Recycler<N>,
    active: HashMap<usize, NodeId>,
    heights: HashMap<usize, f64>,
    measured_total: f64,
    average_height: f64,
    mode: Mode,
    index: Option<BlendedIndex>,
    pending_measure: Vec<usize>,
    window: Window,
}

impl<N: Recyclable> Virtualizer<N> {
    /// Creates a virtualizer; `factory` builds render nodes on pool misses.
    pub fn new(options: VirtualizerOptions, factory: impl FnMut() -> N + 'static) -> Self {
        vdebug!(
            count = options.count,
            estimated_item_height = options.estimated_item_height,
            buffer = options.buffer,
            "Virtualizer::new"
        );
        let index = (options.count >= options.large_dataset_threshold)
            .then(|| BlendedIndex::new(options.count));
        Self {
            recycler: Recycler::new(options.max_pool_extra, factory),
            active: HashMap::new(),
            heights: HashMap::new(),
            measured_total: 0.0,
            average_height: options.sanitized_estimate(),
            mode: Mode::Estimating,
            index,
            pending_measure: Vec::new(),
            window: Window::EMPTY,
            options,
        }
    }

    pub fn options(&self) -> &VirtualizerOptions {
        &self.options
    }

    pub fn count(&self) -> usize {
        self.options.count
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn average_height(&self) -> f64 {
        self.average_height
    }

    /// Whether offsets are served by the Fenwick index rather than a linear scan.
    pub fn uses_height_index(&self) -> bool {
        self.index.is_some()
    }

    /// Last window returned by [`Self::compute_window`].
    pub fn window(&self) -> Window {
        self.window
    }

    pub fn measured_height(&self, index: usize) -> Option<f64> {
        self.heights.get(&index).copied()
    }

    pub fn measured_count(&self) -> usize {
        self.heights.len()
    }

    /// Height used for `index`: its measurement, else the running average.
    pub fn row_height(&self, index: usize) -> f64 {
        self.measured_height(index).unwrap_or(self.average_height)
    }

    /// Maps a scroll position to the inclusive range of rows to materialize.
    ///
    /// Negative or NaN offsets clamp to `0`; offsets past the end clamp to the last full viewport,
    /// `total_size() - viewport_size`.
    /// Also retunes the node pool to `window size + max_pool_extra`.
    pub fn compute_window(&mut self, scroll_offset: f64, viewport_size: f64) -> Window {
        let count = self.options.count;
        let extra = self.options.max_pool_extra;
        if count == 0 {
            self.window = Window::EMPTY;
            self.recycler.set_max_size(extra);
            return self.window;
        }

        let avg = self.average_height;
        let viewport = clamp_non_negative(viewport_size);
        let max_offset = clamp_non_negative(self.total_size() - viewport);
        let offset = clamp_non_negative(scroll_offset).min(max_offset);
        let buffer = self.options.buffer;
        let last = count - 1;

        // `as usize` saturates on overflow.
        let first_visible = (offset / avg).floor() as usize;
        let last_visible = ((offset + viewport) / avg).ceil() as usize;

        let start_index = cmp::min(first_visible.saturating_sub(buffer), last);
        let end_index = cmp::max(
            cmp::min(last_visible.saturating_add(buffer), last),
            start_index,
        );
        let size = end_index - start_index + 1;

        self.window = Window {
            start_index,
            end_index,
            size,
        };
        self.recycler.set_max_size(size.saturating_add(extra));
        vtrace!(
            scroll_offset,
            viewport_size,
            start_index,
            end_index,
            "compute_window"
        );
        self.window
    }

    /// Pixel offset of the top of row `index` (sum of the heights of rows `0..index`).
    ///
    /// Indexes past the end clamp to `count`, yielding the total size.
    pub fn cumulative_offset(&self, index: usize) -> f64 {
        let index = cmp::min(index, self.options.count);
        let avg = self.average_height;
        match &self.index {
            Some(idx) => idx.offset(avg, index),
            None => {
                let deviation: f64 = self
                    .heights
                    .iter()
                    .filter(|(i, _)| **i < index)
                    .map(|(_, h)| h - avg)
                    .sum();
                index as f64 * avg + deviation
            }
        }
    }

    pub fn total_size(&self) -> f64 {
        self.cumulative_offset(self.options.count)
    }

    /// Row covering the pixel at `offset`, clamped to the valid range.
    pub fn index_at_offset(&self, offset: f64) -> Option<usize> {
        let count = self.options.count;
        if count == 0 {
            return None;
        }
        let offset = clamp_non_negative(offset);
        if let Some(idx) = &self.index {
            return Some(idx.row_at(self.average_height, offset));
        }

        let mut end = 0.0;
        for i in 0..count {
            end += self.row_height(i);
            if end > offset {
                return Some(i);
            }
        }
        Some(count - 1)
    }

    /// Materializes rows `start_index..=end_index`.
    ///
    /// Rows outside the range release their nodes first, so the pool can hand them to the new
    /// rows. Every row in range gets a node (reusing the one it already holds), is populated with
    /// `item_at(index)`, and is queued for [`Self::measure_rendered`]. The container is then
    /// translated to the first row's offset and given the rendered children.
    pub fn render<T, C: Container<N>>(
        &mut self,
        start_index: usize,
        end_index: usize,
        mut item_at: impl FnMut(usize) -> T,
        mut populate: impl FnMut(&mut N, T, usize),
        container: &mut C,
    ) {
        let count = self.options.count;
        if count == 0 || start_index > end_index || start_index >= count {
            self.release_all();
            self.pending_measure.clear();
            container.replace_children(&[]);
            return;
        }
        let end_index = cmp::min(end_index, count - 1);

        self.release_outside(start_index, end_index);
        self.pending_measure.clear();

        for i in start_index..=end_index {
            let id = match self.active.get(&i) {
                Some(&id) => id,
                None => {
                    let id = self.recycler.acquire();
                    self.active.insert(i, id);
                    id
                }
            };
            if let Some(node) = self.recycler.get_mut(id) {
                populate(node, item_at(i), i);
            }
            self.pending_measure.push(i);
        }

        container.translate(self.cumulative_offset(start_index));

        let children: Vec<(usize, &N)> = (start_index..=end_index)
            .filter_map(|i| {
                let id = *self.active.get(&i)?;
                self.recycler.get(id).map(|node| (i, node))
            })
            .collect();
        container.replace_children(&children);
    }

    /// Measures every row queued by the last [`Self::render`] and feeds
    /// [`Self::measure_on_appear`]. Call after the host has laid the nodes out.
    ///
    /// Returns the number of rows whose stored height changed.
    pub fn measure_rendered<C: Container<N>>(&mut self, container: &C) -> usize {
        let pending = core::mem::take(&mut self.pending_measure);
        let mut changed = 0usize;
        for index in pending {
            let observed = {
                let Some(&id) = self.active.get(&index) else {
                    continue;
                };
                let Some(node) = self.recycler.get(id) else {
                    continue;
                };
                container.measure(node)
            };
            if self.measure_on_appear(index, observed) {
                changed += 1;
            }
        }
        changed
    }

    /// Records an observed height for `index`.
    ///
    /// Ignored unless it differs from the stored height (or the running average for unmeasured
    /// rows) by more than `measurement_threshold`. Returns whether the record changed.
    pub fn measure_on_appear(&mut self, index: usize, observed: f64) -> bool {
        if index >= self.options.count || !observed.is_finite() || observed < 0.0 {
            return false;
        }
        let stored = self.heights.get(&index).copied();
        let reference = stored.unwrap_or(self.average_height);
        if (observed - reference).abs() <= self.options.measurement_threshold {
            return false;
        }

        self.heights.insert(index, observed);
        match stored {
            Some(old) => {
                self.measured_total += observed - old;
                if let Some(idx) = &mut self.index {
                    idx.heights.update(index, old, observed);
                }
            }
            None => {
                self.measured_total += observed;
                if let Some(idx) = &mut self.index {
                    idx.heights.add(index, observed);
                    idx.counts.add(index, 1.0);
                }
            }
        }
        self.refresh_average();
        vtrace!(
            index,
            observed,
            average = self.average_height,
            "measure_on_appear"
        );
        true
    }

    /// Changes the row count.
    ///
    /// Measurements below the new length survive; the rest are dropped. The Fenwick index is
    /// activated when the new length reaches `large_dataset_threshold` and dropped below it.
    /// Rows past the new end release their nodes.
    pub fn set_items_length(&mut self, new_len: usize) {
        let prev = self.options.count;
        if prev == new_len {
            return;
        }
        self.options.count = new_len;

        if new_len < prev {
            self.heights.retain(|&i, _| i < new_len);
            self.recompute_totals();
            self.pending_measure.retain(|&i| i < new_len);
            let stale: Vec<usize> = self
                .active
                .keys()
                .copied()
                .filter(|&i| i >= new_len)
                .collect();
            for i in stale {
                if let Some(id) = self.active.remove(&i) {
                    self.recycler.release(id);
                }
            }
        }

        if new_len >= self.options.large_dataset_threshold {
            if let Some(idx) = &mut self.index {
                idx.resize(new_len);
            } else {
                self.index = Some(BlendedIndex::from_records(new_len, &self.heights));
            }
        } else {
            self.index = None;
        }

        vdebug!(
            prev,
            new_len,
            measured = self.heights.len(),
            indexed = self.index.is_some(),
            "set_items_length"
        );
    }

    /// Releases every node and forgets all measurements.
    pub fn destroy(&mut self) {
        self.recycler.clear();
        self.active.clear();
        self.heights.clear();
        self.pending_measure.clear();
        self.window = Window::EMPTY;
        if let Some(idx) = &mut self.index {
            idx.reset();
        }
        self.recompute_totals();
        vdebug!(count = self.options.count, "Virtualizer::destroy");
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.recycler.stats()
    }

    pub fn reset_pool_stats(&mut self) {
        self.recycler.reset_stats();
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.active.contains_key(&index)
    }

    /// Rows currently holding a node, ascending.
    pub fn active_indices(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self.active.keys().copied().collect();
        out.sort_unstable();
        out
    }

    pub fn node_for(&self, index: usize) -> Option<&N> {
        let id = *self.active.get(&index)?;
        self.recycler.get(id)
    }

    /// Releases the node of a single row. No-op when the row holds none.
    pub fn release_node(&mut self, index: usize) {
        if let Some(id) = self.active.remove(&index) {
            self.recycler.release(id);
        }
    }

    pub fn export_measurements(&self) -> HeightSnapshot {
        let mut entries: Vec<(usize, f64)> = self.heights.iter().map(|(&i, &h)| (i, h)).collect();
        entries.sort_unstable_by_key(|&(i, _)| i);
        HeightSnapshot { entries }
    }

    /// Replaces all measurements. Entries past `count` or with invalid heights are ignored.
    pub fn import_measurements(&mut self, snapshot: &HeightSnapshot) {
        let count = self.options.count;
        self.heights = snapshot
            .entries
            .iter()
            .copied()
            .filter(|&(i, h)| i < count && h.is_finite() && h >= 0.0)
            .collect();
        if self.index.is_some() {
            self.index = Some(BlendedIndex::from_records(count, &self.heights));
        }
        self.recompute_totals();
        vdebug!(entries = self.heights.len(), "import_measurements");
    }

    fn release_outside(&mut self, start_index: usize, end_index: usize) {
        let stale: Vec<usize> = self
            .active
            .keys()
            .copied()
            .filter(|&i| i < start_index || i > end_index)
            .collect();
        for i in stale {
            self.release_node(i);
        }
    }

    fn release_all(&mut self) {
        for (_, id) in self.active.drain() {
            self.recycler.release(id);
        }
    }

    fn recompute_totals(&mut self) {
        self.measured_total = self.heights.values().sum();
        self.refresh_average();
    }

    fn refresh_average(&mut self) {
        if self.heights.is_empty() {
            self.mode = Mode::Estimating;
            self.average_height = self.options.sanitized_estimate();
        } else {
            self.mode = Mode::Measured;
            let avg = self.measured_total / self.heights.len() as f64;
            // All-zero measurements would make the window math divide by zero.
            self.average_height = if avg > 0.0 {
                avg
            } else {
                self.options.sanitized_estimate()
            };
        }
    }
}

impl<N> core::fmt::Debug for Virtualizer<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Virtualizer")
            .field("options", &self.options)
            .field("mode", &self.mode)
            .field("average_height", &self.average_height)
            .field("measured", &self.heights.len())
            .field("active", &self.active.len())
            .field("indexed", &self.index.is_some())
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

fn clamp_non_negative(v: f64) -> f64 {
    if v.is_nan() || v <= 0.0 {
        0.0
    } else {
        v.min(f64::MAX)
    }
}
