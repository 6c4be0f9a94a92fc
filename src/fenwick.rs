use core::cmp;

/// Cumulative row-height index backed by a Fenwick (binary indexed) tree.
///
/// Point updates and prefix queries run in `O(log n)`. Indexes are 0-based in the public API and
/// 1-based in the backing array. Callers validate indexes against [`HeightIndex::len`]; the tree
/// only ignores writes past its backing array.
#[derive(Clone, Debug, Default)]
pub struct HeightIndex {
    tree: Vec<f64>, // 1-indexed
    max_bit: usize,
}

impl HeightIndex {
    pub fn new(len: usize) -> Self {
        Self {
            tree: vec![0.0; len + 1],
            max_bit: highest_power_of_two_leq(len),
        }
    }

    /// Builds the tree from per-row values in `O(n)`.
    pub fn from_values(values: &[f64]) -> Self {
        let n = values.len();
        let mut tree = vec![0.0; n + 1];
        for i in 1..=n {
            tree[i] += values[i - 1];
            let j = i + lsb(i);
            if j <= n {
                tree[j] += tree[i];
            }
        }
        Self {
            tree,
            max_bit: highest_power_of_two_leq(n),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&mut self, index: usize, delta: f64) {
        let n = self.len();
        if index >= n || delta == 0.0 {
            return;
        }
        let mut i = index + 1;
        while i <= n {
            self.tree[i] += delta;
            i += lsb(i);
        }
    }

    /// Replaces `old_value` with `new_value` at `index`.
    pub fn update(&mut self, index: usize, old_value: f64, new_value: f64) {
        self.add(index, new_value - old_value);
    }

    /// Sum of the first `count` values (indexes `0..count`).
    pub fn prefix_sum(&self, count: usize) -> f64 {
        let mut i = cmp::min(count, self.len());
        let mut sum = 0.0;
        while i > 0 {
            sum += self.tree[i];
            i &= i - 1;
        }
        sum
    }

    /// Inclusive prefix sum over `0..=index`.
    ///
    /// `sum(None)` is the empty prefix and always `0.0`.
    pub fn sum(&self, index: impl Into<Option<usize>>) -> f64 {
        match index.into() {
            Some(i) => self.prefix_sum(i.saturating_add(1)),
            None => 0.0,
        }
    }

    /// Sum over `l..=r`; `0.0` when `l > r`.
    pub fn range_sum(&self, l: usize, r: usize) -> f64 {
        if l > r {
            return 0.0;
        }
        self.prefix_sum(r.saturating_add(1)) - self.prefix_sum(l)
    }

    pub fn total(&self) -> f64 {
        self.prefix_sum(self.len())
    }

    /// Value stored at a single index.
    pub fn get(&self, index: usize) -> f64 {
        self.range_sum(index, index)
    }

    /// Smallest index whose inclusive prefix sum is `>= target`.
    ///
    /// Returns `0` for `target <= 0` and clamps to the last index when `target` exceeds the total.
    pub fn lower_bound(&self, target: f64) -> usize {
        let n = self.len();
        if n == 0 || target <= 0.0 {
            return 0;
        }

        let mut idx = 0usize;
        let mut remaining = target;
        let mut bit = self.max_bit;
        while bit != 0 {
            let next = idx + bit;
            if next <= n && self.tree[next] < remaining {
                remaining -= self.tree[next];
                idx = next;
            }
            bit >>= 1;
        }
        cmp::min(idx, n - 1)
    }

    /// Descent over two parallel trees: `self` holds measured heights and `counts` holds `1.0`
    /// per measured row. Unmeasured rows contribute `fill` each.
    ///
    /// Returns the smallest row whose blended inclusive prefix is `> target`, i.e. the row that
    /// covers the pixel at `target`. Clamped to the last row.
    pub(crate) fn row_at_blended(&self, counts: &HeightIndex, fill: f64, target: f64) -> usize {
        let n = self.len();
        debug_assert_eq!(n, counts.len(), "blended trees must have equal length");
        if n == 0 || target <= 0.0 {
            return 0;
        }

        let mut idx = 0usize;
        let mut remaining = target;
        let mut bit = self.max_bit;
        while bit != 0 {
            let next = idx + bit;
            if next <= n {
                // Node `next` covers exactly `bit` rows at this point of the descent.
                let block = self.tree[next] + (bit as f64 - counts.tree[next]) * fill;
                if block <= remaining {
                    remaining -= block;
                    idx = next;
                }
            }
            bit >>= 1;
        }
        cmp::min(idx, n - 1)
    }

    /// Blended exclusive prefix over `0..count`, see [`Self::row_at_blended`].
    pub(crate) fn blended_prefix(&self, counts: &HeightIndex, fill: f64, count: usize) -> f64 {
        let count = cmp::min(count, self.len());
        let measured_rows = counts.prefix_sum(count);
        self.prefix_sum(count) + (count as f64 - measured_rows) * fill
    }

    /// Resizes to `new_len`, keeping values below the overlap and zero-filling new rows.
    pub fn resize(&mut self, new_len: usize) {
        let cur = self.len();
        if new_len == cur {
            return;
        }
        let mut values = self.values();
        values.resize(new_len, 0.0);
        *self = Self::from_values(&values);
    }

    pub fn reset(&mut self) {
        self.tree.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Recovers per-row values in `O(n)` by undoing the build pass in reverse.
    fn values(&self) -> Vec<f64> {
        let n = self.len();
        let mut t = self.tree.clone();
        for i in (1..=n).rev() {
            let j = i + lsb(i);
            if j <= n {
                t[j] -= t[i];
            }
        }
        t.remove(0);
        t
    }
}

fn lsb(i: usize) -> usize {
    i & i.wrapping_neg()
}

fn highest_power_of_two_leq(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let mut p = 1usize;
    while p <= n / 2 {
        p <<= 1;
    }
    p
}
