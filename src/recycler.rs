//! Bounded pool of reusable render nodes.
//!
//! Acquire is a linear scan for the first free slot; pools stay close to the window size, so the
//! scan is short. On a full miss the factory creates a node and the pool evicts the
//! least-recently-used free node if it grew past `max_size`. When every node is in use the pool
//! grows past the bound until the next release/`set_max_size` brings it back.

use crate::PoolStats;

/// Cleanup tiers for a pooled render node.
pub trait Recyclable {
    /// Cheap reset before reuse: clear visible content and per-row state.
    fn reset(&mut self);

    /// Full teardown before the node is dropped: detach listeners and any attached behavior.
    ///
    /// Defaults to [`Recyclable::reset`].
    fn teardown(&mut self) {
        self.reset();
    }
}

/// Stable identity of a pooled node. Never reused within one recycler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(u64);

impl NodeId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

struct PoolNode<N> {
    id: NodeId,
    node: N,
    last_used: u64,
    in_use: bool,
}

/// Node factory invoked on pool misses.
pub type NodeFactory<N> = Box<dyn FnMut() -> N>;

pub struct Recycler<N> {
    nodes: Vec<PoolNode<N>>,
    factory: NodeFactory<N>,
    max_size: usize,
    next_id: u64,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<N: Recyclable> Recycler<N> {
    pub fn new(max_size: usize, factory: impl FnMut() -> N + 'static) -> Self {
        Self {
            nodes: Vec::new(),
            factory: Box::new(factory),
            max_size,
            next_id: 0,
            clock: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock = self.clock.wrapping_add(1);
        self.clock
    }

    pub fn acquire(&mut self) -> NodeId {
        let now = self.tick();
        if let Some(slot) = self.nodes.iter_mut().find(|n| !n.in_use) {
            slot.in_use = true;
            slot.last_used = now;
            self.hits += 1;
            return slot.id;
        }

        self.misses += 1;
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let node = (self.factory)();
        self.nodes.push(PoolNode {
            id,
            node,
            last_used: now,
            in_use: true,
        });
        self.evict_to(self.max_size);
        id
    }

    /// Marks the node free and resets it immediately. Unknown or already-free ids are a no-op.
    pub fn release(&mut self, id: NodeId) {
        let now = self.tick();
        let Some(slot) = self.nodes.iter_mut().find(|n| n.id == id) else {
            return;
        };
        if !slot.in_use {
            return;
        }
        slot.node.reset();
        slot.in_use = false;
        slot.last_used = now;
        self.evict_to(self.max_size);
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to(max_size);
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Tears down every node and empties the pool. Stats are kept.
    pub fn clear(&mut self) {
        for mut slot in self.nodes.drain(..) {
            slot.node.teardown();
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&N> {
        self.nodes.iter().find(|n| n.id == id).map(|n| &n.node)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut N> {
        self.nodes.iter_mut().find(|n| n.id == id).map(|n| &mut n.node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        let total = self.nodes.len();
        let in_use = self.nodes.iter().filter(|n| n.in_use).count();
        let lookups = self.hits + self.misses;
        PoolStats {
            total,
            available: total - in_use,
            in_use,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }

    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }

    fn evict_to(&mut self, bound: usize) {
        while self.nodes.len() > bound {
            let victim = self
                .nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| !n.in_use)
                .min_by_key(|(_, n)| n.last_used)
                .map(|(i, _)| i);
            let Some(i) = victim else {
                // Everything is in use; the pool stays over bound until a release.
                return;
            };
            let mut slot = self.nodes.remove(i);
            slot.node.teardown();
            self.evictions += 1;
            vtrace!(id = slot.id.0, len = self.nodes.len(), "Recycler: evicted");
        }
    }
}

impl<N> core::fmt::Debug for Recycler<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Recycler")
            .field("len", &self.nodes.len())
            .field("max_size", &self.max_size)
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .field("evictions", &self.evictions)
            .finish_non_exhaustive()
    }
}
