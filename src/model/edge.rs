/// Directed transition between two vertices of a path graph.
#[derive(Clone, Debug, Default)]
pub struct Edge {
    pub(crate) total_hits: u64,
    pub(crate) instance_hits: u64,
    pub(crate) probability: f64,
    pub(crate) marked: bool,
}

impl Edge {
    /// Creates an edge with no traversals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores an edge from persisted counters.
    pub fn from_parts(total_hits: u64, instance_hits: u64, probability: f64) -> Self {
        Self {
            total_hits,
            instance_hits,
            probability,
            marked: false,
        }
    }

    /// Lifetime traversals folded in by recompute passes.
    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    /// Traversals since the last recompute or reset.
    pub fn instance_hits(&self) -> u64 {
        self.instance_hits
    }

    /// Probability computed by the last calculation pass.
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Whether the edge was consumed by the current calculation pass.
    pub fn is_marked(&self) -> bool {
        self.marked
    }

    /// Records one traversal.
    pub fn increment(&mut self) {
        self.instance_hits += 1;
    }

    pub(crate) fn mark(&mut self) {
        self.marked = true;
    }

    pub(crate) fn unmark(&mut self) {
        self.marked = false;
    }

    /// Sets the probability from the source vertex's lifetime hits. A source
    /// that was never visited yields probability 0.
    pub(crate) fn set_probability(&mut self, source_total_hits: u64) {
        self.probability = if source_total_hits == 0 {
            0.0
        } else {
            self.total_hits as f64 / source_total_hits as f64
        };
    }

    pub(crate) fn fold_instance_hits(&mut self) {
        self.total_hits += self.instance_hits;
        self.instance_hits = 0;
    }

    pub(crate) fn reset_instance_hits(&mut self) {
        self.instance_hits = 0;
    }
}
