use super::{PathContainer, DEFAULT_VERTEX_PROPORTION};

/// Decides whether a graph's cached probabilities are stale.
///
/// Each vertex votes on its own drift (see [`super::Vertex::should_recompute`]);
/// the graph is recomputed when the share of drifting vertices reaches
/// `vertex_proportion`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RecomputePolicy {
    /// Fraction of drifting vertices required to trigger.
    pub vertex_proportion: f64,
}

impl Default for RecomputePolicy {
    fn default() -> Self {
        Self {
            vertex_proportion: DEFAULT_VERTEX_PROPORTION,
        }
    }
}

/// Outcome of evaluating a [`RecomputePolicy`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RecomputeDecision {
    /// Vertices whose traversal rate drifted beyond the tolerance.
    pub drifting: usize,
    /// Vertices inspected.
    pub vertices: usize,
    /// Whether a recompute is advised.
    pub recompute: bool,
}

impl RecomputePolicy {
    /// Creates a policy with the given trigger fraction.
    pub fn new(vertex_proportion: f64) -> Self {
        Self { vertex_proportion }
    }

    /// Counts drifting vertices and applies the trigger fraction.
    pub fn evaluate(
        &self,
        graph: &PathContainer,
        instance_count: u64,
        tolerance: f64,
        transaction_count: u64,
    ) -> RecomputeDecision {
        let vertices = graph.vertex_count();
        let drifting = graph
            .vertices()
            .filter(|(_, v)| v.should_recompute(instance_count, tolerance, transaction_count))
            .count();
        let recompute = vertices > 0 && drifting as f64 / vertices as f64 >= self.vertex_proportion;
        RecomputeDecision {
            drifting,
            vertices,
            recompute,
        }
    }
}
