//! Edge probabilities and backward propagation of derived probabilities.
//!
//! Every derived quantity has the form
//! `X(v) = seed(v)` for seeded vertices, else `gate(v) * Σ P(e) * X(dst(e))`
//! over the outgoing edges of `v`. Acyclic graphs are solved with a single
//! reverse-topological sweep. Graphs with cycles fall back to Gauss-Seidel
//! iteration from zero, which converges to the least fixed point.

use std::collections::VecDeque;

use smallvec::SmallVec;
use tracing::warn;

use super::{PathContainer, Vertex};
use crate::graph::{EdgeId, VertexId};

/// Sets every edge probability to `edge.total_hits / source.total_hits`.
pub(crate) fn calculate_edge_probabilities(graph: &mut PathContainer) {
    let totals: Vec<u64> = graph.vertices().map(|(_, v)| v.total_hits()).collect();
    let sources: Vec<VertexId> = graph.edges().map(|(_, entry)| entry.src).collect();
    for (edge, src) in graph.edges_mut().zip(sources) {
        edge.set_probability(totals[src.index()]);
    }
}

pub(crate) fn unmark_all_edges(graph: &mut PathContainer) {
    for edge in graph.edges_mut() {
        edge.unmark();
    }
}

/// Kahn ordering over the graph. Each edge is marked once it has been
/// relaxed; `None` means some edges stayed unmarked because of a cycle.
pub(crate) fn topological_order(graph: &mut PathContainer) -> Option<Vec<VertexId>> {
    unmark_all_edges(graph);
    let mut in_degree: Vec<usize> = graph
        .vertex_ids()
        .map(|v| graph.in_edges(v).len())
        .collect();
    let mut ready: VecDeque<VertexId> = graph
        .vertex_ids()
        .filter(|v| in_degree[v.index()] == 0)
        .collect();
    let mut order = Vec::with_capacity(graph.vertex_count());
    while let Some(v) = ready.pop_front() {
        order.push(v);
        let out: SmallVec<[EdgeId; 8]> = graph.out_edges(v).iter().copied().collect();
        for e in out {
            let Some(dst) = graph.edge(e).map(|entry| entry.dst) else {
                continue;
            };
            if let Some(edge) = graph.edge_mut(e) {
                edge.mark();
            }
            let remaining = &mut in_degree[dst.index()];
            *remaining -= 1;
            if *remaining == 0 {
                ready.push_back(dst);
            }
        }
    }
    (order.len() == graph.vertex_count()).then_some(order)
}

/// Evaluation order for one calculation pass.
pub(crate) struct Plan {
    order: Option<Vec<VertexId>>,
    max_iterations: usize,
    tolerance: f64,
}

impl Plan {
    pub(crate) fn build(graph: &mut PathContainer, max_iterations: usize, tolerance: f64) -> Self {
        Self {
            order: topological_order(graph),
            max_iterations,
            tolerance,
        }
    }

    pub(crate) fn is_acyclic(&self) -> bool {
        self.order.is_some()
    }

    /// Solves one derived quantity for every vertex, indexed by handle.
    pub(crate) fn propagate<S, G>(&self, graph: &PathContainer, seed: S, gate: G) -> Vec<f64>
    where
        S: Fn(&Vertex) -> Option<f64>,
        G: Fn(&Vertex) -> bool,
    {
        let mut values = vec![0.0; graph.vertex_count()];
        match &self.order {
            Some(order) => {
                for &v in order.iter().rev() {
                    if let Some(vertex) = graph.vertex(v) {
                        values[v.index()] = evaluate(graph, v, vertex, &values, &seed, &gate);
                    }
                }
            }
            None => {
                for (v, vertex) in graph.vertices() {
                    if let Some(value) = seed(vertex) {
                        values[v.index()] = value;
                    }
                }
                let mut converged = false;
                for _ in 0..self.max_iterations {
                    let mut delta = 0.0f64;
                    for (v, vertex) in graph.vertices() {
                        let next = evaluate(graph, v, vertex, &values, &seed, &gate);
                        delta = delta.max((next - values[v.index()]).abs());
                        values[v.index()] = next;
                    }
                    if delta <= self.tolerance {
                        converged = true;
                        break;
                    }
                }
                if !converged {
                    warn!(
                        iterations = self.max_iterations,
                        tolerance = self.tolerance,
                        "markov.propagation.unconverged"
                    );
                }
            }
        }
        values
    }
}

fn evaluate<S, G>(
    graph: &PathContainer,
    v: VertexId,
    vertex: &Vertex,
    values: &[f64],
    seed: &S,
    gate: &G,
) -> f64
where
    S: Fn(&Vertex) -> Option<f64>,
    G: Fn(&Vertex) -> bool,
{
    if let Some(value) = seed(vertex) {
        return value;
    }
    if !gate(vertex) {
        return 0.0;
    }
    graph
        .out_edges(v)
        .iter()
        .filter_map(|e| graph.edge(*e))
        .map(|entry| entry.payload.probability() * values[entry.dst.index()])
        .sum()
}
