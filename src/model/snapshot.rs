use rustc_hash::FxHashMap;

use super::{PathContainer, VertexKey, VertexProbabilities};

/// Immutable copy of a graph's probabilities taken at the end of a
/// calculation pass.
///
/// Schedulers hold on to a snapshot while planning a transaction; later
/// passes publish new snapshots instead of mutating this one.
#[derive(Clone, Debug, Default)]
pub struct ProbabilitySnapshot {
    generation: u64,
    vertices: FxHashMap<VertexKey, VertexProbabilities>,
    transitions: FxHashMap<VertexKey, Vec<(VertexKey, f64)>>,
}

impl ProbabilitySnapshot {
    pub(crate) fn capture(graph: &PathContainer, generation: u64) -> Self {
        let mut vertices = FxHashMap::default();
        let mut transitions = FxHashMap::default();
        for (id, vertex) in graph.vertices() {
            vertices.insert(vertex.key_ref().clone(), vertex.probabilities());
            let next: Vec<(VertexKey, f64)> = graph
                .out_edges(id)
                .iter()
                .filter_map(|e| graph.edge(*e))
                .filter_map(|entry| {
                    graph
                        .vertex(entry.dst)
                        .map(|dst| (dst.key_ref().clone(), entry.payload.probability()))
                })
                .collect();
            if !next.is_empty() {
                transitions.insert(vertex.key_ref().clone(), next);
            }
        }
        Self {
            generation,
            vertices,
            transitions,
        }
    }

    /// Number of calculation passes the owning graph had completed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of vertices captured.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Whether the snapshot holds no vertices.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Probabilities of the keyed vertex.
    pub fn get(&self, key: &VertexKey) -> Option<VertexProbabilities> {
        self.vertices.get(key).copied()
    }

    /// Probabilities at transaction start.
    pub fn start(&self) -> Option<VertexProbabilities> {
        self.get(&VertexKey::START)
    }

    /// Next-step distribution out of the keyed vertex.
    pub fn transitions(&self, key: &VertexKey) -> &[(VertexKey, f64)] {
        self.transitions.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Most likely successor of the keyed vertex.
    pub fn most_likely_next(&self, key: &VertexKey) -> Option<&VertexKey> {
        self.transitions(key)
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, _)| k)
    }
}
