//! Serializable form of a path graph.
//!
//! Vertices are listed in handle order and edges refer to them by position,
//! so an image rebuilds the same handles it was taken from. Pending timing
//! samples are not carried over; take images after a recompute pass.

use serde::{Deserialize, Serialize};

use super::{
    Edge, ExecutionTimes, MarkovOptions, PathGraph, Vertex, VertexKey, VertexProbabilities,
};
use crate::graph::VertexId;
use crate::types::{MarkovError, PartitionId, ProcId, Result};

/// Persisted vertex.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VertexImage {
    /// Vertex identity.
    pub key: VertexKey,
    /// Whether the statement only reads.
    pub read_only: bool,
    /// Lifetime traversals.
    pub total_hits: u64,
    /// Traversals since the last recompute.
    pub instance_hits: u64,
    /// Timing samples folded into `mean_micros`.
    #[serde(default)]
    pub time_samples: u64,
    /// Mean normalized execution time.
    #[serde(default)]
    pub mean_micros: f64,
    /// Probabilities from the last calculation pass.
    pub probabilities: VertexProbabilities,
}

/// Persisted edge; endpoints index into [`GraphImage::vertices`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeImage {
    /// Source vertex position.
    pub src: u32,
    /// Destination vertex position.
    pub dst: u32,
    /// Lifetime traversals.
    pub total_hits: u64,
    /// Traversals since the last recompute.
    pub instance_hits: u64,
    /// Probability from the last calculation pass.
    pub probability: f64,
}

/// Persisted path graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphImage {
    /// Modelled procedure.
    pub proc: ProcId,
    /// Base partition.
    pub base_partition: PartitionId,
    /// Folded transaction count.
    pub transaction_count: u64,
    /// Transactions since the last recompute.
    #[serde(default)]
    pub instance_transactions: u64,
    /// Completed calculation passes.
    #[serde(default)]
    pub generation: u64,
    /// Vertices in handle order.
    pub vertices: Vec<VertexImage>,
    /// Edges in handle order.
    pub edges: Vec<EdgeImage>,
}

impl PathGraph {
    /// Captures the graph's structure, counters and probabilities.
    pub fn to_image(&self) -> GraphImage {
        let graph = self.container();
        let vertices = graph
            .vertices()
            .map(|(_, v)| VertexImage {
                key: v.key_ref().clone(),
                read_only: v.read_only(),
                total_hits: v.total_hits(),
                instance_hits: v.instance_hits(),
                time_samples: v.execution_times().samples(),
                mean_micros: v.execution_times().mean_micros().unwrap_or(0.0),
                probabilities: v.probabilities(),
            })
            .collect();
        let edges = graph
            .edges()
            .map(|(_, entry)| EdgeImage {
                src: entry.src.0,
                dst: entry.dst.0,
                total_hits: entry.payload.total_hits(),
                instance_hits: entry.payload.instance_hits(),
                probability: entry.payload.probability(),
            })
            .collect();
        GraphImage {
            proc: self.procedure(),
            base_partition: self.base_partition(),
            transaction_count: self.transaction_count(),
            instance_transactions: self.instance_transactions(),
            generation: self.generation(),
            vertices,
            edges,
        }
    }

    /// Rebuilds a graph from an image.
    ///
    /// Fails with [`MarkovError::Corruption`] when the image repeats a
    /// vertex or edge, references a vertex it does not list, or lacks a
    /// marker vertex.
    pub fn from_image(image: GraphImage, options: MarkovOptions) -> Result<Self> {
        let mut graph = PathGraph::new(image.proc, image.base_partition, options);
        for v in image.vertices {
            let mut vertex = Vertex::with_key(v.key, v.read_only);
            vertex.total_hits = v.total_hits;
            vertex.instance_hits = v.instance_hits;
            vertex.times = ExecutionTimes::from_parts(v.time_samples, v.mean_micros);
            vertex.probabilities = v.probabilities;
            graph
                .restore_vertex(vertex)
                .map_err(|err| MarkovError::Corruption(err.to_string()))?;
        }
        for (idx, e) in image.edges.into_iter().enumerate() {
            let edge = Edge::from_parts(e.total_hits, e.instance_hits, e.probability);
            graph
                .container_mut()
                .add_edge(VertexId(e.src), VertexId(e.dst), edge)
                .map_err(|err| MarkovError::Corruption(format!("edge {idx}: {err}")))?;
        }
        for kind in super::MarkerKind::ALL {
            graph
                .marker(kind)
                .map_err(|err| MarkovError::Corruption(err.to_string()))?;
        }
        graph.restore_counters(
            image.transaction_count,
            image.instance_transactions,
            image.generation,
        );
        Ok(graph)
    }
}
