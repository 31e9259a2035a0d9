//! Transaction path model.
//!
//! One [`PathGraph`] exists per (procedure, base partition). Completed
//! transaction traces are tallied into it online, and a batched recompute
//! pass turns the tallies into per-vertex probabilities that schedulers
//! read through an immutable [`ProbabilitySnapshot`].

mod edge;
mod image;
mod metrics;
mod options;
mod path_graph;
mod probability;
mod recompute;
mod snapshot;
mod timing;
mod vertex;

pub use edge::Edge;
pub use image::{EdgeImage, GraphImage, VertexImage};
pub use metrics::{CounterMetrics, ModelMetrics, NoopMetrics};
pub use options::{MarkovOptions, DEFAULT_EPSILON, DEFAULT_VERTEX_PROPORTION};
pub use path_graph::{GraphKey, PathGraph, MAX_SANITY_FINDINGS};
pub use recompute::{RecomputeDecision, RecomputePolicy};
pub use snapshot::ProbabilitySnapshot;
pub use timing::{AbortedTimePolicy, ExecutionTimes};
pub use vertex::{MarkerKind, QueryKey, Vertex, VertexKey, VertexKind, VertexProbabilities};

use crate::graph::DirectedGraph;

/// Container type underlying every [`PathGraph`].
pub type PathContainer = DirectedGraph<Vertex, Edge>;
