use std::fmt;
use std::sync::Arc;

use super::metrics::{default_metrics, ModelMetrics};
use super::timing::AbortedTimePolicy;

/// Tolerance applied to probability conservation checks.
pub const DEFAULT_EPSILON: f64 = 1e-5;
/// Fraction of drifting vertices that triggers a recompute.
pub const DEFAULT_VERTEX_PROPORTION: f64 = 0.5;

/// Configuration options supplied when creating a [`super::PathGraph`].
#[derive(Clone)]
pub struct MarkovOptions {
    /// Tolerance for the outgoing-probability sum check.
    pub epsilon: f64,
    /// Fraction of vertices that must drift before a recompute is advised.
    pub vertex_proportion: f64,
    /// Treatment of aborted transactions during time normalization.
    pub aborted_time_policy: AbortedTimePolicy,
    /// Iteration cap for propagation over graphs containing cycles.
    pub max_fixed_point_iterations: usize,
    /// Convergence threshold for propagation over graphs containing cycles.
    pub fixed_point_tolerance: f64,
    /// Optional cap on QUERY vertices per graph.
    pub vertex_limit: Option<usize>,
    /// Metrics sink.
    pub metrics: Arc<dyn ModelMetrics>,
}

impl Default for MarkovOptions {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            vertex_proportion: DEFAULT_VERTEX_PROPORTION,
            aborted_time_policy: AbortedTimePolicy::default(),
            max_fixed_point_iterations: 1000,
            fixed_point_tolerance: 1e-9,
            vertex_limit: None,
            metrics: default_metrics(),
        }
    }
}

impl fmt::Debug for MarkovOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkovOptions")
            .field("epsilon", &self.epsilon)
            .field("vertex_proportion", &self.vertex_proportion)
            .field("aborted_time_policy", &self.aborted_time_policy)
            .field("max_fixed_point_iterations", &self.max_fixed_point_iterations)
            .field("fixed_point_tolerance", &self.fixed_point_tolerance)
            .field("vertex_limit", &self.vertex_limit)
            .finish_non_exhaustive()
    }
}

impl MarkovOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the probability conservation tolerance.
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Sets the drifting-vertex fraction that triggers a recompute.
    pub fn vertex_proportion(mut self, proportion: f64) -> Self {
        self.vertex_proportion = proportion;
        self
    }

    /// Selects how aborted transactions feed time normalization.
    pub fn aborted_time_policy(mut self, policy: AbortedTimePolicy) -> Self {
        self.aborted_time_policy = policy;
        self
    }

    /// Sets the iteration cap for cyclic propagation.
    pub fn max_fixed_point_iterations(mut self, iterations: usize) -> Self {
        self.max_fixed_point_iterations = iterations;
        self
    }

    /// Sets the convergence threshold for cyclic propagation.
    pub fn fixed_point_tolerance(mut self, tolerance: f64) -> Self {
        self.fixed_point_tolerance = tolerance;
        self
    }

    /// Caps the number of QUERY vertices per graph.
    pub fn vertex_limit(mut self, limit: usize) -> Self {
        self.vertex_limit = Some(limit);
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn ModelMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}
