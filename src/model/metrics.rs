use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hooks for observing path-model activity.
///
/// Implementations must be cheap; they are invoked on the online
/// trace-processing path.
pub trait ModelMetrics: Send + Sync {
    /// A query vertex was created.
    fn vertex_created(&self);

    /// A transition edge was created.
    fn edge_created(&self);

    /// A trace was applied to a graph.
    ///
    /// # Parameters
    /// * `aborted` - Whether the walk terminated at the ABORT marker.
    fn transaction_processed(&self, aborted: bool);

    /// A trace was rejected before mutating any graph.
    fn transaction_rejected(&self);

    /// A recompute pass finished over a graph of the given size.
    fn recompute_completed(&self, vertices: usize, edges: usize);
}

/// A no-op implementation of [`ModelMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl ModelMetrics for NoopMetrics {
    fn vertex_created(&self) {}
    fn edge_created(&self) {}
    fn transaction_processed(&self, _aborted: bool) {}
    fn transaction_rejected(&self) {}
    fn recompute_completed(&self, _vertices: usize, _edges: usize) {}
}

/// A thread-safe counter-based implementation of [`ModelMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of query vertices created.
    pub vertices_created: AtomicU64,

    /// Number of edges created.
    pub edges_created: AtomicU64,

    /// Number of traces that ended in COMMIT.
    pub transactions_committed: AtomicU64,

    /// Number of traces that ended in ABORT.
    pub transactions_aborted: AtomicU64,

    /// Number of rejected traces.
    pub transactions_rejected: AtomicU64,

    /// Number of recompute passes.
    pub recomputes: AtomicU64,
}

impl ModelMetrics for CounterMetrics {
    fn vertex_created(&self) {
        self.vertices_created.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_created(&self) {
        self.edges_created.fetch_add(1, Ordering::Relaxed);
    }

    fn transaction_processed(&self, aborted: bool) {
        if aborted {
            self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn transaction_rejected(&self) {
        self.transactions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn recompute_completed(&self, _vertices: usize, _edges: usize) {
        self.recomputes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the shared no-op metrics sink.
pub fn default_metrics() -> Arc<dyn ModelMetrics> {
    Arc::new(NoopMetrics)
}
