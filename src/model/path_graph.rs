use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use super::probability::{self, Plan};
use super::recompute::{RecomputeDecision, RecomputePolicy};
use super::snapshot::ProbabilitySnapshot;
use super::timing::StopTimes;
use super::{
    Edge, MarkerKind, MarkovOptions, PathContainer, QueryKey, Vertex, VertexKey,
    VertexProbabilities,
};
use crate::catalog::{CanonicalMarkers, Catalog, MarkerFactory, PartitionEstimator};
use crate::graph::{EdgeId, VertexId};
use crate::trace::TransactionTrace;
use crate::types::{MarkovError, PartitionId, PartitionSet, ProcId, Result, StmtId};

/// Upper bound on findings collected by [`PathGraph::sanity_findings`].
pub const MAX_SANITY_FINDINGS: usize = 32;

/// Identity of a path graph: the procedure and the base partition.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct GraphKey {
    /// Procedure modelled by the graph.
    pub proc: ProcId,
    /// Base partition of the modelled transactions.
    pub base_partition: PartitionId,
}

impl GraphKey {
    /// Creates a key.
    pub fn new(proc: ProcId, base_partition: PartitionId) -> Self {
        Self {
            proc,
            base_partition,
        }
    }
}

/// A query resolved against the catalog and estimator, not yet applied.
struct PlannedQuery {
    key: QueryKey,
    read_only: bool,
    existing: Option<VertexId>,
    start_ts: u64,
    stop_ts: u64,
    aborted: bool,
}

/// Markov path graph for one (procedure, base partition).
///
/// Mutation follows a single-writer discipline: every method that changes
/// counters or structure takes `&mut self`, and callers sharing a graph
/// across threads wrap it (see [`crate::repository::SharedGraph`]).
#[derive(Debug)]
pub struct PathGraph {
    key: GraphKey,
    graph: PathContainer,
    markers: [Option<VertexId>; 3],
    query_vertices: usize,
    transaction_count: u64,
    instance_transactions: u64,
    /// Keys timing samples. Never rewound, so samples of distinct
    /// transactions never share a key.
    next_seq: u64,
    generation: u64,
    snapshot: Arc<ProbabilitySnapshot>,
    options: MarkovOptions,
}

impl PathGraph {
    /// Creates a graph without marker vertices. Call
    /// [`PathGraph::initialize`] before processing traces.
    pub fn new(proc: ProcId, base_partition: PartitionId, options: MarkovOptions) -> Self {
        Self {
            key: GraphKey::new(proc, base_partition),
            graph: PathContainer::new(),
            markers: [None; 3],
            query_vertices: 0,
            transaction_count: 0,
            instance_transactions: 0,
            next_seq: 0,
            generation: 0,
            snapshot: Arc::new(ProbabilitySnapshot::default()),
            options,
        }
    }

    /// Creates a graph holding the canonical marker vertices.
    pub fn with_markers(
        proc: ProcId,
        base_partition: PartitionId,
        options: MarkovOptions,
    ) -> Result<Self> {
        let mut graph = Self::new(proc, base_partition, options);
        graph.initialize(&CanonicalMarkers)?;
        Ok(graph)
    }

    /// Inserts the START, COMMIT and ABORT vertices.
    pub fn initialize(&mut self, factory: &dyn MarkerFactory) -> Result<()> {
        for kind in MarkerKind::ALL {
            let vertex = factory.marker(self.key, kind);
            if vertex.marker_kind() != Some(kind) {
                return Err(MarkovError::Invariant(format!(
                    "marker factory returned {} for {kind:?}",
                    vertex.key_ref()
                )));
            }
            self.add_vertex(vertex)?;
        }
        Ok(())
    }

    /// Inserts a vertex, caching marker handles.
    pub fn add_vertex(&mut self, vertex: Vertex) -> Result<VertexId> {
        let query = vertex.marker_kind().is_none();
        let id = self.restore_vertex(vertex)?;
        if query {
            self.options.metrics.vertex_created();
        }
        Ok(id)
    }

    /// Inserts a vertex without reporting it to metrics. Used when loading
    /// images, whose vertices were counted when first observed.
    pub(crate) fn restore_vertex(&mut self, vertex: Vertex) -> Result<VertexId> {
        let marker = vertex.marker_kind();
        if let Some(kind) = marker {
            if self.markers[kind.slot()].is_some() {
                return Err(MarkovError::DuplicateMarker(kind));
            }
        }
        let id = self.graph.add_vertex(vertex)?;
        match marker {
            Some(kind) => self.markers[kind.slot()] = Some(id),
            None => self.query_vertices += 1,
        }
        Ok(id)
    }

    /// Identity of the graph.
    pub fn key(&self) -> GraphKey {
        self.key
    }

    /// Procedure modelled by the graph.
    pub fn procedure(&self) -> ProcId {
        self.key.proc
    }

    /// Base partition of the modelled transactions.
    pub fn base_partition(&self) -> PartitionId {
        self.key.base_partition
    }

    /// Options the graph was created with.
    pub fn options(&self) -> &MarkovOptions {
        &self.options
    }

    /// Underlying container, for read-only traversal.
    pub fn container(&self) -> &PathContainer {
        &self.graph
    }

    /// Handle of a marker vertex.
    pub fn marker(&self, kind: MarkerKind) -> Result<VertexId> {
        self.markers[kind.slot()].ok_or(MarkovError::MissingMarker(kind))
    }

    /// Handle of the START marker.
    pub fn start_vertex(&self) -> Result<VertexId> {
        self.marker(MarkerKind::Start)
    }

    /// Handle of the COMMIT marker.
    pub fn commit_vertex(&self) -> Result<VertexId> {
        self.marker(MarkerKind::Commit)
    }

    /// Handle of the ABORT marker.
    pub fn abort_vertex(&self) -> Result<VertexId> {
        self.marker(MarkerKind::Abort)
    }

    /// Vertex payload.
    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.graph.vertex(id)
    }

    /// Handle of the keyed vertex.
    pub fn find_vertex(&self, key: &VertexKey) -> Option<VertexId> {
        self.graph.find_vertex(key)
    }

    /// Vertex payload by key.
    pub fn vertex_by_key(&self, key: &VertexKey) -> Option<&Vertex> {
        self.find_vertex(key).and_then(|id| self.graph.vertex(id))
    }

    /// Edge joining `src` to `dst`.
    pub fn find_edge(&self, src: VertexId, dst: VertexId) -> Option<&Edge> {
        self.graph
            .find_edge(src, dst)
            .and_then(|e| self.graph.edge(e))
            .map(|entry| &entry.payload)
    }

    /// Edge joining two keyed vertices.
    pub fn edge_between(&self, src: &VertexKey, dst: &VertexKey) -> Option<&Edge> {
        self.find_edge(self.find_vertex(src)?, self.find_vertex(dst)?)
    }

    /// Outgoing edges of a vertex.
    pub fn out_edges(&self, id: VertexId) -> &[EdgeId] {
        self.graph.out_edges(id)
    }

    /// Number of vertices, markers included.
    pub fn vertex_count(&self) -> usize {
        self.graph.vertex_count()
    }

    /// Number of QUERY vertices.
    pub fn query_vertex_count(&self) -> usize {
        self.query_vertices
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Transactions folded into the lifetime counters.
    pub fn transaction_count(&self) -> u64 {
        self.transaction_count
    }

    /// Overrides the lifetime transaction count.
    pub fn set_transaction_count(&mut self, count: u64) {
        self.transaction_count = count;
    }

    /// Transactions processed since the last recompute or reset.
    pub fn instance_transactions(&self) -> u64 {
        self.instance_transactions
    }

    /// Number of completed calculation passes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Probabilities of the keyed vertex as of the last calculation pass.
    pub fn probabilities(&self, key: &VertexKey) -> Option<VertexProbabilities> {
        self.vertex_by_key(key).map(Vertex::probabilities)
    }

    /// Snapshot published by the last calculation pass.
    pub fn snapshot(&self) -> Arc<ProbabilitySnapshot> {
        self.snapshot.clone()
    }

    /// Keys along a path returned by [`PathGraph::process_transaction`].
    pub fn path_keys(&self, path: &[VertexId]) -> Vec<VertexKey> {
        path.iter()
            .filter_map(|id| self.graph.vertex(*id))
            .map(|v| v.key_ref().clone())
            .collect()
    }

    /// Counts one traversal from `src` to `dst`, creating the edge on first
    /// use. The traversal also counts as a visit of `src`, so a vertex's hits
    /// always cover the hits of its outgoing edges.
    pub fn add_to_edge(&mut self, src: VertexId, dst: VertexId) -> Result<EdgeId> {
        if self.graph.vertex(dst).is_none() {
            return Err(MarkovError::Invariant(format!("unknown vertex {dst}")));
        }
        self.visit(src)?;
        let id = match self.graph.find_edge(src, dst) {
            Some(id) => id,
            None => {
                let id = self.graph.add_edge(src, dst, Edge::new())?;
                self.options.metrics.edge_created();
                id
            }
        };
        if let Some(edge) = self.graph.edge_mut(id) {
            edge.increment();
        }
        Ok(id)
    }

    fn visit(&mut self, id: VertexId) -> Result<&mut Vertex> {
        let vertex = self.vertex_entry(id)?;
        vertex.increment();
        Ok(vertex)
    }

    fn vertex_entry(&mut self, id: VertexId) -> Result<&mut Vertex> {
        self.graph
            .vertex_mut(id)
            .ok_or_else(|| MarkovError::Invariant(format!("unknown vertex {id}")))
    }

    /// Tallies one completed transaction into the graph and returns the
    /// realized path, START first and COMMIT or ABORT last.
    ///
    /// The trace is validated and resolved in full before any counter is
    /// touched; a rejected trace leaves the graph unchanged. Probabilities
    /// are not recomputed.
    pub fn process_transaction(
        &mut self,
        trace: &TransactionTrace,
        catalog: &dyn Catalog,
        estimator: &dyn PartitionEstimator,
    ) -> Result<Vec<VertexId>> {
        let planned = match self.plan_transaction(trace, catalog, estimator) {
            Ok(planned) => planned,
            Err(err) => {
                debug!(
                    proc = self.key.proc.0,
                    partition = self.key.base_partition.0,
                    txn = trace.txn_id,
                    error = %err,
                    "markov.trace.rejected"
                );
                self.options.metrics.transaction_rejected();
                return Err(err);
            }
        };
        self.apply_transaction(trace, planned)
    }

    fn plan_transaction(
        &self,
        trace: &TransactionTrace,
        catalog: &dyn Catalog,
        estimator: &dyn PartitionEstimator,
    ) -> Result<Vec<PlannedQuery>> {
        for kind in MarkerKind::ALL {
            self.marker(kind)?;
        }
        if trace.proc != self.key.proc {
            return Err(MarkovError::ProcedureMismatch {
                expected: self.key.proc,
                found: trace.proc,
            });
        }
        if trace.base_partition != self.key.base_partition {
            return Err(MarkovError::BasePartitionMismatch {
                expected: self.key.base_partition,
                found: trace.base_partition,
            });
        }
        if trace.stop_ts < trace.start_ts {
            return Err(MarkovError::MalformedTrace(format!(
                "transaction {} stops before it starts",
                trace.txn_id
            )));
        }
        let statements = catalog
            .statements(self.key.proc)
            .ok_or(MarkovError::UnknownProcedure(self.key.proc))?;
        let mut instance_counters: FxHashMap<StmtId, u32> =
            statements.iter().map(|s| (s.id, 0)).collect();

        let last = trace.queries.len().saturating_sub(1);
        let mut planned = Vec::with_capacity(trace.queries.len());
        let mut new_vertices = 0usize;
        for (pos, query) in trace.queries.iter().enumerate() {
            if query.aborted && pos != last {
                return Err(MarkovError::MalformedTrace(format!(
                    "transaction {} continues after aborted query {}",
                    trace.txn_id, pos
                )));
            }
            let unknown = || MarkovError::UnknownStatement {
                proc: self.key.proc,
                stmt: query.stmt,
            };
            let info = catalog.statement(self.key.proc, query.stmt).ok_or_else(unknown)?;
            let counter = instance_counters.get_mut(&query.stmt).ok_or_else(unknown)?;
            let instance = *counter;
            *counter += 1;

            let partitions = estimator
                .estimate_partitions(query, self.key.base_partition)
                .map_err(|err| MarkovError::Estimation {
                    stmt: query.stmt,
                    reason: err.to_string(),
                })?;
            if partitions.is_empty() {
                return Err(MarkovError::Estimation {
                    stmt: query.stmt,
                    reason: "empty partition set".into(),
                });
            }

            let key = QueryKey::new(query.stmt, partitions, instance);
            let existing = self.graph.find_vertex(&VertexKey::Query(key.clone()));
            if existing.is_none() {
                new_vertices += 1;
            }
            planned.push(PlannedQuery {
                key,
                read_only: info.read_only,
                existing,
                start_ts: query.start_ts,
                stop_ts: query.stop_ts,
                aborted: query.aborted,
            });
        }

        if let Some(limit) = self.options.vertex_limit {
            if self.query_vertices + new_vertices > limit {
                return Err(MarkovError::VertexLimit { limit });
            }
        }
        Ok(planned)
    }

    fn apply_transaction(
        &mut self,
        trace: &TransactionTrace,
        planned: Vec<PlannedQuery>,
    ) -> Result<Vec<VertexId>> {
        let start = self.start_vertex()?;
        let commit = self.commit_vertex()?;
        let abort = self.abort_vertex()?;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.instance_transactions += 1;

        // Non-terminal vertices are counted by the edge leaving them.
        self.vertex_entry(start)?
            .add_execution_time(seq, trace.duration_micros());
        let mut path = Vec::with_capacity(planned.len() + 2);
        path.push(start);

        let mut previous = start;
        let mut last_stop = trace.start_ts;
        let mut aborted = false;
        for query in planned {
            let id = match query.existing {
                Some(id) => id,
                None => {
                    debug!(
                        proc = self.key.proc.0,
                        partition = self.key.base_partition.0,
                        stmt = query.key.stmt.0,
                        partitions = %query.key.partitions,
                        instance = query.key.instance,
                        "markov.vertex.created"
                    );
                    self.add_vertex(Vertex::query(query.key, query.read_only))?
                }
            };
            self.add_to_edge(previous, id)?;
            self.vertex_entry(id)?
                .add_execution_time(seq, trace.stop_ts.saturating_sub(query.start_ts));
            path.push(id);
            previous = id;
            last_stop = query.stop_ts;
            if query.aborted {
                aborted = true;
            }
        }

        let terminal = if aborted { abort } else { commit };
        self.add_to_edge(previous, terminal)?;
        self.visit(terminal)?
            .add_execution_time(seq, trace.stop_ts.saturating_sub(last_stop));
        path.push(terminal);
        self.options.metrics.transaction_processed(aborted);
        Ok(path)
    }

    /// Clears the per-pass `marked` flag on every edge.
    pub fn unmark_all_edges(&mut self) {
        probability::unmark_all_edges(&mut self.graph);
    }

    /// Recomputes edge probabilities from lifetime hits, then the four
    /// derived vertex probabilities, and publishes a new snapshot.
    pub fn calculate_probabilities(&mut self) -> Result<()> {
        let base = PartitionSet::single(self.key.base_partition);
        for kind in MarkerKind::ALL {
            self.marker(kind)?;
        }

        probability::calculate_edge_probabilities(&mut self.graph);
        let plan = Plan::build(
            &mut self.graph,
            self.options.max_fixed_point_iterations,
            self.options.fixed_point_tolerance,
        );
        if !plan.is_acyclic() {
            warn!(
                proc = self.key.proc.0,
                partition = self.key.base_partition.0,
                "markov.probabilities.cyclic"
            );
        }

        let terminal = |v: &Vertex| v.is_terminal().then_some(1.0);
        let abort = plan.propagate(
            &self.graph,
            |v| match v.marker_kind() {
                Some(MarkerKind::Abort) => Some(1.0),
                Some(MarkerKind::Commit) => Some(0.0),
                _ => None,
            },
            |_| true,
        );
        let single_sited = plan.propagate(&self.graph, terminal, |v| {
            v.partitions().map_or(true, |p| p.is_subset(&base))
        });
        let read_only = plan.propagate(&self.graph, terminal, |v| v.read_only());

        let mut scopes: FxHashMap<PartitionSet, Vec<VertexId>> = FxHashMap::default();
        let mut done = vec![1.0; self.graph.vertex_count()];
        for (id, vertex) in self.graph.vertices() {
            match vertex.marker_kind() {
                Some(MarkerKind::Start) => scopes.entry(base.clone()).or_default().push(id),
                Some(_) => {}
                None => {
                    if let Some(partitions) = vertex.partitions() {
                        scopes.entry(partitions.clone()).or_default().push(id);
                    }
                }
            }
        }
        for (scope, members) in &scopes {
            let values = plan.propagate(&self.graph, terminal, |v| {
                v.partitions().map_or(true, |p| p.is_subset(scope))
            });
            for id in members {
                done[id.index()] = values[id.index()];
            }
        }

        for (idx, vertex) in self.graph.vertices_mut().enumerate() {
            vertex.probabilities = VertexProbabilities {
                abort: abort[idx].clamp(0.0, 1.0),
                single_sited: single_sited[idx].clamp(0.0, 1.0),
                done: done[idx].clamp(0.0, 1.0),
                read_only: read_only[idx].clamp(0.0, 1.0),
            };
        }
        self.generation += 1;
        self.snapshot = Arc::new(ProbabilitySnapshot::capture(&self.graph, self.generation));
        Ok(())
    }

    /// Structural and numerical violations, up to [`MAX_SANITY_FINDINGS`].
    ///
    /// Checks that no vertex has two edges to the same destination, that
    /// every edge probability lies in `[0, 1]`, and that the outgoing
    /// probabilities of every visited vertex with outgoing edges sum to one
    /// within `epsilon`. Vertices with no lifetime hits have no defined
    /// outgoing distribution and are exempt from the sum check.
    pub fn sanity_findings(&self) -> Vec<String> {
        let mut findings = Vec::new();
        for (id, vertex) in self.graph.vertices() {
            let mut seen = FxHashSet::default();
            let mut sum = 0.0;
            for &e in self.graph.out_edges(id) {
                let Some(entry) = self.graph.edge(e) else {
                    push_finding(&mut findings, format!("{} references missing edge {e}", vertex.key_ref()));
                    continue;
                };
                if !seen.insert(entry.dst) {
                    push_finding(
                        &mut findings,
                        format!("{} has more than one edge to {}", vertex.key_ref(), entry.dst),
                    );
                }
                let p = entry.payload.probability();
                if !(0.0..=1.0).contains(&p) {
                    push_finding(
                        &mut findings,
                        format!("edge {e} from {} has probability {p}", vertex.key_ref()),
                    );
                }
                sum += p;
            }
            let has_out = !self.graph.out_edges(id).is_empty();
            if has_out && vertex.total_hits() > 0 && (sum - 1.0).abs() > self.options.epsilon {
                push_finding(
                    &mut findings,
                    format!("{} outgoing probabilities sum to {sum}", vertex.key_ref()),
                );
            }
        }
        findings
    }

    /// Whether [`PathGraph::sanity_findings`] is empty. Never panics; the
    /// first finding is logged.
    pub fn is_sane(&self) -> bool {
        let findings = self.sanity_findings();
        match findings.first() {
            None => true,
            Some(first) => {
                warn!(
                    proc = self.key.proc.0,
                    partition = self.key.base_partition.0,
                    findings = findings.len(),
                    first = %first,
                    "markov.sanity.failed"
                );
                false
            }
        }
    }

    /// Zeroes instance hits on every vertex and edge and discards buffered
    /// timing samples, without folding them into lifetime counters.
    pub fn reset_counters(&mut self) {
        for vertex in self.graph.vertices_mut() {
            vertex.reset_instance_hits();
            vertex.times.clear_pending();
        }
        for edge in self.graph.edges_mut() {
            edge.reset_instance_hits();
        }
        self.instance_transactions = 0;
    }

    /// Normalizes buffered timing samples against the terminal markers'
    /// trailing latencies.
    fn normalize_times(&mut self) -> Result<()> {
        let commit = self.commit_vertex()?;
        let abort = self.abort_vertex()?;
        let committed = self
            .graph
            .vertex(commit)
            .map(|v| v.times.pending().clone())
            .unwrap_or_default();
        let aborted = self
            .graph
            .vertex(abort)
            .map(|v| v.times.pending().clone())
            .unwrap_or_default();
        let stops = StopTimes::new(committed, aborted);
        let policy = self.options.aborted_time_policy;
        for vertex in self.graph.vertices_mut() {
            if vertex.is_terminal() {
                vertex.times.fold_raw();
            } else {
                vertex.times.normalize(&stops, policy);
            }
        }
        Ok(())
    }

    /// Folds instance hits into lifetime hits and recomputes probabilities.
    ///
    /// Lifetime hits never decrease; instance hits are zero afterwards.
    pub fn recompute_graph(&mut self) -> Result<()> {
        self.normalize_times()?;
        for vertex in self.graph.vertices_mut() {
            vertex.fold_instance_hits();
        }
        for edge in self.graph.edges_mut() {
            edge.fold_instance_hits();
        }
        let folded = self.instance_transactions;
        self.transaction_count += folded;
        self.instance_transactions = 0;
        self.calculate_probabilities()?;
        debug!(
            proc = self.key.proc.0,
            partition = self.key.base_partition.0,
            folded_transactions = folded,
            transactions = self.transaction_count,
            vertices = self.graph.vertex_count(),
            edges = self.graph.edge_count(),
            generation = self.generation,
            "markov.recompute.completed"
        );
        self.options
            .metrics
            .recompute_completed(self.graph.vertex_count(), self.graph.edge_count());
        Ok(())
    }

    /// Per-vertex drift votes for the last `instance_count` transactions.
    pub fn recompute_decision(&self, instance_count: u64, tolerance: f64) -> RecomputeDecision {
        RecomputePolicy::new(self.options.vertex_proportion).evaluate(
            &self.graph,
            instance_count,
            tolerance,
            self.transaction_count,
        )
    }

    /// Whether enough vertices drifted to justify [`PathGraph::recompute_graph`].
    pub fn should_recompute(&self, instance_count: u64, tolerance: f64) -> bool {
        self.recompute_decision(instance_count, tolerance).recompute
    }

    pub(crate) fn container_mut(&mut self) -> &mut PathContainer {
        &mut self.graph
    }

    pub(crate) fn restore_counters(
        &mut self,
        transaction_count: u64,
        instance_transactions: u64,
        generation: u64,
    ) {
        self.transaction_count = transaction_count;
        self.instance_transactions = instance_transactions;
        self.generation = generation;
        self.snapshot = Arc::new(ProbabilitySnapshot::capture(&self.graph, generation));
    }
}

fn push_finding(findings: &mut Vec<String>, finding: String) {
    if findings.len() < MAX_SANITY_FINDINGS {
        findings.push(finding);
    }
}
