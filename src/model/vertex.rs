use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::Keyed;
use crate::model::timing::ExecutionTimes;
use crate::types::{PartitionSet, StmtId};

/// The three fixed vertices every path graph owns.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum MarkerKind {
    /// Transaction start.
    Start,
    /// Transaction commit.
    Commit,
    /// Transaction abort.
    Abort,
}

impl MarkerKind {
    /// Every marker kind, in cache-slot order.
    pub const ALL: [MarkerKind; 3] = [MarkerKind::Start, MarkerKind::Commit, MarkerKind::Abort];

    pub(crate) fn slot(self) -> usize {
        match self {
            MarkerKind::Start => 0,
            MarkerKind::Commit => 1,
            MarkerKind::Abort => 2,
        }
    }

    /// Whether the marker ends a transaction.
    pub fn is_terminal(self) -> bool {
        !matches!(self, MarkerKind::Start)
    }
}

/// Coarse classification of a vertex.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum VertexKind {
    /// START marker.
    Start,
    /// COMMIT marker.
    Commit,
    /// ABORT marker.
    Abort,
    /// Statement execution.
    Query,
}

/// Identity of a QUERY vertex.
///
/// The instance index separates repeated executions of the same statement
/// within a single transaction.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct QueryKey {
    /// Executed statement.
    pub stmt: StmtId,
    /// Partitions the execution touched.
    pub partitions: PartitionSet,
    /// Ordinal of this execution among the statement's executions in the transaction.
    pub instance: u32,
}

impl QueryKey {
    /// Creates a key.
    pub fn new(stmt: StmtId, partitions: PartitionSet, instance: u32) -> Self {
        Self {
            stmt,
            partitions,
            instance,
        }
    }
}

/// Identity of any vertex in a path graph.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum VertexKey {
    /// One of the marker vertices.
    Marker(MarkerKind),
    /// A statement execution.
    Query(QueryKey),
}

impl VertexKey {
    /// Key of the START marker.
    pub const START: VertexKey = VertexKey::Marker(MarkerKind::Start);
    /// Key of the COMMIT marker.
    pub const COMMIT: VertexKey = VertexKey::Marker(MarkerKind::Commit);
    /// Key of the ABORT marker.
    pub const ABORT: VertexKey = VertexKey::Marker(MarkerKind::Abort);

    /// Shorthand for a query key.
    pub fn query(stmt: StmtId, partitions: PartitionSet, instance: u32) -> Self {
        VertexKey::Query(QueryKey::new(stmt, partitions, instance))
    }

    /// Coarse kind of the keyed vertex.
    pub fn kind(&self) -> VertexKind {
        match self {
            VertexKey::Marker(MarkerKind::Start) => VertexKind::Start,
            VertexKey::Marker(MarkerKind::Commit) => VertexKind::Commit,
            VertexKey::Marker(MarkerKind::Abort) => VertexKind::Abort,
            VertexKey::Query(_) => VertexKind::Query,
        }
    }
}

impl fmt::Display for VertexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VertexKey::Marker(kind) => write!(f, "{kind:?}"),
            VertexKey::Query(q) => write!(f, "stmt{}{}#{}", q.stmt, q.partitions, q.instance),
        }
    }
}

/// Probabilities derived for a vertex by the last calculation pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexProbabilities {
    /// Probability that the transaction aborts from here.
    pub abort: f64,
    /// Probability that no partition other than the base partition is touched from here.
    pub single_sited: f64,
    /// Probability that no partition outside this vertex's partitions is touched from here.
    pub done: f64,
    /// Probability that only read-only statements execute from here.
    pub read_only: f64,
}

/// A point in a transaction's execution path.
#[derive(Clone, Debug)]
pub struct Vertex {
    key: VertexKey,
    read_only: bool,
    pub(crate) total_hits: u64,
    pub(crate) instance_hits: u64,
    pub(crate) times: ExecutionTimes,
    pub(crate) probabilities: VertexProbabilities,
}

impl Keyed for Vertex {
    type Key = VertexKey;

    fn key(&self) -> VertexKey {
        self.key.clone()
    }
}

impl Vertex {
    /// Creates a marker vertex.
    pub fn marker(kind: MarkerKind) -> Self {
        Self::with_key(VertexKey::Marker(kind), true)
    }

    /// Creates a query vertex.
    pub fn query(key: QueryKey, read_only: bool) -> Self {
        Self::with_key(VertexKey::Query(key), read_only)
    }

    pub(crate) fn with_key(key: VertexKey, read_only: bool) -> Self {
        Self {
            key,
            read_only,
            total_hits: 0,
            instance_hits: 0,
            times: ExecutionTimes::default(),
            probabilities: VertexProbabilities::default(),
        }
    }

    /// Identity of the vertex.
    pub fn key_ref(&self) -> &VertexKey {
        &self.key
    }

    /// Coarse kind.
    pub fn kind(&self) -> VertexKind {
        self.key.kind()
    }

    /// Marker kind, or `None` for query vertices.
    pub fn marker_kind(&self) -> Option<MarkerKind> {
        match &self.key {
            VertexKey::Marker(kind) => Some(*kind),
            VertexKey::Query(_) => None,
        }
    }

    /// Whether this is one of the three marker vertices.
    pub fn is_marker(&self) -> bool {
        self.marker_kind().is_some()
    }

    /// Whether this is the COMMIT or ABORT marker.
    pub fn is_terminal(&self) -> bool {
        self.marker_kind().is_some_and(MarkerKind::is_terminal)
    }

    /// Query identity, or `None` for markers.
    pub fn query_key(&self) -> Option<&QueryKey> {
        match &self.key {
            VertexKey::Query(q) => Some(q),
            VertexKey::Marker(_) => None,
        }
    }

    /// Executed statement.
    pub fn statement(&self) -> Option<StmtId> {
        self.query_key().map(|q| q.stmt)
    }

    /// Partitions touched by the statement execution.
    pub fn partitions(&self) -> Option<&PartitionSet> {
        self.query_key().map(|q| &q.partitions)
    }

    /// Query-instance index.
    pub fn instance_index(&self) -> Option<u32> {
        self.query_key().map(|q| q.instance)
    }

    /// Whether the statement only reads. Markers count as read-only.
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Lifetime traversals folded in by recompute passes.
    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    /// Traversals since the last recompute or reset.
    pub fn instance_hits(&self) -> u64 {
        self.instance_hits
    }

    /// Records one traversal.
    pub fn increment(&mut self) {
        self.instance_hits += 1;
    }

    /// Buffers an execution-time sample for transaction sequence `seq`.
    pub fn add_execution_time(&mut self, seq: u64, micros: u64) {
        self.times.record(seq, micros);
    }

    /// Execution-time statistics.
    pub fn execution_times(&self) -> &ExecutionTimes {
        &self.times
    }

    /// All derived probabilities.
    pub fn probabilities(&self) -> VertexProbabilities {
        self.probabilities
    }

    /// Probability of ending in ABORT.
    pub fn abort_probability(&self) -> f64 {
        self.probabilities.abort
    }

    /// Probability of staying on the base partition.
    pub fn single_sited_probability(&self) -> f64 {
        self.probabilities.single_sited
    }

    /// Probability that no further partitions are touched.
    pub fn done_probability(&self) -> f64 {
        self.probabilities.done
    }

    /// Probability that no writes follow.
    pub fn read_only_probability(&self) -> f64 {
        self.probabilities.read_only
    }

    /// Whether this vertex's traversal rate over the last `instance_count`
    /// transactions has drifted more than `tolerance` away from the rate
    /// predicted by its lifetime hits over `transaction_count` transactions.
    pub fn should_recompute(&self, instance_count: u64, tolerance: f64, transaction_count: u64) -> bool {
        if instance_count == 0 {
            return false;
        }
        let expected_rate = if transaction_count == 0 {
            0.0
        } else {
            self.total_hits as f64 / transaction_count as f64
        };
        let deviation = (self.instance_hits as f64 - expected_rate * instance_count as f64).abs();
        deviation > tolerance * instance_count as f64
    }

    pub(crate) fn fold_instance_hits(&mut self) {
        self.total_hits += self.instance_hits;
        self.instance_hits = 0;
    }

    pub(crate) fn reset_instance_hits(&mut self) {
        self.instance_hits = 0;
    }
}
