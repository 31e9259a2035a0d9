//! Contracts consumed from the surrounding engine.
//!
//! The model never inspects schemas or routes queries itself. It asks a
//! [`Catalog`] which statements a procedure owns, a [`PartitionEstimator`]
//! which partitions a query touched, and a [`MarkerFactory`] for the
//! canonical marker vertices of a new graph.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{GraphKey, MarkerKind, Vertex};
use crate::trace::QueryTrace;
use crate::types::{PartitionId, PartitionSet, ProcId, StmtId};

/// Catalog metadata for one statement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementInfo {
    /// Statement identifier.
    pub id: StmtId,
    /// Statement name, for diagnostics.
    pub name: String,
    /// Whether the statement never writes.
    pub read_only: bool,
}

impl StatementInfo {
    /// Creates statement metadata.
    pub fn new(id: StmtId, name: impl Into<String>, read_only: bool) -> Self {
        Self {
            id,
            name: name.into(),
            read_only,
        }
    }
}

/// Schema lookup service.
pub trait Catalog: Send + Sync {
    /// Statements owned by the procedure, or `None` if the procedure is unknown.
    fn statements(&self, proc: ProcId) -> Option<&[StatementInfo]>;

    /// Resolves a statement within the procedure's scope.
    fn statement(&self, proc: ProcId, stmt: StmtId) -> Option<&StatementInfo> {
        self.statements(proc)?.iter().find(|s| s.id == stmt)
    }
}

#[derive(Clone, Debug, Default)]
struct ProcedureEntry {
    name: String,
    statements: Vec<StatementInfo>,
}

/// Catalog backed by an in-memory table.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    procedures: FxHashMap<ProcId, ProcedureEntry>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a procedure and its statements, replacing any prior entry.
    pub fn with_procedure(
        mut self,
        proc: ProcId,
        name: impl Into<String>,
        statements: Vec<StatementInfo>,
    ) -> Self {
        self.procedures.insert(
            proc,
            ProcedureEntry {
                name: name.into(),
                statements,
            },
        );
        self
    }

    /// Name of a registered procedure.
    pub fn procedure_name(&self, proc: ProcId) -> Option<&str> {
        self.procedures.get(&proc).map(|p| p.name.as_str())
    }
}

impl Catalog for InMemoryCatalog {
    fn statements(&self, proc: ProcId) -> Option<&[StatementInfo]> {
        self.procedures.get(&proc).map(|p| p.statements.as_slice())
    }
}

/// Failure reported by a [`PartitionEstimator`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EstimateError(pub String);

/// Maps a query execution to the partitions it touched.
pub trait PartitionEstimator: Send + Sync {
    /// Estimates the partitions for `query` in a transaction based at `base`.
    fn estimate_partitions(
        &self,
        query: &QueryTrace,
        base: PartitionId,
    ) -> std::result::Result<PartitionSet, EstimateError>;
}

impl<F> PartitionEstimator for F
where
    F: Fn(&QueryTrace, PartitionId) -> std::result::Result<PartitionSet, EstimateError>
        + Send
        + Sync,
{
    fn estimate_partitions(
        &self,
        query: &QueryTrace,
        base: PartitionId,
    ) -> std::result::Result<PartitionSet, EstimateError> {
        self(query, base)
    }
}

/// Supplies the canonical marker vertices for a graph.
pub trait MarkerFactory {
    /// Returns the marker vertex of `kind` for the graph keyed by `graph`.
    fn marker(&self, graph: GraphKey, kind: MarkerKind) -> Vertex;
}

/// Marker factory producing fresh, zero-count marker vertices.
#[derive(Clone, Copy, Debug, Default)]
pub struct CanonicalMarkers;

impl MarkerFactory for CanonicalMarkers {
    fn marker(&self, _graph: GraphKey, kind: MarkerKind) -> Vertex {
        Vertex::marker(kind)
    }
}
