//! Markov models of stored-procedure execution paths.
//!
//! A partitioned OLTP engine records each completed transaction as a
//! [`TransactionTrace`]. Traces are tallied into a [`PathGraph`] per
//! (procedure, base partition) whose vertices are statement executions and
//! whose edges are observed transitions. Periodic recompute passes derive,
//! for every vertex, the probability that the transaction aborts, stays on
//! its base partition, touches no further partitions, or performs no more
//! writes. Schedulers read those numbers from a [`ProbabilitySnapshot`].

#![warn(missing_docs)]

pub mod catalog;
pub mod config;
pub mod graph;
pub mod model;
pub mod repository;
pub mod trace;
pub mod types;

pub use catalog::{
    CanonicalMarkers, Catalog, EstimateError, InMemoryCatalog, MarkerFactory, PartitionEstimator,
    StatementInfo,
};
pub use config::{load_options, parse_options, ConfigError};
pub use model::{
    AbortedTimePolicy, GraphKey, MarkerKind, MarkovOptions, PathGraph, ProbabilitySnapshot,
    VertexKey, VertexProbabilities,
};
pub use repository::{BuildSummary, MarkovRepository, SharedGraph};
pub use trace::{QueryTrace, TransactionTrace};
pub use types::{MarkovError, PartitionId, PartitionSet, ProcId, Result, StmtId};
