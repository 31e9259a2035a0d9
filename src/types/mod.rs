//! Identifier newtypes, partition sets and the crate error type.

#![forbid(unsafe_code)]

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::model::MarkerKind;

/// Stored-procedure identifier assigned by the catalog.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ProcId(pub u32);

/// Statement identifier, unique within the database catalog.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct StmtId(pub u32);

/// Partition identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(value: u32) -> Self {
        PartitionId(value)
    }
}

impl From<u32> for StmtId {
    fn from(value: u32) -> Self {
        StmtId(value)
    }
}

impl From<u32> for ProcId {
    fn from(value: u32) -> Self {
        ProcId(value)
    }
}

/// Sorted, duplicate-free set of partitions touched by one query.
///
/// Stored inline for the common case of a handful of partitions so that
/// vertex keys stay cheap to hash and compare.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<PartitionId>", into = "Vec<PartitionId>")]
pub struct PartitionSet(SmallVec<[PartitionId; 4]>);

impl PartitionSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    /// Creates a set holding a single partition.
    pub fn single(partition: PartitionId) -> Self {
        let mut inner = SmallVec::new();
        inner.push(partition);
        Self(inner)
    }

    /// Adds a partition, keeping the set sorted. Returns `false` if it was present.
    pub fn insert(&mut self, partition: PartitionId) -> bool {
        match self.0.binary_search(&partition) {
            Ok(_) => false,
            Err(pos) => {
                self.0.insert(pos, partition);
                true
            }
        }
    }

    /// Returns whether the partition is a member of the set.
    pub fn contains(&self, partition: PartitionId) -> bool {
        self.0.binary_search(&partition).is_ok()
    }

    /// Returns whether every member of `self` is also in `other`.
    pub fn is_subset(&self, other: &PartitionSet) -> bool {
        self.0.iter().all(|p| other.contains(*p))
    }

    /// Number of partitions in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates partitions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<PartitionId> for PartitionSet {
    fn from_iter<I: IntoIterator<Item = PartitionId>>(iter: I) -> Self {
        let mut inner: SmallVec<[PartitionId; 4]> = iter.into_iter().collect();
        inner.sort_unstable();
        inner.dedup();
        Self(inner)
    }
}

impl From<Vec<PartitionId>> for PartitionSet {
    fn from(value: Vec<PartitionId>) -> Self {
        value.into_iter().collect()
    }
}

impl From<PartitionSet> for Vec<PartitionId> {
    fn from(value: PartitionSet) -> Self {
        value.0.into_vec()
    }
}

impl fmt::Display for PartitionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, "}}")
    }
}

/// Errors surfaced by the path model.
#[derive(Debug, Error)]
pub enum MarkovError {
    /// A structural invariant of the graph was violated.
    #[error("invariant violated: {0}")]
    Invariant(String),
    /// A marker vertex of the same kind was already present.
    #[error("duplicate {0:?} marker vertex")]
    DuplicateMarker(MarkerKind),
    /// A marker vertex was required but the graph was never initialized.
    #[error("missing {0:?} marker vertex")]
    MissingMarker(MarkerKind),
    /// The catalog has no entry for the procedure.
    #[error("unknown procedure {0}")]
    UnknownProcedure(ProcId),
    /// The catalog has no entry for the statement within the procedure.
    #[error("unknown statement {stmt} for procedure {proc}")]
    UnknownStatement {
        /// Procedure that was searched.
        proc: ProcId,
        /// Statement that was not found.
        stmt: StmtId,
    },
    /// A trace was routed to the graph of a different procedure.
    #[error("trace for procedure {found} routed to graph of procedure {expected}")]
    ProcedureMismatch {
        /// Procedure owning the graph.
        expected: ProcId,
        /// Procedure named by the trace.
        found: ProcId,
    },
    /// A trace was routed to the graph of a different base partition.
    #[error("trace for base partition {found} routed to graph of base partition {expected}")]
    BasePartitionMismatch {
        /// Base partition of the graph.
        expected: PartitionId,
        /// Base partition named by the trace.
        found: PartitionId,
    },
    /// The partition estimator could not produce a partition set.
    #[error("partition estimation failed for statement {stmt}: {reason}")]
    Estimation {
        /// Statement being estimated.
        stmt: StmtId,
        /// Collaborator-provided reason.
        reason: String,
    },
    /// The trace is internally inconsistent.
    #[error("malformed trace: {0}")]
    MalformedTrace(String),
    /// Applying the trace would exceed the configured query-vertex cap.
    #[error("query vertex limit of {limit} reached")]
    VertexLimit {
        /// Configured cap.
        limit: usize,
    },
    /// Encoding or decoding a persisted image failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A persisted image is inconsistent.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// I/O failure while loading or saving.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for MarkovError {
    fn from(err: serde_json::Error) -> Self {
        MarkovError::Serialization(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MarkovError>;
