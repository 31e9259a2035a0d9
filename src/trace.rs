//! Recorded executions fed into path graphs.
//!
//! Timestamps are microseconds on the coordinator's clock.

use serde::{Deserialize, Serialize};

use crate::types::{PartitionId, ProcId, StmtId};

/// One statement execution within a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTrace {
    /// Executed statement.
    pub stmt: StmtId,
    /// Statement parameters, as seen by the partition estimator.
    pub params: Vec<i64>,
    /// Execution start.
    pub start_ts: u64,
    /// Execution stop.
    pub stop_ts: u64,
    /// Whether the execution aborted the transaction.
    #[serde(default)]
    pub aborted: bool,
}

impl QueryTrace {
    /// Creates a successful query execution.
    pub fn new(stmt: StmtId, params: Vec<i64>, start_ts: u64, stop_ts: u64) -> Self {
        Self {
            stmt,
            params,
            start_ts,
            stop_ts,
            aborted: false,
        }
    }

    /// Marks the execution as having aborted the transaction.
    pub fn aborted(mut self) -> Self {
        self.aborted = true;
        self
    }
}

/// A completed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTrace {
    /// Transaction identifier.
    pub txn_id: u64,
    /// Invoked procedure.
    pub proc: ProcId,
    /// Partition the transaction was coordinated from.
    pub base_partition: PartitionId,
    /// Transaction start.
    pub start_ts: u64,
    /// Transaction stop.
    pub stop_ts: u64,
    /// Executed statements in order.
    pub queries: Vec<QueryTrace>,
}

impl TransactionTrace {
    /// Starts a trace with no queries; `stop_ts` equals `start_ts` until
    /// [`TransactionTrace::finish`] is called.
    pub fn new(txn_id: u64, proc: ProcId, base_partition: PartitionId, start_ts: u64) -> Self {
        Self {
            txn_id,
            proc,
            base_partition,
            start_ts,
            stop_ts: start_ts,
            queries: Vec::new(),
        }
    }

    /// Appends a query.
    pub fn push(mut self, query: QueryTrace) -> Self {
        self.queries.push(query);
        self
    }

    /// Sets the stop timestamp.
    pub fn finish(mut self, stop_ts: u64) -> Self {
        self.stop_ts = stop_ts;
        self
    }

    /// Wall-clock duration.
    pub fn duration_micros(&self) -> u64 {
        self.stop_ts.saturating_sub(self.start_ts)
    }

    /// Whether the final query aborted the transaction.
    pub fn ends_in_abort(&self) -> bool {
        self.queries.last().is_some_and(|q| q.aborted)
    }
}
