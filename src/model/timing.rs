use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// How samples from aborted transactions take part in time normalization.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortedTimePolicy {
    /// Normalize aborted transactions against the trailing latency recorded
    /// on the ABORT vertex.
    Include,
    /// Drop samples of aborted transactions; only committed transactions
    /// feed the per-vertex timing means.
    #[default]
    Exclude,
}

/// Execution-time statistics attached to a vertex.
///
/// Samples are buffered per transaction sequence number until the next
/// recompute pass normalizes them and folds them into a running mean.
#[derive(Clone, Debug, Default)]
pub struct ExecutionTimes {
    pending: FxHashMap<u64, u64>,
    samples: u64,
    mean_micros: f64,
}

impl ExecutionTimes {
    /// Restores folded statistics, with no pending samples.
    pub fn from_parts(samples: u64, mean_micros: f64) -> Self {
        Self {
            pending: FxHashMap::default(),
            samples,
            mean_micros,
        }
    }

    /// Buffers a sample for transaction `seq`.
    pub fn record(&mut self, seq: u64, micros: u64) {
        self.pending.insert(seq, micros);
    }

    /// Samples waiting for the next recompute pass, keyed by sequence number.
    pub fn pending(&self) -> &FxHashMap<u64, u64> {
        &self.pending
    }

    /// Number of samples folded into the mean.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Mean of the folded samples in microseconds, if any were folded.
    pub fn mean_micros(&self) -> Option<f64> {
        (self.samples > 0).then_some(self.mean_micros)
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending.clear();
    }

    pub(crate) fn take_pending(&mut self) -> FxHashMap<u64, u64> {
        std::mem::take(&mut self.pending)
    }

    fn fold(&mut self, micros: u64) {
        self.samples += 1;
        self.mean_micros += (micros as f64 - self.mean_micros) / self.samples as f64;
    }

    /// Folds pending samples as-is. Used for the COMMIT and ABORT markers,
    /// whose samples are the trailing latencies themselves.
    pub(crate) fn fold_raw(&mut self) -> usize {
        let pending = self.take_pending();
        let folded = pending.len();
        let mut seqs: Vec<_> = pending.into_iter().collect();
        seqs.sort_unstable();
        for (_, micros) in seqs {
            self.fold(micros);
        }
        folded
    }

    /// Subtracts the trailing latency of each sample's transaction and folds
    /// the result. Samples without a usable stop time are discarded.
    pub(crate) fn normalize(&mut self, stops: &StopTimes, policy: AbortedTimePolicy) -> usize {
        let pending = self.take_pending();
        let mut seqs: Vec<_> = pending.into_iter().collect();
        seqs.sort_unstable();
        let mut folded = 0;
        for (seq, micros) in seqs {
            if let Some(trailing) = stops.trailing(seq, policy) {
                self.fold(micros.saturating_sub(trailing));
                folded += 1;
            }
        }
        folded
    }
}

/// Trailing latencies observed at the terminal markers, keyed by sequence.
#[derive(Debug, Default)]
pub(crate) struct StopTimes {
    committed: FxHashMap<u64, u64>,
    aborted: FxHashMap<u64, u64>,
}

impl StopTimes {
    pub(crate) fn new(committed: FxHashMap<u64, u64>, aborted: FxHashMap<u64, u64>) -> Self {
        Self { committed, aborted }
    }

    fn trailing(&self, seq: u64, policy: AbortedTimePolicy) -> Option<u64> {
        if let Some(stop) = self.committed.get(&seq) {
            return Some(*stop);
        }
        match policy {
            AbortedTimePolicy::Include => self.aborted.get(&seq).copied(),
            AbortedTimePolicy::Exclude => None,
        }
    }
}
