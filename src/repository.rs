//! Path graphs for every (procedure, base partition) seen in a workload.
//!
//! Each graph sits behind a [`SharedGraph`]: trace processing and
//! recomputation serialize on a writer mutex, while schedulers read the
//! most recently published [`ProbabilitySnapshot`] without touching it.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{Catalog, PartitionEstimator};
use crate::model::{GraphImage, GraphKey, MarkovOptions, PathGraph, ProbabilitySnapshot, VertexKey};
use crate::trace::TransactionTrace;
use crate::types::{MarkovError, PartitionId, ProcId, Result};

const IMAGE_VERSION: u32 = 1;

/// A path graph shared between one writer at a time and any number of
/// snapshot readers.
pub struct SharedGraph {
    key: GraphKey,
    writer: Mutex<PathGraph>,
    published: RwLock<Arc<ProbabilitySnapshot>>,
}

impl SharedGraph {
    /// Wraps a graph, publishing its current snapshot.
    pub fn new(graph: PathGraph) -> Self {
        Self {
            key: graph.key(),
            published: RwLock::new(graph.snapshot()),
            writer: Mutex::new(graph),
        }
    }

    /// Identity of the wrapped graph.
    pub fn key(&self) -> GraphKey {
        self.key
    }

    /// Tallies a trace; see [`PathGraph::process_transaction`].
    pub fn process_transaction(
        &self,
        trace: &TransactionTrace,
        catalog: &dyn Catalog,
        estimator: &dyn PartitionEstimator,
    ) -> Result<Vec<VertexKey>> {
        let mut graph = self.writer.lock();
        let path = graph.process_transaction(trace, catalog, estimator)?;
        Ok(graph.path_keys(&path))
    }

    /// Folds counters, recalculates probabilities and publishes the result.
    pub fn recompute(&self) -> Result<Arc<ProbabilitySnapshot>> {
        let mut graph = self.writer.lock();
        graph.recompute_graph()?;
        Ok(self.publish(&graph))
    }

    /// Recalculates probabilities from the current lifetime counters,
    /// without folding instance counters, and publishes the result.
    pub fn calculate_probabilities(&self) -> Result<Arc<ProbabilitySnapshot>> {
        let mut graph = self.writer.lock();
        graph.calculate_probabilities()?;
        Ok(self.publish(&graph))
    }

    /// Recomputes when the drift policy asks for it. Returns whether it did.
    pub fn maybe_recompute(&self, instance_count: u64, tolerance: f64) -> Result<bool> {
        let mut graph = self.writer.lock();
        if !graph.should_recompute(instance_count, tolerance) {
            return Ok(false);
        }
        graph.recompute_graph()?;
        self.publish(&graph);
        Ok(true)
    }

    /// See [`PathGraph::should_recompute`].
    pub fn should_recompute(&self, instance_count: u64, tolerance: f64) -> bool {
        self.writer.lock().should_recompute(instance_count, tolerance)
    }

    /// Discards instance counters; see [`PathGraph::reset_counters`].
    pub fn reset_counters(&self) {
        self.writer.lock().reset_counters();
    }

    /// Most recently published probabilities. Never blocks on the writer.
    pub fn probabilities(&self) -> Arc<ProbabilitySnapshot> {
        self.published.read().clone()
    }

    /// Runs `f` with exclusive access to the graph. A calculation pass
    /// run by `f` is published once it returns.
    pub fn with_graph<R>(&self, f: impl FnOnce(&mut PathGraph) -> R) -> R {
        let mut graph = self.writer.lock();
        let result = f(&mut graph);
        if graph.generation() != self.published.read().generation() {
            self.publish(&graph);
        }
        result
    }

    fn publish(&self, graph: &PathGraph) -> Arc<ProbabilitySnapshot> {
        let snapshot = graph.snapshot();
        *self.published.write() = snapshot.clone();
        snapshot
    }
}

/// Outcome of [`MarkovRepository::build`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BuildSummary {
    /// Traces tallied into a graph.
    pub processed: usize,
    /// Traces skipped because they were rejected.
    pub rejected: usize,
    /// Graphs in the repository afterwards.
    pub graphs: usize,
}

#[derive(Serialize, Deserialize)]
struct RepositoryImage {
    version: u32,
    graphs: Vec<GraphImage>,
}

/// Path graphs keyed by (procedure, base partition), iterated in key order.
pub struct MarkovRepository {
    graphs: RwLock<BTreeMap<GraphKey, Arc<SharedGraph>>>,
    options: MarkovOptions,
}

impl MarkovRepository {
    /// Creates an empty repository; new graphs use `options`.
    pub fn new(options: MarkovOptions) -> Self {
        Self {
            graphs: RwLock::new(BTreeMap::new()),
            options,
        }
    }

    /// Options given to new graphs.
    pub fn options(&self) -> &MarkovOptions {
        &self.options
    }

    /// Graph for the given procedure and base partition.
    pub fn get(&self, proc: ProcId, base_partition: PartitionId) -> Option<Arc<SharedGraph>> {
        self.graphs
            .read()
            .get(&GraphKey::new(proc, base_partition))
            .cloned()
    }

    /// Graph for the given procedure and base partition, created with its
    /// markers on first use.
    pub fn get_or_create(&self, proc: ProcId, base_partition: PartitionId) -> Result<Arc<SharedGraph>> {
        let key = GraphKey::new(proc, base_partition);
        if let Some(graph) = self.graphs.read().get(&key) {
            return Ok(graph.clone());
        }
        let mut graphs = self.graphs.write();
        if let Some(graph) = graphs.get(&key) {
            return Ok(graph.clone());
        }
        let graph = PathGraph::with_markers(proc, base_partition, self.options.clone())?;
        let shared = Arc::new(SharedGraph::new(graph));
        graphs.insert(key, shared.clone());
        Ok(shared)
    }

    /// Installs a graph, replacing any graph with the same key.
    pub fn insert(&self, graph: PathGraph) -> Option<Arc<SharedGraph>> {
        let shared = Arc::new(SharedGraph::new(graph));
        self.graphs.write().insert(shared.key(), shared)
    }

    /// Keys of every graph, in order.
    pub fn keys(&self) -> Vec<GraphKey> {
        self.graphs.read().keys().copied().collect()
    }

    /// Number of graphs.
    pub fn len(&self) -> usize {
        self.graphs.read().len()
    }

    /// Whether the repository holds no graphs.
    pub fn is_empty(&self) -> bool {
        self.graphs.read().is_empty()
    }

    fn handles(&self) -> Vec<Arc<SharedGraph>> {
        self.graphs.read().values().cloned().collect()
    }

    /// Routes a trace to the graph of its procedure and base partition.
    pub fn process_transaction(
        &self,
        trace: &TransactionTrace,
        catalog: &dyn Catalog,
        estimator: &dyn PartitionEstimator,
    ) -> Result<Vec<VertexKey>> {
        self.get_or_create(trace.proc, trace.base_partition)?
            .process_transaction(trace, catalog, estimator)
    }

    /// Recomputes every graph.
    pub fn recompute_all(&self) -> Result<()> {
        for graph in self.handles() {
            graph.recompute()?;
        }
        Ok(())
    }

    /// Builds graphs from a recorded workload and recomputes each once.
    ///
    /// Traces the graphs reject are skipped and counted.
    pub fn build<'a>(
        workload: impl IntoIterator<Item = &'a TransactionTrace>,
        catalog: &dyn Catalog,
        estimator: &dyn PartitionEstimator,
        options: MarkovOptions,
    ) -> Result<(Self, BuildSummary)> {
        let repository = Self::new(options);
        let mut summary = BuildSummary::default();
        for trace in workload {
            match repository.process_transaction(trace, catalog, estimator) {
                Ok(_) => summary.processed += 1,
                Err(err) => {
                    warn!(
                        txn = trace.txn_id,
                        proc = trace.proc.0,
                        partition = trace.base_partition.0,
                        error = %err,
                        "markov.build.trace_skipped"
                    );
                    summary.rejected += 1;
                }
            }
        }
        repository.recompute_all()?;
        summary.graphs = repository.len();
        info!(
            processed = summary.processed,
            rejected = summary.rejected,
            graphs = summary.graphs,
            "markov.build.completed"
        );
        Ok((repository, summary))
    }

    /// Writes every graph as JSON.
    pub fn save<W: Write>(&self, writer: W) -> Result<()> {
        let graphs: Vec<GraphImage> = self
            .handles()
            .iter()
            .map(|g| g.with_graph(|graph| graph.to_image()))
            .collect();
        let count = graphs.len();
        let image = RepositoryImage {
            version: IMAGE_VERSION,
            graphs,
        };
        serde_json::to_writer(writer, &image)?;
        info!(graphs = count, "markov.repository.saved");
        Ok(())
    }

    /// Writes every graph to a JSON file.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads graphs written by [`MarkovRepository::save`].
    pub fn load<R: Read>(reader: R, options: MarkovOptions) -> Result<Self> {
        let image: RepositoryImage = serde_json::from_reader(reader)?;
        if image.version != IMAGE_VERSION {
            return Err(MarkovError::Corruption(format!(
                "unsupported repository image version {}",
                image.version
            )));
        }
        let repository = Self::new(options);
        for graph in image.graphs {
            let graph = PathGraph::from_image(graph, repository.options.clone())?;
            let key = graph.key();
            if repository.insert(graph).is_some() {
                return Err(MarkovError::Corruption(format!(
                    "graph for procedure {} partition {} listed twice",
                    key.proc, key.base_partition
                )));
            }
        }
        info!(graphs = repository.len(), "markov.repository.loaded");
        Ok(repository)
    }

    /// Reads graphs from a JSON file.
    pub fn load_from_path(path: impl AsRef<Path>, options: MarkovOptions) -> Result<Self> {
        Self::load(BufReader::new(File::open(path)?), options)
    }
}
