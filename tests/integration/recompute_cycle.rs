#![allow(missing_docs)]

use std::sync::Once;

use tracing_subscriber::EnvFilter;
use txn_markov::catalog::EstimateError;
use txn_markov::model::{GraphImage, VertexImage};
use txn_markov::{
    AbortedTimePolicy, InMemoryCatalog, MarkerKind, MarkovOptions, PartitionId, PartitionSet,
    PathGraph, ProcId, QueryTrace, StatementInfo, StmtId, TransactionTrace, VertexKey,
    VertexProbabilities,
};

const PROC: ProcId = ProcId(3);
const READ: StmtId = StmtId(1);
const WRITE: StmtId = StmtId(2);

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("txn_markov=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new().with_procedure(
        PROC,
        "payment",
        vec![
            StatementInfo::new(READ, "getCustomer", true),
            StatementInfo::new(WRITE, "updateBalance", false),
        ],
    )
}

fn local(_query: &QueryTrace, base: PartitionId) -> Result<PartitionSet, EstimateError> {
    Ok(PartitionSet::single(base))
}

fn read_then_write(txn: u64, abort: bool) -> TransactionTrace {
    let mut write = QueryTrace::new(WRITE, vec![], 20, 30);
    if abort {
        write = write.aborted();
    }
    TransactionTrace::new(txn, PROC, PartitionId(0), 0)
        .push(QueryTrace::new(READ, vec![], 5, 10))
        .push(write)
        .finish(40)
}

fn loaded_graph(options: MarkovOptions, transactions: u64) -> PathGraph {
    init_tracing();
    let mut graph = PathGraph::with_markers(PROC, PartitionId(0), options).unwrap();
    for txn in 0..transactions {
        graph
            .process_transaction(&read_then_write(txn, txn % 4 == 3), &catalog(), &local)
            .unwrap();
    }
    graph
}

fn hits(graph: &PathGraph) -> (Vec<u64>, Vec<u64>) {
    let image = graph.to_image();
    (
        image.vertices.iter().map(|v| v.total_hits).collect(),
        image.edges.iter().map(|e| e.total_hits).collect(),
    )
}

fn probabilities(graph: &PathGraph) -> Vec<VertexProbabilities> {
    graph
        .to_image()
        .vertices
        .iter()
        .map(|v| v.probabilities)
        .collect()
}

#[test]
fn recompute_never_decreases_total_hits() {
    let mut graph = loaded_graph(MarkovOptions::default(), 8);
    let (v0, e0) = hits(&graph);
    graph.recompute_graph().unwrap();
    let (v1, e1) = hits(&graph);
    assert!(v0.iter().zip(&v1).all(|(before, after)| after >= before));
    assert!(e0.iter().zip(&e1).all(|(before, after)| after >= before));
    assert_eq!(graph.transaction_count(), 8);

    for txn in 8..12 {
        graph
            .process_transaction(&read_then_write(txn, false), &catalog(), &local)
            .unwrap();
    }
    graph.recompute_graph().unwrap();
    let (v2, e2) = hits(&graph);
    assert!(v1.iter().zip(&v2).all(|(before, after)| after >= before));
    assert!(e1.iter().zip(&e2).all(|(before, after)| after >= before));
    assert_eq!(graph.transaction_count(), 12);
    assert!(graph.is_sane());
}

#[test]
fn reset_is_idempotent_and_empty_recompute_is_stable() {
    let mut graph = loaded_graph(MarkovOptions::default(), 8);
    graph.recompute_graph().unwrap();
    let (totals, edge_totals) = hits(&graph);
    let before = probabilities(&graph);

    for txn in 8..10 {
        graph
            .process_transaction(&read_then_write(txn, true), &catalog(), &local)
            .unwrap();
    }
    graph.reset_counters();
    assert!(graph.to_image().vertices.iter().all(|v| v.instance_hits == 0));
    assert!(graph.to_image().edges.iter().all(|e| e.instance_hits == 0));
    assert_eq!(graph.instance_transactions(), 0);
    graph.reset_counters();
    assert!(graph.to_image().vertices.iter().all(|v| v.instance_hits == 0));

    graph.recompute_graph().unwrap();
    assert_eq!(hits(&graph), (totals, edge_totals));
    let after = probabilities(&graph);
    for (b, a) in before.iter().zip(&after) {
        assert!((b.abort - a.abort).abs() < 1e-5);
        assert!((b.single_sited - a.single_sited).abs() < 1e-5);
        assert!((b.done - a.done).abs() < 1e-5);
        assert!((b.read_only - a.read_only).abs() < 1e-5);
    }
    assert_eq!(graph.transaction_count(), 8);
}

#[test]
fn abort_probability_tracks_observed_rate() {
    let mut graph = loaded_graph(MarkovOptions::default(), 8);
    graph.recompute_graph().unwrap();
    let start = graph.probabilities(&VertexKey::START).unwrap();
    assert!((start.abort - 0.25).abs() < 1e-9);
    assert_eq!(start.single_sited, 1.0);
    assert_eq!(start.read_only, 0.0);
    let read = VertexKey::query(READ, PartitionSet::single(PartitionId(0)), 0);
    assert_eq!(graph.probabilities(&read).unwrap().done, 1.0);
}

/// Ten vertices: three markers and seven queries, each with a lifetime
/// rate of 0.1 traversals per transaction.
fn drift_image(drifting: usize) -> GraphImage {
    let keys: Vec<VertexKey> = MarkerKind::ALL
        .into_iter()
        .map(VertexKey::Marker)
        .chain((0..7).map(|i| VertexKey::query(StmtId(i), PartitionSet::single(PartitionId(0)), 0)))
        .collect();
    let vertices = keys
        .into_iter()
        .enumerate()
        .map(|(i, key)| VertexImage {
            key,
            read_only: true,
            total_hits: 10,
            instance_hits: if i < drifting { 10 } else { 1 },
            time_samples: 0,
            mean_micros: 0.0,
            probabilities: VertexProbabilities::default(),
        })
        .collect();
    GraphImage {
        proc: PROC,
        base_partition: PartitionId(0),
        transaction_count: 100,
        instance_transactions: 10,
        generation: 0,
        vertices,
        edges: Vec::new(),
    }
}

#[test]
fn majority_drift_triggers_recompute() {
    init_tracing();
    let graph = PathGraph::from_image(drift_image(6), MarkovOptions::default()).unwrap();
    assert_eq!(graph.vertex_count(), 10);
    let decision = graph.recompute_decision(10, 0.2);
    assert_eq!(decision.drifting, 6);
    assert!(graph.should_recompute(10, 0.2));

    let graph = PathGraph::from_image(drift_image(4), MarkovOptions::default()).unwrap();
    assert_eq!(graph.recompute_decision(10, 0.2).drifting, 4);
    assert!(!graph.should_recompute(10, 0.2));
}

#[test]
fn zero_instance_count_never_triggers() {
    let graph = PathGraph::from_image(drift_image(10), MarkovOptions::default()).unwrap();
    assert!(!graph.should_recompute(0, 0.0));
}

#[test]
fn trigger_proportion_is_configurable() {
    let options = MarkovOptions::default().vertex_proportion(0.3);
    let graph = PathGraph::from_image(drift_image(4), options).unwrap();
    assert!(graph.should_recompute(10, 0.2));
}

fn mean(graph: &PathGraph, key: &VertexKey) -> Option<f64> {
    graph.vertex_by_key(key)?.execution_times().mean_micros()
}

#[test]
fn aborted_transactions_are_excluded_from_timing_by_default() {
    init_tracing();
    let mut graph = PathGraph::with_markers(PROC, PartitionId(0), MarkovOptions::default()).unwrap();
    // committed: read at 5, write stops at 30, txn stops at 40 => trailing 10
    graph
        .process_transaction(&read_then_write(0, false), &catalog(), &local)
        .unwrap();
    graph
        .process_transaction(&read_then_write(1, true), &catalog(), &local)
        .unwrap();
    graph.recompute_graph().unwrap();

    let read = VertexKey::query(READ, PartitionSet::single(PartitionId(0)), 0);
    assert_eq!(mean(&graph, &read), Some(25.0));
    assert_eq!(graph.vertex_by_key(&read).unwrap().execution_times().samples(), 1);
    assert_eq!(mean(&graph, &VertexKey::COMMIT), Some(10.0));
    assert_eq!(mean(&graph, &VertexKey::ABORT), Some(10.0));
}

#[test]
fn aborted_transactions_can_be_included_in_timing() {
    let options = MarkovOptions::default().aborted_time_policy(AbortedTimePolicy::Include);
    let mut graph = PathGraph::with_markers(PROC, PartitionId(0), options).unwrap();
    graph
        .process_transaction(&read_then_write(0, false), &catalog(), &local)
        .unwrap();
    graph
        .process_transaction(&read_then_write(1, true), &catalog(), &local)
        .unwrap();
    graph.recompute_graph().unwrap();

    let read = VertexKey::query(READ, PartitionSet::single(PartitionId(0)), 0);
    assert_eq!(graph.vertex_by_key(&read).unwrap().execution_times().samples(), 2);
    assert_eq!(mean(&graph, &read), Some(25.0));
    assert_eq!(mean(&graph, &VertexKey::START), Some(30.0));
}

#[test]
fn reset_discards_pending_timing_samples() {
    let mut graph = loaded_graph(MarkovOptions::default(), 2);
    graph.reset_counters();
    graph.recompute_graph().unwrap();
    assert_eq!(mean(&graph, &VertexKey::START), None);
    assert_eq!(graph.transaction_count(), 0);
}
