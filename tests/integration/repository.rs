#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tempfile::tempdir;
use txn_markov::catalog::EstimateError;
use txn_markov::model::CounterMetrics;
use txn_markov::{
    GraphKey, InMemoryCatalog, MarkovOptions, MarkovRepository, PartitionId, PartitionSet, ProcId,
    QueryTrace, StatementInfo, StmtId, TransactionTrace, VertexKey,
};

const NEW_ORDER: ProcId = ProcId(1);
const PAYMENT: ProcId = ProcId(2);

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_procedure(
            NEW_ORDER,
            "neworder",
            vec![
                StatementInfo::new(StmtId(10), "getItem", true),
                StatementInfo::new(StmtId(11), "insertOrder", false),
            ],
        )
        .with_procedure(
            PAYMENT,
            "payment",
            vec![StatementInfo::new(StmtId(20), "getCustomer", true)],
        )
}

/// Remote items carry the partition as their first parameter.
fn estimator(query: &QueryTrace, base: PartitionId) -> Result<PartitionSet, EstimateError> {
    let mut set = PartitionSet::single(base);
    if let Some(remote) = query.params.first() {
        set.insert(PartitionId(*remote as u32));
    }
    Ok(set)
}

fn workload() -> Vec<TransactionTrace> {
    let mut traces = Vec::new();
    for txn in 0..40u64 {
        let base = PartitionId((txn % 2) as u32);
        let remote = if txn % 5 == 0 { vec![3] } else { vec![] };
        traces.push(
            TransactionTrace::new(txn, NEW_ORDER, base, txn * 100)
                .push(QueryTrace::new(StmtId(10), remote, txn * 100 + 1, txn * 100 + 5))
                .push(QueryTrace::new(StmtId(11), vec![], txn * 100 + 6, txn * 100 + 9))
                .finish(txn * 100 + 10),
        );
    }
    for txn in 40..50u64 {
        traces.push(
            TransactionTrace::new(txn, PAYMENT, PartitionId(0), 0)
                .push(QueryTrace::new(StmtId(20), vec![], 1, 2))
                .finish(3),
        );
    }
    // unknown statement for the procedure
    traces.push(
        TransactionTrace::new(99, PAYMENT, PartitionId(0), 0)
            .push(QueryTrace::new(StmtId(10), vec![], 1, 2))
            .finish(3),
    );
    traces
}

#[test]
fn build_groups_traces_by_procedure_and_partition() {
    let metrics = Arc::new(CounterMetrics::default());
    let options = MarkovOptions::default().metrics(metrics.clone());
    let (repo, summary) =
        MarkovRepository::build(&workload(), &catalog(), &estimator, options).unwrap();

    assert_eq!(summary.processed, 50);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.graphs, 3);
    assert_eq!(
        repo.keys(),
        vec![
            GraphKey::new(NEW_ORDER, PartitionId(0)),
            GraphKey::new(NEW_ORDER, PartitionId(1)),
            GraphKey::new(PAYMENT, PartitionId(0)),
        ]
    );
    assert_eq!(metrics.transactions_rejected.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.transactions_committed.load(Ordering::Relaxed), 50);
    assert_eq!(metrics.recomputes.load(Ordering::Relaxed), 3);

    let graph = repo.get(NEW_ORDER, PartitionId(0)).unwrap();
    let snapshot = graph.probabilities();
    assert_eq!(snapshot.generation(), 1);
    // txns 0, 10, 20 and 30 of the 20 even txns go remote
    let start = snapshot.start().unwrap();
    assert!((start.single_sited - 0.8).abs() < 1e-9);
    assert_eq!(start.abort, 0.0);
    assert!(graph.with_graph(|g| g.is_sane()));
}

#[test]
fn readers_keep_consistent_snapshots_during_writes() {
    let (repo, _) =
        MarkovRepository::build(&workload(), &catalog(), &estimator, MarkovOptions::default())
            .unwrap();
    let graph = repo.get(NEW_ORDER, PartitionId(1)).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let graph = graph.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut last = 0;
                while !stop.load(Ordering::Relaxed) {
                    let snapshot = graph.probabilities();
                    assert!(snapshot.generation() >= last);
                    last = snapshot.generation();
                    let total: f64 = snapshot
                        .transitions(&VertexKey::START)
                        .iter()
                        .map(|(_, p)| p)
                        .sum();
                    assert!((total - 1.0).abs() < 1e-5);
                }
                last
            })
        })
        .collect();

    let catalog = catalog();
    for round in 0..20u64 {
        for txn in 0..5 {
            let trace = TransactionTrace::new(1000 + round * 5 + txn, NEW_ORDER, PartitionId(1), 0)
                .push(QueryTrace::new(StmtId(10), vec![], 1, 2))
                .finish(3);
            graph.process_transaction(&trace, &catalog, &estimator).unwrap();
        }
        graph.recompute().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        assert!(reader.join().unwrap() <= 21);
    }
    assert_eq!(graph.probabilities().generation(), 21);
}

#[test]
fn save_and_load_round_trip() {
    let (repo, _) =
        MarkovRepository::build(&workload(), &catalog(), &estimator, MarkovOptions::default())
            .unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("markov.json");
    repo.save_to_path(&path).unwrap();

    let loaded = MarkovRepository::load_from_path(&path, MarkovOptions::default()).unwrap();
    assert_eq!(loaded.keys(), repo.keys());
    for key in repo.keys() {
        let original = repo.get(key.proc, key.base_partition).unwrap();
        let restored = loaded.get(key.proc, key.base_partition).unwrap();
        assert_eq!(
            original.with_graph(|g| g.to_image()),
            restored.with_graph(|g| g.to_image())
        );
        assert_eq!(
            original.probabilities().start(),
            restored.probabilities().start()
        );
    }

    // a loaded repository keeps learning
    let restored = loaded.get(PAYMENT, PartitionId(0)).unwrap();
    let trace = TransactionTrace::new(500, PAYMENT, PartitionId(0), 0)
        .push(QueryTrace::new(StmtId(20), vec![], 1, 2))
        .finish(3);
    restored.process_transaction(&trace, &catalog(), &estimator).unwrap();
    restored.recompute().unwrap();
    assert_eq!(restored.with_graph(|g| g.transaction_count()), 11);
}

#[test]
fn maybe_recompute_follows_drift() {
    let options = MarkovOptions::default().vertex_proportion(0.4);
    let (repo, _) = MarkovRepository::build(&workload(), &catalog(), &estimator, options).unwrap();
    let graph = repo.get(PAYMENT, PartitionId(0)).unwrap();
    assert!(!graph.maybe_recompute(0, 0.1).unwrap());

    // identical traffic: observed rates match lifetime rates
    let catalog = catalog();
    for txn in 0..10 {
        let trace = TransactionTrace::new(600 + txn, PAYMENT, PartitionId(0), 0)
            .push(QueryTrace::new(StmtId(20), vec![], 1, 2))
            .finish(3);
        graph.process_transaction(&trace, &catalog, &estimator).unwrap();
    }
    assert!(!graph.should_recompute(10, 0.1));

    // traffic moves to a new remote partition: the old and the new read
    // vertex drift, two of five vertices
    graph.reset_counters();
    for txn in 0..10 {
        let trace = TransactionTrace::new(700 + txn, PAYMENT, PartitionId(0), 0)
            .push(QueryTrace::new(StmtId(20), vec![4], 1, 2))
            .finish(3);
        graph.process_transaction(&trace, &catalog, &estimator).unwrap();
    }
    assert!(graph.maybe_recompute(10, 0.1).unwrap());
    assert_eq!(graph.probabilities().generation(), 2);
}
