#![allow(missing_docs)]

use std::collections::BTreeSet;

use proptest::prelude::*;
use txn_markov::catalog::EstimateError;
use txn_markov::{
    InMemoryCatalog, MarkovOptions, PartitionId, PartitionSet, PathGraph, ProcId, QueryTrace,
    StatementInfo, StmtId, TransactionTrace,
};

const PROC: ProcId = ProcId(1);

#[derive(Debug, Clone)]
struct Txn {
    queries: Vec<(u32, Vec<i64>)>,
    aborts: bool,
}

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new().with_procedure(
        PROC,
        "mixed",
        (0..4)
            .map(|i| StatementInfo::new(StmtId(i), format!("stmt{i}"), i % 2 == 0))
            .collect(),
    )
}

fn by_params(query: &QueryTrace, _base: PartitionId) -> Result<PartitionSet, EstimateError> {
    Ok(query.params.iter().map(|p| PartitionId(*p as u32)).collect())
}

fn arb_txn() -> impl Strategy<Value = Txn> {
    (
        prop::collection::vec((0u32..4, prop::collection::vec(0i64..3, 1..=2)), 0..6),
        any::<bool>(),
    )
        .prop_map(|(queries, aborts)| Txn { queries, aborts })
}

fn to_trace(id: u64, txn: &Txn) -> TransactionTrace {
    let mut trace = TransactionTrace::new(id, PROC, PartitionId(0), id * 100);
    let last = txn.queries.len().saturating_sub(1);
    for (pos, (stmt, params)) in txn.queries.iter().enumerate() {
        let start = id * 100 + pos as u64 * 10;
        let mut query = QueryTrace::new(StmtId(*stmt), params.clone(), start, start + 5);
        if txn.aborts && pos == last {
            query = query.aborted();
        }
        trace = trace.push(query);
    }
    trace.finish(id * 100 + 99)
}

fn apply(graph: &mut PathGraph, batch: &[Txn], offset: u64) {
    for (i, txn) in batch.iter().enumerate() {
        graph
            .process_transaction(&to_trace(offset + i as u64, txn), &catalog(), &by_params)
            .unwrap();
    }
}

proptest! {
    #[test]
    fn outgoing_probabilities_are_conserved(batch in prop::collection::vec(arb_txn(), 1..40)) {
        let mut graph = PathGraph::with_markers(PROC, PartitionId(0), MarkovOptions::default()).unwrap();
        apply(&mut graph, &batch, 0);
        graph.recompute_graph().unwrap();

        let container = graph.container();
        for (id, _) in container.vertices() {
            let out = container.out_edges(id);
            if out.is_empty() {
                continue;
            }
            let sum: f64 = out
                .iter()
                .map(|e| container.edge(*e).unwrap().payload.probability())
                .sum();
            prop_assert!((sum - 1.0).abs() <= 1e-5, "sum {} at {}", sum, id);
        }
        for (_, vertex) in container.vertices() {
            let p = vertex.probabilities();
            for value in [p.abort, p.single_sited, p.done, p.read_only] {
                prop_assert!((0.0..=1.0).contains(&value));
            }
        }
        prop_assert!(graph.is_sane());
    }

    #[test]
    fn at_most_one_edge_per_vertex_pair(batch in prop::collection::vec(arb_txn(), 1..40)) {
        let mut graph = PathGraph::with_markers(PROC, PartitionId(0), MarkovOptions::default()).unwrap();
        apply(&mut graph, &batch, 0);

        let mut pairs = BTreeSet::new();
        for (_, entry) in graph.container().edges() {
            prop_assert!(pairs.insert((entry.src, entry.dst)));
        }
        let aborted = batch.iter().filter(|t| t.aborts && !t.queries.is_empty()).count() as u64;
        let abort = graph.abort_vertex().unwrap();
        prop_assert_eq!(graph.vertex(abort).unwrap().instance_hits(), aborted);
        prop_assert_eq!(graph.instance_transactions(), batch.len() as u64);
    }

    #[test]
    fn recompute_never_lowers_lifetime_hits(
        first in prop::collection::vec(arb_txn(), 1..20),
        second in prop::collection::vec(arb_txn(), 0..20),
    ) {
        let mut graph = PathGraph::with_markers(PROC, PartitionId(0), MarkovOptions::default()).unwrap();
        apply(&mut graph, &first, 0);
        graph.recompute_graph().unwrap();
        let before = graph.to_image();

        apply(&mut graph, &second, first.len() as u64);
        graph.recompute_graph().unwrap();
        let after = graph.to_image();

        for (b, a) in before.vertices.iter().zip(&after.vertices) {
            prop_assert_eq!(&b.key, &a.key);
            prop_assert!(a.total_hits >= b.total_hits);
            prop_assert_eq!(a.instance_hits, 0);
        }
        for (b, a) in before.edges.iter().zip(&after.edges) {
            prop_assert!(a.total_hits >= b.total_hits);
        }
        prop_assert_eq!(after.transaction_count, (first.len() + second.len()) as u64);
        prop_assert!(graph.is_sane());
    }
}
