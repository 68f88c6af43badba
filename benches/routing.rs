//! Benchmarks for routing table recomputation.
//!
//! Run with: cargo bench --bench routing

use bluenet::protocol::LinkStateAdvertisement;
use bluenet::{Node, NodeAddr, RoutingTable};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::HashMap;

fn make_node(val: u16) -> Node {
    let mut bytes = [0x02, 0, 0, 0, 0, 0];
    bytes[4..6].copy_from_slice(&val.to_be_bytes());
    Node::anonymous(NodeAddr::from_bytes(bytes))
}

/// Advertisement graph for a ring of `n` nodes.
fn ring(n: u16) -> HashMap<NodeAddr, LinkStateAdvertisement> {
    (0..n)
        .map(|i| {
            let lsa = LinkStateAdvertisement::new(make_node(i), 1)
                .with_neighbor(make_node((i + 1) % n))
                .with_neighbor(make_node((i + n - 1) % n));
            (*lsa.origin.addr(), lsa)
        })
        .collect()
}

/// Advertisement graph for a `side` x `side` grid.
fn grid(side: u16) -> HashMap<NodeAddr, LinkStateAdvertisement> {
    let mut graph = HashMap::new();
    for row in 0..side {
        for col in 0..side {
            let id = row * side + col;
            let mut lsa = LinkStateAdvertisement::new(make_node(id), 1);
            if row > 0 {
                lsa = lsa.with_neighbor(make_node(id - side));
            }
            if row + 1 < side {
                lsa = lsa.with_neighbor(make_node(id + side));
            }
            if col > 0 {
                lsa = lsa.with_neighbor(make_node(id - 1));
            }
            if col + 1 < side {
                lsa = lsa.with_neighbor(make_node(id + 1));
            }
            graph.insert(*lsa.origin.addr(), lsa);
        }
    }
    graph
}

fn bench_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing_ring");
    let local = make_node(0);

    for &count in &[16, 64, 256] {
        let graph = ring(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &graph, |b, graph| {
            b.iter(|| RoutingTable::compute(black_box(&local), black_box(graph)))
        });
    }

    group.finish();
}

fn bench_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing_grid");
    let local = make_node(0);

    for &side in &[4, 8, 16] {
        let graph = grid(side);
        group.bench_with_input(
            BenchmarkId::from_parameter(side * side),
            &graph,
            |b, graph| b.iter(|| RoutingTable::compute(black_box(&local), black_box(graph))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_ring, bench_grid);
criterion_main!(benches);
