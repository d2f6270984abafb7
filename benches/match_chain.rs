use criterion::{Criterion, black_box, criterion_group, criterion_main};
use shapegram::{
    Edge, GrammarConfig, MatchBudget, Node, ShapeGraph, find_matches,
};

fn chain(len: usize) -> ShapeGraph {
    let mut g = ShapeGraph::new();
    let nodes: Vec<_> = (0..len).map(|_| g.add_node(Node::new("seg"))).collect();
    for pair in nodes.windows(2) {
        g.add_edge(pair[0], pair[1], Edge::directed("next")).unwrap();
    }
    g
}

fn path_pattern(len: usize) -> ShapeGraph {
    chain(len)
}

fn bench_match_chain(c: &mut Criterion) {
    let config = GrammarConfig::default();
    let host = chain(256);

    for pattern_len in [1usize, 3, 6] {
        let pattern = path_pattern(pattern_len);
        c.bench_function(&format!("find_matches/path{pattern_len}_in_chain256"), |b| {
            b.iter(|| {
                let found: Vec<_> = find_matches(
                    black_box(&pattern),
                    black_box(&host),
                    &[],
                    MatchBudget::UNLIMITED,
                    &config,
                )
                .collect();
                found.len()
            })
        });
    }

    let pattern = path_pattern(3);
    c.bench_function("find_matches/first_match_only", |b| {
        b.iter(|| {
            find_matches(
                black_box(&pattern),
                black_box(&host),
                &[],
                MatchBudget::max_matches(1),
                &config,
            )
            .next()
        })
    });
}

criterion_group!(benches, bench_match_chain);
criterion_main!(benches);
