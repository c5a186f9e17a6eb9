use crate::graph::CsrGraph;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `n` isolated vertices, no edges.
pub(crate) fn isolated(n: usize) -> CsrGraph {
    CsrGraph::from_undirected_edges(n, &[]).expect("isolated graph")
}

/// Two disjoint triangles on `{0,1,2}` and `{3,4,5}`, all edge weights 1.
pub(crate) fn two_triangles() -> CsrGraph {
    CsrGraph::from_undirected_edges(
        6,
        &[
            (0, 1, 1.0),
            (1, 2, 1.0),
            (2, 0, 1.0),
            (3, 4, 1.0),
            (4, 5, 1.0),
            (5, 3, 1.0),
        ],
    )
    .expect("two triangles")
}

/// Two `k`-cliques `{0..k}` and `{k..2k}` joined by a single unit bridge `(0, k)`.
pub(crate) fn barbell(k: usize) -> CsrGraph {
    let mut edges = Vec::new();
    for offset in [0, k] {
        for i in 0..k {
            for j in i + 1..k {
                edges.push((offset + i, offset + j, 1.0));
            }
        }
    }
    edges.push((0, k, 1.0));
    CsrGraph::from_undirected_edges(2 * k, &edges).expect("barbell graph")
}

/// Star with centre 0 and `leaves` unit-weight spokes.
pub(crate) fn star(leaves: usize) -> CsrGraph {
    let edges: Vec<(usize, usize, f64)> = (1..=leaves).map(|v| (0, v, 1.0)).collect();
    CsrGraph::from_undirected_edges(leaves + 1, &edges).expect("star graph")
}

/// Complete graph on `n` vertices, all weights 1.
pub(crate) fn complete(n: usize) -> CsrGraph {
    let mut edges = Vec::new();
    for i in 0..n {
        for j in i + 1..n {
            edges.push((i, j, 1.0));
        }
    }
    CsrGraph::from_undirected_edges(n, &edges).expect("complete graph")
}

/// Random multigraph with `edge_count` undirected edges and weights in `[0.5, 2)`,
/// deterministic for a given seed.
pub(crate) fn random_graph(n: usize, edge_count: usize, seed: u64) -> CsrGraph {
    let mut rng = StdRng::seed_from_u64(seed);
    let edges: Vec<(usize, usize, f64)> = (0..edge_count)
        .map(|_| {
            (
                rng.random_range(0..n),
                rng.random_range(0..n),
                rng.random_range(0.5..2.0),
            )
        })
        .collect();
    CsrGraph::from_undirected_edges(n, &edges).expect("random graph")
}
