pub mod csr;

use crate::graph::csr::CsrView;
use crate::modularity;
use crate::shared_slice::SharedSlice;

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;

/// Weighted symmetric adjacency structure in compressed sparse-row layout.
///
/// Every id in `[0, span)` is a vertex slot; isolated vertices simply have degree
/// zero, so `order() == span()`. Each undirected edge `{u, v}` is stored in both
/// adjacencies, self-loops once. Weight symmetry `w(u, v) == w(v, u)` is assumed
/// throughout the engine; [`CsrGraph::is_symmetric`] exists to check it.
#[derive(Debug)]
pub struct CsrGraph {
    span: usize,
    offsets: Vec<usize>,
    degrees: Vec<usize>,
    dst: Vec<usize>,
    wgt: Vec<f64>,
}

impl CsrGraph {
    /// Builds a graph from an undirected edge list over vertex ids below `span`.
    ///
    /// Each `(u, v, w)` entry inserts `v` into `u`'s adjacency and, unless it is a
    /// self-loop, `u` into `v`'s. Passing the same pair twice yields parallel edges.
    ///
    /// # Arguments
    ///
    /// * `span` --- number of vertex slots, the exclusive upper bound on vertex ids.
    /// * `edges` --- undirected `(u, v, w)` entries, each pair listed once.
    ///
    pub fn from_undirected_edges(
        span: usize,
        edges: &[(usize, usize, f64)],
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut degrees = vec![0usize; span];
        for &(u, v, w) in edges {
            if u >= span || v >= span {
                return Err(format!("error edge ({u}, {v}) out of vertex span {span}").into());
            }
            if !w.is_finite() {
                return Err(format!("error edge ({u}, {v}) has non-finite weight {w}").into());
            }
            degrees[u] += 1;
            if u != v {
                degrees[v] += 1;
            }
        }
        let mut offsets = vec![0usize; span + 1];
        for u in 0..span {
            offsets[u + 1] = offsets[u] + degrees[u];
        }
        let directed_edges = offsets[span];
        let mut dst = vec![0usize; directed_edges];
        let mut wgt = vec![0f64; directed_edges];
        let mut cursor = offsets.clone();
        for &(u, v, w) in edges {
            dst[cursor[u]] = v;
            wgt[cursor[u]] = w;
            cursor[u] += 1;
            if u != v {
                dst[cursor[v]] = u;
                wgt[cursor[v]] = w;
                cursor[v] += 1;
            }
        }
        Ok(Self {
            span,
            offsets,
            degrees,
            dst,
            wgt,
        })
    }

    /// Exclusive upper bound on vertex ids; also the length of per-vertex state.
    #[inline(always)]
    pub fn span(&self) -> usize {
        self.span
    }

    /// Number of present vertices. Vertex slots are dense, so this equals `span()`.
    #[inline(always)]
    pub fn order(&self) -> usize {
        self.span
    }

    #[inline(always)]
    pub fn has_vertex(&self, u: usize) -> bool {
        u < self.span
    }

    #[inline(always)]
    pub fn degree(&self, u: usize) -> usize {
        self.degrees[u]
    }

    /// Number of directed adjacency slots (each undirected edge counts twice,
    /// self-loops once).
    #[inline(always)]
    pub fn edge_count(&self) -> usize {
        self.dst.len()
    }

    /// Iterates `u`'s out-edges as `(neighbour, weight)` pairs.
    pub fn neighbours(&self, u: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.offsets[u]..self.offsets[u] + self.degrees[u];
        self.dst[range.clone()]
            .iter()
            .copied()
            .zip(self.wgt[range].iter().copied())
    }

    /// Sum of all directed edge weights. The undirected total weight of the graph
    /// is `edge_weight() / 2`.
    pub fn edge_weight(&self) -> f64 {
        modularity::edge_weight(self.view())
    }

    /// Modularity of `membership` on this graph under `resolution`.
    pub fn modularity(&self, membership: &[usize], resolution: f64) -> f64 {
        let m = self.edge_weight() / 2.0;
        modularity::modularity(self.view(), membership, m, resolution)
    }

    /// Whether for every stored edge `(u, v, w)` the aggregate reverse weight
    /// matches. O(E) with a hash map; intended for validation and tests.
    pub fn is_symmetric(&self) -> bool {
        let mut pair_weight: HashMap<(usize, usize), f64> = HashMap::new();
        for u in 0..self.span {
            for (v, w) in self.neighbours(u) {
                *pair_weight.entry((u, v)).or_insert(0.0) += w;
            }
        }
        pair_weight.iter().all(|(&(u, v), &w)| {
            let reverse = pair_weight.get(&(v, u)).copied().unwrap_or(0.0);
            (reverse - w).abs() <= 1e-9 * w.abs().max(1.0)
        })
    }

    pub(crate) fn view(&self) -> CsrView {
        CsrView {
            span: self.span,
            off: SharedSlice::new(self.offsets.as_ptr(), self.span + 1),
            // usize and AtomicUsize share layout; only loads go through this view
            deg: SharedSlice::new(self.degrees.as_ptr() as *const AtomicUsize, self.span),
            dst: SharedSlice::new(self.dst.as_ptr(), self.dst.len()),
            wgt: SharedSlice::new(self.wgt.as_ptr(), self.wgt.len()),
        }
    }

    #[inline(always)]
    pub(crate) fn offsets_slice(&self) -> &[usize] {
        &self.offsets
    }

    #[inline(always)]
    pub(crate) fn degrees_slice(&self) -> &[usize] {
        &self.degrees
    }

    #[inline(always)]
    pub(crate) fn dst_slice(&self) -> &[usize] {
        &self.dst
    }

    #[inline(always)]
    pub(crate) fn wgt_slice(&self) -> &[f64] {
        &self.wgt
    }
}
