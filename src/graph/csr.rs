use crate::graph::CsrGraph;
use crate::shared_slice::{AbstractedProceduralMemoryMut, SharedSlice};
use crate::utils::parallel_for;

use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Read-only view of a CSR graph, copyable into parallel regions.
///
/// `deg[u]` holds the filled degree of `u`; it is atomic because during
/// aggregation the level buffers it aliases are concurrently updated through
/// their owning [`LevelCsr`]. Edges of `u` occupy `off[u] .. off[u] + deg[u]`.
#[derive(Clone, Copy)]
pub(crate) struct CsrView {
    pub(crate) span: usize,
    pub(crate) off: SharedSlice<usize>,
    pub(crate) deg: SharedSlice<AtomicUsize>,
    pub(crate) dst: SharedSlice<usize>,
    pub(crate) wgt: SharedSlice<f64>,
}

impl CsrView {
    #[inline(always)]
    pub(crate) fn degree(&self, u: usize) -> usize {
        self.deg.get(u).load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn edge_range(&self, u: usize) -> Range<usize> {
        let start = *self.off.get(u);
        start..start + self.degree(u)
    }
}

/// Mutable level multigraph reused across Louvain passes.
///
/// Capacity is sized once from the input graph; `respan` only moves the logical
/// vertex bound so successive (strictly smaller) aggregated graphs recycle the
/// same buffers without reallocation.
pub(crate) struct LevelCsr {
    span: usize,
    pub(crate) off: AbstractedProceduralMemoryMut<usize>,
    pub(crate) deg: AbstractedProceduralMemoryMut<AtomicUsize>,
    pub(crate) dst: AbstractedProceduralMemoryMut<usize>,
    pub(crate) wgt: AbstractedProceduralMemoryMut<f64>,
}

impl LevelCsr {
    pub(crate) fn new(
        tag: &str,
        span_capacity: usize,
        edge_capacity: usize,
        mmap_dir: Option<&Path>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            span: span_capacity,
            off: AbstractedProceduralMemoryMut::abst_mem_mut(
                &format!("{tag}_offsets"),
                span_capacity + 1,
                mmap_dir,
            )?,
            deg: AbstractedProceduralMemoryMut::abst_mem_mut(
                &format!("{tag}_degrees"),
                span_capacity,
                mmap_dir,
            )?,
            dst: AbstractedProceduralMemoryMut::abst_mem_mut(
                &format!("{tag}_edges"),
                edge_capacity,
                mmap_dir,
            )?,
            wgt: AbstractedProceduralMemoryMut::abst_mem_mut(
                &format!("{tag}_weights"),
                edge_capacity,
                mmap_dir,
            )?,
        })
    }

    #[inline(always)]
    pub(crate) fn span(&self) -> usize {
        self.span
    }

    pub(crate) fn respan(&mut self, span: usize) {
        assert!(span + 1 <= self.off.len(), "respan beyond capacity");
        self.span = span;
    }

    pub(crate) fn view(&self) -> CsrView {
        CsrView {
            span: self.span,
            off: self.off.shared_slice().as_read_only(),
            deg: self.deg.shared_slice().as_read_only(),
            dst: self.dst.shared_slice().as_read_only(),
            wgt: self.wgt.shared_slice().as_read_only(),
        }
    }

    /// Writes a full copy of the input graph into this level's buffers so every
    /// pass, including the first, runs on the same representation.
    pub(crate) fn copy_from(
        &mut self,
        g: &CsrGraph,
        threads: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        assert!(g.edge_count() <= self.dst.len(), "copy beyond edge capacity");
        self.respan(g.span());
        let mut off = self.off.shared_slice();
        off.write_slice(0, g.offsets_slice());
        let mut dst = self.dst.shared_slice();
        dst.write_slice(0, g.dst_slice());
        let mut wgt = self.wgt.shared_slice();
        wgt.write_slice(0, g.wgt_slice());
        let deg = self.deg.shared_slice();
        let degrees = g.degrees_slice();
        parallel_for(g.span(), threads, |_, range| {
            for u in range {
                deg.get(u).store(degrees[u], Ordering::Relaxed);
            }
        })
    }
}

/// CSR grouping the vertices of the current level by community, rebuilt before
/// each aggregation. Bucket `c` is `cedg[coff[c] .. coff[c] + cdeg[c]]`.
pub(crate) struct CommunityCsr {
    span: usize,
    pub(crate) coff: AbstractedProceduralMemoryMut<usize>,
    pub(crate) cdeg: AbstractedProceduralMemoryMut<AtomicUsize>,
    pub(crate) cedg: AbstractedProceduralMemoryMut<usize>,
}

impl CommunityCsr {
    pub(crate) fn new(
        tag: &str,
        span_capacity: usize,
        mmap_dir: Option<&Path>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            span: span_capacity,
            coff: AbstractedProceduralMemoryMut::abst_mem_mut(
                &format!("{tag}_offsets"),
                span_capacity + 1,
                mmap_dir,
            )?,
            cdeg: AbstractedProceduralMemoryMut::abst_mem_mut(
                &format!("{tag}_degrees"),
                span_capacity,
                mmap_dir,
            )?,
            cedg: AbstractedProceduralMemoryMut::abst_mem_mut(
                &format!("{tag}_vertices"),
                span_capacity,
                mmap_dir,
            )?,
        })
    }

    #[inline(always)]
    pub(crate) fn span(&self) -> usize {
        self.span
    }

    pub(crate) fn respan(&mut self, span: usize) {
        assert!(span + 1 <= self.coff.len(), "respan beyond capacity");
        self.span = span;
    }
}
