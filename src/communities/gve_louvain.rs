use crate::graph::csr::{CommunityCsr, CsrView, LevelCsr};
use crate::graph::CsrGraph;
use crate::modularity::{self, delta_modularity};
use crate::shared_slice::{AbstractedProceduralMemoryMut, SharedSliceMut};
use crate::utils::{ensure_finite, exclusive_scan_parallel, parallel_for};

use atomic_float::AtomicF64;
use crossbeam::thread;
use num_cpus::get_physical;
use smallvec::SmallVec;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Sentinel returned by the community scorer when no neighbouring community
/// strictly improves modularity. Never a valid community label (labels are
/// bounded by the graph span).
pub(crate) const NO_COMMUNITY: usize = usize::MAX;

/// Options for the multi-level Louvain engine.
#[derive(Debug, Clone)]
pub struct LouvainOptions {
    /// Timed repetitions; the partition of the last run is kept and timings are
    /// averaged over all runs.
    pub repeat: usize,
    /// Modularity resolution. `1.0` is the classic formulation.
    pub resolution: f64,
    /// Initial l1-energy threshold for local-move convergence.
    pub tolerance: f64,
    /// Stop when the per-level compression ratio `C/N` reaches this value.
    pub aggregation_tolerance: f64,
    /// Divisor applied to the tolerance after every pass (threshold scaling).
    pub tolerance_decline: f64,
    /// Iteration cap per local-moving phase.
    pub max_iterations: usize,
    /// Pass (level) cap.
    pub max_passes: usize,
    /// Worker count; defaults to the number of physical cores.
    pub threads: Option<usize>,
    /// When set, per-vertex state and per-worker scratch are spilled to
    /// memory-mapped scratch files under this directory.
    pub mmap_dir: Option<PathBuf>,
}

impl Default for LouvainOptions {
    fn default() -> Self {
        Self {
            repeat: 1,
            resolution: 1.0,
            tolerance: 1e-2,
            aggregation_tolerance: 0.8,
            tolerance_decline: 100.0,
            max_iterations: 20,
            max_passes: 10,
            threads: None,
            mmap_dir: None,
        }
    }
}

impl LouvainOptions {
    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.repeat == 0 {
            return Err("error louvain invalid parameters: repeat == 0".into());
        }
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(format!(
                "error louvain invalid parameters: resolution == {} doesn't satisfy resolution > 0.0",
                self.resolution
            )
            .into());
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(format!(
                "error louvain invalid parameters: tolerance == {} doesn't satisfy tolerance >= 0.0",
                self.tolerance
            )
            .into());
        }
        if !self.aggregation_tolerance.is_finite() || self.aggregation_tolerance <= 0.0 {
            return Err(format!(
                "error louvain invalid parameters: aggregation_tolerance == {} doesn't satisfy aggregation_tolerance > 0.0",
                self.aggregation_tolerance
            )
            .into());
        }
        if !self.tolerance_decline.is_finite() || self.tolerance_decline < 1.0 {
            return Err(format!(
                "error louvain invalid parameters: tolerance_decline == {} doesn't satisfy tolerance_decline >= 1.0",
                self.tolerance_decline
            )
            .into());
        }
        if self.max_iterations == 0 || self.max_passes == 0 {
            return Err(
                "error louvain invalid parameters: max_iterations and max_passes must be >= 1"
                    .into(),
            );
        }
        if self.threads == Some(0) {
            return Err("error louvain invalid parameters: threads == Some(0)".into());
        }
        Ok(())
    }
}

/// Telemetry of one engine invocation. Timing fields are per-repetition averages.
#[derive(Debug, Clone, Default)]
pub struct LouvainStats {
    /// Total local-move iterations summed over passes (each pass counts at least one).
    pub iterations: usize,
    /// Passes (levels) performed.
    pub passes: usize,
    pub time: Duration,
    pub preprocessing_time: Duration,
    pub first_pass_time: Duration,
    pub local_move_time: Duration,
    pub aggregation_time: Duration,
    /// Vertices marked affected by the preprocessing hook.
    pub affected_vertices: usize,
}

type ProceduralMemoryGVELouvain = (
    // vcom --- community of each vertex at the current level
    AbstractedProceduralMemoryMut<usize>,
    // vtot --- total incident weight of each vertex
    AbstractedProceduralMemoryMut<f64>,
    // ctot --- total incident weight of each community
    AbstractedProceduralMemoryMut<AtomicF64>,
    // vaff --- is vertex affected flag
    AbstractedProceduralMemoryMut<AtomicBool>,
    // cext --- community existence flags, scanned in place for renumbering
    AbstractedProceduralMemoryMut<AtomicUsize>,
);

/// Per-worker sparse accumulator for one vertex scan: `vcs` lists the touched
/// communities in touch order, `vcout` is a dense span-length array serving as
/// the hash table (`vcout[c]` nonzero iff `c` was touched). Clearing is
/// O(|vcs|), not O(span); the memory cost is O(T · span) for T workers.
pub(crate) struct ScanScratch {
    vcs: SmallVec<[usize; 8]>,
    vcout: AbstractedProceduralMemoryMut<f64>,
}

impl ScanScratch {
    pub(crate) fn new(
        span: usize,
        mmap_dir: Option<&Path>,
        tid: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            vcs: SmallVec::new(),
            vcout: AbstractedProceduralMemoryMut::abst_mem_mut(
                &format!("scan_scratch_{tid}"),
                span,
                mmap_dir,
            )?,
        })
    }

    /// Accumulates the edge `(u, v, w)` under `v`'s community. `self_allowed`
    /// controls whether `v == u` contributes (true during aggregation, false
    /// during local moves).
    #[inline(always)]
    pub(crate) fn scan(
        &mut self,
        u: usize,
        v: usize,
        w: f64,
        self_allowed: bool,
        vcom: SharedSliceMut<usize>,
    ) {
        if !self_allowed && u == v {
            return;
        }
        let c = *vcom.get(v);
        let mut vcout = self.vcout.shared_slice();
        if *vcout.get(c) == 0.0 {
            self.vcs.push(c);
        }
        *vcout.get_mut(c) += w;
    }

    /// Zeroes exactly the touched slots and empties the touch list.
    #[inline(always)]
    pub(crate) fn clear(&mut self) {
        let mut vcout = self.vcout.shared_slice();
        for &c in self.vcs.iter() {
            *vcout.get_mut(c) = 0.0;
        }
        self.vcs.clear();
    }

    #[inline(always)]
    pub(crate) fn communities(&self) -> &[usize] {
        &self.vcs
    }

    #[inline(always)]
    pub(crate) fn weight_to(&self, c: usize) -> f64 {
        *self.vcout.get(c)
    }

    #[cfg(test)]
    pub(crate) fn is_clean(&self) -> bool {
        self.vcs.is_empty() && self.vcout.as_slice().iter().all(|&w| w == 0.0)
    }
}

/// Computes the total incident weight of each vertex of the level graph.
pub(crate) fn louvain_vertex_weights(
    vtot: SharedSliceMut<f64>,
    g: CsrView,
    threads: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    parallel_for(g.span, threads, |_, range| {
        let mut vtot = vtot;
        for u in range {
            let mut sum = 0.0f64;
            for idx in g.edge_range(u) {
                sum += *g.wgt.get(idx);
            }
            *vtot.get_mut(u) = sum;
        }
    })
}

/// Initializes each vertex into its own community.
pub(crate) fn louvain_initialize(
    vcom: SharedSliceMut<usize>,
    ctot: SharedSliceMut<AtomicF64>,
    vtot: SharedSliceMut<f64>,
    span: usize,
    threads: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    parallel_for(span, threads, |_, range| {
        let mut vcom = vcom;
        for u in range {
            *vcom.get_mut(u) = u;
            ctot.get(u).store(*vtot.get(u), Ordering::Relaxed);
        }
    })
}

/// Initializes communities from a caller-supplied partition `q`. Multiple
/// vertices may share a community, hence the atomic accumulation into `ctot`.
pub(crate) fn louvain_initialize_from(
    vcom: SharedSliceMut<usize>,
    ctot: SharedSliceMut<AtomicF64>,
    vtot: SharedSliceMut<f64>,
    q: &[usize],
    span: usize,
    threads: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    parallel_for(span, threads, |_, range| {
        for c in range {
            ctot.get(c).store(0.0, Ordering::Relaxed);
        }
    })?;
    parallel_for(span, threads, |_, range| {
        let mut vcom = vcom;
        for u in range {
            let c = q[u];
            *vcom.get_mut(u) = c;
            ctot.get(c).fetch_add(*vtot.get(u), Ordering::Relaxed);
        }
    })
}

/// Picks the neighbouring community of `u` with the best strictly positive
/// delta modularity, in scratch touch order (the first maximum wins ties).
/// Returns `(NO_COMMUNITY, 0.0)` when staying put is at least as good.
pub(crate) fn louvain_choose_community(
    scratch: &ScanScratch,
    d: usize,
    vtot_u: f64,
    ctot: SharedSliceMut<AtomicF64>,
    m: f64,
    r: f64,
) -> (usize, f64) {
    let ctot_d = ctot.get(d).load(Ordering::Relaxed);
    let w_ud = scratch.weight_to(d);
    let mut cmax = NO_COMMUNITY;
    let mut emax = 0.0f64;
    for &c in scratch.communities() {
        if c == d {
            continue;
        }
        let e = delta_modularity(
            scratch.weight_to(c),
            w_ud,
            vtot_u,
            ctot.get(c).load(Ordering::Relaxed),
            ctot_d,
            m,
            r,
        );
        if e > emax {
            emax = e;
            cmax = c;
        }
    }
    (cmax, emax)
}

/// Moves `u` into community `c`, maintaining the community weight table.
#[inline(always)]
pub(crate) fn louvain_change_community(
    mut vcom: SharedSliceMut<usize>,
    ctot: SharedSliceMut<AtomicF64>,
    u: usize,
    c: usize,
    vtot_u: f64,
) {
    let d = *vcom.get(u);
    ctot.get(d).fetch_sub(vtot_u, Ordering::Relaxed);
    ctot.get(c).fetch_add(vtot_u, Ordering::Relaxed);
    *vcom.get_mut(u) = c;
}

/// Louvain's local-moving phase over the affected vertex set.
///
/// Iterates until the convergence predicate `fc(el, iteration)` accepts the
/// iteration's l1-energy `el` (the sum of accepted gains) or `max_iterations`
/// is reached. Returns the number of iterations performed, with 0 signalling
/// that the very first iteration made no progress at all.
///
/// `vcom` and `vaff` updates race benignly across workers: a move missed by a
/// concurrent reader is recovered in a later iteration because affected flags
/// propagate through neighbours. `ctot` is kept exact with atomic adds.
#[allow(clippy::too_many_arguments)]
pub(crate) fn louvain_move(
    g: CsrView,
    vcom: SharedSliceMut<usize>,
    ctot: SharedSliceMut<AtomicF64>,
    vtot: SharedSliceMut<f64>,
    vaff: SharedSliceMut<AtomicBool>,
    scratch: &mut [ScanScratch],
    m: f64,
    r: f64,
    max_iterations: usize,
    fc: &dyn Fn(f64, usize) -> bool,
    threads: usize,
) -> Result<usize, Box<dyn std::error::Error>> {
    let span = g.span;
    let threads = threads.max(1).min(scratch.len().max(1));
    let load = span.div_ceil(threads);
    let mut l = 0usize;
    let mut el = 0.0f64;
    while l < max_iterations {
        let partials: Vec<f64> = thread::scope(|scope| {
            let mut workers = Vec::with_capacity(threads);
            for (tid, sc) in scratch.iter_mut().enumerate().take(threads) {
                let begin = std::cmp::min(tid * load, span);
                let end = std::cmp::min(begin + load, span);
                workers.push(scope.spawn(move |_| -> f64 {
                    let mut vcom = vcom;
                    let mut el_local = 0.0f64;
                    for u in begin..end {
                        if !vaff.get(u).swap(false, Ordering::Relaxed) {
                            continue;
                        }
                        sc.clear();
                        for idx in g.edge_range(u) {
                            sc.scan(u, *g.dst.get(idx), *g.wgt.get(idx), false, vcom);
                        }
                        let d = *vcom.get(u);
                        let vtot_u = *vtot.get(u);
                        let (c, e) = louvain_choose_community(sc, d, vtot_u, ctot, m, r);
                        if c != NO_COMMUNITY {
                            louvain_change_community(vcom, ctot, u, c, vtot_u);
                            for idx in g.edge_range(u) {
                                let v = *g.dst.get(idx);
                                if v != u {
                                    vaff.get(v).store(true, Ordering::Relaxed);
                                }
                            }
                            el_local += e;
                        }
                    }
                    el_local
                }));
            }
            workers
                .into_iter()
                .map(|w| {
                    w.join()
                        .map_err(|e| format!("error joining local-move worker: {:?}", e))
                })
                .collect::<Result<Vec<f64>, String>>()
        })
        .map_err(|e| -> Box<dyn std::error::Error> { format!("{:?}", e).into() })??;
        el = partials.into_iter().sum();
        ensure_finite(el, "l1-energy of local-moving iteration")?;
        let converged = fc(el, l);
        l += 1;
        if converged {
            break;
        }
    }
    Ok(if l > 1 || el > 0.0 { l } else { 0 })
}

/// Flags every nonempty community in `cext` and returns their count.
pub(crate) fn louvain_community_exists(
    cext: SharedSliceMut<AtomicUsize>,
    vcom: SharedSliceMut<usize>,
    span: usize,
    threads: usize,
) -> Result<usize, Box<dyn std::error::Error>> {
    parallel_for(span, threads, |_, range| {
        for c in range {
            cext.get(c).store(0, Ordering::Relaxed);
        }
    })?;
    let count = AtomicUsize::new(0);
    parallel_for(span, threads, |_, range| {
        let mut local = 0usize;
        for u in range {
            let c = *vcom.get(u);
            if cext.get(c).swap(1, Ordering::Relaxed) == 0 {
                local += 1;
            }
        }
        count.fetch_add(local, Ordering::Relaxed);
    })?;
    Ok(count.load(Ordering::Relaxed))
}

/// Compacts community labels to the contiguous range `[0, C)` by exclusive-
/// scanning the existence flags in place and rewriting `vcom` through them.
/// Must run after [`louvain_community_exists`] on the same `cext`.
pub(crate) fn louvain_renumber_communities(
    vcom: SharedSliceMut<usize>,
    cext: SharedSliceMut<AtomicUsize>,
    span: usize,
    threads: usize,
) -> Result<usize, Box<dyn std::error::Error>> {
    let scan = unsafe { cext.cast::<usize>() }
        .ok_or("error casting community flags for the renumbering prefix scan")?;
    let c_count = exclusive_scan_parallel(scan, span, threads)?;
    parallel_for(span, threads, |_, range| {
        let mut vcom = vcom;
        for u in range {
            let old = *vcom.get(u);
            *vcom.get_mut(u) = *scan.get(old);
        }
    })?;
    Ok(c_count)
}

/// Composes the carried membership through the current level's assignment:
/// `a[u] = vcom[a[u]]` for every original vertex.
pub(crate) fn louvain_lookup_communities(
    a: SharedSliceMut<usize>,
    vcom: SharedSliceMut<usize>,
    span: usize,
    threads: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    parallel_for(span, threads, |_, range| {
        let mut a = a;
        for u in range {
            *a.get_mut(u) = *vcom.get(*a.get(u));
        }
    })
}

/// Groups the level's vertices by community into `cv`: count, exclusive scan,
/// then scatter with per-community fetch-and-add cursors. Bucket order is
/// unspecified.
pub(crate) fn louvain_community_vertices(
    cv: &mut CommunityCsr,
    vcom: SharedSliceMut<usize>,
    span: usize,
    c_count: usize,
    threads: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    cv.respan(c_count);
    let cdeg = cv.cdeg.shared_slice();
    let coff = cv.coff.shared_slice();
    let cedg = cv.cedg.shared_slice();
    parallel_for(c_count, threads, |_, range| {
        for c in range {
            cdeg.get(c).store(0, Ordering::Relaxed);
        }
    })?;
    parallel_for(span, threads, |_, range| {
        for u in range {
            cdeg.get(*vcom.get(u)).fetch_add(1, Ordering::Relaxed);
        }
    })?;
    parallel_for(c_count, threads, |_, range| {
        let mut coff = coff;
        for c in range {
            *coff.get_mut(c) = cdeg.get(c).load(Ordering::Relaxed);
        }
    })?;
    let total = exclusive_scan_parallel(coff, c_count, threads)?;
    {
        let mut coff = coff;
        *coff.get_mut(c_count) = total;
    }
    parallel_for(c_count, threads, |_, range| {
        for c in range {
            cdeg.get(c).store(0, Ordering::Relaxed);
        }
    })?;
    parallel_for(span, threads, |_, range| {
        let mut cedg = cedg;
        for u in range {
            let c = *vcom.get(u);
            let idx = *coff.get(c) + cdeg.get(c).fetch_add(1, Ordering::Relaxed);
            *cedg.get_mut(idx) = u;
        }
    })
}

/// Louvain's aggregation phase: folds the current partition into the next-level
/// multigraph `z` whose vertices are the `c_count` renumbered communities.
///
/// Offsets come from an exclusive scan of per-community total degrees (an upper
/// bound on distinct neighbour communities); each community bucket is then
/// swept by exactly one worker, so its `z.deg` cursor sees no contention.
/// Intra-community edges, scanned with self-loops allowed, fold into the
/// community's own self-loop, preserving total edge weight and modularity.
pub(crate) fn louvain_aggregate(
    z: &mut LevelCsr,
    g: CsrView,
    vcom: SharedSliceMut<usize>,
    cv: &CommunityCsr,
    scratch: &mut [ScanScratch],
    c_count: usize,
    threads: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    z.respan(c_count);
    let zoff = z.off.shared_slice();
    let zdeg = z.deg.shared_slice();
    let zdst = z.dst.shared_slice();
    let zwgt = z.wgt.shared_slice();
    parallel_for(c_count, threads, |_, range| {
        for c in range {
            zdeg.get(c).store(0, Ordering::Relaxed);
        }
    })?;
    parallel_for(g.span, threads, |_, range| {
        for u in range {
            zdeg.get(*vcom.get(u)).fetch_add(g.degree(u), Ordering::Relaxed);
        }
    })?;
    parallel_for(c_count, threads, |_, range| {
        let mut zoff = zoff;
        for c in range {
            *zoff.get_mut(c) = zdeg.get(c).load(Ordering::Relaxed);
        }
    })?;
    let total = exclusive_scan_parallel(zoff, c_count, threads)?;
    {
        let mut zoff = zoff;
        *zoff.get_mut(c_count) = total;
    }
    parallel_for(c_count, threads, |_, range| {
        for c in range {
            zdeg.get(c).store(0, Ordering::Relaxed);
        }
    })?;

    let coff = cv.coff.shared_slice();
    let cdeg = cv.cdeg.shared_slice();
    let cedg = cv.cedg.shared_slice();
    let threads = threads.max(1).min(scratch.len().max(1));
    let load = c_count.div_ceil(threads);
    thread::scope(|scope| {
        let mut workers = Vec::with_capacity(threads);
        for (tid, sc) in scratch.iter_mut().enumerate().take(threads) {
            let begin = std::cmp::min(tid * load, c_count);
            let end = std::cmp::min(begin + load, c_count);
            workers.push(scope.spawn(move |_| {
                let mut zdst = zdst;
                let mut zwgt = zwgt;
                for c in begin..end {
                    let bucket_start = *coff.get(c);
                    let bucket_len = cdeg.get(c).load(Ordering::Relaxed);
                    if bucket_len == 0 {
                        continue;
                    }
                    sc.clear();
                    for i in bucket_start..bucket_start + bucket_len {
                        let u = *cedg.get(i);
                        for idx in g.edge_range(u) {
                            sc.scan(u, *g.dst.get(idx), *g.wgt.get(idx), true, vcom);
                        }
                    }
                    for &d in sc.communities() {
                        let pos = *zoff.get(c) + zdeg.get(c).fetch_add(1, Ordering::Relaxed);
                        *zdst.get_mut(pos) = d;
                        *zwgt.get_mut(pos) = sc.weight_to(d);
                    }
                }
            }));
        }
        workers
            .into_iter()
            .map(|w| {
                w.join()
                    .map_err(|e| format!("error joining aggregation worker: {:?}", e))
            })
            .collect::<Result<Vec<()>, String>>()
    })
    .map_err(|e| -> Box<dyn std::error::Error> { format!("{:?}", e).into() })??;
    Ok(())
}

/// Multi-level Louvain community detection as described in ["GVE-Louvain: Fast
/// Louvain Algorithm for Community Detection in Shared Memory Setting"](https://doi.org/10.48550/arXiv.2312.04876)
/// by Sahu S., on [`CsrGraph`] instances.
///
/// Alternates a parallel local-moving phase with community aggregation until the
/// per-level movement converges, the pass cap is hit, or aggregation stops
/// shrinking the graph. The final vertex to community assignment is obtained by
/// composing the per-level assignments top-down.
///
/// [`CsrGraph`]: ../../graph/struct.CsrGraph.html#
#[allow(dead_code)]
pub struct AlgoGVELouvain<'a> {
    /// The graph whose communities are computed.
    graph: &'a CsrGraph,
    /// Community of each original vertex at the top level.
    membership: AbstractedProceduralMemoryMut<usize>,
    community_count: usize,
    modularity: f64,
    stats: LouvainStats,
}

#[allow(dead_code)]
impl<'a> AlgoGVELouvain<'a> {
    /// Static Louvain over the whole graph with default options: every vertex
    /// starts affected and in its own community.
    pub fn new(graph: &'a CsrGraph) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_options(graph, None, &LouvainOptions::default())
    }

    /// Louvain with explicit options and an optional initial partition `q`
    /// (length `span`, labels below `span`).
    pub fn with_options(
        graph: &'a CsrGraph,
        q: Option<&[usize]>,
        o: &LouvainOptions,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_marker(graph, q, o, |vaff: &[AtomicBool]| {
            for flag in vaff {
                flag.store(true, Ordering::Relaxed);
            }
        })
    }

    /// Louvain with a caller-supplied preprocessing hook `fm` that marks the
    /// initially affected vertices. Only marked vertices are scanned in the
    /// first local-moving iteration of the first pass.
    pub fn with_marker<FM: FnMut(&[AtomicBool])>(
        graph: &'a CsrGraph,
        q: Option<&[usize]>,
        o: &LouvainOptions,
        mut fm: FM,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        o.validate()?;
        if let Some(q) = q {
            if q.len() != graph.span() {
                return Err(format!(
                    "error louvain initial partition length {} != graph span {}",
                    q.len(),
                    graph.span()
                )
                .into());
            }
            if let Some(&bad) = q.iter().find(|&&c| c >= graph.span()) {
                return Err(format!(
                    "error louvain initial partition label {bad} out of range [0, {})",
                    graph.span()
                )
                .into());
            }
        }
        let membership = AbstractedProceduralMemoryMut::<usize>::abst_mem_mut(
            "membership",
            graph.span(),
            o.mmap_dir.as_deref(),
        )?;
        let mut louvain = Self {
            graph,
            membership,
            community_count: 0,
            modularity: 0.0,
            stats: LouvainStats::default(),
        };
        louvain.compute(q, o, &mut fm)?;
        Ok(louvain)
    }

    /// Community of each original vertex. Labels are drawn from the last
    /// level's label space and need not be contiguous.
    pub fn membership(&self) -> &[usize] {
        self.membership.as_slice()
    }

    pub fn community_count(&self) -> usize {
        self.community_count
    }

    pub fn partition_modularity(&self) -> f64 {
        self.modularity
    }

    pub fn stats(&self) -> &LouvainStats {
        &self.stats
    }

    fn init_procedural_memory_gve_louvain(
        span: usize,
        mmap_dir: Option<&Path>,
    ) -> Result<ProceduralMemoryGVELouvain, Box<dyn std::error::Error>> {
        let vcom = AbstractedProceduralMemoryMut::abst_mem_mut("vcom", span, mmap_dir)?;
        let vtot = AbstractedProceduralMemoryMut::abst_mem_mut("vtot", span, mmap_dir)?;
        let ctot = AbstractedProceduralMemoryMut::abst_mem_mut("ctot", span, mmap_dir)?;
        let vaff = AbstractedProceduralMemoryMut::abst_mem_mut("vaff", span, mmap_dir)?;
        let cext = AbstractedProceduralMemoryMut::abst_mem_mut("cext", span, mmap_dir)?;
        Ok((vcom, vtot, ctot, vaff, cext))
    }

    fn compute<FM: FnMut(&[AtomicBool])>(
        &mut self,
        q: Option<&[usize]>,
        o: &LouvainOptions,
        fm: &mut FM,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let span = self.graph.span();
        self.stats = LouvainStats::default();
        if span == 0 {
            return Ok(());
        }
        let threads = o.threads.unwrap_or_else(get_physical).max(1);
        let mmap_dir = o.mmap_dir.as_deref();
        let edge_capacity = self.graph.edge_count();

        let (vcom, vtot, ctot, vaff, cext) =
            Self::init_procedural_memory_gve_louvain(span, mmap_dir)?;
        let mut y = LevelCsr::new("level_y", span, edge_capacity, mmap_dir)?;
        let mut z = LevelCsr::new("level_z", span, edge_capacity, mmap_dir)?;
        let mut cv = CommunityCsr::new("community_vertices", span, mmap_dir)?;
        let mut scratch = Vec::with_capacity(threads);
        for tid in 0..threads {
            scratch.push(ScanScratch::new(span, mmap_dir, tid)?);
        }

        let vcom_s = vcom.shared_slice();
        let vtot_s = vtot.shared_slice();
        let ctot_s = ctot.shared_slice();
        let vaff_s = vaff.shared_slice();
        let cext_s = cext.shared_slice();
        let a_s = self.membership.shared_slice();

        let m = modularity::edge_weight(self.graph.view()) / 2.0;
        ensure_finite(m, "total graph edge weight")?;

        let mut t_total = Duration::ZERO;
        let mut tm = Duration::ZERO;
        let mut tp = Duration::ZERO;
        let mut tl = Duration::ZERO;
        let mut ta = Duration::ZERO;

        for _rep in 0..o.repeat {
            let t_run = Instant::now();

            let t_mark = Instant::now();
            parallel_for(span, threads, |_, range| {
                for u in range {
                    vaff_s.get(u).store(false, Ordering::Relaxed);
                }
            })?;
            fm(vaff.as_slice());
            tm += t_mark.elapsed();

            let affected = AtomicUsize::new(0);
            parallel_for(span, threads, |_, range| {
                let mut local = 0usize;
                for u in range {
                    if vaff_s.get(u).load(Ordering::Relaxed) {
                        local += 1;
                    }
                }
                affected.fetch_add(local, Ordering::Relaxed);
            })?;
            self.stats.affected_vertices = affected.load(Ordering::Relaxed);

            // identity membership; stays put when the graph carries no weight
            parallel_for(span, threads, |_, range| {
                let mut a = a_s;
                for u in range {
                    *a.get_mut(u) = u;
                }
            })?;

            let mut l = 0usize;
            let mut p = 0usize;
            if m > 0.0 {
                y.copy_from(self.graph, threads)?;
                louvain_vertex_weights(vtot_s, y.view(), threads)?;
                match q {
                    Some(q) => {
                        louvain_initialize_from(vcom_s, ctot_s, vtot_s, q, span, threads)?
                    }
                    None => louvain_initialize(vcom_s, ctot_s, vtot_s, span, threads)?,
                }
                let mut e_tol = o.tolerance;
                let t0 = Instant::now();
                let mut first_pass_end: Option<Instant> = None;
                loop {
                    if p == 1 && first_pass_end.is_none() {
                        first_pass_end = Some(Instant::now());
                    }
                    let t_move = Instant::now();
                    let fc = |el: f64, _iteration: usize| el <= e_tol;
                    let m_iters = louvain_move(
                        y.view(),
                        vcom_s,
                        ctot_s,
                        vtot_s,
                        vaff_s,
                        &mut scratch,
                        m,
                        o.resolution,
                        o.max_iterations,
                        &fc,
                        threads,
                    )?;
                    tl += t_move.elapsed();
                    l += m_iters.max(1);
                    p += 1;
                    if m_iters <= 1 || p >= o.max_passes {
                        break;
                    }
                    let n_level = y.span();
                    let c_count = louvain_community_exists(cext_s, vcom_s, n_level, threads)?;
                    if c_count as f64 / n_level as f64 >= o.aggregation_tolerance {
                        break;
                    }
                    louvain_renumber_communities(vcom_s, cext_s, n_level, threads)?;
                    // fold through the renumbered labels before vcom is reset for
                    // the next level, so `a` always holds next-level vertex ids
                    if p == 1 {
                        parallel_for(span, threads, |_, range| {
                            let mut a = a_s;
                            for u in range {
                                *a.get_mut(u) = *vcom_s.get(u);
                            }
                        })?;
                    } else {
                        louvain_lookup_communities(a_s, vcom_s, span, threads)?;
                    }
                    louvain_community_vertices(&mut cv, vcom_s, n_level, c_count, threads)?;
                    let t_agg = Instant::now();
                    louvain_aggregate(&mut z, y.view(), vcom_s, &cv, &mut scratch, c_count, threads)?;
                    std::mem::swap(&mut y, &mut z);
                    ta += t_agg.elapsed();
                    louvain_vertex_weights(vtot_s, y.view(), threads)?;
                    louvain_initialize(vcom_s, ctot_s, vtot_s, y.span(), threads)?;
                    parallel_for(y.span(), threads, |_, range| {
                        for u in range {
                            vaff_s.get(u).store(true, Ordering::Relaxed);
                        }
                    })?;
                    e_tol /= o.tolerance_decline;
                }
                // fold the last level into the carried membership
                if p <= 1 {
                    parallel_for(span, threads, |_, range| {
                        let mut a = a_s;
                        for u in range {
                            *a.get_mut(u) = *vcom_s.get(u);
                        }
                    })?;
                } else {
                    louvain_lookup_communities(a_s, vcom_s, span, threads)?;
                }
                tp += first_pass_end.unwrap_or_else(Instant::now).duration_since(t0);
            }
            self.stats.iterations = l;
            self.stats.passes = p;
            t_total += t_run.elapsed();
        }

        let repeat = o.repeat as u32;
        self.stats.time = t_total / repeat;
        self.stats.preprocessing_time = tm / repeat;
        self.stats.first_pass_time = tp / repeat;
        self.stats.local_move_time = tl / repeat;
        self.stats.aggregation_time = ta / repeat;

        self.community_count = louvain_community_exists(cext_s, a_s, span, threads)?;
        self.modularity =
            modularity::modularity(self.graph.view(), self.membership.as_slice(), m, o.resolution);
        ensure_finite(self.modularity, "partition modularity")?;
        Ok(())
    }
}
