pub mod gve_louvain;

#[cfg(test)]
pub(crate) use _verify::{
    verify_community_buckets, verify_contiguous_labels, verify_mass_conservation,
    verify_symmetric_level,
};

#[cfg(test)]
mod _verify {
    use crate::graph::csr::{CommunityCsr, CsrView};

    use atomic_float::AtomicF64;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    /// The community-vertex CSR must be a partition: every vertex of the level in
    /// exactly one bucket, and each bucket indexed by its members' community.
    pub(crate) fn verify_community_buckets(
        cv: &CommunityCsr,
        vcom: &[usize],
        span: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let c_count = cv.span();
        if *cv.coff.get(c_count) != span {
            return Err(format!(
                "community csr invalid: coff[{c_count}] = {} but level has {span} vertices",
                *cv.coff.get(c_count)
            )
            .into());
        }
        let mut seen = vec![false; span];
        for c in 0..c_count {
            let start = *cv.coff.get(c);
            let len = cv.cdeg.get(c).load(Ordering::Relaxed);
            if start + len > *cv.coff.get(c + 1) {
                return Err(format!("community csr invalid: bucket {c} overflows its slice").into());
            }
            for i in start..start + len {
                let u = *cv.cedg.get(i);
                if seen[u] {
                    return Err(
                        format!("community csr invalid: vertex {u} in two buckets").into()
                    );
                }
                seen[u] = true;
                if vcom[u] != c {
                    return Err(format!(
                        "community csr invalid: vertex {u} of community {} in bucket {c}",
                        vcom[u]
                    )
                    .into());
                }
            }
        }
        if let Some(u) = seen.iter().position(|&s| !s) {
            return Err(format!("community csr invalid: vertex {u} in no bucket").into());
        }
        Ok(())
    }

    /// After renumbering, labels must form the contiguous range `[0, c_count)`.
    pub(crate) fn verify_contiguous_labels(
        vcom: &[usize],
        c_count: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut present = vec![false; c_count];
        for (u, &c) in vcom.iter().enumerate() {
            if c >= c_count {
                return Err(format!(
                    "renumbering invalid: vertex {u} labelled {c} >= {c_count}"
                )
                .into());
            }
            present[c] = true;
        }
        if let Some(c) = present.iter().position(|&p| !p) {
            return Err(format!("renumbering invalid: label {c} unused").into());
        }
        Ok(())
    }

    /// `Σ_c ctot[c]` must equal `Σ_u vtot[u]` at every step of the engine.
    pub(crate) fn verify_mass_conservation(
        ctot: &[AtomicF64],
        vtot: &[f64],
        span: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let community_mass: f64 = ctot[..span]
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum();
        let vertex_mass: f64 = vtot[..span].iter().sum();
        if (community_mass - vertex_mass).abs() > 1e-6 * vertex_mass.abs().max(1.0) {
            return Err(format!(
                "weight tables invalid: community mass {community_mass} != vertex mass {vertex_mass}"
            )
            .into());
        }
        Ok(())
    }

    /// An aggregated level must stay symmetric: the aggregate weight of `(c, d)`
    /// equals the aggregate weight of `(d, c)`.
    pub(crate) fn verify_symmetric_level(g: CsrView) -> Result<(), Box<dyn std::error::Error>> {
        let mut pair_weight: HashMap<(usize, usize), f64> = HashMap::new();
        for u in 0..g.span {
            for idx in g.edge_range(u) {
                *pair_weight.entry((u, *g.dst.get(idx))).or_insert(0.0) += *g.wgt.get(idx);
            }
        }
        for (&(u, v), &w) in pair_weight.iter() {
            let reverse = pair_weight.get(&(v, u)).copied().unwrap_or(0.0);
            if (reverse - w).abs() > 1e-9 * w.abs().max(1.0) {
                return Err(format!(
                    "aggregated level asymmetric: w({u},{v}) = {w} but w({v},{u}) = {reverse}"
                )
                .into());
            }
        }
        Ok(())
    }
}
