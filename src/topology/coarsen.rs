//! Edge collapse, for edges that are too short and for clearing slivers.

use super::work::{Cavity, TriMesh, edge_key, opposite};
use crate::adapt::AdaptOpts;
use std::collections::BTreeSet;

/// Collapsing `from` onto `onto`.
struct Collapse {
    from: usize,
    onto: usize,
    cavity: Cavity,
    quality: f64,
}

impl TriMesh {
    /// The collapse of `v` onto `u`, if it keeps the mesh valid and `accept`
    /// agrees with the change of worst quality around `v`.
    fn try_collapse(
        &self,
        v: usize,
        u: usize,
        stars: &[BTreeSet<usize>],
        vert_tris: &[Vec<usize>],
        opts: &AdaptOpts,
        accept: &impl Fn(f64, f64) -> bool,
    ) -> Option<Collapse> {
        // v must stay on its model entity
        if self.vert_class[v] != self.edge_class(u, v) {
            return None;
        }
        let shared: BTreeSet<usize> = vert_tris[v]
            .iter()
            .filter(|&&t| self.tris[t].contains(&u))
            .filter_map(|&t| opposite(&self.tris[t], u, v))
            .collect();
        if stars[u].intersection(&stars[v]).ne(shared.iter()) {
            return None;
        }
        let new: Vec<_> = vert_tris[v]
            .iter()
            .map(|&t| self.tris[t])
            .filter(|tri| !tri.contains(&u))
            .map(|tri| tri.map(|x| if x == v { u } else { x }))
            .collect();
        if new.is_empty() {
            return None;
        }
        let quality = self.min_valid_quality(&new)?;
        let too_long = stars[v]
            .iter()
            .filter(|&&w| w != u && !stars[u].contains(&w))
            .any(|&w| self.edge_length(u, w) > opts.max_length_desired);
        if too_long {
            return None;
        }
        let old = self
            .min_valid_quality(vert_tris[v].iter().map(|&t| &self.tris[t]))
            .unwrap_or(f64::NEG_INFINITY);
        if !accept(old, quality) {
            return None;
        }
        Some(Collapse {
            from: v,
            onto: u,
            cavity: Cavity {
                old: vert_tris[v].clone(),
                new,
            },
            quality,
        })
    }

    /// Collapse candidate edges in order, each in whichever direction leaves
    /// the better elements, with no two collapses touching the same vertex
    /// star.
    fn collapse_edges(
        &mut self,
        cands: Vec<[usize; 2]>,
        opts: &AdaptOpts,
        accept: impl Fn(f64, f64) -> bool,
    ) -> bool {
        let stars = self.stars();
        let vert_tris = self.vert_tris();
        let mut locked = vec![false; self.nverts()];
        let mut dead = vec![false; self.nverts()];
        let mut cavities = Vec::new();
        for [a, b] in cands {
            if locked[a] || locked[b] {
                continue;
            }
            let best = [(a, b), (b, a)]
                .into_iter()
                .filter_map(|(v, u)| self.try_collapse(v, u, &stars, &vert_tris, opts, &accept))
                .max_by(|x, y| x.quality.total_cmp(&y.quality));
            let Some(c) = best else {
                continue;
            };
            locked[c.onto] = true;
            locked[c.from] = true;
            for &w in &stars[c.from] {
                locked[w] = true;
            }
            dead[c.from] = true;
            for &w in &stars[c.from] {
                if let Some(class) = self.edge_classes.remove(&edge_key(c.from, w)) {
                    if w != c.onto {
                        self.edge_classes.entry(edge_key(c.onto, w)).or_insert(class);
                    }
                }
            }
            cavities.push(c.cavity);
        }
        if cavities.is_empty() {
            return false;
        }
        log::debug!("coarsen: {} vertices collapsed", cavities.len());
        self.apply_cavities(&cavities);
        self.remove_vertices(&dead);
        true
    }

    /// One pass over edges shorter than `min_length_desired`, shortest first.
    pub fn coarsen_by_size(&mut self, opts: &AdaptOpts) -> bool {
        let mut cands: Vec<([usize; 2], f64)> = self
            .edge_tris()
            .into_keys()
            .map(|[a, b]| ([a, b], self.edge_length(a, b)))
            .filter(|&(_, l)| l < opts.min_length_desired)
            .collect();
        cands.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));
        let allowed = opts.min_quality_allowed;
        self.collapse_edges(
            cands.into_iter().map(|(e, _)| e).collect(),
            opts,
            |old, new| new >= allowed.min(old),
        )
    }

    /// Collapse edges near elements below `min_quality_desired`, within
    /// `nsliver_layers` layers of vertex neighbours, when that strictly
    /// improves the worst element involved.
    pub fn coarsen_slivers(&mut self, opts: &AdaptOpts) -> bool {
        let mut region: Vec<bool> = self
            .tris
            .iter()
            .map(|t| self.quality(t) < opts.min_quality_desired)
            .collect();
        if !region.contains(&true) {
            return false;
        }
        let vert_tris = self.vert_tris();
        for _ in 0..opts.nsliver_layers {
            let touched: BTreeSet<usize> = region
                .iter()
                .enumerate()
                .filter(|&(_, &r)| r)
                .flat_map(|(t, _)| self.tris[t])
                .collect();
            for v in touched {
                for &t in &vert_tris[v] {
                    region[t] = true;
                }
            }
        }
        let edges: BTreeSet<[usize; 2]> = region
            .iter()
            .enumerate()
            .filter(|&(_, &r)| r)
            .flat_map(|(t, _)| {
                let tri = self.tris[t];
                (0..3).map(move |i| edge_key(tri[i], tri[(i + 1) % 3]))
            })
            .collect();
        let mut cands: Vec<([usize; 2], f64)> = edges
            .into_iter()
            .map(|[a, b]| ([a, b], self.edge_length(a, b)))
            .collect();
        cands.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));
        self.collapse_edges(
            cands.into_iter().map(|(e, _)| e).collect(),
            opts,
            |old, new| new > old && new > 0.0,
        )
    }
}
