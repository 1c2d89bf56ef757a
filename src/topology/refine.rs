//! Longest-edge-first bisection of edges that are too long.

use super::work::{Cavity, Tri, TriMesh, edge_key};
use crate::adapt::AdaptOpts;

/// The two halves of `tri` when its edge `a`-`b` is split at `m`; both keep
/// the orientation of `tri`.
fn split(tri: &Tri, a: usize, b: usize, m: usize) -> [Tri; 2] {
    let replace = |from: usize| tri.map(|v| if v == from { m } else { v });
    [replace(b), replace(a)]
}

impl TriMesh {
    /// One pass: split every edge longer than `max_length_desired`, longest
    /// first, at most one edge per triangle. A split is skipped when a child
    /// would be inverted or worse than both the allowed quality and its
    /// parent.
    pub fn refine_by_size(&mut self, opts: &AdaptOpts) -> bool {
        let edge_tris = self.edge_tris();
        let mut cands: Vec<([usize; 2], f64)> = edge_tris
            .keys()
            .map(|&[a, b]| ([a, b], self.edge_length(a, b)))
            .filter(|&(_, l)| l > opts.max_length_desired)
            .collect();
        cands.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));
        let mut locked = vec![false; self.tris.len()];
        let mut cavities = Vec::new();
        for ([a, b], _) in cands {
            let parents = &edge_tris[&[a, b]];
            if parents.iter().any(|&t| locked[t]) {
                continue;
            }
            let old_min = parents
                .iter()
                .map(|&t| self.quality(&self.tris[t]))
                .fold(f64::INFINITY, f64::min);
            let m = self.push_midpoint(a, b);
            let children: Vec<(usize, [Tri; 2])> = parents
                .iter()
                .map(|&t| (t, split(&self.tris[t], a, b, m)))
                .collect();
            let floor = opts.min_quality_allowed.min(old_min);
            match self.min_valid_quality(children.iter().flat_map(|(_, c)| c)) {
                Some(q) if q >= floor => {}
                _ => {
                    self.pop_vertex();
                    continue;
                }
            }
            for (t, kids) in children {
                locked[t] = true;
                cavities.push(Cavity {
                    old: vec![t],
                    new: kids.to_vec(),
                });
            }
            if let Some(class) = self.edge_classes.remove(&[a, b]) {
                self.edge_classes.insert(edge_key(a, m), class);
                self.edge_classes.insert(edge_key(m, b), class);
            }
        }
        if cavities.is_empty() {
            return false;
        }
        log::debug!("refine: {} elements split", cavities.len());
        self.apply_cavities(&cavities);
        true
    }
}
