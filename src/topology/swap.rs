//! Diagonal flips of interior edges between two poor triangles.

use super::work::{Cavity, Tri, TriMesh, opposite};
use crate::adapt::AdaptOpts;

/// The two triangles left after flipping edge `a`-`b` shared by `first`
/// and `second`, oriented like `first`.
fn flipped(first: &Tri, second: &Tri, a: usize, b: usize) -> Option<[Tri; 2]> {
    let i = (0..3).find(|&i| {
        let (x, y) = (first[i], first[(i + 1) % 3]);
        (x, y) == (a, b) || (x, y) == (b, a)
    })?;
    let (a, b, c) = (first[i], first[(i + 1) % 3], first[(i + 2) % 3]);
    let d = opposite(second, a, b)?;
    Some([[a, d, c], [b, c, d]])
}

impl TriMesh {
    /// One pass: flip interior edges whose worse neighbour is below
    /// `min_quality_desired`, worst first, when the flip strictly improves
    /// the pair.
    pub fn swap_edges(&mut self, opts: &AdaptOpts) -> bool {
        let stars = self.stars();
        let mut cands: Vec<([usize; 2], [usize; 2], f64)> = self
            .edge_tris()
            .into_iter()
            .filter(|&([a, b], _)| self.edge_class(a, b).dim == 2)
            .filter_map(|(e, ts)| match ts[..] {
                [t, s] => Some((e, [t, s], self.quality(&self.tris[t]).min(self.quality(&self.tris[s])))),
                _ => None,
            })
            .filter(|&(_, _, q)| q < opts.min_quality_desired)
            .collect();
        cands.sort_by(|x, y| x.2.total_cmp(&y.2).then(x.0.cmp(&y.0)));
        let mut locked = vec![false; self.tris.len()];
        let mut cavities = Vec::new();
        for ([a, b], [t, s], old) in cands {
            if locked[t] || locked[s] {
                continue;
            }
            let Some(new) = flipped(&self.tris[t], &self.tris[s], a, b) else {
                continue;
            };
            let (c, d) = (new[0][2], new[0][1]);
            if stars[c].contains(&d) || self.edge_length(c, d) > opts.max_length_desired {
                continue;
            }
            match self.min_valid_quality(&new) {
                Some(q) if q > old => {}
                _ => continue,
            }
            locked[t] = true;
            locked[s] = true;
            cavities.push(Cavity {
                old: vec![t, s],
                new: new.to_vec(),
            });
        }
        if cavities.is_empty() {
            return false;
        }
        log::debug!("swap: {} edges flipped", cavities.len());
        self.apply_cavities(&cavities);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Comm, NoComm};
    use crate::data::Array;
    use crate::mesh::build_box;

    #[test]
    fn flip_keeps_orientation() {
        // (0,0) (1,0) (1,1) and (0,0) (1,1) (0,1)
        let [x, y] = flipped(&[0, 1, 3], &[0, 3, 2], 3, 0).expect("shared edge");
        assert_eq!(x, [3, 2, 1]);
        assert_eq!(y, [0, 1, 2]);
        assert!(flipped(&[0, 1, 3], &[0, 3, 2], 1, 2).is_none());
    }

    #[test]
    fn stretched_quad_takes_the_short_diagonal() {
        let mut mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[1, 1]).expect("box");
        mesh.set_coords(Array::from_vec(vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 3.0, 3.0]))
            .expect("coords");
        let mut opts = AdaptOpts::default();
        opts.max_length_desired = 2.0;
        let mut work = TriMesh::from_mesh(&mesh, &opts).expect("work");
        assert!(work.swap_edges(&opts));
        assert!(work.edge_tris().contains_key(&[1, 2]));
        assert!(!work.edge_tris().contains_key(&[0, 3]));
        let worst = work.tris.iter().map(|t| work.quality(t)).fold(f64::INFINITY, f64::min);
        assert!(worst > 0.6);
        // already the better diagonal
        assert!(!work.swap_edges(&opts));
    }

    #[test]
    fn square_diagonal_has_nothing_to_gain() {
        let mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[1, 1]).expect("box");
        let mut opts = AdaptOpts::default();
        opts.min_quality_desired = 1.0;
        let mut work = TriMesh::from_mesh(&mesh, &opts).expect("work");
        assert!(!work.swap_edges(&opts));
    }
}
