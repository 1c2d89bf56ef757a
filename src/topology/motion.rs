//! Vertex smoothing by small steps towards neighbours.

use super::work::TriMesh;
use crate::adapt::AdaptOpts;
use crate::metric::matrix::Vector;
use std::collections::BTreeSet;

/// Smallest improvement of the worst adjacent quality that counts as a move.
pub const MIN_MOTION_GAIN: f64 = 1e-6;

/// Position and vertex field values of one vertex.
#[derive(Clone, Debug)]
struct VertState {
    x: Vector<2>,
    fields: Vec<Vec<f64>>,
}

impl TriMesh {
    fn vert_state(&self, v: usize) -> VertState {
        VertState {
            x: self.coords[v],
            fields: self.vert_fields.values().map(|f| f.get(v).to_vec()).collect(),
        }
    }

    fn set_vert_state(&mut self, v: usize, state: &VertState) {
        self.coords[v] = state.x;
        for (f, values) in self.vert_fields.values_mut().zip(&state.fields) {
            f.set(v, values);
        }
    }

    /// `v` moved `s` of the way towards `w`, fields blended alike.
    fn step_towards(&self, v: usize, w: usize, s: f64) -> VertState {
        let (xv, xw) = (self.coords[v], self.coords[w]);
        VertState {
            x: [(1.0 - s) * xv[0] + s * xw[0], (1.0 - s) * xv[1] + s * xw[1]],
            fields: self
                .vert_fields
                .values()
                .map(|f| f.mix(f.get(v), f.get(w), s))
                .collect(),
        }
    }

    /// Move vertices of elements below `min_quality_desired`, one at a time.
    ///
    /// Each vertex slides only along edges classified like itself, taking
    /// up to `max_motion_steps` steps of `motion_step_size` while the worst
    /// adjacent quality keeps rising and no adjacent edge exceeds
    /// `max_length_allowed`.
    pub fn move_verts_for_quality(&mut self, opts: &AdaptOpts) -> bool {
        let vert_tris = self.vert_tris();
        let stars = self.stars();
        let cands: BTreeSet<usize> = self
            .tris
            .iter()
            .filter(|t| self.quality(t) < opts.min_quality_desired)
            .flatten()
            .copied()
            .collect();
        let local_min = |mesh: &TriMesh, v: usize| mesh.min_valid_quality(vert_tris[v].iter().map(|&t| &mesh.tris[t]));
        let mut moved = 0usize;
        for v in cands {
            let directions: Vec<usize> = stars[v]
                .iter()
                .copied()
                .filter(|&w| self.edge_class(v, w) == self.vert_class[v])
                .collect();
            if directions.is_empty() {
                continue;
            }
            let Some(start_quality) = local_min(&*self, v) else {
                continue;
            };
            let start = self.vert_state(v);
            let mut last = start_quality;
            for _ in 0..opts.max_motion_steps {
                let here = self.vert_state(v);
                let mut best: Option<(f64, VertState)> = None;
                for &w in &directions {
                    let trial = self.step_towards(v, w, opts.motion_step_size);
                    self.set_vert_state(v, &trial);
                    let too_long = stars[v]
                        .iter()
                        .any(|&x| self.edge_length(v, x) > opts.max_length_allowed);
                    let quality = if too_long { None } else { local_min(&*self, v) };
                    self.set_vert_state(v, &here);
                    if let Some(q) = quality {
                        if best.as_ref().is_none_or(|(bq, _)| q > *bq) {
                            best = Some((q, trial));
                        }
                    }
                }
                match best {
                    Some((q, state)) if q > last => {
                        self.set_vert_state(v, &state);
                        last = q;
                    }
                    _ => break,
                }
            }
            if last - start_quality > MIN_MOTION_GAIN {
                moved += 1;
            } else {
                self.set_vert_state(v, &start);
            }
        }
        if moved > 0 {
            log::debug!("motion: {moved} vertices moved");
        }
        moved > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Comm, NoComm};
    use crate::data::Array;
    use crate::mesh::build_box;

    fn worst(work: &TriMesh) -> f64 {
        work.tris.iter().map(|t| work.quality(t)).fold(f64::INFINITY, f64::min)
    }

    fn pushed_into_corner() -> crate::mesh::Mesh<NoComm> {
        let mut mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[2, 2]).expect("box");
        let mut coords = mesh.coords().to_vec();
        coords[2 * 4] = 0.95;
        coords[2 * 4 + 1] = 0.95;
        mesh.set_coords(Array::from_vec(coords)).expect("coords");
        mesh
    }

    #[test]
    fn crowded_vertex_moves_back() {
        let mesh = pushed_into_corner();
        let opts = AdaptOpts::default();
        let mut work = TriMesh::from_mesh(&mesh, &opts).expect("work");
        let before = worst(&work);
        assert!(before < opts.min_quality_desired);
        assert!(work.move_verts_for_quality(&opts));
        assert!(worst(&work) > before);
        assert!(work.coords[4][0] < 0.95);
        assert!(work.tris.iter().all(|t| work.area(t) > 0.0));
        // corners stay put
        assert_eq!(work.coords[8], [1.0, 1.0]);
    }

    #[test]
    fn length_limit_blocks_motion() {
        let mesh = pushed_into_corner();
        let mut opts = AdaptOpts::default();
        opts.max_length_allowed = 0.1;
        let mut work = TriMesh::from_mesh(&mesh, &opts).expect("work");
        let coords = work.coords.clone();
        assert!(!work.move_verts_for_quality(&opts));
        assert_eq!(work.coords, coords);
    }
}
