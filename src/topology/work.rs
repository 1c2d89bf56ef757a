//! Mutable working copy of a serial triangle mesh.
//!
//! Operators pull a [`TriMesh`] out of a [`Mesh`], edit it through
//! [`Cavity`] replacements, and push it back in one
//! [`Mesh::replace_topology`] call.

use crate::adapt::{AdaptOpts, TransferKind};
use crate::comm::Communicator;
use crate::data::Array;
use crate::mesh::quality::{element_quality, metric_edge_length, simplex_size, vertex_metric};
use crate::mesh::{Class, METRIC_TAG, Mesh, MeshRebuild, Tag, VERT};
use crate::mesh_error::MeshError;
use crate::metric::matrix::{Matrix, Vector};
use crate::metric::tensor::interpolate_metric;
use std::collections::{BTreeMap, BTreeSet};

pub(crate) type Tri = [usize; 3];

#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub ncomps: usize,
    pub kind: TransferKind,
    pub data: Vec<f64>,
}

impl Field {
    pub fn get(&self, i: usize) -> &[f64] {
        &self.data[i * self.ncomps..(i + 1) * self.ncomps]
    }

    pub fn set(&mut self, i: usize, values: &[f64]) {
        self.data[i * self.ncomps..(i + 1) * self.ncomps].copy_from_slice(values);
    }

    /// Values `t` of the way from `x` to `y`.
    pub fn mix(&self, x: &[f64], y: &[f64], t: f64) -> Vec<f64> {
        match (self.kind, self.ncomps) {
            (TransferKind::MetricInterp, 1) => {
                let m = interpolate_metric(&Matrix::<1>::from_symm(x), &Matrix::<1>::from_symm(y), t);
                vec![m.0[0][0]]
            }
            (TransferKind::MetricInterp, 3) => {
                let m = interpolate_metric(&Matrix::<2>::from_symm(x), &Matrix::<2>::from_symm(y), t);
                let mut out = vec![0.0; 3];
                m.write_symm(&mut out);
                out
            }
            _ => x.iter().zip(y).map(|(a, b)| (1.0 - t) * a + t * b).collect(),
        }
    }
}

/// Old elements and the elements that replace them.
#[derive(Clone, Debug, Default)]
pub(crate) struct Cavity {
    pub old: Vec<usize>,
    pub new: Vec<Tri>,
}

#[derive(Clone, Debug)]
pub(crate) struct TriMesh {
    pub coords: Vec<Vector<2>>,
    pub tris: Vec<Tri>,
    pub vert_class: Vec<Class>,
    pub edge_classes: BTreeMap<[usize; 2], Class>,
    pub vert_fields: BTreeMap<String, Field>,
    pub elem_fields: BTreeMap<String, Field>,
    pub angle: Vec<bool>,
}

pub(crate) fn edge_key(a: usize, b: usize) -> [usize; 2] {
    [a.min(b), a.max(b)]
}

/// The vertex of `tri` that is neither `a` nor `b`.
pub(crate) fn opposite(tri: &Tri, a: usize, b: usize) -> Option<usize> {
    tri.iter().copied().find(|&v| v != a && v != b)
}

impl TriMesh {
    pub fn from_mesh<C: Communicator>(mesh: &Mesh<C>, opts: &AdaptOpts) -> Result<Self, MeshError> {
        if mesh.comm().size() != 1 {
            return Err(MeshError::Unsupported(
                "reference topology operators on a distributed mesh",
            ));
        }
        if mesh.dim() != 2 {
            return Err(MeshError::Unsupported(
                "reference topology operators only handle triangles",
            ));
        }
        if mesh.has_tag(VERT, METRIC_TAG) {
            mesh.metric_dim()?;
        }
        let r = mesh.to_rebuild();
        let fields = |tags: BTreeMap<String, Tag>| -> BTreeMap<String, Field> {
            tags.into_iter()
                .map(|(name, tag)| {
                    let kind = if name == METRIC_TAG {
                        TransferKind::MetricInterp
                    } else {
                        opts.xfer_opts.kind_of(&name)
                    };
                    let field = Field {
                        ncomps: tag.ncomps,
                        kind,
                        data: tag.data.to_vec(),
                    };
                    (name, field)
                })
                .collect()
        };
        Ok(Self {
            coords: r.coords.chunks(2).map(|c| [c[0], c[1]]).collect(),
            tris: r.elem_verts.chunks(3).map(|t| [t[0], t[1], t[2]]).collect(),
            vert_class: r.vert_class,
            edge_classes: r.edge_classes,
            vert_fields: fields(r.vert_tags),
            elem_fields: fields(r.elem_tags),
            angle: r.angle_elems,
        })
    }

    pub fn commit<C: Communicator>(self, mesh: &mut Mesh<C>) -> Result<(), MeshError> {
        let tags = |fields: BTreeMap<String, Field>| -> BTreeMap<String, Tag> {
            fields
                .into_iter()
                .map(|(name, f)| {
                    let tag = Tag {
                        ncomps: f.ncomps,
                        data: Array::from_vec(f.data),
                    };
                    (name, tag)
                })
                .collect()
        };
        mesh.replace_topology(MeshRebuild {
            coords: self.coords.iter().flatten().copied().collect(),
            elem_verts: self.tris.iter().flatten().copied().collect(),
            vert_class: self.vert_class,
            edge_classes: self.edge_classes,
            vert_tags: tags(self.vert_fields),
            elem_tags: tags(self.elem_fields),
            angle_elems: self.angle,
        })
    }

    pub fn nverts(&self) -> usize {
        self.coords.len()
    }

    pub fn metric(&self, v: usize) -> Matrix<2> {
        match self.vert_fields.get(METRIC_TAG) {
            Some(f) => vertex_metric::<2>(&f.data, f.ncomps, v),
            None => Matrix::identity(),
        }
    }

    pub fn edge_length(&self, a: usize, b: usize) -> f64 {
        metric_edge_length(&self.coords[a], &self.coords[b], &self.metric(a), &self.metric(b))
    }

    pub fn edge_class(&self, a: usize, b: usize) -> Class {
        self.edge_classes
            .get(&edge_key(a, b))
            .copied()
            .unwrap_or(Class::interior(2))
    }

    pub fn area(&self, tri: &Tri) -> f64 {
        simplex_size(&tri.map(|v| self.coords[v]))
    }

    pub fn quality(&self, tri: &Tri) -> f64 {
        element_quality(&tri.map(|v| self.coords[v]), &tri.map(|v| self.metric(v)))
    }

    /// Worst quality of `tris`, or `None` if any of them is inverted or flat.
    pub fn min_valid_quality<'a>(&self, tris: impl IntoIterator<Item = &'a Tri>) -> Option<f64> {
        let mut worst = f64::INFINITY;
        for tri in tris {
            if !(self.area(tri) > 0.0) {
                return None;
            }
            worst = worst.min(self.quality(tri));
        }
        Some(worst)
    }

    pub fn vert_tris(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.nverts()];
        for (t, tri) in self.tris.iter().enumerate() {
            for &v in tri {
                out[v].push(t);
            }
        }
        out
    }

    pub fn stars(&self) -> Vec<BTreeSet<usize>> {
        let mut out = vec![BTreeSet::new(); self.nverts()];
        for tri in &self.tris {
            for i in 0..3 {
                let (a, b) = (tri[i], tri[(i + 1) % 3]);
                out[a].insert(b);
                out[b].insert(a);
            }
        }
        out
    }

    /// Every edge with its one (boundary) or two adjacent triangles.
    pub fn edge_tris(&self) -> BTreeMap<[usize; 2], Vec<usize>> {
        let mut out: BTreeMap<[usize; 2], Vec<usize>> = BTreeMap::new();
        for (t, tri) in self.tris.iter().enumerate() {
            for i in 0..3 {
                out.entry(edge_key(tri[i], tri[(i + 1) % 3])).or_default().push(t);
            }
        }
        out
    }

    /// Append the point halfway along `a -> b`, classified on the edge.
    pub fn push_midpoint(&mut self, a: usize, b: usize) -> usize {
        let (xa, xb) = (self.coords[a], self.coords[b]);
        self.coords.push([0.5 * (xa[0] + xb[0]), 0.5 * (xa[1] + xb[1])]);
        self.vert_class.push(self.edge_class(a, b));
        for f in self.vert_fields.values_mut() {
            let mixed = f.mix(f.get(a), f.get(b), 0.5);
            f.data.extend_from_slice(&mixed);
        }
        self.nverts() - 1
    }

    pub fn pop_vertex(&mut self) {
        self.coords.pop();
        self.vert_class.pop();
        for f in self.vert_fields.values_mut() {
            let n = f.data.len() - f.ncomps;
            f.data.truncate(n);
        }
    }

    /// Replace the old elements of every cavity with its new ones.
    ///
    /// Element fields of a cavity with a single parent are copied from it.
    /// Otherwise conserved densities are spread uniformly so that the
    /// cavity's integral is unchanged, and other fields take the mean of the
    /// parents. A new element is pinned if any of its parents was.
    pub fn apply_cavities(&mut self, cavities: &[Cavity]) {
        let mut replaced = vec![false; self.tris.len()];
        for c in cavities {
            for &e in &c.old {
                replaced[e] = true;
            }
        }
        let kept: Vec<usize> = (0..self.tris.len()).filter(|&e| !replaced[e]).collect();
        let mut tris: Vec<Tri> = kept.iter().map(|&e| self.tris[e]).collect();
        let mut angle: Vec<bool> = kept.iter().map(|&e| self.angle[e]).collect();
        let old_areas: Vec<f64> = self.tris.iter().map(|t| self.area(t)).collect();
        let new_areas: Vec<Vec<f64>> = cavities
            .iter()
            .map(|c| c.new.iter().map(|t| self.area(t)).collect())
            .collect();
        for f in self.elem_fields.values_mut() {
            let nc = f.ncomps;
            let mut data: Vec<f64> = kept.iter().flat_map(|&e| f.get(e).to_vec()).collect();
            for (c, areas) in cavities.iter().zip(&new_areas) {
                let values: Vec<f64> = if let [parent] = c.old[..] {
                    f.get(parent).to_vec()
                } else if f.kind == TransferKind::Conserve && areas.iter().sum::<f64>() > 0.0 {
                    let total_area: f64 = areas.iter().sum();
                    (0..nc)
                        .map(|k| c.old.iter().map(|&e| f.get(e)[k] * old_areas[e]).sum::<f64>() / total_area)
                        .collect()
                } else {
                    let inv = 1.0 / c.old.len().max(1) as f64;
                    (0..nc)
                        .map(|k| c.old.iter().map(|&e| f.get(e)[k]).sum::<f64>() * inv)
                        .collect()
                };
                for _ in &c.new {
                    data.extend_from_slice(&values);
                }
            }
            f.data = data;
        }
        for c in cavities {
            tris.extend_from_slice(&c.new);
            let pinned = c.old.iter().any(|&e| self.angle[e]);
            angle.extend(std::iter::repeat_n(pinned, c.new.len()));
        }
        self.tris = tris;
        self.angle = angle;
    }

    /// Drop vertices marked `dead` and renumber the rest. No element may
    /// still use a dead vertex.
    pub fn remove_vertices(&mut self, dead: &[bool]) {
        let mut renumber = vec![usize::MAX; self.nverts()];
        let mut next = 0;
        for (v, slot) in renumber.iter_mut().enumerate() {
            if !dead[v] {
                *slot = next;
                next += 1;
            }
        }
        let alive = |v: &usize| !dead[*v];
        self.coords = (0..self.nverts()).filter(alive).map(|v| self.coords[v]).collect();
        self.vert_class = (0..self.vert_class.len())
            .filter(alive)
            .map(|v| self.vert_class[v])
            .collect();
        for f in self.vert_fields.values_mut() {
            let nverts = f.data.len() / f.ncomps.max(1);
            f.data = (0..nverts).filter(alive).flat_map(|v| f.get(v).to_vec()).collect();
        }
        for tri in &mut self.tris {
            *tri = tri.map(|v| renumber[v]);
        }
        self.edge_classes = std::mem::take(&mut self.edge_classes)
            .into_iter()
            .filter(|([a, b], _)| !dead[*a] && !dead[*b])
            .map(|([a, b], class)| (edge_key(renumber[a], renumber[b]), class))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Comm, NoComm};
    use crate::mesh::build_box;

    #[test]
    fn round_trip_through_the_mesh() {
        let mut mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[1, 1]).expect("box");
        mesh.set_tag(2, "rho", 1, Array::from_vec(vec![1.0, 3.0])).expect("tag");
        let work = TriMesh::from_mesh(&mesh, &AdaptOpts::default()).expect("work");
        assert_eq!(work.tris.len(), 2);
        assert!(work.tris.iter().all(|t| work.area(t) > 0.0));
        work.commit(&mut mesh).expect("commit");
        assert_eq!(mesh.nelems(), 2);
        assert_eq!(&mesh.get_array(2, "rho").expect("tag")[..], &[1.0, 3.0]);
    }

    #[test]
    fn conserved_density_spreads_over_a_cavity() {
        let mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[1, 1]).expect("box");
        let mut mesh = mesh;
        mesh.set_tag(2, "rho", 1, Array::from_vec(vec![1.0, 3.0])).expect("tag");
        let mut opts = AdaptOpts::default();
        opts.xfer_opts.kinds.insert("rho".into(), TransferKind::Conserve);
        let mut work = TriMesh::from_mesh(&mesh, &opts).expect("work");
        let edges = work.edge_tris();
        let (&[a, b], _) = edges.iter().find(|(_, ts)| ts.len() == 2).expect("diagonal");
        let (c, d) = (
            opposite(&work.tris[0], a, b).expect("third vertex"),
            opposite(&work.tris[1], a, b).expect("third vertex"),
        );
        let mut new = vec![[a, d, c], [b, c, d]];
        for t in &mut new {
            if work.area(t) < 0.0 {
                t.swap(1, 2);
            }
        }
        work.apply_cavities(&[Cavity { old: vec![0, 1], new }]);
        let rho = &work.elem_fields["rho"].data;
        assert!(rho.iter().all(|&x| (x - 2.0).abs() < 1e-12));
    }

    #[test]
    fn midpoint_interpolates_metric_in_log_space() {
        let mut mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[1, 1]).expect("box");
        mesh.set_tag(0, METRIC_TAG, 1, Array::from_vec(vec![1.0, 100.0, 1.0, 1.0]))
            .expect("metric");
        let mut work = TriMesh::from_mesh(&mesh, &AdaptOpts::default()).expect("work");
        let m = work.push_midpoint(0, 1);
        assert_eq!(m, 4);
        assert!((work.vert_fields[METRIC_TAG].data[4] - 10.0).abs() < 1e-9);
        assert_eq!(work.vert_class[4], work.edge_class(0, 1));
        work.pop_vertex();
        assert_eq!(work.nverts(), 4);
        assert_eq!(work.vert_fields[METRIC_TAG].data.len(), 4);
    }
}
