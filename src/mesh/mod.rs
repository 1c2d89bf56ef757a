//! Reference distributed simplex mesh.
//!
//! [`Mesh<C>`] holds the local part of a partitioned simplicial mesh:
//! vertex coordinates, element-to-vertex connectivity, ownership of every
//! local vertex (`(rank, index)` of its owning copy), geometric
//! classification, and named real-valued tags on vertices and elements.
//! Derived adjacency (edges, vertex stars, vertex-to-element upward
//! adjacency) is computed on demand and cached until the topology changes.
//!
//! Entity dimensions follow the usual convention: `0` for vertices,
//! `mesh.dim()` for elements. Edges are derived and carry no tags.

pub mod build;
pub mod quality;

pub use build::{build_box, build_box_partitioned};

use crate::comm::{CommPtr, Communicator, Dist};
use crate::data::{Array, map_entities};
use crate::mesh_error::MeshError;
use crate::metric::matrix::{Vector, get_vector, symm_ncomps};
use crate::metric::with_dim;
use itertools::Itertools;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const VERT: usize = 0;

/// Name of the vertex tag holding the target metric field.
pub const METRIC_TAG: &str = "metric";

/// Geometric classification: the model entity an entity lies on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Class {
    pub dim: usize,
    pub id: usize,
}

impl Class {
    pub const fn new(dim: usize, id: usize) -> Self {
        Self { dim, id }
    }

    pub const fn interior(dim: usize) -> Self {
        Self { dim, id: 0 }
    }
}

/// How the mesh is partitioned between ranks.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parting {
    /// Each element lives on exactly one rank.
    #[default]
    ElemBased,
    /// Elements are owned by one rank and ghosted one layer deep.
    Ghosted,
    VertBased,
}

/// A named array attached to vertices or elements.
#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    pub ncomps: usize,
    pub data: Array<f64>,
}

/// Edges, upward and star adjacency derived from element connectivity.
#[derive(Clone, Debug, Default)]
pub struct Adjacency {
    edges: Vec<[usize; 2]>,
    elem_edges: Vec<usize>,
    edges_per_elem: usize,
    up_offsets: Vec<usize>,
    up: Vec<usize>,
    star_offsets: Vec<usize>,
    star: Vec<usize>,
}

fn csr(n: usize, pairs: impl Iterator<Item = (usize, usize)> + Clone) -> (Vec<usize>, Vec<usize>) {
    let mut offsets = vec![0usize; n + 1];
    for (a, _) in pairs.clone() {
        offsets[a + 1] += 1;
    }
    for i in 0..n {
        offsets[i + 1] += offsets[i];
    }
    let mut fill = offsets.clone();
    let mut targets = vec![0usize; offsets[n]];
    for (a, b) in pairs {
        targets[fill[a]] = b;
        fill[a] += 1;
    }
    for i in 0..n {
        targets[offsets[i]..offsets[i + 1]].sort_unstable();
    }
    (offsets, targets)
}

impl Adjacency {
    pub fn build(dim: usize, nverts: usize, elem_verts: &[usize]) -> Self {
        let nv = dim + 1;
        let local = quality::element_edges(dim);
        let sorted = |e: usize, [a, b]: [usize; 2]| {
            let (x, y) = (elem_verts[e * nv + a], elem_verts[e * nv + b]);
            [x.min(y), x.max(y)]
        };
        let nelems = elem_verts.len() / nv;
        let edges: Vec<[usize; 2]> = (0..nelems)
            .flat_map(|e| local.iter().map(move |&p| (e, p)))
            .map(|(e, p)| sorted(e, p))
            .sorted_unstable()
            .dedup()
            .collect();
        let elem_edges: Vec<usize> = (0..nelems)
            .flat_map(|e| local.iter().map(move |&p| (e, p)))
            .map(|(e, p)| {
                edges
                    .binary_search(&sorted(e, p))
                    .unwrap_or_else(|_| unreachable!("edge list built from the same elements"))
            })
            .collect();
        let (up_offsets, up) = csr(
            nverts,
            (0..elem_verts.len()).map(|k| (elem_verts[k], k / nv)),
        );
        let (star_offsets, star) = csr(
            nverts,
            edges.iter().flat_map(|&[a, b]| [(a, b), (b, a)]),
        );
        Self {
            edges,
            elem_edges,
            edges_per_elem: local.len(),
            up_offsets,
            up,
            star_offsets,
            star,
        }
    }

    pub fn nedges(&self) -> usize {
        self.edges.len()
    }

    /// Edges as sorted vertex pairs, in ascending order.
    pub fn edges(&self) -> &[[usize; 2]] {
        &self.edges
    }

    pub fn edge_index(&self, a: usize, b: usize) -> Option<usize> {
        self.edges.binary_search(&[a.min(b), a.max(b)]).ok()
    }

    pub fn elem_edges(&self, e: usize) -> &[usize] {
        &self.elem_edges[e * self.edges_per_elem..(e + 1) * self.edges_per_elem]
    }

    /// Elements adjacent to vertex `v`, ascending.
    pub fn vert_elems(&self, v: usize) -> &[usize] {
        &self.up[self.up_offsets[v]..self.up_offsets[v + 1]]
    }

    /// Vertices sharing an edge with `v`, ascending.
    pub fn star(&self, v: usize) -> &[usize] {
        &self.star[self.star_offsets[v]..self.star_offsets[v + 1]]
    }
}

/// Raw ingredients of a mesh, as produced by builders.
#[derive(Clone, Debug, Default)]
pub struct MeshParts {
    pub dim: usize,
    pub coords: Vec<f64>,
    pub elem_verts: Vec<usize>,
    pub vert_globals: Vec<u64>,
    pub owner_ranks: Vec<usize>,
    pub owner_idxs: Vec<usize>,
    pub elem_owned: Vec<bool>,
    pub vert_class: Vec<Class>,
    /// Classification of edges that are not interior; absent edges are
    /// classified on the domain interior.
    pub edge_classes: BTreeMap<[usize; 2], Class>,
    pub owners_have_all_upward: bool,
}

impl MeshParts {
    /// Single-rank mesh with everything classified on the interior.
    pub fn serial(dim: usize, coords: Vec<f64>, elem_verts: Vec<usize>) -> Self {
        let nverts = coords.len() / dim.max(1);
        let nelems = elem_verts.len() / (dim + 1);
        Self {
            dim,
            coords,
            elem_verts,
            vert_globals: (0..nverts as u64).collect(),
            owner_ranks: vec![0; nverts],
            owner_idxs: (0..nverts).collect(),
            elem_owned: vec![true; nelems],
            vert_class: vec![Class::interior(dim); nverts],
            edge_classes: BTreeMap::new(),
            owners_have_all_upward: true,
        }
    }
}

/// Replacement state after a serial topology change.
#[derive(Clone, Debug, Default)]
pub struct MeshRebuild {
    pub coords: Vec<f64>,
    pub elem_verts: Vec<usize>,
    pub vert_class: Vec<Class>,
    pub edge_classes: BTreeMap<[usize; 2], Class>,
    pub vert_tags: BTreeMap<String, Tag>,
    pub elem_tags: BTreeMap<String, Tag>,
    pub angle_elems: Vec<bool>,
}

pub struct Mesh<C: Communicator> {
    dim: usize,
    comm: CommPtr<C>,
    coords: Array<f64>,
    elem_verts: Array<usize>,
    vert_globals: Vec<u64>,
    owner_ranks: Vec<usize>,
    owner_idxs: Vec<usize>,
    elem_owned: Vec<bool>,
    vert_class: Vec<Class>,
    edge_classes: BTreeMap<[usize; 2], Class>,
    vert_tags: BTreeMap<String, Tag>,
    elem_tags: BTreeMap<String, Tag>,
    angle_elems: Vec<bool>,
    parting: Parting,
    owners_have_all_upward: bool,
    adjacency: Mutex<Option<Arc<Adjacency>>>,
    dist: Mutex<Option<Arc<Dist<C>>>>,
}

impl<C: Communicator> std::fmt::Debug for Mesh<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("dim", &self.dim)
            .field("rank", &self.comm.rank())
            .field("nverts", &self.nverts())
            .field("nelems", &self.nelems())
            .field("vert_tags", &self.vert_tags.keys().collect::<Vec<_>>())
            .field("elem_tags", &self.elem_tags.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), MeshError> {
    if expected == found {
        Ok(())
    } else {
        Err(MeshError::SizeMismatch {
            what,
            expected,
            found,
        })
    }
}

impl<C: Communicator> Mesh<C> {
    pub fn from_parts(comm: CommPtr<C>, parts: MeshParts) -> Result<Self, MeshError> {
        let dim = parts.dim;
        if !(1..=3).contains(&dim) {
            return Err(MeshError::UnsupportedDimension {
                mesh_dim: dim,
                metric_dim: dim,
            });
        }
        if parts.coords.len() % dim != 0 || parts.elem_verts.len() % (dim + 1) != 0 {
            return Err(MeshError::InvalidGeometry(format!(
                "{} coordinates / {} element vertex ids do not form a {dim}-D simplex mesh",
                parts.coords.len(),
                parts.elem_verts.len()
            )));
        }
        let nverts = parts.coords.len() / dim;
        let nelems = parts.elem_verts.len() / (dim + 1);
        check_len("vertex global ids", nverts, parts.vert_globals.len())?;
        check_len("vertex owner ranks", nverts, parts.owner_ranks.len())?;
        check_len("vertex owner indices", nverts, parts.owner_idxs.len())?;
        check_len("vertex classification", nverts, parts.vert_class.len())?;
        check_len("element ownership", nelems, parts.elem_owned.len())?;
        if let Some(&bad) = parts.elem_verts.iter().find(|&&v| v >= nverts) {
            return Err(MeshError::InvalidGeometry(format!(
                "element references vertex {bad} of {nverts}"
            )));
        }
        Ok(Self {
            dim,
            comm,
            coords: Array::from_vec(parts.coords),
            elem_verts: Array::from_vec(parts.elem_verts),
            vert_globals: parts.vert_globals,
            owner_ranks: parts.owner_ranks,
            owner_idxs: parts.owner_idxs,
            elem_owned: parts.elem_owned,
            vert_class: parts.vert_class,
            edge_classes: parts.edge_classes,
            vert_tags: BTreeMap::new(),
            elem_tags: BTreeMap::new(),
            angle_elems: vec![false; nelems],
            parting: Parting::ElemBased,
            owners_have_all_upward: parts.owners_have_all_upward,
            adjacency: Mutex::new(None),
            dist: Mutex::new(None),
        })
    }

    pub fn comm(&self) -> &CommPtr<C> {
        &self.comm
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nverts(&self) -> usize {
        self.coords.len() / self.dim
    }

    pub fn nelems(&self) -> usize {
        self.elem_verts.len() / (self.dim + 1)
    }

    pub fn nedges(&self) -> usize {
        self.adjacency().nedges()
    }

    pub fn nents(&self, ent_dim: usize) -> Result<usize, MeshError> {
        match ent_dim {
            0 => Ok(self.nverts()),
            d if d == self.dim => Ok(self.nelems()),
            1 => Ok(self.nedges()),
            _ => Err(MeshError::Unsupported("faces are not represented")),
        }
    }

    pub fn coords(&self) -> &Array<f64> {
        &self.coords
    }

    pub fn vert_coords<const D: usize>(&self, v: usize) -> Vector<D> {
        get_vector(&self.coords, v)
    }

    /// Vertex coordinates of element `e`.
    pub fn elem_points<const D: usize>(&self, e: usize) -> Vec<Vector<D>> {
        self.elem(e).iter().map(|&v| self.vert_coords::<D>(v)).collect()
    }

    /// Move vertices; connectivity is unchanged.
    pub fn set_coords(&mut self, coords: Array<f64>) -> Result<(), MeshError> {
        check_len("coordinates", self.coords.len(), coords.len())?;
        self.coords = coords;
        Ok(())
    }

    pub fn elem_verts(&self) -> &Array<usize> {
        &self.elem_verts
    }

    pub fn elem(&self, e: usize) -> &[usize] {
        &self.elem_verts[e * (self.dim + 1)..(e + 1) * (self.dim + 1)]
    }

    pub fn vert_globals(&self) -> &[u64] {
        &self.vert_globals
    }

    pub fn is_vert_owned(&self, v: usize) -> bool {
        self.owner_ranks[v] == self.comm.rank() && self.owner_idxs[v] == v
    }

    pub fn is_elem_owned(&self, e: usize) -> bool {
        self.elem_owned[e]
    }

    /// An edge is owned by the owner of its endpoint with the lower global id.
    pub fn is_edge_owned(&self, edge: [usize; 2]) -> bool {
        let [a, b] = edge;
        let low = if self.vert_globals[a] <= self.vert_globals[b] {
            a
        } else {
            b
        };
        self.is_vert_owned(low)
    }

    pub fn vert_class(&self, v: usize) -> Class {
        self.vert_class[v]
    }

    pub fn vert_classes(&self) -> &[Class] {
        &self.vert_class
    }

    pub fn edge_class(&self, a: usize, b: usize) -> Class {
        self.edge_classes
            .get(&[a.min(b), a.max(b)])
            .copied()
            .unwrap_or(Class::interior(self.dim))
    }

    pub fn edge_classes(&self) -> &BTreeMap<[usize; 2], Class> {
        &self.edge_classes
    }

    /// Elements pinned by a sharp-angle feature.
    pub fn angle_elems(&self) -> &[bool] {
        &self.angle_elems
    }

    pub fn mark_angle_elems(&mut self, marks: Vec<bool>) -> Result<(), MeshError> {
        check_len("angle element marks", self.nelems(), marks.len())?;
        self.angle_elems = marks;
        Ok(())
    }

    pub fn parting(&self) -> Parting {
        self.parting
    }

    pub fn set_parting(&mut self, parting: Parting) {
        if parting != self.parting {
            log::debug!("rank {}: parting {:?} -> {:?}", self.comm.rank(), self.parting, parting);
        }
        self.parting = parting;
    }

    /// Whether every owned vertex sees all of its adjacent elements locally.
    pub fn owners_have_all_upward(&self) -> bool {
        self.owners_have_all_upward
    }

    pub fn adjacency(&self) -> Arc<Adjacency> {
        let mut slot = self.adjacency.lock();
        Arc::clone(slot.get_or_insert_with(|| {
            Arc::new(Adjacency::build(self.dim, self.nverts(), &self.elem_verts))
        }))
    }

    fn tag_map(&self, ent_dim: usize) -> Result<&BTreeMap<String, Tag>, MeshError> {
        match ent_dim {
            0 => Ok(&self.vert_tags),
            d if d == self.dim => Ok(&self.elem_tags),
            _ => Err(MeshError::Unsupported("tags live on vertices and elements only")),
        }
    }

    fn tag_map_mut(&mut self, ent_dim: usize) -> Result<&mut BTreeMap<String, Tag>, MeshError> {
        match ent_dim {
            0 => Ok(&mut self.vert_tags),
            d if d == self.dim => Ok(&mut self.elem_tags),
            _ => Err(MeshError::Unsupported("tags live on vertices and elements only")),
        }
    }

    /// Add or replace a tag.
    pub fn set_tag(
        &mut self,
        ent_dim: usize,
        name: &str,
        ncomps: usize,
        data: Array<f64>,
    ) -> Result<(), MeshError> {
        let n = self.nents(ent_dim)?;
        check_len("tag data", n * ncomps, data.len())?;
        self.tag_map_mut(ent_dim)?
            .insert(name.to_owned(), Tag { ncomps, data });
        Ok(())
    }

    pub fn has_tag(&self, ent_dim: usize, name: &str) -> bool {
        self.tag_map(ent_dim)
            .map(|m| m.contains_key(name))
            .unwrap_or(false)
    }

    pub fn get_tag(&self, ent_dim: usize, name: &str) -> Result<&Tag, MeshError> {
        self.tag_map(ent_dim)?
            .get(name)
            .ok_or_else(|| MeshError::MissingTag {
                dim: ent_dim,
                name: name.to_owned(),
            })
    }

    pub fn get_array(&self, ent_dim: usize, name: &str) -> Result<Array<f64>, MeshError> {
        Ok(self.get_tag(ent_dim, name)?.data.clone())
    }

    pub fn remove_tag(&mut self, ent_dim: usize, name: &str) -> Option<Tag> {
        self.tag_map_mut(ent_dim).ok()?.remove(name)
    }

    pub fn tag_names(&self, ent_dim: usize) -> Vec<String> {
        self.tag_map(ent_dim)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn tags(&self, ent_dim: usize) -> Result<&BTreeMap<String, Tag>, MeshError> {
        self.tag_map(ent_dim)
    }

    /// Metric dimension of the vertex metric field, validated against the
    /// mesh dimension.
    pub fn metric_dim(&self) -> Result<usize, MeshError> {
        let tag = self.get_tag(VERT, METRIC_TAG)?;
        check_metric_dim(self.dim, tag.ncomps)
    }

    /// Collective. Overwrite every vertex copy with its owner's value.
    pub fn sync_array(&self, data: &Array<f64>, width: usize) -> Result<Array<f64>, MeshError> {
        check_len("synced vertex array", self.nverts() * width, data.len())?;
        if self.comm.size() == 1 {
            return Ok(data.clone());
        }
        let dist = {
            let mut slot = self.dist.lock();
            match slot.as_ref() {
                Some(d) => Arc::clone(d),
                None => {
                    let d = Arc::new(Dist::new(
                        &self.comm,
                        &self.owner_ranks,
                        &self.owner_idxs,
                        self.nverts(),
                    )?);
                    *slot = Some(Arc::clone(&d));
                    d
                }
            }
        };
        dist.sync(data, width)
    }

    /// Signed element sizes (length, area or volume).
    pub fn ask_sizes(&self) -> Array<f64> {
        with_dim!(self.dim, D => {
            map_entities(self.nelems(), |e| quality::simplex_size(&self.elem_points::<D>(e))).into()
        }, else Array::default())
    }

    fn metric_field(&self) -> Result<Option<(usize, Array<f64>)>, MeshError> {
        match self.get_tag(VERT, METRIC_TAG) {
            Ok(tag) => {
                check_metric_dim(self.dim, tag.ncomps)?;
                Ok(Some((tag.ncomps, tag.data.clone())))
            }
            Err(MeshError::MissingTag { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Metric length of every edge, in [`Adjacency::edges`] order. Without a
    /// metric tag lengths are Euclidean.
    pub fn ask_lengths(&self) -> Result<Array<f64>, MeshError> {
        let adj = self.adjacency();
        let field = self.metric_field()?;
        Ok(with_dim!(self.dim, D => {
            map_entities(adj.nedges(), |i| {
                let [a, b] = adj.edges()[i];
                let (xa, xb) = (self.vert_coords::<D>(a), self.vert_coords::<D>(b));
                match &field {
                    Some((nc, m)) => quality::metric_edge_length(
                        &xa,
                        &xb,
                        &quality::vertex_metric::<D>(m, *nc, a),
                        &quality::vertex_metric::<D>(m, *nc, b),
                    ),
                    None => crate::metric::matrix::norm(&crate::metric::matrix::sub(&xb, &xa)),
                }
            })
            .into()
        }, else Array::default()))
    }

    /// Metric mean-ratio quality of every element.
    pub fn ask_qualities(&self) -> Result<Array<f64>, MeshError> {
        let field = self.metric_field()?;
        Ok(with_dim!(self.dim, D => {
            map_entities(self.nelems(), |e| {
                let verts = self.elem(e);
                let p = self.elem_points::<D>(e);
                match &field {
                    Some((nc, m)) => {
                        let ms: Vec<_> = verts
                            .iter()
                            .map(|&v| quality::vertex_metric::<D>(m, *nc, v))
                            .collect();
                        quality::element_quality(&p, &ms)
                    }
                    None => quality::metric_element_quality(
                        &p,
                        &crate::metric::matrix::Matrix::identity(),
                    ),
                }
            })
            .into()
        }, else Array::default()))
    }

    /// Swap in a new serial topology. All caches are dropped and every entity
    /// becomes owned by this rank.
    pub fn replace_topology(&mut self, rebuild: MeshRebuild) -> Result<(), MeshError> {
        if self.comm.size() != 1 {
            return Err(MeshError::Unsupported(
                "topology replacement on a distributed mesh",
            ));
        }
        let dim = self.dim;
        let nverts = rebuild.coords.len() / dim;
        let nelems = rebuild.elem_verts.len() / (dim + 1);
        check_len("rebuilt vertex classification", nverts, rebuild.vert_class.len())?;
        check_len("rebuilt angle marks", nelems, rebuild.angle_elems.len())?;
        for tag in rebuild.vert_tags.values() {
            check_len("rebuilt vertex tag", nverts * tag.ncomps, tag.data.len())?;
        }
        for tag in rebuild.elem_tags.values() {
            check_len("rebuilt element tag", nelems * tag.ncomps, tag.data.len())?;
        }
        let mut parts = MeshParts::serial(dim, rebuild.coords, rebuild.elem_verts);
        parts.vert_class = rebuild.vert_class;
        parts.edge_classes = rebuild.edge_classes;
        let fresh = Self::from_parts(Arc::clone(&self.comm), parts)?;
        let parting = self.parting;
        *self = Self {
            vert_tags: rebuild.vert_tags,
            elem_tags: rebuild.elem_tags,
            angle_elems: rebuild.angle_elems,
            parting,
            ..fresh
        };
        Ok(())
    }

    /// Snapshot of everything [`replace_topology`](Self::replace_topology) takes.
    pub fn to_rebuild(&self) -> MeshRebuild {
        MeshRebuild {
            coords: self.coords.to_vec(),
            elem_verts: self.elem_verts.to_vec(),
            vert_class: self.vert_class.clone(),
            edge_classes: self.edge_classes.clone(),
            vert_tags: self.vert_tags.clone(),
            elem_tags: self.elem_tags.clone(),
            angle_elems: self.angle_elems.clone(),
        }
    }
}

/// Metric dimension for `ncomps` components on a `mesh_dim` mesh; only
/// isotropic fields and fields of the mesh's own dimension are supported.
pub fn check_metric_dim(mesh_dim: usize, ncomps: usize) -> Result<usize, MeshError> {
    let metric_dim = crate::metric::get_metric_dim(ncomps)?;
    if metric_dim == 1 || metric_dim == mesh_dim {
        debug_assert_eq!(symm_ncomps(metric_dim), ncomps);
        Ok(metric_dim)
    } else {
        Err(MeshError::UnsupportedDimension {
            mesh_dim,
            metric_dim,
        })
    }
}
