#![allow(dead_code)]
use mesh_adapt::adapt::{AdaptOpts, TopologyOps};
use mesh_adapt::comm::{Comm, Communicator, NoComm};
use mesh_adapt::data::Array;
use mesh_adapt::mesh::{METRIC_TAG, Mesh, VERT, build_box};
use mesh_adapt::mesh_error::MeshError;
use mesh_adapt::topology::TriangleOps;
use std::collections::BTreeMap;

/// Serial unit square with `n x n` cells.
pub fn unit_square(n: usize) -> Mesh<NoComm> {
    build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[n, n]).unwrap()
}

/// Isotropic metric asking for edges of length `h` everywhere.
pub fn set_uniform_size<C: Communicator>(mesh: &mut Mesh<C>, h: f64) {
    let n = mesh.nverts();
    mesh.set_tag(VERT, METRIC_TAG, 1, Array::filled(n, 1.0 / (h * h)))
        .unwrap();
}

/// Owned vertex values keyed by global id.
pub fn owned_by_global<C: Communicator>(
    mesh: &Mesh<C>,
    values: &Array<f64>,
    width: usize,
) -> BTreeMap<u64, Vec<f64>> {
    (0..mesh.nverts())
        .filter(|&v| mesh.is_vert_owned(v))
        .map(|v| (mesh.vert_globals()[v], values[v * width..(v + 1) * width].to_vec()))
        .collect()
}

pub fn assert_close(got: &[f64], want: &[f64], tol: f64) {
    assert_eq!(got.len(), want.len(), "length mismatch");
    for (i, (a, b)) in got.iter().zip(want).enumerate() {
        let scale = a.abs().max(b.abs()).max(1.0);
        assert!((a - b).abs() <= tol * scale, "entry {i}: {a} vs {b}");
    }
}

/// Wraps [`TriangleOps`] and records which operators ran.
#[derive(Default)]
pub struct CountingOps {
    pub inner: TriangleOps,
    pub calls: Vec<&'static str>,
}

impl<C: Communicator> TopologyOps<C> for CountingOps {
    fn refine_by_size(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        self.calls.push("refine");
        self.inner.refine_by_size(mesh, opts)
    }

    fn coarsen_by_size(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        self.calls.push("coarsen");
        self.inner.coarsen_by_size(mesh, opts)
    }

    fn swap_edges(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        self.calls.push("swap");
        self.inner.swap_edges(mesh, opts)
    }

    fn coarsen_slivers(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        self.calls.push("slivers");
        self.inner.coarsen_slivers(mesh, opts)
    }

    fn move_verts_for_quality(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        self.calls.push("motion");
        self.inner.move_verts_for_quality(mesh, opts)
    }
}
