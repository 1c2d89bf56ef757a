//! Reference topology operators for serial triangle meshes.
//!
//! [`TriangleOps`] implements every [`TopologyOps`] hook with plain cavity
//! operators: edge bisection, edge collapse, diagonal flips and vertex
//! motion. Each call copies the mesh into a working [`TriMesh`], makes
//! one independent-set pass over the candidates and commits the result
//! with [`Mesh::replace_topology`]. Distributed meshes and tetrahedra are
//! rejected with [`MeshError::Unsupported`]; production drivers plug in
//! their own [`TopologyOps`].
//!
//! Field transfer follows [`TransferOpts`](crate::adapt::TransferOpts):
//! the metric is interpolated in log space, [`TransferKind::Conserve`]
//! element densities keep their cavity integral and everything else is
//! interpolated linearly or inherited.
//!
//! [`TransferKind::Conserve`]: crate::adapt::TransferKind::Conserve

mod coarsen;
mod motion;
mod refine;
mod swap;
pub(crate) mod work;

use crate::adapt::{AdaptOpts, TopologyOps};
use crate::comm::Communicator;
use crate::mesh::Mesh;
use crate::mesh_error::MeshError;
pub use motion::MIN_MOTION_GAIN;
use work::TriMesh;

/// Serial 2-D implementation of [`TopologyOps`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TriangleOps;

impl TriangleOps {
    fn run<C: Communicator>(
        mesh: &mut Mesh<C>,
        opts: &AdaptOpts,
        op: impl FnOnce(&mut TriMesh, &AdaptOpts) -> bool,
    ) -> Result<bool, MeshError> {
        let mut work = TriMesh::from_mesh(mesh, opts)?;
        if !op(&mut work, opts) {
            return Ok(false);
        }
        work.commit(mesh)?;
        Ok(true)
    }
}

impl<C: Communicator> TopologyOps<C> for TriangleOps {
    fn refine_by_size(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        Self::run(mesh, opts, TriMesh::refine_by_size)
    }

    fn coarsen_by_size(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        Self::run(mesh, opts, TriMesh::coarsen_by_size)
    }

    fn swap_edges(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        Self::run(mesh, opts, TriMesh::swap_edges)
    }

    fn coarsen_slivers(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        Self::run(mesh, opts, TriMesh::coarsen_slivers)
    }

    fn move_verts_for_quality(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        Self::run(mesh, opts, TriMesh::move_verts_for_quality)
    }
}
