//! Collaborators the controller drives but does not implement.

use super::opts::AdaptOpts;
use crate::comm::Communicator;
use crate::data::Array;
use crate::mesh::Mesh;
use crate::mesh_error::MeshError;

/// The topological operators.
///
/// Each returns whether it changed the mesh, and leaves the mesh fully
/// consistent (entities, tags, adjacency) when it does. The controller trusts
/// the answer. All ranks must return the same value.
pub trait TopologyOps<C: Communicator> {
    /// Split edges longer than `max_length_desired`.
    fn refine_by_size(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError>;
    /// Collapse edges shorter than `min_length_desired`.
    fn coarsen_by_size(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError>;
    fn swap_edges(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError>;
    /// Collapse edges near elements below `min_quality_desired`.
    fn coarsen_slivers(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError>;
    fn move_verts_for_quality(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError>;
}

impl<C: Communicator, T: TopologyOps<C> + ?Sized> TopologyOps<C> for &mut T {
    fn refine_by_size(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        (**self).refine_by_size(mesh, opts)
    }

    fn coarsen_by_size(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        (**self).coarsen_by_size(mesh, opts)
    }

    fn swap_edges(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        (**self).swap_edges(mesh, opts)
    }

    fn coarsen_slivers(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        (**self).coarsen_slivers(mesh, opts)
    }

    fn move_verts_for_quality(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<bool, MeshError> {
        (**self).move_verts_for_quality(mesh, opts)
    }
}

/// A geometric model the boundary should conform to.
pub trait SnapModel<C: Communicator> {
    /// Displacement taking every vertex onto the model entity it is
    /// classified on, `mesh.dim()` components per vertex. Interior vertices
    /// get zero.
    fn snap_warp(&self, mesh: &Mesh<C>) -> Result<Array<f64>, MeshError>;
}
