//! Moving boundary vertices onto a geometric model in increments the mesh
//! can absorb.

use super::events::{AdaptEvent, EventSink};
use super::min_fixable_quality;
use super::opts::AdaptOpts;
use crate::comm::{Communicator, ReduceOp};
use crate::data::{Array, ArrayBuilder, fill_chunks};
use crate::mesh::{Mesh, VERT};
use crate::mesh_error::MeshError;

/// Name of the vertex tag holding the displacement still to be applied.
pub const WARP_TAG: &str = "warp";

/// Collective. Spread a boundary displacement into the interior.
///
/// Jacobi sweeps of the graph Laplacian with vertices on the model boundary
/// held fixed, until no component moves by more than `tol` times the largest
/// displacement.
pub fn smooth_warp<C: Communicator>(mesh: &Mesh<C>, warp: &Array<f64>, tol: f64) -> Result<Array<f64>, MeshError> {
    if !(tol > 0.0) {
        return Err(MeshError::InvalidParameter {
            name: "snap_smooth_tolerance",
            reason: format!("must be positive, got {tol}"),
        });
    }
    let dim = mesh.dim();
    let comm = mesh.comm();
    let adj = mesh.adjacency();
    let local_max = warp.iter().fold(0.0f64, |m, x| m.max(x.abs()));
    let scale = comm.allreduce(local_max, ReduceOp::Max);
    let mut current = warp.clone();
    let mut sweeps = 0usize;
    loop {
        let mut next = ArrayBuilder::new(current.len(), 0.0);
        fill_chunks(&mut next, dim, |v, chunk| {
            let star = adj.star(v);
            if mesh.vert_class(v).dim < dim || star.is_empty() {
                chunk.copy_from_slice(&current[v * dim..(v + 1) * dim]);
                return;
            }
            for &w in star {
                for (c, x) in chunk.iter_mut().enumerate() {
                    *x += current[w * dim + c];
                }
            }
            let inv = 1.0 / star.len() as f64;
            chunk.iter_mut().for_each(|x| *x *= inv);
        });
        let next = mesh.sync_array(&next.freeze(), dim)?;
        sweeps += 1;
        let local_change = next
            .iter()
            .zip(current.iter())
            .fold(0.0f64, |m, (a, b)| m.max((a - b).abs()));
        let change = comm.allreduce(local_change, ReduceOp::Max);
        current = next;
        if change <= tol * scale {
            break;
        }
    }
    log::debug!("smoothed snap displacement in {sweeps} sweeps");
    Ok(current)
}

fn displaced(coords: &Array<f64>, warp: &Array<f64>, fraction: f64) -> Array<f64> {
    coords
        .iter()
        .zip(warp.iter())
        .map(|(x, w)| x + fraction * w)
        .collect()
}

/// Collective. Largest displacement component anywhere in the group.
pub fn warp_magnitude<C: Communicator>(mesh: &Mesh<C>, warp: &Array<f64>) -> f64 {
    let local = warp.iter().fold(0.0f64, |m, w| m.max(w.abs()));
    mesh.comm().allreduce(local, ReduceOp::Max)
}

/// Collective. Apply as much of the pending [`WARP_TAG`] displacement as
/// keeps every fixable element at or above `min_quality_allowed`, halving
/// the step up to `snap_max_halvings` times.
///
/// `total` is the [`warp_magnitude`] of the full displacement the pending
/// one is a remainder of; a stall reports what is left relative to it.
/// Returns whether vertices moved. The tag is removed once the whole
/// displacement is applied, or when no increment is acceptable.
pub fn warp_to_limit<C: Communicator>(
    mesh: &mut Mesh<C>,
    opts: &AdaptOpts,
    total: f64,
    sink: &mut dyn EventSink,
) -> Result<bool, MeshError> {
    if !mesh.has_tag(VERT, WARP_TAG) {
        return Ok(false);
    }
    let warp = mesh.get_array(VERT, WARP_TAG)?;
    let start = mesh.coords().clone();
    let mut fraction = 1.0;
    for _ in 0..=opts.snap_max_halvings {
        mesh.set_coords(displaced(&start, &warp, fraction))?;
        if min_fixable_quality(mesh, opts)? >= opts.min_quality_allowed {
            if fraction == 1.0 {
                mesh.remove_tag(VERT, WARP_TAG);
            } else {
                let rest = warp.map(|w| (1.0 - fraction) * w);
                mesh.set_tag(VERT, WARP_TAG, mesh.dim(), rest)?;
            }
            return Ok(true);
        }
        fraction /= 2.0;
    }
    mesh.set_coords(start)?;
    mesh.remove_tag(VERT, WARP_TAG);
    let left = warp_magnitude(mesh, &warp);
    let remaining = if total > 0.0 { (left / total).min(1.0) } else { 0.0 };
    sink.emit(AdaptEvent::SnapStalled { remaining });
    Ok(false)
}
