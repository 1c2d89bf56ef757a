//! Curvature-driven metrics.
//!
//! These metrics only prescribe size in directions along which the boundary
//! curves; across them they are degenerate. Intersect with another metric
//! (see [`tensor::intersect_metrics`](super::tensor::intersect_metrics))
//! before using the result on its own.

use super::matrix::{Matrix, Vector, cross, get_vector, norm, scale, symm_ncomps};
use crate::comm::Communicator;
use crate::data::{Array, ArrayBuilder};
use crate::mesh::Mesh;
use crate::mesh_error::MeshError;
use serde::{Deserialize, Serialize};

/// Discrete curvature of boundary entities, as produced by a surface
/// analysis of the mesh.
///
/// Surface data only applies to 3-D meshes: for each surface vertex, its
/// unit normal and its second fundamental form in symmetric 2x2 storage,
/// expressed in the tangent frame returned by [`tangent_frame`]. Curve data
/// (sharp feature curves in 3-D, boundary curves in 2-D): unit tangent and
/// scalar curvature per curve vertex.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceInfo {
    pub surf_verts: Vec<usize>,
    pub surf_vert_normals: Vec<f64>,
    pub surf_vert_second_forms: Vec<f64>,
    pub curv_verts: Vec<usize>,
    pub curv_vert_tangents: Vec<f64>,
    pub curv_vert_curvatures: Vec<f64>,
}

/// Two unit vectors completing `n` to an orthonormal frame.
pub fn tangent_frame(n: &Vector<3>) -> (Vector<3>, Vector<3>) {
    let axis = (0..3)
        .min_by(|&a, &b| n[a].abs().total_cmp(&n[b].abs()))
        .unwrap_or(0);
    let mut e = [0.0; 3];
    e[axis] = 1.0;
    let t1 = cross(n, &e);
    let t1 = scale(&t1, 1.0 / norm(&t1));
    let t2 = cross(n, &t1);
    (t1, t2)
}

fn check(what: &'static str, expected: usize, found: usize) -> Result<(), MeshError> {
    if expected != found {
        return Err(MeshError::SizeMismatch {
            what,
            expected,
            found,
        });
    }
    Ok(())
}

fn surface_metric(normal: &Vector<3>, second_form: &[f64], segment_angle: f64) -> Matrix<3> {
    let ii = Matrix::<2>::from_symm(second_form).symmetric_eigen();
    let (t1, t2) = tangent_frame(normal);
    (0..2).fold(Matrix::zero(), |m, i| {
        let ew = (ii.l[i] / segment_angle).powi(2);
        let q = ii.q.column(i);
        let d: Vector<3> = std::array::from_fn(|k| q[0] * t1[k] + q[1] * t2[k]);
        m + Matrix::outer(&d, &d) * ew
    })
}

fn curve_metric<const D: usize>(tangent: &Vector<D>, curvature: f64, segment_angle: f64) -> Matrix<D> {
    let ew = (curvature / segment_angle).powi(2);
    Matrix::outer(tangent, tangent) * ew
}

/// Degenerate metrics that resolve each curved boundary with segments
/// subtending at most `segment_angle` radians. Curve metrics take precedence
/// over surface metrics at shared vertices; vertices off the boundary get
/// the zero metric.
pub fn get_curvature_metrics<C: Communicator>(
    mesh: &Mesh<C>,
    info: &SurfaceInfo,
    segment_angle: f64,
) -> Result<Array<f64>, MeshError> {
    if !(segment_angle > 0.0) {
        return Err(MeshError::InvalidParameter {
            name: "segment_angle",
            reason: format!("must be positive, got {segment_angle}"),
        });
    }
    let dim = mesh.dim();
    let nc = symm_ncomps(dim);
    let nsurf = info.surf_verts.len();
    let ncurv = info.curv_verts.len();
    check("surface normals", 3 * nsurf, info.surf_vert_normals.len())?;
    check("second fundamental forms", 3 * nsurf, info.surf_vert_second_forms.len())?;
    check("curve tangents", dim * ncurv, info.curv_vert_tangents.len())?;
    check("curve curvatures", ncurv, info.curv_vert_curvatures.len())?;
    if let Some(&bad) = info
        .surf_verts
        .iter()
        .chain(&info.curv_verts)
        .find(|&&v| v >= mesh.nverts())
    {
        return Err(MeshError::InvalidParameter {
            name: "surface info",
            reason: format!("vertex {bad} out of {}", mesh.nverts()),
        });
    }
    let mut out = ArrayBuilder::new(mesh.nverts() * nc, 0.0);
    if dim == 3 {
        for (i, &v) in info.surf_verts.iter().enumerate() {
            let n: Vector<3> = get_vector(&info.surf_vert_normals, i);
            let m = surface_metric(&n, &info.surf_vert_second_forms[3 * i..3 * i + 3], segment_angle);
            m.write_symm(&mut out[v * nc..(v + 1) * nc]);
        }
    }
    for (i, &v) in info.curv_verts.iter().enumerate() {
        let k = info.curv_vert_curvatures[i];
        let slot = &mut out[v * nc..(v + 1) * nc];
        match dim {
            2 => curve_metric::<2>(&get_vector(&info.curv_vert_tangents, i), k, segment_angle)
                .write_symm(slot),
            3 => curve_metric::<3>(&get_vector(&info.curv_vert_tangents, i), k, segment_angle)
                .write_symm(slot),
            _ => {}
        }
    }
    Ok(out.freeze())
}
