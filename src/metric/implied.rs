//! Metrics implied by the current mesh, and element/vertex transfers.
//!
//! The implied metric of an element is the unique metric under which all of
//! its edges have unit length. Its "pure" form reproduces the edges exactly;
//! the corrected form is scaled so that an equilateral element of the same
//! volume would be of unit size, which keeps badly shaped elements from
//! asking for small sizes.

use super::field::{self, delinearize_metrics, get_metrics_dim, linearize_metrics};
use super::matrix::{Matrix, Vector, off_diagonal_pairs, sub, symm_ncomps};
use super::tensor::average_metric;
use super::with_dim;
use crate::comm::Communicator;
use crate::data::{Array, ArrayBuilder, fill_chunks, map_entities};
use crate::mesh::quality::{element_edges, equilateral_size, mean_squared_real_length};
use crate::mesh::{Mesh, VERT};
use crate::mesh_error::MeshError;

const MAX_NCOMPS: usize = 6;

/// Solve the `n x n` system stored in the first `n` rows of `a` with the
/// right-hand side in column `n`, by partial pivoting.
fn solve_small(n: usize, mut a: [[f64; MAX_NCOMPS + 1]; MAX_NCOMPS]) -> Option<[f64; MAX_NCOMPS]> {
    for col in 0..n {
        let pivot = (col..n).max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(pivot, col);
        for row in col + 1..n {
            let f = a[row][col] / a[col][col];
            for k in col..=n {
                a[row][k] -= f * a[col][k];
            }
        }
    }
    let mut x = [0.0; MAX_NCOMPS];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (a[row][n] - tail) / a[row][row];
    }
    Some(x)
}

/// The metric under which every edge of the simplex `p` has unit length.
pub fn element_implied_metric<const D: usize>(p: &[Vector<D>]) -> Option<Matrix<D>> {
    let n = symm_ncomps(D);
    let mut a = [[0.0; MAX_NCOMPS + 1]; MAX_NCOMPS];
    for (row, &[i, j]) in element_edges(D).iter().enumerate() {
        let e = sub(&p[j], &p[i]);
        for k in 0..D {
            a[row][k] = e[k] * e[k];
        }
        for (k, &(r, c)) in off_diagonal_pairs(D).iter().enumerate() {
            a[row][D + k] = 2.0 * e[r] * e[c];
        }
        a[row][n] = 1.0;
    }
    let x = solve_small(n, a)?;
    Some(Matrix::from_symm(&x[..n]))
}

fn element_implied_length_metrics<C: Communicator>(mesh: &Mesh<C>) -> Result<Array<f64>, MeshError> {
    with_dim!(mesh.dim(), D => {
        let per_elem: Vec<Option<Matrix<D>>> =
            map_entities(mesh.nelems(), |e| element_implied_metric(&mesh.elem_points::<D>(e)));
        let nc = symm_ncomps(D);
        let mut out = ArrayBuilder::new(mesh.nelems() * nc, 0.0);
        for (e, m) in per_elem.into_iter().enumerate() {
            let m = m.ok_or_else(|| {
                MeshError::InvalidGeometry(format!("element {e} is degenerate"))
            })?;
            m.write_symm(&mut out[e * nc..(e + 1) * nc]);
        }
        Ok(out.freeze())
    }, else Err(MeshError::UnsupportedDimension { mesh_dim: mesh.dim(), metric_dim: mesh.dim() }))
}

/// Per-element factor that rescales an implied metric to the size of the
/// equilateral element with the same volume.
fn metric_quality_corrections<C: Communicator>(mesh: &Mesh<C>) -> Array<f64> {
    let sizes = mesh.ask_sizes();
    with_dim!(mesh.dim(), D => {
        map_entities(mesh.nelems(), |e| {
            let msrl = mean_squared_real_length(&mesh.elem_points::<D>(e));
            let len_size = msrl.powf(D as f64 / 2.0) * equilateral_size(D);
            (sizes[e] / len_size).powf(2.0 / D as f64)
        })
        .into()
    }, else Array::default())
}

/// Average `width` values per element onto vertices, then synchronize.
pub fn project_by_average<C: Communicator>(
    mesh: &Mesh<C>,
    elem_data: &Array<f64>,
    width: usize,
) -> Result<Array<f64>, MeshError> {
    if elem_data.len() != mesh.nelems() * width {
        return Err(MeshError::SizeMismatch {
            what: "element data to project",
            expected: mesh.nelems() * width,
            found: elem_data.len(),
        });
    }
    let adj = mesh.adjacency();
    let mut out = ArrayBuilder::new(mesh.nverts() * width, 0.0);
    fill_chunks(&mut out, width, |v, chunk| {
        let elems = adj.vert_elems(v);
        for &e in elems {
            for (c, x) in chunk.iter_mut().enumerate() {
                *x += elem_data[e * width + c];
            }
        }
        if !elems.is_empty() {
            let inv = 1.0 / elems.len() as f64;
            chunk.iter_mut().for_each(|x| *x *= inv);
        }
    });
    mesh.sync_array(&out.freeze(), width)
}

/// Element metrics to vertex metrics by a log-space average.
pub fn project_metrics<C: Communicator>(
    mesh: &Mesh<C>,
    e2m: &Array<f64>,
) -> Result<Array<f64>, MeshError> {
    let e_linear = linearize_metrics(mesh.nelems(), e2m)?;
    let width = e_linear.len() / mesh.nelems().max(1);
    let v_linear = project_by_average(mesh, &e_linear, width)?;
    delinearize_metrics(mesh.nverts(), &v_linear)
}

pub fn get_pure_implied_metrics<C: Communicator>(mesh: &Mesh<C>) -> Result<Array<f64>, MeshError> {
    project_metrics(mesh, &element_implied_length_metrics(mesh)?)
}

pub fn get_implied_metrics<C: Communicator>(mesh: &Mesh<C>) -> Result<Array<f64>, MeshError> {
    let lengths = element_implied_length_metrics(mesh)?;
    let corrections = metric_quality_corrections(mesh);
    let nc = symm_ncomps(mesh.dim());
    let mut sized = lengths.to_builder();
    fill_chunks(&mut sized, nc, |e, chunk| {
        chunk.iter_mut().for_each(|x| *x *= corrections[e]);
    });
    project_metrics(mesh, &sized.freeze())
}

pub fn get_pure_implied_isos<C: Communicator>(mesh: &Mesh<C>) -> Result<Array<f64>, MeshError> {
    let metrics = get_pure_implied_metrics(mesh)?;
    field::apply_isotropy(mesh.nverts(), &metrics, field::Isotropy::IsoSize)
}

pub fn get_implied_isos<C: Communicator>(mesh: &Mesh<C>) -> Result<Array<f64>, MeshError> {
    let metrics = get_implied_metrics(mesh)?;
    field::apply_isotropy(mesh.nverts(), &metrics, field::Isotropy::IsoSize)
}

/// Log-average of the vertex metrics `v2m` at every edge (`ent_dim == 1`,
/// in adjacency order) or element (`ent_dim == mesh.dim()`).
pub fn get_mident_metrics<C: Communicator>(
    mesh: &Mesh<C>,
    ent_dim: usize,
    v2m: &Array<f64>,
) -> Result<Array<f64>, MeshError> {
    let metric_dim = get_metrics_dim(mesh.nverts(), v2m)?;
    let (stride, verts): (usize, Vec<usize>) = if ent_dim == mesh.dim() {
        (mesh.dim() + 1, mesh.elem_verts().to_vec())
    } else if ent_dim == 1 {
        (2, mesh.adjacency().edges().iter().flatten().copied().collect())
    } else {
        return Err(MeshError::Unsupported("mid-entity metrics on faces"));
    };
    let nents = verts.len() / stride;
    with_dim!(metric_dim, MD => {
        let nc = symm_ncomps(MD);
        let mut out = ArrayBuilder::new(nents * nc, 0.0).on(v2m.residency());
        fill_chunks(&mut out, nc, |i, chunk| {
            let ms: Vec<Matrix<MD>> = verts[i * stride..(i + 1) * stride]
                .iter()
                .map(|&v| Matrix::<MD>::get_symm(v2m, v))
                .collect();
            average_metric(&ms).write_symm(chunk);
        });
        Ok(out.freeze())
    }, else Err(MeshError::BadComponentCount(v2m.len() / mesh.nverts().max(1))))
}

/// One pass of element-averaged smoothing of a vertex metric field.
pub fn smooth_metric_once<C: Communicator>(
    mesh: &Mesh<C>,
    v2m: &Array<f64>,
) -> Result<Array<f64>, MeshError> {
    let e2m = get_mident_metrics(mesh, mesh.dim(), v2m)?;
    project_metrics(mesh, &e2m)
}

/// Store the implied metric as the mesh's metric tag.
pub fn set_implied_metric<C: Communicator>(mesh: &mut Mesh<C>) -> Result<(), MeshError> {
    let metrics = get_implied_metrics(mesh)?;
    let nc = symm_ncomps(mesh.dim());
    mesh.set_tag(VERT, crate::mesh::METRIC_TAG, nc, metrics)
}
