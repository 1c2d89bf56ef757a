//! Whole-field metric operations with runtime dimension dispatch.

use super::matrix::{Matrix, Vector, get_vector, symm_dim, symm_ncomps};
use super::tensor;
use super::with_dim;
use crate::data::{Array, ArrayBuilder, fill_chunks};
use crate::mesh_error::MeshError;
use serde::{Deserialize, Serialize};

/// How to collapse an anisotropic metric into a scalar.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Isotropy {
    /// Leave the metric alone.
    #[default]
    Anisotropic,
    /// Largest eigenvalue: the smallest desired length in any direction.
    IsoLength,
    /// Isotropic value with the same determinant (same desired volume).
    IsoSize,
}

pub fn get_metric_dim(ncomps: usize) -> Result<usize, MeshError> {
    symm_dim(ncomps).ok_or(MeshError::BadComponentCount(ncomps))
}

/// Metric dimension of a field holding `n` tensors.
pub fn get_metrics_dim(n: usize, metrics: &Array<f64>) -> Result<usize, MeshError> {
    if n == 0 {
        return match metrics.len() {
            0 => Ok(1),
            len => Err(MeshError::SizeMismatch {
                what: "metric field of zero entities",
                expected: 0,
                found: len,
            }),
        };
    }
    if metrics.len() % n != 0 {
        return Err(MeshError::SizeMismatch {
            what: "metric field length",
            expected: n * (metrics.len() / n + 1),
            found: metrics.len(),
        });
    }
    get_metric_dim(metrics.len() / n)
}

fn unsupported(metric_dim: usize) -> MeshError {
    MeshError::UnsupportedDimension {
        mesh_dim: metric_dim,
        metric_dim,
    }
}

/// Apply `f` to every tensor of a `D`-dimensional field.
pub(crate) fn map_tensors<const D: usize, F>(metrics: &Array<f64>, f: F) -> Array<f64>
where
    F: Fn(usize, &Matrix<D>) -> Matrix<D> + Send + Sync,
{
    let nc = symm_ncomps(D);
    let mut out = ArrayBuilder::new(metrics.len(), 0.0).on(metrics.residency());
    fill_chunks(&mut out, nc, |i, chunk| {
        f(i, &Matrix::<D>::get_symm(metrics, i)).write_symm(chunk);
    });
    out.freeze()
}

/// Combine two `D`-dimensional fields tensor by tensor.
pub(crate) fn zip_tensors<const D: usize, F>(a: &Array<f64>, b: &Array<f64>, f: F) -> Array<f64>
where
    F: Fn(&Matrix<D>, &Matrix<D>) -> Matrix<D> + Send + Sync,
{
    map_tensors::<D, _>(a, |i, ma| f(ma, &Matrix::<D>::get_symm(b, i)))
}

fn check_same(what: &'static str, a: &Array<f64>, b: &Array<f64>) -> Result<(), MeshError> {
    if a.len() != b.len() {
        return Err(MeshError::SizeMismatch {
            what,
            expected: a.len(),
            found: b.len(),
        });
    }
    Ok(())
}

/// Clamp every desired length into `[h_min, h_max]`.
pub fn clamp_metrics(
    n: usize,
    metrics: &Array<f64>,
    h_min: f64,
    h_max: f64,
) -> Result<Array<f64>, MeshError> {
    if !(h_min > 0.0 && h_min <= h_max) {
        return Err(MeshError::InvalidParameter {
            name: "h_min/h_max",
            reason: format!("need 0 < h_min <= h_max, got [{h_min}, {h_max}]"),
        });
    }
    let dim = get_metrics_dim(n, metrics)?;
    with_dim!(dim, D => Ok(map_tensors::<D, _>(metrics, |_, m| {
        tensor::clamp_metric(m, h_min, h_max)
    })), else Err(unsupported(dim)))
}

pub fn linearize_metrics(n: usize, metrics: &Array<f64>) -> Result<Array<f64>, MeshError> {
    let dim = get_metrics_dim(n, metrics)?;
    with_dim!(dim, D => Ok(map_tensors::<D, _>(metrics, |_, m| tensor::linearize_metric(m))),
        else Err(unsupported(dim)))
}

pub fn delinearize_metrics(n: usize, linear: &Array<f64>) -> Result<Array<f64>, MeshError> {
    let dim = get_metrics_dim(n, linear)?;
    with_dim!(dim, D => Ok(map_tensors::<D, _>(linear, |_, m| tensor::delinearize_metric(m))),
        else Err(unsupported(dim)))
}

/// Log-space blend: `t = 0` returns `a`, `t = 1` returns `b`.
pub fn interpolate_between_metrics(
    n: usize,
    a: &Array<f64>,
    b: &Array<f64>,
    t: f64,
) -> Result<Array<f64>, MeshError> {
    check_same("interpolated metric fields", a, b)?;
    let dim = get_metrics_dim(n, a)?;
    with_dim!(dim, D => Ok(zip_tensors::<D, _>(a, b, |x, y| tensor::interpolate_metric(x, y, t))),
        else Err(unsupported(dim)))
}

/// Entity-wise intersection of two fields of the same dimension.
pub fn intersect_metrics(
    n: usize,
    a: &Array<f64>,
    b: &Array<f64>,
) -> Result<Array<f64>, MeshError> {
    check_same("intersected metric fields", a, b)?;
    let dim = get_metrics_dim(n, a)?;
    with_dim!(dim, D => Ok(zip_tensors::<D, _>(a, b, tensor::intersect_metrics::<D>)),
        else Err(unsupported(dim)))
}

/// Expand isotropic values into `new_dim`-dimensional diagonal tensors.
pub fn metrics_from_isos(new_dim: usize, isos: &Array<f64>) -> Result<Array<f64>, MeshError> {
    let nc = symm_ncomps(new_dim);
    if !(1..=3).contains(&new_dim) {
        return Err(unsupported(new_dim));
    }
    let mut out = ArrayBuilder::new(isos.len() * nc, 0.0).on(isos.residency());
    fill_chunks(&mut out, nc, |i, chunk| {
        chunk[..new_dim].fill(isos[i]);
    });
    Ok(out.freeze())
}

/// Collapse each tensor to a scalar, or pass the field through.
pub fn apply_isotropy(
    n: usize,
    metrics: &Array<f64>,
    isotropy: Isotropy,
) -> Result<Array<f64>, MeshError> {
    let dim = get_metrics_dim(n, metrics)?;
    if isotropy == Isotropy::Anisotropic || dim == 1 {
        return Ok(metrics.clone());
    }
    with_dim!(dim, D => {
        let mut out = ArrayBuilder::new(n, 0.0).on(metrics.residency());
        fill_chunks(&mut out, 1, |i, slot| {
            let m = Matrix::<D>::get_symm(metrics, i);
            slot[0] = match isotropy {
                Isotropy::IsoLength => tensor::max_eigenvalue(&m),
                _ => tensor::size_iso(&m),
            };
        });
        Ok(out.freeze())
    }, else Err(unsupported(dim)))
}

/// Principal axes scaled by desired length, `dim * dim` values per entity
/// (row-major, axis `j` in column `j`).
pub fn axes_from_metrics(n: usize, metrics: &Array<f64>) -> Result<Array<f64>, MeshError> {
    let dim = get_metrics_dim(n, metrics)?;
    with_dim!(dim, D => {
        let mut out = ArrayBuilder::new(n * D * D, 0.0).on(metrics.residency());
        fill_chunks(&mut out, D * D, |i, chunk| {
            let (q, h) = tensor::decompose_metric(&Matrix::<D>::get_symm(metrics, i));
            for r in 0..D {
                for c in 0..D {
                    chunk[r * D + c] = q.0[r][c] * h[c];
                }
            }
        });
        Ok(out.freeze())
    }, else Err(unsupported(dim)))
}

/// Metrics from recovered Hessians (symmetric storage) for error `eps`.
pub fn get_hessian_metrics(
    dim: usize,
    hessians: &Array<f64>,
    eps: f64,
) -> Result<Array<f64>, MeshError> {
    check_eps(eps)?;
    let nc = symm_ncomps(dim);
    if hessians.len() % nc.max(1) != 0 {
        return Err(MeshError::SizeMismatch {
            what: "hessian field length",
            expected: nc,
            found: hessians.len() % nc.max(1),
        });
    }
    with_dim!(dim, D => Ok(map_tensors::<D, _>(hessians, |_, h| tensor::metric_from_hessian(h, eps))),
        else Err(unsupported(dim)))
}

/// Metrics from gradients (`dim` values per entity) for error `eps`.
pub fn get_gradient_metrics(
    dim: usize,
    gradients: &Array<f64>,
    eps: f64,
) -> Result<Array<f64>, MeshError> {
    check_eps(eps)?;
    with_dim!(dim, D => {
        if gradients.len() % D != 0 {
            return Err(MeshError::SizeMismatch {
                what: "gradient field length",
                expected: D,
                found: gradients.len() % D,
            });
        }
        let n = gradients.len() / D;
        let nc = symm_ncomps(D);
        let mut out = ArrayBuilder::new(n * nc, 0.0).on(gradients.residency());
        fill_chunks(&mut out, nc, |i, chunk| {
            let g: Vector<D> = get_vector(gradients, i);
            tensor::metric_from_gradient(&g, eps).write_symm(chunk);
        });
        Ok(out.freeze())
    }, else Err(unsupported(dim)))
}

fn check_eps(eps: f64) -> Result<(), MeshError> {
    if eps > 0.0 {
        Ok(())
    } else {
        Err(MeshError::InvalidParameter {
            name: "eps",
            reason: format!("error tolerance must be positive, got {eps}"),
        })
    }
}

/// Component-wise [`tensor::are_close`] over two arrays.
pub fn are_close_arrays(a: &Array<f64>, b: &Array<f64>, tol: f64, floor: f64) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b.iter())
            .all(|(&x, &y)| tensor::are_close(x, y, tol, floor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn metric_dim_from_components() {
        assert_eq!(get_metric_dim(1), Ok(1));
        assert_eq!(get_metric_dim(3), Ok(2));
        assert_eq!(get_metric_dim(6), Ok(3));
        assert_eq!(get_metric_dim(4), Err(MeshError::BadComponentCount(4)));
        let m = Array::from_vec(vec![1.0; 12]);
        assert_eq!(get_metrics_dim(2, &m), Ok(3));
        assert_eq!(get_metrics_dim(4, &m), Ok(2));
        assert!(get_metrics_dim(3, &m).is_err());
    }

    #[test]
    fn isotropy_of_diagonal_metric() {
        let m = Array::from_vec(vec![4.0, 1.0, 0.0]);
        let len = apply_isotropy(1, &m, Isotropy::IsoLength).expect("2-D");
        let size = apply_isotropy(1, &m, Isotropy::IsoSize).expect("2-D");
        assert_relative_eq!(len[0], 4.0, epsilon = 1e-12);
        assert_relative_eq!(size[0], 2.0, epsilon = 1e-12);
        let back = metrics_from_isos(2, &size).expect("2-D");
        assert_eq!(&back[..], &[2.0, 2.0, 0.0]);
    }

    #[test]
    fn axes_are_scaled_by_length() {
        let m = Array::from_vec(vec![4.0, 1.0, 0.0]);
        let axes = axes_from_metrics(1, &m).expect("2-D");
        let lens: Vec<f64> = (0..2)
            .map(|c| (axes[c].powi(2) + axes[2 + c].powi(2)).sqrt())
            .collect();
        let mut lens = lens;
        lens.sort_by(f64::total_cmp);
        assert_relative_eq!(lens[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(lens[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn residency_is_preserved() {
        let m = Array::from_vec(vec![1.0, 2.0, 0.5]).to_device();
        let lin = linearize_metrics(1, &m).expect("2-D");
        assert!(lin.is_device());
        let back = delinearize_metrics(1, &lin).expect("2-D");
        assert!(are_close_arrays(&back, &m, 1e-10, 1e-12));
    }

    #[test]
    fn bad_inputs_are_rejected() {
        let m = Array::from_vec(vec![1.0, 2.0]);
        assert!(clamp_metrics(2, &m, 0.0, 1.0).is_err());
        assert!(get_hessian_metrics(2, &m, 0.1).is_err());
        assert!(get_gradient_metrics(4, &m, 0.1).is_err());
        assert!(get_gradient_metrics(2, &m, -1.0).is_err());
    }
}
