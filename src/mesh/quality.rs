//! Metric-space element quality and edge length.
//!
//! Quality is the mean-ratio measure evaluated in metric space: 1 for an
//! element that is equilateral under its metric, approaching 0 for slivers
//! and negative when inverted. Edge length is the metric length integrated
//! along the edge assuming the desired length varies geometrically between
//! the two endpoint metrics.

use crate::metric::matrix::{Matrix, Vector, sub};
use crate::metric::tensor::{are_close, maxdet_metric, metric_from_iso, metric_length};

/// Volume of the equilateral simplex with unit edges.
pub fn equilateral_size(dim: usize) -> f64 {
    match dim {
        1 => 1.0,
        2 => 3.0f64.sqrt() / 4.0,
        3 => 1.0 / (6.0 * 2.0f64.sqrt()),
        _ => f64::NAN,
    }
}

/// Local vertex pairs of a simplex's edges.
pub fn element_edges(dim: usize) -> &'static [[usize; 2]] {
    match dim {
        1 => &[[0, 1]],
        2 => &[[0, 1], [1, 2], [2, 0]],
        3 => &[[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]],
        _ => &[],
    }
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|k| k as f64).product()
}

/// Signed length/area/volume of the simplex `p` (`D + 1` points).
pub fn simplex_size<const D: usize>(p: &[Vector<D>]) -> f64 {
    let basis = Matrix::<D>(std::array::from_fn(|i| sub(&p[i + 1], &p[0])));
    basis.determinant() / factorial(D)
}

pub fn mean_squared_real_length<const D: usize>(p: &[Vector<D>]) -> f64 {
    mean_squared_metric_length(p, &Matrix::identity())
}

pub fn mean_squared_metric_length<const D: usize>(p: &[Vector<D>], m: &Matrix<D>) -> f64 {
    let edges = element_edges(D);
    edges
        .iter()
        .map(|&[a, b]| m.quad(&sub(&p[b], &p[a])))
        .sum::<f64>()
        / edges.len() as f64
}

/// Mean-ratio quality of `p` under the constant metric `m`.
pub fn metric_element_quality<const D: usize>(p: &[Vector<D>], m: &Matrix<D>) -> f64 {
    let real = simplex_size(p);
    let metric_size = real * m.determinant().max(0.0).sqrt();
    let msl = mean_squared_metric_length(p, m);
    if msl <= 0.0 {
        return 0.0;
    }
    let ratio = metric_size / (equilateral_size(D) * msl.powf(D as f64 / 2.0));
    ratio.signum() * ratio.abs().powf(2.0 / D as f64)
}

/// Quality of an element whose vertices carry metrics `ms`; the element
/// is measured in the metric that asks for the smallest volume.
pub fn element_quality<const D: usize>(p: &[Vector<D>], ms: &[Matrix<D>]) -> f64 {
    metric_element_quality(p, &maxdet_metric(ms))
}

/// Metric length of the edge `a -> b` with endpoint metrics `ma`, `mb`.
pub fn metric_edge_length<const D: usize>(
    a: &Vector<D>,
    b: &Vector<D>,
    ma: &Matrix<D>,
    mb: &Matrix<D>,
) -> f64 {
    let v = sub(b, a);
    let la = metric_length(ma, &v);
    let lb = metric_length(mb, &v);
    if are_close(la, lb, 1e-3, 0.0) {
        0.5 * (la + lb)
    } else {
        (la - lb) / (la / lb).ln()
    }
}

/// The metric of vertex `v` from a field with `ncomps` components per
/// vertex; isotropic values are expanded to a full tensor.
pub fn vertex_metric<const D: usize>(metrics: &[f64], ncomps: usize, v: usize) -> Matrix<D> {
    if ncomps == 1 {
        metric_from_iso(metrics[v])
    } else {
        Matrix::get_symm(metrics, v)
    }
}
