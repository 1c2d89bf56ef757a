//! Operations on a single metric tensor.
//!
//! A metric `M` prescribes length `sqrt(v^T M v)` to a vector `v`; a vector
//! of unit metric length has exactly the desired size. Eigenvalues are
//! inverse squared lengths.

use super::matrix::{Eigen, Matrix, Vector, norm};

/// Relative tolerance used for positive-definiteness and degeneracy tests.
pub const EPSILON: f64 = 1e-10;

pub fn metric_eigenvalue_from_length(h: f64) -> f64 {
    1.0 / (h * h)
}

pub fn metric_length_from_eigenvalue(l: f64) -> f64 {
    1.0 / l.sqrt()
}

/// `M = R diag(1/h^2) R^T` from orthonormal axes `r` (columns) and lengths.
pub fn compose_metric<const D: usize>(r: &Matrix<D>, h: &Vector<D>) -> Matrix<D> {
    Eigen {
        q: *r,
        l: h.map(metric_eigenvalue_from_length),
    }
    .compose()
}

/// Inverse of [`compose_metric`]: axes and desired lengths.
pub fn decompose_metric<const D: usize>(m: &Matrix<D>) -> (Matrix<D>, Vector<D>) {
    let e = m.symmetric_eigen();
    (e.q, e.l.map(metric_length_from_eigenvalue))
}

/// Eigenvalue-wise logarithm.
pub fn linearize_metric<const D: usize>(m: &Matrix<D>) -> Matrix<D> {
    m.symmetric_eigen().map(f64::ln).compose()
}

/// Eigenvalue-wise exponential; inverse of [`linearize_metric`].
pub fn delinearize_metric<const D: usize>(log_m: &Matrix<D>) -> Matrix<D> {
    log_m.symmetric_eigen().map(f64::exp).compose()
}

pub fn metric_length<const D: usize>(m: &Matrix<D>, v: &Vector<D>) -> f64 {
    m.quad(v).max(0.0).sqrt()
}

/// Length of `v` under an isotropic metric value `m`.
pub fn iso_metric_length<const D: usize>(m: f64, v: &Vector<D>) -> f64 {
    m.sqrt() * norm(v)
}

/// Length of a space vector under a metric of dimension `MD`, which is
/// either 1 (isotropic) or the space dimension `XD`.
pub fn metric_length_in<const MD: usize, const XD: usize>(m: &Matrix<MD>, v: &Vector<XD>) -> f64 {
    debug_assert!(MD == 1 || MD == XD);
    if MD == 1 {
        iso_metric_length(m.0[0][0], v)
    } else {
        let w: Vector<MD> = std::array::from_fn(|i| v[i]);
        metric_length(m, &w)
    }
}

/// Expand an isotropic metric value to a full tensor.
pub fn metric_from_iso<const D: usize>(m: f64) -> Matrix<D> {
    Matrix::identity() * m
}

pub fn is_zero_metric<const D: usize>(m: &Matrix<D>) -> bool {
    m.max_abs() == 0.0
}

pub fn is_positive_definite<const D: usize>(m: &Matrix<D>) -> bool {
    let scale = m.max_abs();
    scale > 0.0 && m.symmetric_eigen().min_eigenvalue() > EPSILON * 1e-4 * scale
}

pub fn max_eigenvalue<const D: usize>(m: &Matrix<D>) -> f64 {
    m.symmetric_eigen().max_eigenvalue()
}

/// Isotropic metric value with the same determinant.
pub fn size_iso<const D: usize>(m: &Matrix<D>) -> f64 {
    m.determinant().max(0.0).powf(1.0 / D as f64)
}

fn sqrt_and_inverse_sqrt<const D: usize>(m: &Matrix<D>) -> (Matrix<D>, Matrix<D>) {
    let e = m.symmetric_eigen();
    (e.map(f64::sqrt).compose(), e.map(|l| 1.0 / l.sqrt()).compose())
}

/// The tightest metric whose unit ball lies inside the unit balls of both
/// `a` and `b`, by simultaneous reduction.
///
/// A zero metric imposes nothing and returns the other input. Rank-deficient
/// inputs are fine as long as one side is positive-definite; if neither is,
/// both are shifted by a small multiple of the identity first.
pub fn intersect_metrics<const D: usize>(a: &Matrix<D>, b: &Matrix<D>) -> Matrix<D> {
    if is_zero_metric(a) {
        return *b;
    }
    if is_zero_metric(b) {
        return *a;
    }
    let (a, b) = match (is_positive_definite(a), is_positive_definite(b)) {
        (true, _) => (*a, *b),
        (false, true) => (*b, *a),
        (false, false) => {
            let shift = Matrix::identity() * (1e-12 * (a.trace() + b.trace()));
            (*a + shift, *b + shift)
        }
    };
    let (l, l_inv) = sqrt_and_inverse_sqrt(&a);
    let s = l_inv * b * l_inv;
    let p = s.symmetric_eigen().map(|x| x.max(1.0)).compose();
    symmetrize(&(l * p * l))
}

fn symmetrize<const D: usize>(m: &Matrix<D>) -> Matrix<D> {
    (*m + m.transpose()) * 0.5
}

/// Clamp desired lengths to `[h_min, h_max]`.
pub fn clamp_metric<const D: usize>(m: &Matrix<D>, h_min: f64, h_max: f64) -> Matrix<D> {
    let lo = metric_eigenvalue_from_length(h_max);
    let hi = metric_eigenvalue_from_length(h_min);
    m.symmetric_eigen().map(|l| l.clamp(lo, hi)).compose()
}

/// Log-space interpolation: `t = 0` gives `a`, `t = 1` gives `b`.
pub fn interpolate_metric<const D: usize>(a: &Matrix<D>, b: &Matrix<D>, t: f64) -> Matrix<D> {
    if t <= 0.0 {
        return *a;
    }
    if t >= 1.0 {
        return *b;
    }
    let la = linearize_metric(a);
    let lb = linearize_metric(b);
    delinearize_metric(&(la * (1.0 - t) + lb * t))
}

/// Log-space average of several metrics.
pub fn average_metric<const D: usize>(ms: &[Matrix<D>]) -> Matrix<D> {
    if ms.is_empty() {
        return Matrix::zero();
    }
    let sum = ms
        .iter()
        .map(linearize_metric)
        .fold(Matrix::zero(), |acc, m| acc + m);
    delinearize_metric(&(sum * (1.0 / ms.len() as f64)))
}

/// The metric with the largest determinant (the smallest desired volume).
pub fn maxdet_metric<const D: usize>(ms: &[Matrix<D>]) -> Matrix<D> {
    ms.iter()
        .copied()
        .max_by(|a, b| a.determinant().total_cmp(&b.determinant()))
        .unwrap_or_else(Matrix::zero)
}

/// Metric from a recovered Hessian for interpolation error `eps`.
pub fn metric_from_hessian<const D: usize>(hessian: &Matrix<D>, eps: f64) -> Matrix<D> {
    let d = D as f64;
    let c = d * d / (2.0 * (d + 1.0) * (d + 1.0) * eps);
    symmetrize(hessian)
        .symmetric_eigen()
        .map(|l| c * l.abs())
        .compose()
}

/// Metric from a gradient for error `eps`: size only along the gradient.
/// Negligible gradients give the zero metric.
pub fn metric_from_gradient<const D: usize>(grad: &Vector<D>, eps: f64) -> Matrix<D> {
    let d = D as f64;
    let g = norm(grad);
    let l = d * d * g * g / ((2.0 * (d + 1.0)).powi(2) * eps * eps);
    if l < EPSILON {
        return Matrix::zero();
    }
    let dir = grad.map(|x| x / g);
    Matrix::outer(&dir, &dir) * l
}

/// Relative closeness with an absolute floor below which values are equal.
pub fn are_close(a: f64, b: f64, tol: f64, floor: f64) -> bool {
    if a.abs() <= floor && b.abs() <= floor {
        return true;
    }
    (a - b).abs() / a.abs().max(b.abs()) <= tol
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn aniso() -> Matrix<2> {
        let c = std::f64::consts::FRAC_1_SQRT_2;
        compose_metric(&Matrix([[c, -c], [c, c]]), &[0.1, 0.5])
    }

    #[test]
    fn decompose_recovers_lengths() {
        let (_, h) = decompose_metric(&aniso());
        let mut h = h.to_vec();
        h.sort_by(f64::total_cmp);
        assert_relative_eq!(h[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(h[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn intersection_with_zero_is_identity() {
        let m = aniso();
        assert_eq!(intersect_metrics(&m, &Matrix::zero()), m);
        assert_eq!(intersect_metrics(&Matrix::zero(), &m), m);
    }

    #[test]
    fn intersection_of_isotropic_takes_smaller_size() {
        let a = metric_from_iso::<3>(metric_eigenvalue_from_length(0.5));
        let b = metric_from_iso::<3>(metric_eigenvalue_from_length(0.25));
        let c = intersect_metrics(&a, &b);
        assert_relative_eq!(c.0[1][1], 16.0, epsilon = 1e-10);
        assert_relative_eq!(c.0[0][1], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn intersection_fills_degenerate_directions() {
        let curve = Matrix::<2>::outer(&[1.0, 0.0], &[1.0, 0.0]) * 100.0;
        let iso = metric_from_iso::<2>(1.0);
        let c = intersect_metrics(&curve, &iso);
        assert_relative_eq!(c.0[0][0], 100.0, epsilon = 1e-8);
        assert_relative_eq!(c.0[1][1], 1.0, epsilon = 1e-8);
    }

    #[test]
    fn clamp_bounds_lengths() {
        let m = compose_metric(&Matrix::identity(), &[1e-3, 1e3]);
        let (_, h) = decompose_metric(&clamp_metric(&m, 0.01, 10.0));
        let mut h = h.to_vec();
        h.sort_by(f64::total_cmp);
        assert_relative_eq!(h[0], 0.01, epsilon = 1e-9);
        assert_relative_eq!(h[1], 10.0, epsilon = 1e-9);
    }

    #[test]
    fn interpolation_is_geometric_for_isotropic() {
        let a = metric_from_iso::<2>(1.0);
        let b = metric_from_iso::<2>(4.0);
        let mid = interpolate_metric(&a, &b, 0.5);
        assert_relative_eq!(mid.0[0][0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(average_metric(&[a, b]).0[1][1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn hessian_and_gradient_metrics() {
        let h = Matrix::<2>::diagonal(&[-2.0, 0.5]);
        let m = metric_from_hessian(&h, 0.01);
        // 4 / (2 * 9 * 0.01)
        assert_relative_eq!(m.0[0][0], 2.0 * 4.0 / 0.18, epsilon = 1e-9);
        assert_relative_eq!(m.0[1][1], 0.5 * 4.0 / 0.18, epsilon = 1e-9);
        assert!(is_zero_metric(&metric_from_gradient(&[1e-12, 0.0], 0.1)));
        let g = metric_from_gradient(&[0.0, 3.0], 0.1);
        assert_relative_eq!(g.0[0][0], 0.0);
        assert!(g.0[1][1] > 0.0);
    }

    #[test]
    fn closeness_floor() {
        assert!(are_close(1e-12, -1e-12, 1e-3, 1e-10));
        assert!(are_close(1.0, 1.0005, 1e-3, 0.0));
        assert!(!are_close(1.0, 1.01, 1e-3, 0.0));
    }
}
