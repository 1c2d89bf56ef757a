//! Small fixed-size dense linear algebra for metric tensors.
//!
//! Matrices are row-major `[[f64; D]; D]`. Symmetric matrices are stored in
//! "symm" order: the diagonal first, then the off-diagonal entries
//! (`xx, yy, xy` in 2-D and `xx, yy, zz, xy, yz, xz` in 3-D).

use std::ops::{Add, Mul, Sub};

pub type Vector<const D: usize> = [f64; D];

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Matrix<const D: usize>(pub [[f64; D]; D]);

/// Number of stored components of a symmetric `dim x dim` matrix.
pub const fn symm_ncomps(dim: usize) -> usize {
    dim * (dim + 1) / 2
}

/// Inverse of [`symm_ncomps`].
pub fn symm_dim(ncomps: usize) -> Option<usize> {
    (1..=3).find(|&d| symm_ncomps(d) == ncomps)
}

pub(crate) fn off_diagonal_pairs(dim: usize) -> &'static [(usize, usize)] {
    match dim {
        2 => &[(0, 1)],
        3 => &[(0, 1), (1, 2), (0, 2)],
        _ => &[],
    }
}

pub fn dot<const D: usize>(a: &Vector<D>, b: &Vector<D>) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm_squared<const D: usize>(a: &Vector<D>) -> f64 {
    dot(a, a)
}

pub fn norm<const D: usize>(a: &Vector<D>) -> f64 {
    norm_squared(a).sqrt()
}

pub fn sub<const D: usize>(a: &Vector<D>, b: &Vector<D>) -> Vector<D> {
    std::array::from_fn(|i| a[i] - b[i])
}

pub fn scale<const D: usize>(a: &Vector<D>, s: f64) -> Vector<D> {
    std::array::from_fn(|i| a[i] * s)
}

/// Copy `D` components starting at `i * D` out of a flat array.
pub fn get_vector<const D: usize>(flat: &[f64], i: usize) -> Vector<D> {
    std::array::from_fn(|k| flat[i * D + k])
}

pub fn cross(a: &Vector<3>, b: &Vector<3>) -> Vector<3> {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

impl<const D: usize> Matrix<D> {
    pub const fn zero() -> Self {
        Self([[0.0; D]; D])
    }

    pub fn identity() -> Self {
        Self::diagonal(&[1.0; D])
    }

    pub fn diagonal(d: &Vector<D>) -> Self {
        let mut m = Self::zero();
        for i in 0..D {
            m.0[i][i] = d[i];
        }
        m
    }

    pub fn outer(a: &Vector<D>, b: &Vector<D>) -> Self {
        Self(std::array::from_fn(|i| std::array::from_fn(|j| a[i] * b[j])))
    }

    /// Matrix whose `j`-th column is `cols[j]`.
    pub fn from_columns(cols: &[Vector<D>; D]) -> Self {
        Self(std::array::from_fn(|i| std::array::from_fn(|j| cols[j][i])))
    }

    pub fn column(&self, j: usize) -> Vector<D> {
        std::array::from_fn(|i| self.0[i][j])
    }

    pub fn transpose(&self) -> Self {
        Self(std::array::from_fn(|i| std::array::from_fn(|j| self.0[j][i])))
    }

    pub fn apply(&self, v: &Vector<D>) -> Vector<D> {
        std::array::from_fn(|i| dot(&self.0[i], v))
    }

    pub fn trace(&self) -> f64 {
        (0..D).map(|i| self.0[i][i]).sum()
    }

    pub fn max_abs(&self) -> f64 {
        self.0
            .iter()
            .flatten()
            .fold(0.0f64, |acc, x| acc.max(x.abs()))
    }

    /// Quadratic form `v^T M v`.
    pub fn quad(&self, v: &Vector<D>) -> f64 {
        dot(v, &self.apply(v))
    }

    pub fn determinant(&self) -> f64 {
        match D {
            1 => self.0[0][0],
            2 => self.0[0][0] * self.0[1][1] - self.0[0][1] * self.0[1][0],
            _ => {
                let mut a = self.0;
                let mut det = 1.0;
                for col in 0..D {
                    let pivot = (col..D)
                        .max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))
                        .unwrap_or(col);
                    if a[pivot][col] == 0.0 {
                        return 0.0;
                    }
                    if pivot != col {
                        a.swap(pivot, col);
                        det = -det;
                    }
                    det *= a[col][col];
                    for row in col + 1..D {
                        let f = a[row][col] / a[col][col];
                        for k in col..D {
                            a[row][k] -= f * a[col][k];
                        }
                    }
                }
                det
            }
        }
    }

    /// Gauss-Jordan inverse; `None` when singular.
    pub fn inverse(&self) -> Option<Self> {
        let mut a = self.0;
        let mut inv = Self::identity().0;
        for col in 0..D {
            let pivot = (col..D).max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))?;
            if a[pivot][col].abs() < f64::MIN_POSITIVE {
                return None;
            }
            a.swap(pivot, col);
            inv.swap(pivot, col);
            let p = a[col][col];
            for k in 0..D {
                a[col][k] /= p;
                inv[col][k] /= p;
            }
            for row in 0..D {
                if row != col {
                    let f = a[row][col];
                    for k in 0..D {
                        a[row][k] -= f * a[col][k];
                        inv[row][k] -= f * inv[col][k];
                    }
                }
            }
        }
        Some(Self(inv))
    }

    pub fn from_symm(flat: &[f64]) -> Self {
        debug_assert_eq!(flat.len(), symm_ncomps(D));
        let mut m = Self::zero();
        for i in 0..D {
            m.0[i][i] = flat[i];
        }
        for (k, &(i, j)) in off_diagonal_pairs(D).iter().enumerate() {
            m.0[i][j] = flat[D + k];
            m.0[j][i] = flat[D + k];
        }
        m
    }

    /// Read the `i`-th symmetric matrix from a flat array.
    pub fn get_symm(flat: &[f64], i: usize) -> Self {
        let n = symm_ncomps(D);
        Self::from_symm(&flat[i * n..(i + 1) * n])
    }

    pub fn write_symm(&self, out: &mut [f64]) {
        debug_assert_eq!(out.len(), symm_ncomps(D));
        for i in 0..D {
            out[i] = self.0[i][i];
        }
        for (k, &(i, j)) in off_diagonal_pairs(D).iter().enumerate() {
            out[D + k] = 0.5 * (self.0[i][j] + self.0[j][i]);
        }
    }

    /// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
    pub fn symmetric_eigen(&self) -> Eigen<D> {
        let mut a = self.0;
        let mut q = Self::identity().0;
        let scale = self.max_abs();
        if scale == 0.0 {
            return Eigen {
                q: Self(q),
                l: [0.0; D],
            };
        }
        for _sweep in 0..64 {
            let off: f64 = (0..D)
                .flat_map(|i| (i + 1..D).map(move |j| (i, j)))
                .map(|(i, j)| a[i][j] * a[i][j])
                .sum();
            if off.sqrt() <= 1e-15 * scale {
                break;
            }
            for p in 0..D {
                for r in p + 1..D {
                    let apr = a[p][r];
                    if apr.abs() <= 1e-300 {
                        continue;
                    }
                    let theta = (a[r][r] - a[p][p]) / (2.0 * apr);
                    let t = if theta == 0.0 {
                        1.0
                    } else {
                        theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt())
                    };
                    let c = 1.0 / (t * t + 1.0).sqrt();
                    let s = t * c;
                    for row in a.iter_mut() {
                        let (x, y) = (row[p], row[r]);
                        row[p] = c * x - s * y;
                        row[r] = s * x + c * y;
                    }
                    for k in 0..D {
                        let (x, y) = (a[p][k], a[r][k]);
                        a[p][k] = c * x - s * y;
                        a[r][k] = s * x + c * y;
                    }
                    for row in q.iter_mut() {
                        let (x, y) = (row[p], row[r]);
                        row[p] = c * x - s * y;
                        row[r] = s * x + c * y;
                    }
                }
            }
        }
        Eigen {
            q: Self(q),
            l: std::array::from_fn(|i| a[i][i]),
        }
    }
}

impl<const D: usize> Add for Matrix<D> {
    type Output = Self;
    fn add(self, o: Self) -> Self {
        Self(std::array::from_fn(|i| std::array::from_fn(|j| self.0[i][j] + o.0[i][j])))
    }
}

impl<const D: usize> Sub for Matrix<D> {
    type Output = Self;
    fn sub(self, o: Self) -> Self {
        Self(std::array::from_fn(|i| std::array::from_fn(|j| self.0[i][j] - o.0[i][j])))
    }
}

impl<const D: usize> Mul for Matrix<D> {
    type Output = Self;
    fn mul(self, o: Self) -> Self {
        Self(std::array::from_fn(|i| {
            std::array::from_fn(|j| (0..D).map(|k| self.0[i][k] * o.0[k][j]).sum())
        }))
    }
}

impl<const D: usize> Mul<f64> for Matrix<D> {
    type Output = Self;
    fn mul(self, s: f64) -> Self {
        Self(self.0.map(|row| row.map(|x| x * s)))
    }
}

/// `M = Q diag(l) Q^T`, eigenvectors in the columns of `q`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Eigen<const D: usize> {
    pub q: Matrix<D>,
    pub l: Vector<D>,
}

impl<const D: usize> Eigen<D> {
    pub fn compose(&self) -> Matrix<D> {
        self.q * Matrix::diagonal(&self.l) * self.q.transpose()
    }

    /// Apply `f` to every eigenvalue.
    pub fn map(mut self, f: impl Fn(f64) -> f64) -> Self {
        self.l = self.l.map(f);
        self
    }

    pub fn max_eigenvalue(&self) -> f64 {
        self.l.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min_eigenvalue(&self) -> f64 {
        self.l.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn symm_layout_roundtrip() {
        let m = Matrix::<3>::from_symm(&[1.0, 2.0, 3.0, 0.1, 0.2, 0.3]);
        assert_eq!(m.0[0][1], 0.1);
        assert_eq!(m.0[1][2], 0.2);
        assert_eq!(m.0[0][2], 0.3);
        let mut back = [0.0; 6];
        m.write_symm(&mut back);
        assert_eq!(back, [1.0, 2.0, 3.0, 0.1, 0.2, 0.3]);
        assert_eq!(symm_dim(6), Some(3));
        assert_eq!(symm_dim(4), None);
    }

    #[test]
    fn jacobi_recomposes() {
        let m = Matrix::<3>::from_symm(&[4.0, 3.0, 2.0, 1.0, 0.5, -0.25]);
        let e = m.symmetric_eigen();
        let back = e.compose();
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(back.0[i][j], m.0[i][j], epsilon = 1e-12);
            }
        }
        let qtq = e.q.transpose() * e.q;
        for i in 0..3 {
            assert_relative_eq!(qtq.0[i][i], 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn determinant_and_inverse() {
        let m = Matrix([[2.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 4.0]]);
        assert_relative_eq!(m.determinant(), 18.0, epsilon = 1e-12);
        let inv = m.inverse().expect("regular");
        let id = m * inv;
        for i in 0..3 {
            for j in 0..3 {
                let want = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(id.0[i][j], want, epsilon = 1e-12);
            }
        }
        assert!(Matrix::<2>::zero().inverse().is_none());
    }
}
