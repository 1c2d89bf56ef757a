//! Scaling a metric field to a target element count.
//!
//! The expected number of elements a metric would produce is estimated per
//! element from its mean squared edge length and the determinant of its
//! mid-element metric, then summed over owned elements with a reduction that
//! gives bit-identical results regardless of how elements are partitioned.

use super::field::get_metrics_dim;
use super::implied::get_mident_metrics;
use super::matrix::Matrix;
use super::with_dim;
use crate::comm::{Comm, Communicator, ReduceOp};
use crate::data::{Array, map_entities};
use crate::mesh::quality::mean_squared_real_length;
use crate::mesh::{Mesh, check_metric_dim};
use crate::mesh_error::MeshError;
use num_traits::ToPrimitive;

/// Bits of headroom below the largest magnitude kept by [`repro_sum`].
const FIXED_POINT_BITS: i32 = 80;

pub fn get_expected_nelems_per_elem<C: Communicator>(
    mesh: &Mesh<C>,
    v2m: &Array<f64>,
) -> Result<Array<f64>, MeshError> {
    let metric_dim = get_metrics_dim(mesh.nverts(), v2m)?;
    check_metric_dim(mesh.dim(), super::symm_ncomps(metric_dim))?;
    let elem_metrics = get_mident_metrics(mesh, mesh.dim(), v2m)?;
    let unsupported = MeshError::UnsupportedDimension {
        mesh_dim: mesh.dim(),
        metric_dim,
    };
    with_dim!(mesh.dim(), XD => {
        with_dim!(metric_dim, MD => {
            let per_elem = map_entities(mesh.nelems(), |e| {
                let msrl = mean_squared_real_length(&mesh.elem_points::<XD>(e));
                let lr = msrl.powf(XD as f64 / 2.0);
                let m = Matrix::<MD>::get_symm(&elem_metrics, e);
                let mr = m.determinant().powf(XD as f64 / (2.0 * MD as f64));
                lr * mr
            });
            Ok(per_elem.into())
        }, else Err(unsupported))
    }, else Err(unsupported))
}

/// Collective. Sum of `values` over all ranks that does not depend on the
/// order of summation: values are rounded onto a common fixed-point grid
/// set by the global maximum magnitude and summed exactly in 128 bits.
/// A NaN or infinite value anywhere makes the result non-finite.
pub fn repro_sum<C: Communicator>(comm: &Comm<C>, values: &[f64]) -> f64 {
    let finite = comm.reduce_and(values.iter().all(|x| x.is_finite()));
    let local_max = values.iter().fold(0.0f64, |m, x| m.max(x.abs()));
    let max = comm.allreduce(local_max, ReduceOp::Max);
    if !finite || max == 0.0 {
        return comm.allreduce(values.iter().sum::<f64>(), ReduceOp::Sum);
    }
    let expo = max.log2().ceil() as i32;
    let unit = 2.0f64.powi(expo - FIXED_POINT_BITS);
    let local: i128 = values
        .iter()
        .map(|&x| (x / unit).round().to_i128().unwrap_or(0))
        .sum();
    let total = comm.add_int128(local);
    total.to_f64().unwrap_or(f64::NAN) * unit
}

/// [`repro_sum`] over the entities this rank owns.
pub fn repro_sum_owned<C: Communicator>(
    mesh: &Mesh<C>,
    ent_dim: usize,
    values: &Array<f64>,
) -> Result<f64, MeshError> {
    let owned: Vec<f64> = if ent_dim == mesh.dim() {
        (0..mesh.nelems())
            .filter(|&e| mesh.is_elem_owned(e))
            .map(|e| values[e])
            .collect()
    } else if ent_dim == 0 {
        (0..mesh.nverts())
            .filter(|&v| mesh.is_vert_owned(v))
            .map(|v| values[v])
            .collect()
    } else {
        return Err(MeshError::Unsupported("owned sums over edges or faces"));
    };
    Ok(repro_sum(mesh.comm(), &owned))
}

/// Collective. Expected element count of an adaptation to `v2m`.
pub fn get_expected_nelems<C: Communicator>(
    mesh: &Mesh<C>,
    v2m: &Array<f64>,
) -> Result<f64, MeshError> {
    let per_elem = get_expected_nelems_per_elem(mesh, v2m)?;
    repro_sum_owned(mesh, mesh.dim(), &per_elem)
}

/// Metric multiplier that turns `expected_nelems` into `target_nelems`.
pub fn get_metric_scalar_for_nelems(elem_dim: usize, expected_nelems: f64, target_nelems: f64) -> f64 {
    (target_nelems / expected_nelems).powf(2.0 / elem_dim as f64)
}

/// Collective. [`get_metric_scalar_for_nelems`] for the field `v2m`.
pub fn get_mesh_metric_scalar_for_nelems<C: Communicator>(
    mesh: &Mesh<C>,
    v2m: &Array<f64>,
    target_nelems: f64,
) -> Result<f64, MeshError> {
    let expected = get_expected_nelems(mesh, v2m)?;
    Ok(get_metric_scalar_for_nelems(mesh.dim(), expected, target_nelems))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalUniverse, NoComm};
    use crate::mesh::build_box;
    use approx::assert_relative_eq;

    #[test]
    fn repro_sum_is_order_independent() {
        let values = [1e16, 1.0, -1e16, 3.5, 1e-3];
        let comm = Comm::new(NoComm::default());
        let forward = repro_sum(&comm, &values);
        let mut rev = values;
        rev.reverse();
        assert_eq!(forward.to_bits(), repro_sum(&comm, &rev).to_bits());
        assert_eq!(repro_sum(&comm, &[]), 0.0);
    }

    #[test]
    fn repro_sum_across_ranks_matches_serial() {
        let all: Vec<f64> = (0..12).map(|i| 0.1 * i as f64 + 1e-7 * (i * i) as f64).collect();
        let serial = repro_sum(&Comm::new(NoComm::default()), &all);
        let chunks = all.clone();
        let out = LocalUniverse::run(3, move |t| {
            let comm = Comm::new(t);
            let r = comm.rank();
            repro_sum(&comm, &chunks[4 * r..4 * r + 4])
        });
        assert!(out.iter().all(|s| s.to_bits() == serial.to_bits()));
    }

    #[test]
    fn repro_sum_propagates_non_finite_values() {
        let comm = Comm::new(NoComm::default());
        assert!(repro_sum(&comm, &[1.0, f64::NAN, 2.0]).is_nan());
        assert_eq!(repro_sum(&comm, &[1.0, f64::INFINITY]), f64::INFINITY);
        // one bad rank poisons every rank's result
        let out = LocalUniverse::run(2, |t| {
            let comm = Comm::new(t);
            let mine = if comm.rank() == 0 { [1.0, 2.0] } else { [3.0, f64::NAN] };
            repro_sum(&comm, &mine)
        });
        assert!(out.iter().all(|s| s.is_nan()));
    }

    #[test]
    fn expected_count_and_scalar() {
        let mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[2, 2]).expect("box");
        // h = 0.25: the ideal mesh has four times as many elements per axis pair
        let v2m = Array::filled(mesh.nverts(), 16.0);
        let expected = get_expected_nelems(&mesh, &v2m).expect("count");
        // right triangle with legs 0.5: msrl = (0.25 + 0.25 + 0.5) / 3
        let per_elem = (1.0 / 3.0) * 16.0;
        assert_relative_eq!(expected, 8.0 * per_elem, epsilon = 1e-9);
        let s = get_metric_scalar_for_nelems(2, expected, 2.0 * expected);
        assert_relative_eq!(s, 2.0, epsilon = 1e-12);
        let s = get_mesh_metric_scalar_for_nelems(&mesh, &v2m, expected / 4.0).expect("scalar");
        assert_relative_eq!(s, 0.25, epsilon = 1e-9);
    }
}
