//! Gradation limiting: bound how fast the desired size may grow between
//! neighbouring vertices.

use super::field::{are_close_arrays, get_metrics_dim};
use super::matrix::{Matrix, Vector, symm_ncomps};
use super::tensor::{intersect_metrics, metric_eigenvalue_from_length, metric_length_in};
use super::with_dim;
use crate::comm::Communicator;
use crate::data::{Array, ArrayBuilder, fill_chunks};
use crate::mesh::{Mesh, check_metric_dim};
use crate::mesh_error::MeshError;
use serde::{Deserialize, Serialize};

/// Options of [`limit_metric_gradation`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradationOpts {
    /// Allowed growth of desired length per unit metric distance.
    pub max_rate: f64,
    /// Relative change below which the field counts as converged.
    pub tol: f64,
    /// Warn on every step after this many.
    pub warn_after_steps: usize,
    pub verbose: bool,
}

impl Default for GradationOpts {
    fn default() -> Self {
        Self {
            max_rate: 1.0,
            tol: 1e-2,
            warn_after_steps: 40,
            verbose: true,
        }
    }
}

fn limit_once_tmpl<C: Communicator, const XD: usize, const MD: usize>(
    mesh: &Mesh<C>,
    values: &Array<f64>,
    max_rate: f64,
) -> Result<Array<f64>, MeshError> {
    let adj = mesh.adjacency();
    let nc = symm_ncomps(MD);
    let mut out = ArrayBuilder::new(mesh.nverts() * nc, 0.0).on(values.residency());
    fill_chunks(&mut out, nc, |v, chunk| {
        let x: Vector<XD> = mesh.vert_coords(v);
        let mut m = Matrix::<MD>::get_symm(values, v);
        for &av in adj.star(v) {
            let am = Matrix::<MD>::get_symm(values, av);
            let ax: Vector<XD> = mesh.vert_coords(av);
            let vec: Vector<XD> = std::array::from_fn(|i| ax[i] - x[i]);
            let metric_dist = metric_length_in(&am, &vec);
            let factor = metric_eigenvalue_from_length(1.0 + metric_dist * max_rate);
            m = intersect_metrics(&m, &(am * factor));
        }
        m.write_symm(chunk);
    });
    mesh.sync_array(&out.freeze(), nc)
}

/// One Jacobi sweep: every vertex metric is intersected with each
/// neighbour's metric relaxed by the metric distance between them.
pub fn limit_gradation_once<C: Communicator>(
    mesh: &Mesh<C>,
    values: &Array<f64>,
    max_rate: f64,
) -> Result<Array<f64>, MeshError> {
    let metric_dim = get_metrics_dim(mesh.nverts(), values)?;
    check_metric_dim(mesh.dim(), symm_ncomps(metric_dim))?;
    let unsupported = || MeshError::UnsupportedDimension {
        mesh_dim: mesh.dim(),
        metric_dim,
    };
    with_dim!(mesh.dim(), XD => {
        with_dim!(metric_dim, MD => limit_once_tmpl::<C, XD, MD>(mesh, values, max_rate),
            else Err(unsupported()))
    }, else Err(unsupported()))
}

/// Collective. Repeat [`limit_gradation_once`] until no rank's field changes
/// by more than `opts.tol`. Returns the limited field and the step count.
///
/// Requires every owned vertex to see all of its neighbours locally.
pub fn limit_metric_gradation<C: Communicator>(
    mesh: &Mesh<C>,
    values: &Array<f64>,
    opts: &GradationOpts,
) -> Result<(Array<f64>, usize), MeshError> {
    if !mesh.owners_have_all_upward() {
        return Err(MeshError::OwnersLackUpward);
    }
    if !(opts.max_rate > 0.0) {
        return Err(MeshError::InvalidParameter {
            name: "max_rate",
            reason: format!("must be positive, got {}", opts.max_rate),
        });
    }
    let comm = mesh.comm();
    let can_print = opts.verbose && comm.rank() == 0;
    let mut current = values.clone();
    let mut steps = 0;
    loop {
        let next = limit_gradation_once(mesh, &current, opts.max_rate)?;
        steps += 1;
        if can_print && steps > opts.warn_after_steps {
            log::warn!("gradation limiting is up to step {steps}");
        }
        let converged = comm.reduce_and(are_close_arrays(&current, &next, opts.tol, 1e-10));
        current = next;
        if converged {
            break;
        }
    }
    if can_print {
        log::info!("limited gradation in {steps} steps");
    }
    Ok((current, steps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Comm, NoComm};
    use crate::mesh::build_box;
    use crate::metric::tensor::metric_length_from_eigenvalue;

    #[test]
    fn a_small_size_spreads_to_neighbours() {
        let mesh = build_box(Comm::new(NoComm::default()), 1, &[4.0], &[4]).expect("line");
        // h = 1 everywhere except h = 0.1 at the left end
        let mut iso = vec![1.0; 5];
        iso[0] = 100.0;
        let opts = GradationOpts {
            max_rate: 0.5,
            verbose: false,
            ..Default::default()
        };
        let (out, steps) = limit_metric_gradation(&mesh, &Array::from_vec(iso), &opts).expect("limit");
        assert!(steps >= 2);
        let h: Vec<f64> = out.iter().map(|&m| metric_length_from_eigenvalue(m)).collect();
        assert!((h[0] - 0.1).abs() < 1e-12);
        // one step away, h may grow by at most (1 + 0.5 * 10)
        assert!(h[1] <= 0.1 * 6.0 + 1e-9);
        assert!(h.windows(2).all(|w| w[0] <= w[1] + 1e-12));
    }

    #[test]
    fn already_graded_field_converges_in_one_step() {
        let mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[3, 3]).expect("box");
        let field = Array::from_vec([4.0, 4.0, 0.0].repeat(mesh.nverts()));
        let (out, steps) =
            limit_metric_gradation(&mesh, &field, &GradationOpts::default()).expect("limit");
        assert_eq!(steps, 1);
        assert!(are_close_arrays(&out, &field, 1e-12, 1e-12));
    }

    #[test]
    fn rejects_bad_rate() {
        let mesh = build_box(Comm::new(NoComm::default()), 1, &[1.0], &[2]).expect("line");
        let opts = GradationOpts {
            max_rate: 0.0,
            ..Default::default()
        };
        assert!(limit_metric_gradation(&mesh, &Array::filled(3, 1.0), &opts).is_err());
    }
}
