//! Anisotropic metric fields.
//!
//! Metrics are stored per entity as flat `Array<f64>` in symmetric order
//! (see [`matrix`]). A metric field's dimension is read from its component
//! count: 1 (isotropic), 3 (2-D) or 6 (3-D). An isotropic field may drive a
//! mesh of any dimension; an anisotropic one must match the mesh.
//!
//! - [`tensor`]: single-tensor algebra (intersection, log-space
//!   interpolation, Hessian/gradient constructors).
//! - [`field`]: the same operations lifted over whole arrays.
//! - [`implied`], [`curvature`], [`gradation`], [`scale`]: mesh-aware
//!   constructions and repairs.

pub mod curvature;
pub mod field;
pub mod gradation;
pub mod implied;
pub mod matrix;
pub mod scale;
pub mod tensor;

pub use curvature::{SurfaceInfo, get_curvature_metrics};
pub use field::{
    Isotropy, apply_isotropy, are_close_arrays, axes_from_metrics, clamp_metrics,
    delinearize_metrics, get_gradient_metrics, get_hessian_metrics, get_metric_dim,
    get_metrics_dim, interpolate_between_metrics, intersect_metrics, linearize_metrics,
    metrics_from_isos,
};
pub use gradation::{GradationOpts, limit_gradation_once, limit_metric_gradation};
pub use implied::{
    get_implied_isos, get_implied_metrics, get_mident_metrics, get_pure_implied_isos,
    get_pure_implied_metrics, project_metrics, set_implied_metric, smooth_metric_once,
};
pub use matrix::{Matrix, Vector, symm_ncomps};
pub use scale::{
    get_expected_nelems, get_expected_nelems_per_elem, get_mesh_metric_scalar_for_nelems,
    get_metric_scalar_for_nelems, repro_sum, repro_sum_owned,
};

/// Runtime dimension dispatch into const-generic kernels.
///
/// `with_dim!(d, D => body, else err)` evaluates `body` with a `const D:
/// usize` equal to `d` for `d` in 1..=3 and `err` otherwise.
macro_rules! with_dim {
    ($dim:expr, $D:ident => $body:expr, else $err:expr) => {
        match $dim {
            1 => {
                const $D: usize = 1;
                $body
            }
            2 => {
                const $D: usize = 2;
                $body
            }
            3 => {
                const $D: usize = 3;
                $body
            }
            _ => $err,
        }
    };
}

pub(crate) use with_dim;
