use approx::assert_relative_eq;
use mesh_adapt::data::Array;
use mesh_adapt::metric::matrix::{Matrix, Vector};
use mesh_adapt::metric::tensor::{compose_metric, delinearize_metric, intersect_metrics, linearize_metric};
use mesh_adapt::metric::{self, Isotropy};
use proptest::prelude::*;

fn rotation(theta: f64) -> Matrix<2> {
    let (s, c) = theta.sin_cos();
    Matrix::from_columns(&[[c, s], [-s, c]])
}

fn metric2(theta: f64, h0: f64, h1: f64) -> Matrix<2> {
    compose_metric(&rotation(theta), &[h0, h1])
}

fn max_entry_gap(a: &Matrix<2>, b: &Matrix<2>) -> f64 {
    let scale = a.max_abs().max(b.max_abs());
    (*a + *b * -1.0).max_abs() / scale
}

fn any_metric() -> impl Strategy<Value = Matrix<2>> {
    (0.0..std::f64::consts::PI, 0.05f64..20.0, 0.05f64..20.0).prop_map(|(t, h0, h1)| metric2(t, h0, h1))
}

proptest! {
    #[test]
    fn intersection_contains_both(a in any_metric(), b in any_metric(), phi in 0.0..std::f64::consts::TAU) {
        let m = intersect_metrics(&a, &b);
        let v: Vector<2> = [phi.cos(), phi.sin()];
        let need = a.quad(&v).max(b.quad(&v));
        prop_assert!(m.quad(&v) >= need * (1.0 - 1e-7), "{} < {}", m.quad(&v), need);
    }

    #[test]
    fn intersection_is_commutative(a in any_metric(), b in any_metric()) {
        let ab = intersect_metrics(&a, &b);
        let ba = intersect_metrics(&b, &a);
        prop_assert!(max_entry_gap(&ab, &ba) < 1e-6);
    }

    #[test]
    fn log_map_round_trips(m in any_metric()) {
        let back = delinearize_metric(&linearize_metric(&m));
        prop_assert!(max_entry_gap(&m, &back) < 1e-8);
    }
}

#[test]
fn intersecting_with_itself_changes_nothing() {
    let m = metric2(0.3, 0.1, 2.0);
    assert!(max_entry_gap(&intersect_metrics(&m, &m), &m) < 1e-10);
}

#[test]
fn nested_metric_wins_intersection() {
    // the second ellipse lies inside the first
    let coarse = metric2(0.7, 1.0, 4.0);
    let fine = metric2(0.7, 0.5, 2.0);
    assert!(max_entry_gap(&intersect_metrics(&coarse, &fine), &fine) < 1e-10);
}

#[test]
fn field_operations_work_per_vertex() {
    let n = 3;
    let isos = Array::from_vec(vec![1.0, 4.0, 100.0]);
    let a = metric::metrics_from_isos(2, &isos).unwrap();
    assert_eq!(a.len(), 3 * n);
    assert_eq!(metric::get_metrics_dim(n, &a).unwrap(), 2);

    let b = metric::metrics_from_isos(2, &Array::filled(n, 4.0)).unwrap();
    let both = metric::intersect_metrics(n, &a, &b).unwrap();
    assert_relative_eq!(both[0], 4.0, epsilon = 1e-10);
    assert_relative_eq!(both[3], 4.0, epsilon = 1e-10);
    assert_relative_eq!(both[6], 100.0, epsilon = 1e-8);

    let lin = metric::linearize_metrics(n, &a).unwrap();
    assert_relative_eq!(lin[6], 100f64.ln(), epsilon = 1e-10);
    let back = metric::delinearize_metrics(n, &lin).unwrap();
    assert!(metric::are_close_arrays(&a, &back, 1e-10, 1e-12));

    let half = metric::interpolate_between_metrics(n, &a, &b, 0.5).unwrap();
    assert_relative_eq!(half[0], 2.0, epsilon = 1e-10);

    let iso = metric::apply_isotropy(n, &a, Isotropy::IsoSize).unwrap();
    assert!(metric::are_close_arrays(&iso, &isos, 1e-10, 1e-12));
    let same = metric::apply_isotropy(n, &a, Isotropy::Anisotropic).unwrap();
    assert!(Array::ptr_eq(&same, &a));
}

#[test]
fn mismatched_fields_are_rejected() {
    let a = Array::filled(6, 1.0);
    let b = Array::filled(3, 1.0);
    assert!(metric::intersect_metrics(2, &a, &b).is_err());
    assert!(metric::get_metrics_dim(2, &Array::filled(5, 1.0)).is_err());
}
