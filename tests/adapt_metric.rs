mod util;
use util::*;

use mesh_adapt::adapt::{
    AdaptEvent, AdaptOpts, Collaborators, IntegralConservation, NoConservation, RecordingSink,
    StatusStage, TransferKind, adapt, adapt_status, adapt_with,
};
use mesh_adapt::comm::{Comm, LocalUniverse, ReduceOp};
use mesh_adapt::data::Array;
use mesh_adapt::mesh::{Parting, build_box_partitioned};
use mesh_adapt::mesh_error::MeshError;
use mesh_adapt::metric::repro_sum_owned;
use mesh_adapt::topology::TriangleOps;

#[test]
fn refines_to_a_uniform_size() {
    let mut mesh = unit_square(1);
    set_uniform_size(&mut mesh, 1.0 / 10f64.sqrt());
    let opts = AdaptOpts::for_mesh(&mesh);
    let mut sink = RecordingSink::new();
    let mut ops = CountingOps::default();
    let report = adapt_with(&mut mesh, &opts, &mut ops, Collaborators::new(&mut sink, &mut NoConservation)).unwrap();

    assert!(report.changed);
    assert!(!report.before.satisfied);
    assert!(report.after.length.max <= opts.max_length_desired);
    assert!(report.after.length.min >= opts.min_length_desired);
    assert!(report.quality_satisfied || sink.quality_unmet());
    assert_eq!(ops.calls[0], "refine");
    assert_eq!(mesh.parting(), Parting::ElemBased);

    let area: f64 = mesh.ask_sizes().iter().sum();
    assert!((area - 1.0).abs() < 1e-12);
    assert!(mesh.nelems() > 2);
    // one status per rebuild on top of before and after
    let statuses = sink
        .events
        .iter()
        .filter(|e| matches!(e, AdaptEvent::Status { .. }))
        .count();
    assert_eq!(statuses, report.rebuilds + 2);
    assert!(matches!(
        sink.events.last(),
        Some(AdaptEvent::Timings { conserving: false, .. })
    ));
}

#[test]
fn edges_twice_too_long_meet_the_targets() {
    // 4x4 cells of side 0.25 under h = 0.125: every axis edge has length 2
    let mut mesh = unit_square(4);
    set_uniform_size(&mut mesh, 0.125);
    let opts = AdaptOpts::default();
    let mut sink = RecordingSink::new();
    let report = adapt_with(&mut mesh, &opts, &mut TriangleOps, Collaborators::new(&mut sink, &mut NoConservation)).unwrap();

    assert!(report.changed);
    assert!(report.before.length.min >= 2.0 - 1e-12);
    assert!(report.after.length.max <= opts.max_length_desired);
    assert!(report.after.quality.min >= opts.min_quality_desired || sink.quality_unmet());
    assert_eq!(report.quality_satisfied, !sink.quality_unmet());
    let area: f64 = mesh.ask_sizes().iter().sum();
    assert!((area - 1.0).abs() < 1e-12);
}

#[test]
fn coarsens_an_overly_fine_mesh() {
    let mut mesh = unit_square(8);
    set_uniform_size(&mut mesh, 0.5);
    let opts = AdaptOpts::for_mesh(&mesh);
    let report = adapt(&mut mesh, &opts, &mut TriangleOps).unwrap();
    assert!(report.changed);
    assert!(mesh.nelems() < 128);
    assert!(report.after.length.max <= opts.max_length_desired);
    assert!(mesh.ask_sizes().iter().all(|&s| s > 0.0));
    let area: f64 = mesh.ask_sizes().iter().sum();
    assert!((area - 1.0).abs() < 1e-12);
}

#[test]
fn satisfied_mesh_is_left_alone() {
    let mut mesh = unit_square(4);
    set_uniform_size(&mut mesh, 0.3);
    let opts = AdaptOpts::for_mesh(&mesh);
    let before = mesh.coords().clone();
    let mut sink = RecordingSink::new();
    let mut ops = CountingOps::default();
    let report = adapt_with(&mut mesh, &opts, &mut ops, Collaborators::new(&mut sink, &mut NoConservation)).unwrap();
    assert!(!report.changed);
    assert_eq!(report.rebuilds, 0);
    assert_eq!(report.before, report.after);
    assert!(ops.calls.is_empty());
    assert!(Array::ptr_eq(&before, mesh.coords()));
    assert_eq!(sink.warnings().count(), 0);
    assert!(matches!(
        sink.events[..],
        [AdaptEvent::Status {
            stage: StatusStage::Before,
            ..
        }]
    ));
}

#[test]
fn satisfied_partitioned_mesh_is_left_alone() {
    let out = LocalUniverse::run(2, |t| {
        let mut mesh = build_box_partitioned(Comm::new(t), 4, 4).unwrap();
        set_uniform_size(&mut mesh, 0.3);
        let opts = AdaptOpts::for_mesh(&mesh);
        let mut ops = CountingOps::default();
        let report = adapt(&mut mesh, &opts, &mut ops).unwrap();
        (report.changed, ops.calls.len(), report.after.satisfied)
    });
    assert_eq!(out, vec![(false, 0, true); 2]);
}

#[test]
fn partitioned_mesh_needing_work_reports_unsupported_operators() {
    let out = LocalUniverse::run(2, |t| {
        let mut mesh = build_box_partitioned(Comm::new(t), 2, 2).unwrap();
        set_uniform_size(&mut mesh, 0.1);
        let opts = AdaptOpts::for_mesh(&mesh);
        let status = adapt_status(&mesh, &opts).unwrap();
        let err = adapt(&mut mesh, &opts, &mut TriangleOps).unwrap_err();
        (status.satisfied, matches!(err, MeshError::Unsupported(_)))
    });
    assert_eq!(out, vec![(false, true); 2]);
}

#[test]
fn conserved_density_keeps_its_integral() {
    let mut mesh = unit_square(2);
    set_uniform_size(&mut mesh, 0.2);
    let n = mesh.nelems();
    let density: Array<f64> = (0..n).map(|e| 1.0 + e as f64).collect();
    mesh.set_tag(2, "density", 1, density).unwrap();
    let mut opts = AdaptOpts::for_mesh(&mesh);
    opts.xfer_opts.kinds.insert("density".into(), TransferKind::Conserve);
    let total = |m: &mesh_adapt::mesh::Mesh<_>| {
        let rho = m.get_array(2, "density").unwrap();
        let weighted: Array<f64> = rho.iter().zip(m.ask_sizes().iter()).map(|(r, s)| r * s).collect();
        repro_sum_owned(m, 2, &weighted).unwrap()
    };
    let want = total(&mesh);

    let mut sink = RecordingSink::new();
    let mut cons = IntegralConservation::new();
    let report = adapt_with(&mut mesh, &opts, &mut TriangleOps, Collaborators::new(&mut sink, &mut cons)).unwrap();
    assert!(report.changed);
    assert!(mesh.nelems() > n);
    assert!((total(&mesh) - want).abs() < 1e-12 * want);
    assert!(matches!(
        sink.events.last(),
        Some(AdaptEvent::Timings { conserving: true, .. })
    ));
}

#[test]
fn poor_input_is_reported_and_repaired() {
    let mut mesh = unit_square(2);
    let mut coords = mesh.coords().to_vec();
    coords[2 * 4 + 1] = 0.02;
    mesh.set_coords(Array::from_vec(coords)).unwrap();
    set_uniform_size(&mut mesh, 0.6);
    let mut opts = AdaptOpts::for_mesh(&mesh);
    opts.should_refine = false;
    opts.should_coarsen = false;
    opts.should_move_for_quality = true;
    let mut sink = RecordingSink::new();
    let report = adapt_with(&mut mesh, &opts, &mut TriangleOps, Collaborators::new(&mut sink, &mut NoConservation)).unwrap();
    assert!(matches!(
        sink.warnings().next(),
        Some(AdaptEvent::InputBelowAllowed { .. })
    ));
    assert!(report.after.quality.min > report.before.quality.min);
    let worst = mesh.comm().allreduce(
        mesh.ask_qualities().unwrap().iter().fold(f64::INFINITY, |a, &b| a.min(b)),
        ReduceOp::Min,
    );
    assert_eq!(worst, report.after.quality.min);
}

#[test]
fn invalid_options_leave_the_mesh_untouched() {
    let mut mesh = unit_square(1);
    set_uniform_size(&mut mesh, 0.1);
    let mut opts = AdaptOpts::for_mesh(&mesh);
    opts.min_quality_allowed = 0.5;
    opts.min_quality_desired = 0.4;
    let mut ops = CountingOps::default();
    assert!(matches!(
        adapt(&mut mesh, &opts, &mut ops),
        Err(MeshError::InvalidOptions(_))
    ));
    assert!(ops.calls.is_empty());
    assert_eq!(mesh.nelems(), 2);

    let mut opts = AdaptOpts::for_mesh(&mesh);
    opts.xfer_opts.kinds.insert("missing".into(), TransferKind::LinearInterp);
    assert!(adapt(&mut mesh, &opts, &mut ops).is_err());
    assert!(ops.calls.is_empty());
}
