mod util;
use util::*;

use mesh_adapt::adapt::{
    AdaptEvent, AdaptOpts, AdaptPhase, Collaborators, NoConservation, RecordingSink, SnapModel,
    TransferKind, Verbosity, adapt_with,
};
use mesh_adapt::comm::NoComm;
use mesh_adapt::data::Array;
use mesh_adapt::mesh::Mesh;
use mesh_adapt::mesh_error::MeshError;
use mesh_adapt::metric::GradationOpts;
use mesh_adapt::topology::TriangleOps;

/// Stretches the unit square to `[0, 1 + dx] x [0, 1]`.
struct StretchRight {
    dx: f64,
}

impl SnapModel<NoComm> for StretchRight {
    fn snap_warp(&self, mesh: &Mesh<NoComm>) -> Result<Array<f64>, MeshError> {
        Ok(mesh
            .coords()
            .chunks(2)
            .flat_map(|x| [if x[0] == 1.0 { self.dx } else { 0.0 }, 0.0])
            .collect())
    }
}

#[test]
fn snapping_moves_the_boundary_and_keeps_quality() {
    let mut mesh = unit_square(2);
    set_uniform_size(&mut mesh, 0.4);
    let opts = AdaptOpts::for_mesh(&mesh);
    let model = StretchRight { dx: 0.1 };
    let mut sink = RecordingSink::new();
    let mut cons = NoConservation;
    let collab = Collaborators::new(&mut sink, &mut cons).with_snap(&model);
    let report = adapt_with(&mut mesh, &opts, &mut TriangleOps, collab).unwrap();

    assert!(report.changed);
    let xmax = mesh.coords().chunks(2).map(|x| x[0]).fold(f64::MIN, f64::max);
    assert!((xmax - 1.1).abs() < 1e-12);
    let area: f64 = mesh.ask_sizes().iter().sum();
    assert!((area - 1.1).abs() < 1e-12);
    assert!(report.after.quality.min >= opts.min_quality_allowed);
    assert!(sink.events.contains(&AdaptEvent::PhaseStarted(AdaptPhase::Snapping)));
    assert!(!sink.events.iter().any(|e| matches!(e, AdaptEvent::SnapStalled { .. })));
}

#[test]
fn options_load_from_json() {
    let json = r#"{
        "max_length_desired": 1.8,
        "min_quality_desired": 0.5,
        "verbosity": "ExtraStats",
        "should_move_for_quality": true,
        "xfer_opts": { "kinds": { "density": "Conserve", "temperature": "LinearInterp" } }
    }"#;
    let opts: AdaptOpts = serde_json::from_str(json).unwrap();
    assert_eq!(opts.max_length_desired, 1.8);
    assert_eq!(opts.verbosity, Verbosity::ExtraStats);
    assert!(opts.should_move_for_quality);
    assert_eq!(opts.xfer_opts.kind_of("density"), TransferKind::Conserve);
    assert_eq!(opts.xfer_opts.kind_of("pressure"), TransferKind::Inherit);
    assert!(opts.xfer_opts.should_conserve_any());
    // untouched fields keep their defaults
    assert_eq!(opts.min_length_desired, AdaptOpts::default().min_length_desired);
    opts.validate().unwrap();

    let back: AdaptOpts = serde_json::from_str(&serde_json::to_string(&opts).unwrap()).unwrap();
    assert_eq!(back, opts);

    let bad: AdaptOpts = serde_json::from_str(r#"{ "min_quality_allowed": 0.9 }"#).unwrap();
    assert!(matches!(bad.validate(), Err(MeshError::InvalidOptions(_))));
}

#[test]
fn gradation_options_load_from_json() {
    let opts: GradationOpts = serde_json::from_str(r#"{ "max_rate": 1.5 }"#).unwrap();
    assert_eq!(opts.max_rate, 1.5);
    assert_eq!(opts.tol, GradationOpts::default().tol);
}

#[test]
fn extra_stats_report_histograms() {
    let mut mesh = unit_square(1);
    set_uniform_size(&mut mesh, 0.5);
    let mut opts = AdaptOpts::for_mesh(&mesh);
    opts.verbosity = Verbosity::ExtraStats;
    let mut sink = RecordingSink::new();
    adapt_with(&mut mesh, &opts, &mut TriangleOps, Collaborators::new(&mut sink, &mut NoConservation)).unwrap();
    let totals: Vec<(u64, u64)> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            AdaptEvent::Histograms { quality, length, .. } => Some((quality.total(), length.total())),
            _ => None,
        })
        .collect();
    assert_eq!(totals.len(), 2);
    // before: two triangles and five edges
    assert_eq!(totals[0], (2, 5));
    assert_eq!(totals[1].0 as usize, mesh.nelems());
}
