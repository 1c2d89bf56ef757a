//! The adaptation controller.
//!
//! [`adapt`] drives a mesh toward its metric tag with the topological
//! operators it is given: first edge lengths (refine and coarsen until
//! neither changes anything), then element quality (swap, then sliver
//! coarsening, then vertex motion, restarting from swapping after every
//! change), optionally while snapping the boundary to a model, and finally
//! the correction of conserved integrals.
//!
//! All of it is collective: every rank makes the same sequence of calls, and
//! operators must agree across ranks on whether they changed the mesh.

pub mod conserve;
pub mod events;
pub mod ops;
pub mod opts;
pub mod snap;

pub use conserve::{Conservation, IntegralConservation, NoConservation};
pub use events::{
    AdaptEvent, AdaptPhase, AdaptStatus, AdaptTimings, EventSink, Histogram, LogSink, MinMax,
    RecordingSink, StatusStage,
};
pub use ops::{SnapModel, TopologyOps};
pub use opts::{AdaptOpts, TransferKind, TransferOpts, Verbosity};

use crate::comm::{Communicator, ReduceOp};
use crate::mesh::{Mesh, Parting, VERT};
use crate::mesh_error::MeshError;
use std::time::Instant;

/// Qualities of the elements the quality phase is expected to repair.
///
/// Elements pinned by a sharp feature cannot be improved without pinching
/// it; unless pinching is allowed they are left out.
pub fn fixable_qualities<C: Communicator>(mesh: &Mesh<C>, opts: &AdaptOpts) -> Result<Vec<f64>, MeshError> {
    let quals = mesh.ask_qualities()?;
    if opts.should_allow_pinching {
        return Ok(quals.to_vec());
    }
    Ok(quals
        .iter()
        .zip(mesh.angle_elems())
        .filter(|&(_, &pinned)| !pinned)
        .map(|(&q, _)| q)
        .collect())
}

/// Collective. Worst fixable quality over all ranks; `+inf` on an empty mesh.
pub fn min_fixable_quality<C: Communicator>(mesh: &Mesh<C>, opts: &AdaptOpts) -> Result<f64, MeshError> {
    let local = fixable_qualities(mesh, opts)?
        .into_iter()
        .fold(f64::INFINITY, f64::min);
    Ok(mesh.comm().allreduce(local, ReduceOp::Min))
}

/// Collective. Worst qualities and lengths against the targets of `opts`.
pub fn adapt_status<C: Communicator>(mesh: &Mesh<C>, opts: &AdaptOpts) -> Result<AdaptStatus, MeshError> {
    let quality = MinMax::of(mesh.comm(), &fixable_qualities(mesh, opts)?);
    let length = MinMax::of(mesh.comm(), &mesh.ask_lengths()?);
    let satisfied = quality.min >= opts.min_quality_desired
        && length.min >= opts.min_length_desired
        && length.max <= opts.max_length_desired;
    Ok(AdaptStatus {
        quality,
        length,
        satisfied,
    })
}

/// Collective. Histograms of owned element qualities and owned edge lengths.
pub fn adapt_histograms<C: Communicator>(
    mesh: &Mesh<C>,
    opts: &AdaptOpts,
) -> Result<(Histogram, Histogram), MeshError> {
    let quals = mesh.ask_qualities()?;
    let owned_quals: Vec<f64> = (0..mesh.nelems())
        .filter(|&e| mesh.is_elem_owned(e))
        .map(|e| quals[e])
        .collect();
    let lengths = mesh.ask_lengths()?;
    let adj = mesh.adjacency();
    let owned_lengths: Vec<f64> = adj
        .edges()
        .iter()
        .zip(lengths.iter())
        .filter(|&(&edge, _)| mesh.is_edge_owned(edge))
        .map(|(_, &l)| l)
        .collect();
    let comm = mesh.comm();
    let quality = Histogram::build(comm, &owned_quals, opts.nquality_histogram_bins, 0.0, 1.0);
    let length = Histogram::build(
        comm,
        &owned_lengths,
        opts.nlength_histogram_bins,
        opts.length_histogram_min,
        opts.length_histogram_max,
    );
    Ok((quality, length))
}

/// Outcome of one [`adapt`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct AdaptReport {
    /// Whether any operator changed the mesh or any vertex was snapped.
    pub changed: bool,
    /// Number of topology or geometry changes.
    pub rebuilds: usize,
    pub before: AdaptStatus,
    pub after: AdaptStatus,
    /// Worst fixable quality reached `min_quality_desired`.
    pub quality_satisfied: bool,
    pub timings: AdaptTimings,
}

/// Optional collaborators of [`adapt_with`].
pub struct Collaborators<'a, C: Communicator> {
    pub snap: Option<&'a dyn SnapModel<C>>,
    pub conservation: &'a mut dyn Conservation<C>,
    pub sink: &'a mut dyn EventSink,
}

impl<'a, C: Communicator> Collaborators<'a, C> {
    /// No snapping and no conservation.
    pub fn new(sink: &'a mut dyn EventSink, conservation: &'a mut dyn Conservation<C>) -> Self {
        Self {
            snap: None,
            conservation,
            sink,
        }
    }

    pub fn with_snap(mut self, model: &'a dyn SnapModel<C>) -> Self {
        self.snap = Some(model);
        self
    }
}

/// Collective. Adapt `mesh` to its metric tag, logging through [`LogSink`].
pub fn adapt<C, O>(mesh: &mut Mesh<C>, opts: &AdaptOpts, ops: &mut O) -> Result<AdaptReport, MeshError>
where
    C: Communicator,
    O: TopologyOps<C> + ?Sized,
{
    let mut sink = LogSink::new(opts.verbosity, mesh.comm().rank());
    let mut conservation = NoConservation;
    adapt_with(mesh, opts, ops, Collaborators::new(&mut sink, &mut conservation))
}

/// Collective. [`adapt`] with explicit collaborators.
///
/// Invalid options are reported before the mesh is touched. When the mesh
/// already meets every target no operator is called and the report says
/// nothing changed.
pub fn adapt_with<C, O>(
    mesh: &mut Mesh<C>,
    opts: &AdaptOpts,
    ops: &mut O,
    collab: Collaborators<'_, C>,
) -> Result<AdaptReport, MeshError>
where
    C: Communicator,
    O: TopologyOps<C> + ?Sized,
{
    let t0 = Instant::now();
    opts.validate()?;
    opts.xfer_opts.validate(mesh)?;
    let Collaborators {
        snap,
        conservation,
        sink,
    } = collab;
    let mut run = Adaptation {
        mesh,
        opts,
        ops,
        sink,
        rebuilds: 0,
    };

    let worst = min_fixable_quality(run.mesh, opts)?;
    if worst < opts.min_quality_allowed {
        run.sink.emit(AdaptEvent::InputBelowAllowed {
            quality: worst,
            allowed: opts.min_quality_allowed,
        });
    }
    let before = adapt_status(run.mesh, opts)?;
    if opts.verbosity > Verbosity::Silent {
        run.sink.emit(AdaptEvent::Status {
            stage: StatusStage::Before,
            status: before,
        });
    }
    if before.satisfied {
        return Ok(AdaptReport {
            changed: false,
            rebuilds: 0,
            before,
            after: before,
            quality_satisfied: true,
            timings: AdaptTimings {
                total: t0.elapsed(),
                ..Default::default()
            },
        });
    }
    run.histograms(StatusStage::Before)?;

    conservation.setup(run.mesh, opts)?;
    let t1 = Instant::now();
    run.sink.emit(AdaptEvent::PhaseStarted(AdaptPhase::Lengths));
    run.satisfy_lengths()?;
    let t2 = Instant::now();
    run.snap_and_satisfy_quality(snap)?;
    let t3 = Instant::now();
    conservation.correct_integral_errors(run.mesh, opts)?;
    let t4 = Instant::now();
    run.mesh.set_parting(Parting::ElemBased);

    let after = adapt_status(run.mesh, opts)?;
    if opts.verbosity > Verbosity::Silent {
        run.sink.emit(AdaptEvent::Status {
            stage: StatusStage::After,
            status: after,
        });
    }
    run.histograms(StatusStage::After)?;
    let timings = AdaptTimings {
        lengths: t2 - t1,
        quality: t3 - t2,
        conservation: t4 - t3,
        total: t0.elapsed(),
    };
    if opts.verbosity > Verbosity::Silent {
        run.sink.emit(AdaptEvent::Timings {
            timings,
            conserving: opts.xfer_opts.should_conserve_any(),
        });
    }
    Ok(AdaptReport {
        changed: run.rebuilds > 0,
        rebuilds: run.rebuilds,
        before,
        after,
        quality_satisfied: after.quality.min >= opts.min_quality_desired,
        timings,
    })
}

struct Adaptation<'a, C: Communicator, O: ?Sized> {
    mesh: &'a mut Mesh<C>,
    opts: &'a AdaptOpts,
    ops: &'a mut O,
    sink: &'a mut dyn EventSink,
    rebuilds: usize,
}

impl<C: Communicator, O: TopologyOps<C> + ?Sized> Adaptation<'_, C, O> {
    fn post_rebuild(&mut self) -> Result<(), MeshError> {
        self.rebuilds += 1;
        if self.opts.verbosity >= Verbosity::EachRebuild {
            let status = adapt_status(self.mesh, self.opts)?;
            self.sink.emit(AdaptEvent::Status {
                stage: StatusStage::AfterRebuild,
                status,
            });
        }
        Ok(())
    }

    fn histograms(&mut self, stage: StatusStage) -> Result<(), MeshError> {
        if self.opts.verbosity >= Verbosity::ExtraStats {
            let (quality, length) = adapt_histograms(self.mesh, self.opts)?;
            self.sink.emit(AdaptEvent::Histograms {
                stage,
                quality,
                length,
            });
        }
        Ok(())
    }

    /// Refine and coarsen until a whole pass changes nothing.
    fn satisfy_lengths(&mut self) -> Result<(), MeshError> {
        loop {
            let mut did_anything = false;
            if self.opts.should_refine && self.ops.refine_by_size(self.mesh, self.opts)? {
                self.post_rebuild()?;
                did_anything = true;
            }
            if self.opts.should_coarsen && self.ops.coarsen_by_size(self.mesh, self.opts)? {
                self.post_rebuild()?;
                did_anything = true;
            }
            if !did_anything {
                return Ok(());
            }
        }
    }

    /// The first quality operator, in priority order, that changes the mesh.
    fn improve_quality_once(&mut self) -> Result<bool, MeshError> {
        let opts = self.opts;
        if opts.should_swap && self.ops.swap_edges(self.mesh, opts)? {
            return Ok(true);
        }
        if opts.should_coarsen_slivers && self.ops.coarsen_slivers(self.mesh, opts)? {
            return Ok(true);
        }
        if opts.should_move_for_quality && self.ops.move_verts_for_quality(self.mesh, opts)? {
            return Ok(true);
        }
        Ok(false)
    }

    fn satisfy_quality(&mut self) -> Result<(), MeshError> {
        let desired = self.opts.min_quality_desired;
        let mut worst = min_fixable_quality(self.mesh, self.opts)?;
        if worst >= desired {
            return Ok(());
        }
        self.sink.emit(AdaptEvent::PhaseStarted(AdaptPhase::Quality));
        while worst < desired {
            if !self.improve_quality_once()? {
                self.sink.emit(AdaptEvent::QualityUnmet {
                    quality: worst,
                    desired,
                });
                break;
            }
            self.post_rebuild()?;
            worst = min_fixable_quality(self.mesh, self.opts)?;
        }
        Ok(())
    }

    fn snap_and_satisfy_quality(&mut self, model: Option<&dyn SnapModel<C>>) -> Result<(), MeshError> {
        let Some(model) = model else {
            return self.satisfy_quality();
        };
        self.sink.emit(AdaptEvent::PhaseStarted(AdaptPhase::Snapping));
        self.mesh.set_parting(Parting::Ghosted);
        let mut warp = model.snap_warp(self.mesh)?;
        if self.opts.should_smooth_snap {
            warp = snap::smooth_warp(self.mesh, &warp, self.opts.snap_smooth_tolerance)?;
        }
        let dim = self.mesh.dim();
        let total = snap::warp_magnitude(self.mesh, &warp);
        self.mesh.set_tag(VERT, snap::WARP_TAG, dim, warp)?;
        while snap::warp_to_limit(self.mesh, self.opts, total, &mut *self.sink)? {
            self.rebuilds += 1;
            self.satisfy_quality()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Comm, NoComm};
    use crate::data::Array;
    use crate::mesh::{METRIC_TAG, build_box};

    /// Operators that only count calls and replay scripted answers.
    #[derive(Default)]
    struct Scripted {
        calls: Vec<&'static str>,
        refine: Vec<bool>,
        swap: Vec<bool>,
    }

    impl TopologyOps<NoComm> for Scripted {
        fn refine_by_size(&mut self, _: &mut Mesh<NoComm>, _: &AdaptOpts) -> Result<bool, MeshError> {
            self.calls.push("refine");
            Ok(!self.refine.is_empty() && self.refine.remove(0))
        }
        fn coarsen_by_size(&mut self, _: &mut Mesh<NoComm>, _: &AdaptOpts) -> Result<bool, MeshError> {
            self.calls.push("coarsen");
            Ok(false)
        }
        fn swap_edges(&mut self, _: &mut Mesh<NoComm>, _: &AdaptOpts) -> Result<bool, MeshError> {
            self.calls.push("swap");
            Ok(!self.swap.is_empty() && self.swap.remove(0))
        }
        fn coarsen_slivers(&mut self, _: &mut Mesh<NoComm>, _: &AdaptOpts) -> Result<bool, MeshError> {
            self.calls.push("slivers");
            Ok(false)
        }
        fn move_verts_for_quality(&mut self, _: &mut Mesh<NoComm>, _: &AdaptOpts) -> Result<bool, MeshError> {
            self.calls.push("motion");
            Ok(false)
        }
    }

    fn run(mesh: &mut Mesh<NoComm>, opts: &AdaptOpts, ops: &mut Scripted) -> (AdaptReport, RecordingSink) {
        let mut sink = RecordingSink::new();
        let mut cons = NoConservation;
        let report = adapt_with(mesh, opts, ops, Collaborators::new(&mut sink, &mut cons)).expect("adapt");
        (report, sink)
    }

    #[test]
    fn length_loop_runs_to_a_fixed_point() {
        let mut mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[2, 2]).expect("box");
        // h = 0.25 makes every edge too long
        mesh.set_tag(VERT, METRIC_TAG, 1, Array::filled(mesh.nverts(), 16.0))
            .expect("metric");
        let mut ops = Scripted {
            refine: vec![true, true],
            ..Default::default()
        };
        let mut opts = AdaptOpts::default();
        opts.should_coarsen_slivers = false;
        let (report, sink) = run(&mut mesh, &opts, &mut ops);
        assert_eq!(
            &ops.calls[..6],
            &["refine", "coarsen", "refine", "coarsen", "refine", "coarsen"]
        );
        assert_eq!(report.rebuilds, 2);
        assert!(report.changed);
        assert!(sink
            .events
            .iter()
            .any(|e| matches!(e, AdaptEvent::PhaseStarted(AdaptPhase::Lengths))));
    }

    #[test]
    fn quality_scan_restarts_after_a_change() {
        let mut mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[1, 1]).expect("box");
        // strongly anisotropic metric: the right triangles are poor in it
        mesh.set_tag(VERT, METRIC_TAG, 3, Array::from_vec([100.0, 1.0, 0.0].repeat(4)))
            .expect("metric");
        let mut ops = Scripted {
            swap: vec![true],
            ..Default::default()
        };
        let mut opts = AdaptOpts::default();
        opts.should_refine = false;
        opts.should_coarsen = false;
        opts.should_move_for_quality = true;
        let (report, sink) = run(&mut mesh, &opts, &mut ops);
        assert_eq!(ops.calls, ["swap", "swap", "slivers", "motion"]);
        assert!(sink.quality_unmet());
        assert!(!report.quality_satisfied);
    }

    #[test]
    fn invalid_options_touch_nothing() {
        let mut mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[1, 1]).expect("box");
        let mut opts = AdaptOpts::default();
        opts.min_quality_desired = 0.1;
        let mut ops = Scripted::default();
        let mut sink = RecordingSink::new();
        let mut cons = NoConservation;
        let err = adapt_with(&mut mesh, &opts, &mut ops, Collaborators::new(&mut sink, &mut cons));
        assert!(matches!(err, Err(MeshError::InvalidOptions(_))));
        assert!(ops.calls.is_empty());
        assert!(sink.events.is_empty());
    }

    #[test]
    fn pinned_elements_are_not_fixable() {
        let mut mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[1, 1]).expect("box");
        mesh.mark_angle_elems(vec![true, false]).expect("marks");
        let mut opts = AdaptOpts::default();
        assert_eq!(fixable_qualities(&mesh, &opts).expect("q").len(), 1);
        opts.should_allow_pinching = true;
        assert_eq!(fixable_qualities(&mesh, &opts).expect("q").len(), 2);
    }
}
