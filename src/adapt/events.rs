//! Controller diagnostics.
//!
//! The controller never prints. It emits [`AdaptEvent`]s to an
//! [`EventSink`]; what reaches a log (and on which rank) is the sink's
//! business. Every event carries the [`Verbosity`] at which it is meant to be
//! shown.

use super::opts::Verbosity;
use crate::comm::{Comm, Communicator, ReduceOp};
use std::fmt;
use std::time::Duration;

/// Global minimum and maximum of a distributed array.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

impl MinMax {
    /// Collective. An empty global array gives `(+inf, -inf)`.
    pub fn of<C: Communicator>(comm: &Comm<C>, values: &[f64]) -> Self {
        let (lo, hi) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
        Self {
            min: comm.allreduce(lo, ReduceOp::Min),
            max: comm.allreduce(hi, ReduceOp::Max),
        }
    }
}

/// Worst qualities and lengths of the mesh against the targets.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AdaptStatus {
    /// Over fixable elements.
    pub quality: MinMax,
    pub length: MinMax,
    /// Every target is met: no element below the desired quality, no edge
    /// outside the desired length range.
    pub satisfied: bool,
}

impl fmt::Display for AdaptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "quality [{:.4}, {:.4}], length [{:.4}, {:.4}]{}",
            self.quality.min,
            self.quality.max,
            self.length.min,
            self.length.max,
            if self.satisfied { ", all goals met" } else { "" }
        )
    }
}

/// Counts of owned entities per equal-width bin, summed over all ranks.
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Collective. Values outside `[min, max]` land in the end bins.
    pub fn build<C: Communicator>(comm: &Comm<C>, values: &[f64], nbins: usize, min: f64, max: f64) -> Self {
        let mut local = vec![0i64; nbins];
        let width = (max - min) / nbins.max(1) as f64;
        if nbins > 0 {
            for &x in values {
                let bin = if width > 0.0 { ((x - min) / width).floor() } else { 0.0 };
                let bin = bin.clamp(0.0, (nbins - 1) as f64) as usize;
                local[bin] += 1;
            }
        }
        let counts = local
            .into_iter()
            .map(|c| comm.allreduce(c, ReduceOp::Sum) as u64)
            .collect();
        Self { min, max, counts }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = (self.max - self.min) / self.counts.len().max(1) as f64;
        for (i, c) in self.counts.iter().enumerate() {
            let lo = self.min + width * i as f64;
            writeln!(f, "  [{:.3}, {:.3}): {}", lo, lo + width, c)?;
        }
        Ok(())
    }
}

/// Wall-clock time spent in each phase of an adaptation.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AdaptTimings {
    pub lengths: Duration,
    /// Includes snapping when a model is attached.
    pub quality: Duration,
    pub conservation: Duration,
    pub total: Duration,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatusStage {
    Before,
    AfterRebuild,
    After,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AdaptPhase {
    Lengths,
    Quality,
    Snapping,
}

/// Everything the controller reports.
#[derive(Clone, Debug, PartialEq)]
pub enum AdaptEvent {
    /// The input is already worse than the allowed quality.
    InputBelowAllowed { quality: f64, allowed: f64 },
    Status { stage: StatusStage, status: AdaptStatus },
    Histograms {
        stage: StatusStage,
        quality: Histogram,
        length: Histogram,
    },
    PhaseStarted(AdaptPhase),
    /// Every quality operator was tried without reaching the target.
    QualityUnmet { quality: f64, desired: f64 },
    /// Even the smallest snap increment would leave elements below the
    /// allowed quality; the rest of the displacement was dropped.
    SnapStalled { remaining: f64 },
    Timings {
        timings: AdaptTimings,
        conserving: bool,
    },
}

impl AdaptEvent {
    /// Lowest verbosity at which this event is shown.
    pub fn level(&self) -> Verbosity {
        match self {
            AdaptEvent::InputBelowAllowed { .. } => Verbosity::Silent,
            AdaptEvent::Status {
                stage: StatusStage::AfterRebuild,
                ..
            } => Verbosity::EachRebuild,
            AdaptEvent::Status { .. } => Verbosity::EachAdapt,
            AdaptEvent::Histograms { .. } => Verbosity::ExtraStats,
            AdaptEvent::PhaseStarted(_) => Verbosity::EachRebuild,
            AdaptEvent::QualityUnmet { .. }
            | AdaptEvent::SnapStalled { .. }
            | AdaptEvent::Timings { .. } => Verbosity::EachAdapt,
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            AdaptEvent::InputBelowAllowed { .. }
                | AdaptEvent::QualityUnmet { .. }
                | AdaptEvent::SnapStalled { .. }
        )
    }
}

impl fmt::Display for AdaptEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdaptEvent::InputBelowAllowed { quality, allowed } => write!(
                f,
                "worst input element has quality {quality} but minimum allowed is {allowed}"
            ),
            AdaptEvent::Status { stage, status } => match stage {
                StatusStage::Before => write!(f, "before adapting: {status}"),
                StatusStage::AfterRebuild => write!(f, "{status}"),
                StatusStage::After => write!(f, "after adapting: {status}"),
            },
            AdaptEvent::Histograms { quality, length, .. } => {
                write!(f, "quality histogram:\n{quality}length histogram:\n{length}")
            }
            AdaptEvent::PhaseStarted(AdaptPhase::Lengths) => write!(f, "addressing edge lengths"),
            AdaptEvent::PhaseStarted(AdaptPhase::Quality) => write!(f, "addressing element qualities"),
            AdaptEvent::PhaseStarted(AdaptPhase::Snapping) => write!(f, "snapping to the model"),
            AdaptEvent::QualityUnmet { quality, desired } => write!(
                f,
                "adapt() could not satisfy quality: worst is {quality}, desired {desired}"
            ),
            AdaptEvent::SnapStalled { remaining } => write!(
                f,
                "snapping stalled with {:.1}% of the displacement left",
                remaining * 100.0
            ),
            AdaptEvent::Timings { timings, conserving } => {
                write!(
                    f,
                    "addressing edge lengths took {:.3}s, element qualities {:.3}s",
                    timings.lengths.as_secs_f64(),
                    timings.quality.as_secs_f64()
                )?;
                if *conserving {
                    write!(f, ", correcting integral errors {:.3}s", timings.conservation.as_secs_f64())?;
                }
                write!(f, "; adapting took {:.3}s", timings.total.as_secs_f64())
            }
        }
    }
}

/// Receiver of controller diagnostics.
pub trait EventSink {
    fn emit(&mut self, event: AdaptEvent);
}

/// Writes events through the `log` facade from rank 0 only.
#[derive(Copy, Clone, Debug)]
pub struct LogSink {
    verbosity: Verbosity,
    rank: usize,
}

impl LogSink {
    pub fn new(verbosity: Verbosity, rank: usize) -> Self {
        Self { verbosity, rank }
    }
}

impl EventSink for LogSink {
    fn emit(&mut self, event: AdaptEvent) {
        if self.rank != 0 || event.level() > self.verbosity {
            return;
        }
        if event.is_warning() {
            log::warn!("{event}");
        } else if event.level() >= Verbosity::EachRebuild {
            log::debug!("{event}");
        } else {
            log::info!("{event}");
        }
    }
}

/// Keeps every event, for inspection in tests.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<AdaptEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &AdaptEvent> {
        self.events.iter().filter(|e| e.is_warning())
    }

    pub fn quality_unmet(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, AdaptEvent::QualityUnmet { .. }))
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: AdaptEvent) {
        self.events.push(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: AdaptEvent) {
        (**self).emit(event);
    }
}
