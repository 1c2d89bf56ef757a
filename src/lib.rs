#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-adapt
//!
//! mesh-adapt drives metric-based adaptation of distributed simplex meshes.
//! A metric field prescribes the desired size and shape of elements at every
//! vertex; the adaptation controller applies topological operators until
//! every edge has unit length under that metric, and element quality is as
//! good as the operators can make it.
//!
//! ## Layers
//! - [`comm`]: process groups with collectives and neighborhood collectives
//!   over an optional sparse graph, with a point-to-point fallback and
//!   local elision of self-directed data. Transports: serial
//!   ([`comm::NoComm`]), threads ([`comm::LocalUniverse`]) and MPI (feature
//!   `mpi-support`).
//! - [`metric`]: symmetric positive definite tensor fields: intersection,
//!   log-space interpolation, Hessian and curvature metrics, metrics implied
//!   by an existing mesh, gradation limiting and scaling to an element count.
//! - [`mesh`]: the partitioned simplex mesh those algorithms run on, with
//!   tags, ownership, ghost synchronization and quality measures.
//! - [`adapt`]: the adaptation controller and the collaborator traits it
//!   drives (topology operators, snapping, conservation, event sinks).
//! - [`topology`]: reference operators for serial triangle meshes.
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-adapt = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon", "check-invariants"]
//! ```
//!
//! ```rust
//! use mesh_adapt::prelude::*;
//!
//! let comm = Comm::new(NoComm::default());
//! let mut mesh = build_box(comm, 2, &[1.0, 1.0], &[1, 1]).unwrap();
//! let n = mesh.nverts();
//! mesh.set_tag(0, METRIC_TAG, 1, Array::filled(n, 10.0)).unwrap();
//! let opts = AdaptOpts::for_mesh(&mesh);
//! let report = adapt(&mut mesh, &opts, &mut TriangleOps).unwrap();
//! assert!(report.changed);
//! assert!(report.after.length.max <= opts.max_length_desired);
//! ```
//!
//! ## Determinism
//!
//! Reductions of floating-point sums go through [`metric::repro_sum`], which
//! is independent of the partitioning. Operators visit candidates in a fixed
//! order, so repeated runs on the same input produce the same mesh.

pub mod adapt;
pub mod comm;
pub mod data;
pub mod debug_invariants;
pub mod mesh;
pub mod mesh_error;
pub mod metric;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::adapt::{
        AdaptEvent, AdaptOpts, AdaptReport, Collaborators, EventSink, IntegralConservation,
        LogSink, NoConservation, RecordingSink, TopologyOps, TransferKind, Verbosity, adapt,
        adapt_status, adapt_with,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::comm::{
        Comm, CommConfig, CommPtr, Communicator, ExchangeKind, LocalUniverse, NoComm, ReduceOp,
    };
    pub use crate::data::{Array, ArrayBuilder};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::mesh::{Class, METRIC_TAG, Mesh, VERT, build_box, build_box_partitioned};
    pub use crate::mesh_error::MeshError;
    pub use crate::metric::{
        GradationOpts, Isotropy, intersect_metrics, limit_metric_gradation,
        metrics_from_isos,
    };
    pub use crate::topology::TriangleOps;
}
