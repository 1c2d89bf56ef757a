//! Foundational array layer: shared immutable arrays, builders and
//! allocation telemetry.

pub mod array;
pub mod telemetry;

pub use array::{Array, ArrayBuilder, Residency, fill_chunks, map_entities};
pub use telemetry::{AllocStats, AllocTracker, TrackingSession};
