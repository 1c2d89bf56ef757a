//! MeshError: unified error type for mesh-adapt public APIs
//!
//! Communication failures are not represented here: the comm layer treats any
//! transport failure as fatal and panics. Everything else that a caller can
//! reasonably react to is surfaced through this enum.

use thiserror::Error;

/// Unified error type for mesh-adapt operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshError {
    /// An option value violates its documented range.
    #[error("invalid adaptation options: {0}")]
    InvalidOptions(String),
    /// A symmetric-storage component count that is not 1, 3 or 6.
    #[error("component count {0} does not correspond to a symmetric 1x1, 2x2 or 3x3 matrix")]
    BadComponentCount(usize),
    /// A mesh/metric dimension pairing that no kernel is instantiated for.
    #[error("unsupported dimension combination: mesh dim {mesh_dim}, metric dim {metric_dim}")]
    UnsupportedDimension { mesh_dim: usize, metric_dim: usize },
    /// Two arrays that must agree in length do not.
    #[error("size mismatch in {what}: expected {expected}, found {found}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// A named tag was required but is absent from the mesh.
    #[error("missing tag `{name}` on entities of dimension {dim}")]
    MissingTag { dim: usize, name: String },
    /// A tag exists but has the wrong number of components.
    #[error("tag `{name}` has {found} components, expected {expected}")]
    TagComponents {
        name: String,
        expected: usize,
        found: usize,
    },
    /// Owned vertices do not see all of their adjacent elements locally.
    #[error("owned vertices must have all upward adjacencies present on their owning rank")]
    OwnersLackUpward,
    /// Degenerate or inverted geometry where a valid element is required.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    /// A numeric parameter outside of its domain (e.g. non-positive tolerance).
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    /// The operation does not support this kind of input.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
