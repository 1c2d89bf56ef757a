//! Options of [`adapt`](super::adapt) and of field transfer during adaptation.

use crate::comm::Communicator;
use crate::mesh::{Mesh, VERT};
use crate::mesh_error::MeshError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How much the controller reports, in increasing order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Verbosity {
    Silent,
    /// Status before and after each adaptation.
    EachAdapt,
    /// Status after every topology change.
    #[default]
    EachRebuild,
    /// Histograms of lengths and qualities as well.
    ExtraStats,
}

/// How a tagged field is carried across topology changes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    /// Copy the value of the parent entity.
    #[default]
    Inherit,
    LinearInterp,
    /// Interpolate in log-Euclidean space.
    MetricInterp,
    /// Keep the integral over the domain fixed.
    Conserve,
    /// Velocity transferred through its momentum.
    MomentumVelocity,
}

/// Field-transfer configuration, keyed by tag name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferOpts {
    pub kinds: BTreeMap<String, TransferKind>,
    /// Velocity tag name to the name of its momentum.
    pub velocity_momentum_map: BTreeMap<String, String>,
    /// Velocity tag name to the element density tag it is weighted by.
    pub velocity_density_map: BTreeMap<String, String>,
}

impl TransferOpts {
    pub fn kind_of(&self, name: &str) -> TransferKind {
        self.kinds.get(name).copied().unwrap_or_default()
    }

    /// Whether any field needs the conservation collaborator.
    pub fn should_conserve_any(&self) -> bool {
        self.kinds
            .values()
            .any(|k| matches!(k, TransferKind::Conserve | TransferKind::MomentumVelocity))
    }

    /// Check every configured field against the tags present on `mesh`.
    ///
    /// Conserved fields live on elements, everything else on vertices. A
    /// momentum-transferred velocity needs both map entries and a scalar
    /// element density.
    pub fn validate<C: Communicator>(&self, mesh: &Mesh<C>) -> Result<(), MeshError> {
        for (name, kind) in &self.kinds {
            let ent_dim = match kind {
                TransferKind::Conserve => mesh.dim(),
                _ => VERT,
            };
            if !mesh.has_tag(ent_dim, name) {
                return Err(MeshError::MissingTag {
                    dim: ent_dim,
                    name: name.clone(),
                });
            }
            if *kind != TransferKind::MomentumVelocity {
                continue;
            }
            if !self.velocity_momentum_map.contains_key(name) {
                return Err(MeshError::InvalidOptions(format!(
                    "velocity `{name}` has no momentum name"
                )));
            }
            let density = self.velocity_density_map.get(name).ok_or_else(|| {
                MeshError::InvalidOptions(format!("velocity `{name}` has no density"))
            })?;
            let tag = mesh.get_tag(mesh.dim(), density)?;
            if tag.ncomps != 1 {
                return Err(MeshError::TagComponents {
                    name: density.clone(),
                    expected: 1,
                    found: tag.ncomps,
                });
            }
        }
        Ok(())
    }
}

/// Targets and switches of one adaptation.
///
/// Lengths are measured in the metric; an edge of length one is exactly the
/// size the metric asks for. Qualities are mean-ratio values in `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptOpts {
    pub min_length_desired: f64,
    pub max_length_desired: f64,
    pub max_length_allowed: f64,
    pub min_quality_allowed: f64,
    pub min_quality_desired: f64,
    /// Layers of elements around a sliver that sliver coarsening may touch.
    pub nsliver_layers: usize,
    pub verbosity: Verbosity,
    pub length_histogram_min: f64,
    pub length_histogram_max: f64,
    pub nlength_histogram_bins: usize,
    pub nquality_histogram_bins: usize,
    pub max_motion_steps: usize,
    pub motion_step_size: f64,
    pub should_refine: bool,
    pub should_coarsen: bool,
    pub should_swap: bool,
    pub should_coarsen_slivers: bool,
    pub should_move_for_quality: bool,
    /// Let elements pinned by sharp features degrade; they are then left out
    /// of the fixable quality.
    pub should_allow_pinching: bool,
    pub should_smooth_snap: bool,
    pub snap_smooth_tolerance: f64,
    /// How many times a snap increment may be halved before giving up.
    pub snap_max_halvings: usize,
    pub xfer_opts: TransferOpts,
}

impl AdaptOpts {
    /// Defaults tuned for meshes of dimension `dim`.
    pub fn for_dim(dim: usize) -> Self {
        let (min_quality_allowed, min_quality_desired) = if dim == 3 { (0.20, 0.30) } else { (0.30, 0.40) };
        Self {
            min_length_desired: 1.0 / 2.0f64.sqrt(),
            max_length_desired: 2.0f64.sqrt(),
            max_length_allowed: f64::MAX,
            min_quality_allowed,
            min_quality_desired,
            nsliver_layers: 4,
            verbosity: Verbosity::EachRebuild,
            length_histogram_min: 0.0,
            length_histogram_max: 3.0,
            nlength_histogram_bins: 10,
            nquality_histogram_bins: 10,
            max_motion_steps: 100,
            motion_step_size: 0.1,
            should_refine: true,
            should_coarsen: true,
            should_swap: true,
            should_coarsen_slivers: true,
            should_move_for_quality: false,
            should_allow_pinching: false,
            should_smooth_snap: true,
            snap_smooth_tolerance: 1e-2,
            snap_max_halvings: 10,
            xfer_opts: TransferOpts::default(),
        }
    }

    pub fn for_mesh<C: Communicator>(mesh: &Mesh<C>) -> Self {
        Self::for_dim(mesh.dim())
    }

    /// Range checks that do not need the mesh.
    pub fn validate(&self) -> Result<(), MeshError> {
        let bad = |msg: String| Err(MeshError::InvalidOptions(msg));
        if !(0.0 <= self.min_quality_allowed) {
            return bad(format!(
                "min_quality_allowed {} is negative",
                self.min_quality_allowed
            ));
        }
        if !(self.min_quality_allowed <= self.min_quality_desired) {
            return bad(format!(
                "min_quality_allowed {} exceeds min_quality_desired {}",
                self.min_quality_allowed, self.min_quality_desired
            ));
        }
        if !(self.min_quality_desired <= 1.0) {
            return bad(format!(
                "min_quality_desired {} exceeds 1",
                self.min_quality_desired
            ));
        }
        if self.nsliver_layers >= 100 {
            return bad(format!("nsliver_layers {} is not below 100", self.nsliver_layers));
        }
        if !(self.min_length_desired <= self.max_length_desired) {
            return bad(format!(
                "min_length_desired {} exceeds max_length_desired {}",
                self.min_length_desired, self.max_length_desired
            ));
        }
        Ok(())
    }
}

impl Default for AdaptOpts {
    fn default() -> Self {
        Self::for_dim(2)
    }
}
