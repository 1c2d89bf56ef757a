//! Conservation of integrated quantities across an adaptation.
//!
//! Topology changes transfer fields locally and approximately; the drift in
//! domain integrals they leave behind is removed once, after the mesh has
//! stopped changing.

use super::opts::{AdaptOpts, TransferKind};
use crate::comm::Communicator;
use crate::data::{Array, fill_chunks};
use crate::mesh::{Mesh, VERT};
use crate::mesh_error::MeshError;
use crate::metric::repro_sum_owned;
use std::collections::BTreeMap;

/// Collaborator that records integrals before adaptation and restores them
/// afterwards.
pub trait Conservation<C: Communicator> {
    /// Collective. Called once before the first topology change.
    fn setup(&mut self, mesh: &Mesh<C>, opts: &AdaptOpts) -> Result<(), MeshError>;
    /// Collective. Called once after the last topology change.
    fn correct_integral_errors(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<(), MeshError>;
}

/// Leaves every field as the operators transferred it.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoConservation;

impl<C: Communicator> Conservation<C> for NoConservation {
    fn setup(&mut self, _: &Mesh<C>, _: &AdaptOpts) -> Result<(), MeshError> {
        Ok(())
    }

    fn correct_integral_errors(&mut self, _: &mut Mesh<C>, _: &AdaptOpts) -> Result<(), MeshError> {
        Ok(())
    }
}

/// Global rescaling for [`TransferKind::Conserve`] element densities and a
/// uniform velocity shift for [`TransferKind::MomentumVelocity`] fields.
///
/// A conserved tag is a density: its integral is the sum of value times
/// element size. Momentum is density times size times the element-averaged
/// velocity.
#[derive(Clone, Debug, Default)]
pub struct IntegralConservation {
    integrals: BTreeMap<String, Vec<f64>>,
    momenta: BTreeMap<String, Vec<f64>>,
}

impl IntegralConservation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Integrals recorded by the last `setup`, per component.
    pub fn recorded(&self, name: &str) -> Option<&[f64]> {
        self.integrals
            .get(name)
            .or_else(|| self.momenta.get(name))
            .map(Vec::as_slice)
    }
}

fn density_integrals<C: Communicator>(
    mesh: &Mesh<C>,
    name: &str,
    sizes: &Array<f64>,
) -> Result<Vec<f64>, MeshError> {
    let dim = mesh.dim();
    let tag = mesh.get_tag(dim, name)?;
    let nc = tag.ncomps;
    (0..nc)
        .map(|c| {
            let weighted: Array<f64> = (0..mesh.nelems())
                .map(|e| tag.data[e * nc + c] * sizes[e])
                .collect();
            repro_sum_owned(mesh, dim, &weighted)
        })
        .collect()
}

/// `(momentum per component, mass)` of a velocity field.
fn momentum<C: Communicator>(
    mesh: &Mesh<C>,
    velocity: &str,
    density: &str,
    sizes: &Array<f64>,
) -> Result<(Vec<f64>, f64), MeshError> {
    let dim = mesh.dim();
    let vel = mesh.get_tag(VERT, velocity)?;
    let rho = mesh.get_array(dim, density)?;
    let nc = vel.ncomps;
    let mass: Array<f64> = (0..mesh.nelems()).map(|e| rho[e] * sizes[e]).collect();
    let total_mass = repro_sum_owned(mesh, dim, &mass)?;
    let p = (0..nc)
        .map(|c| {
            let per_elem: Array<f64> = (0..mesh.nelems())
                .map(|e| {
                    let verts = mesh.elem(e);
                    let mean = verts.iter().map(|&v| vel.data[v * nc + c]).sum::<f64>() / verts.len() as f64;
                    mass[e] * mean
                })
                .collect();
            repro_sum_owned(mesh, dim, &per_elem)
        })
        .collect::<Result<Vec<f64>, MeshError>>()?;
    Ok((p, total_mass))
}

fn density_of<'a>(opts: &'a AdaptOpts, velocity: &str) -> Result<&'a str, MeshError> {
    opts.xfer_opts
        .velocity_density_map
        .get(velocity)
        .map(String::as_str)
        .ok_or_else(|| MeshError::InvalidOptions(format!("velocity `{velocity}` has no density")))
}

impl<C: Communicator> Conservation<C> for IntegralConservation {
    fn setup(&mut self, mesh: &Mesh<C>, opts: &AdaptOpts) -> Result<(), MeshError> {
        self.integrals.clear();
        self.momenta.clear();
        let sizes = mesh.ask_sizes();
        for (name, kind) in &opts.xfer_opts.kinds {
            match kind {
                TransferKind::Conserve => {
                    let totals = density_integrals(mesh, name, &sizes)?;
                    self.integrals.insert(name.clone(), totals);
                }
                TransferKind::MomentumVelocity => {
                    let (p, _) = momentum(mesh, name, density_of(opts, name)?, &sizes)?;
                    self.momenta.insert(name.clone(), p);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn correct_integral_errors(&mut self, mesh: &mut Mesh<C>, opts: &AdaptOpts) -> Result<(), MeshError> {
        let dim = mesh.dim();
        let sizes = mesh.ask_sizes();
        for (name, targets) in &self.integrals {
            let current = density_integrals(mesh, name, &sizes)?;
            let nc = targets.len();
            let factors: Vec<f64> = targets
                .iter()
                .zip(&current)
                .map(|(&t, &c)| if c != 0.0 && c.is_finite() { t / c } else { 1.0 })
                .collect();
            log::debug!("rescaling `{name}` by {factors:?}");
            let mut data = mesh.get_array(dim, name)?.to_builder();
            fill_chunks(&mut data, nc, |_, chunk| {
                chunk.iter_mut().zip(&factors).for_each(|(x, f)| *x *= f);
            });
            mesh.set_tag(dim, name, nc, data.freeze())?;
        }
        for (name, targets) in &self.momenta {
            let (current, mass) = momentum(mesh, name, density_of(opts, name)?, &sizes)?;
            if !(mass > 0.0) {
                continue;
            }
            let nc = targets.len();
            let shift: Vec<f64> = targets
                .iter()
                .zip(&current)
                .map(|(&t, &c)| (t - c) / mass)
                .collect();
            log::debug!("shifting `{name}` by {shift:?}");
            let mut data = mesh.get_array(VERT, name)?.to_builder();
            fill_chunks(&mut data, nc, |_, chunk| {
                chunk.iter_mut().zip(&shift).for_each(|(x, s)| *x += s);
            });
            mesh.set_tag(VERT, name, nc, data.freeze())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Comm, NoComm};
    use crate::mesh::build_box;
    use approx::assert_relative_eq;

    #[test]
    fn drift_is_removed() {
        let mut mesh = build_box(Comm::new(NoComm::default()), 2, &[1.0, 1.0], &[2, 2]).expect("box");
        let n = mesh.nelems();
        mesh.set_tag(2, "density", 1, Array::filled(n, 2.0)).expect("tag");
        mesh.set_tag(VERT, "velocity", 2, Array::filled(2 * mesh.nverts(), 1.0))
            .expect("tag");
        let mut opts = AdaptOpts::default();
        opts.xfer_opts.kinds.insert("density".into(), TransferKind::Conserve);
        opts.xfer_opts
            .kinds
            .insert("velocity".into(), TransferKind::MomentumVelocity);
        opts.xfer_opts
            .velocity_momentum_map
            .insert("velocity".into(), "momentum".into());
        opts.xfer_opts
            .velocity_density_map
            .insert("velocity".into(), "density".into());

        let mut cons = IntegralConservation::new();
        Conservation::<NoComm>::setup(&mut cons, &mesh, &opts).expect("setup");
        assert_relative_eq!(cons.recorded("density").expect("recorded")[0], 2.0, epsilon = 1e-12);

        // an operator that lost 10% of the mass and slowed everything down
        mesh.set_tag(2, "density", 1, Array::filled(n, 1.8)).expect("tag");
        mesh.set_tag(VERT, "velocity", 2, Array::filled(2 * mesh.nverts(), 0.5))
            .expect("tag");
        cons.correct_integral_errors(&mut mesh, &opts).expect("correct");

        let rho = mesh.get_array(2, "density").expect("tag");
        assert!(rho.iter().all(|&x| (x - 2.0).abs() < 1e-12));
        let vel = mesh.get_array(VERT, "velocity").expect("tag");
        assert!(vel.iter().all(|&x| (x - 1.0).abs() < 1e-12));
    }
}
