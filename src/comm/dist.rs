//! Owner-to-copy synchronization plans.
//!
//! A [`Dist`] maps every local item (an owned entity or a ghost copy) to its
//! owner `(rank, index)`. Building one is collective: each rank tells every
//! owner which of its roots it needs. Afterwards [`Dist::sync`] sends owner
//! values back to all copies with a single neighborhood exchange.

use super::{Comm, CommPtr, Communicator};
use crate::data::{Array, ArrayBuilder};
use crate::mesh_error::MeshError;
use bytemuck::Pod;
use itertools::Itertools;

pub struct Dist<C: Communicator> {
    /// copies -> owners
    forward: CommPtr<C>,
    /// owners -> copies
    reverse: CommPtr<C>,
    /// Local item indices grouped by owner rank, in `forward.destinations()` order.
    item_order: Vec<usize>,
    item_counts: Vec<usize>,
    /// Root indices requested of this rank, grouped by `forward.sources()`.
    requested: Vec<usize>,
    requested_counts: Vec<usize>,
    nroots: usize,
}

impl<C: Communicator> std::fmt::Debug for Dist<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dist")
            .field("owners", &self.forward.destinations())
            .field("nitems", &self.item_order.len())
            .field("nroots", &self.nroots)
            .finish()
    }
}

fn prefix(counts: &[usize]) -> Vec<usize> {
    std::iter::once(0)
        .chain(counts.iter().scan(0, |acc, &c| {
            *acc += c;
            Some(*acc)
        }))
        .collect()
}

impl<C: Communicator> Dist<C> {
    /// Collective. `owner_ranks[i]`/`owner_idxs[i]` locate item `i`'s owner;
    /// `nroots` is the number of local entities other ranks may index.
    pub fn new(
        comm: &Comm<C>,
        owner_ranks: &[usize],
        owner_idxs: &[usize],
        nroots: usize,
    ) -> Result<Self, MeshError> {
        if owner_ranks.len() != owner_idxs.len() {
            return Err(MeshError::SizeMismatch {
                what: "owner ranks vs owner indices",
                expected: owner_ranks.len(),
                found: owner_idxs.len(),
            });
        }
        if let Some(&bad) = owner_ranks.iter().find(|&&r| r >= comm.size()) {
            return Err(MeshError::InvalidParameter {
                name: "owner_ranks",
                reason: format!("rank {bad} outside a group of {}", comm.size()),
            });
        }
        let owners: Vec<usize> = owner_ranks.iter().copied().sorted().dedup().collect();
        let item_order: Vec<usize> = (0..owner_ranks.len())
            .sorted_by_key(|&i| owner_ranks[i])
            .collect();
        let item_counts: Vec<usize> = owners
            .iter()
            .map(|&r| owner_ranks.iter().filter(|&&o| o == r).count())
            .collect();

        let forward = comm.graph(&owners);
        let counts_out: Array<u64> = item_counts.iter().map(|&c| c as u64).collect();
        let requested_counts: Vec<usize> = forward
            .alltoall(&counts_out)
            .iter()
            .map(|&c| c as usize)
            .collect();
        let idxs: Array<u64> = item_order.iter().map(|&i| owner_idxs[i] as u64).collect();
        let requested: Vec<usize> = forward
            .alltoallv(
                &idxs,
                &item_counts,
                &prefix(&item_counts),
                &requested_counts,
                &prefix(&requested_counts),
            )
            .iter()
            .map(|&i| i as usize)
            .collect();
        if let Some(&bad) = requested.iter().find(|&&i| i >= nroots) {
            return Err(MeshError::InvalidParameter {
                name: "owner_idxs",
                reason: format!("index {bad} requested of rank {} with {nroots} roots", comm.rank()),
            });
        }
        let reverse = forward.graph_inverse();
        Ok(Self {
            forward,
            reverse,
            item_order,
            item_counts,
            requested,
            requested_counts,
            nroots,
        })
    }

    pub fn nitems(&self) -> usize {
        self.item_order.len()
    }

    pub fn nroots(&self) -> usize {
        self.nroots
    }

    /// Ranks this rank's copies are owned by.
    pub fn owner_ranks(&self) -> &[usize] {
        self.forward.destinations()
    }

    /// Collective. Push `width` values per root from owners to every copy.
    pub fn sync<T: Pod>(&self, roots: &Array<T>, width: usize) -> Result<Array<T>, MeshError> {
        if roots.len() != self.nroots * width {
            return Err(MeshError::SizeMismatch {
                what: "sync root data",
                expected: self.nroots * width,
                found: roots.len(),
            });
        }
        let mut reply = ArrayBuilder::with_capacity(self.requested.len() * width);
        for &r in &self.requested {
            reply.extend_from_slice(&roots[r * width..(r + 1) * width]);
        }
        let reply = reply.on(roots.residency()).freeze();
        let send_counts: Vec<usize> = self.requested_counts.iter().map(|c| c * width).collect();
        let recv_counts: Vec<usize> = self.item_counts.iter().map(|c| c * width).collect();
        let got = self.reverse.alltoallv(
            &reply,
            &send_counts,
            &prefix(&send_counts),
            &recv_counts,
            &prefix(&recv_counts),
        );
        let mut out = vec![<T as bytemuck::Zeroable>::zeroed(); self.nitems() * width];
        for (k, &item) in self.item_order.iter().enumerate() {
            out[item * width..(item + 1) * width].copy_from_slice(&got[k * width..(k + 1) * width]);
        }
        Ok(ArrayBuilder::from_vec(out).on(roots.residency()).freeze())
    }
}
