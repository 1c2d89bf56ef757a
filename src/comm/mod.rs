//! Communicators: process groups with an optional sparse neighbor topology.
//!
//! [`Comm<C>`] wraps a point-to-point [`Communicator`] transport and adds
//! value collectives (`allreduce`, `exscan`, `bcast`, ...) over the whole
//! group, plus neighborhood collectives (`allgather`, `alltoall`,
//! `alltoallv`) over a declared graph of sources and destinations.
//!
//! All operations are collective and blocking: every member must make the
//! same sequence of calls. Transport failures panic.
//!
//! ```rust
//! use mesh_adapt::comm::{Comm, LocalUniverse, ReduceOp};
//!
//! let sums = LocalUniverse::run(3, |t| {
//!     let comm = Comm::new(t);
//!     comm.allreduce(comm.rank() as i64, ReduceOp::Sum)
//! });
//! assert_eq!(sums, vec![3, 3, 3]);
//! ```

pub mod collectives;
pub mod dist;
#[cfg(feature = "mpi-support")]
pub mod mpi_backend;
pub mod neighborhood;
pub(crate) mod self_send;
pub mod transport;
pub mod wire;

pub use dist::Dist;
#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
pub use neighborhood::{Native, NeighborExchange, PointToPoint};
pub use transport::{CommTag, Communicator, LocalComm, LocalUniverse, NoComm, Wait};
pub use wire::{CommScalar, ReduceOp};

use crate::data::{Array, ArrayBuilder};
use crate::debug_invariants::{DebugInvariants, check_displacements};
use crate::mesh_error::MeshError;
use bytemuck::Pod;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub type CommPtr<C> = Arc<Comm<C>>;

/// Which neighborhood exchange implementation a communicator uses.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeKind {
    /// Native when the transport has it, otherwise point-to-point.
    #[default]
    Auto,
    Native,
    PointToPoint,
}

/// Tunables of the communication layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommConfig {
    pub exchange: ExchangeKind,
    /// Self messages smaller than this many bytes go through the transport.
    pub self_send_threshold: usize,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            exchange: ExchangeKind::Auto,
            self_send_threshold: 1024,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Topology {
    sources: Vec<usize>,
    destinations: Vec<usize>,
    self_src: Option<usize>,
    self_dst: Option<usize>,
}

impl Topology {
    fn new(sources: Vec<usize>, destinations: Vec<usize>, me: usize) -> Self {
        let self_src = sources.iter().position(|&r| r == me);
        let self_dst = destinations.iter().position(|&r| r == me);
        Self {
            sources,
            destinations,
            self_src,
            self_dst,
        }
    }
}

pub struct Comm<C: Communicator> {
    transport: Arc<C>,
    topology: Option<Topology>,
    config: CommConfig,
    exchange: Arc<dyn NeighborExchange<C>>,
}

impl<C: Communicator + fmt::Debug> fmt::Debug for Comm<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comm")
            .field("transport", &self.transport)
            .field("topology", &self.topology)
            .field("exchange", &self.exchange.name())
            .finish()
    }
}

fn select_exchange<C: Communicator>(kind: ExchangeKind, t: &C) -> Arc<dyn NeighborExchange<C>> {
    match kind {
        ExchangeKind::Native => Arc::new(Native),
        ExchangeKind::PointToPoint => Arc::new(PointToPoint),
        ExchangeKind::Auto if t.has_native_neighbor() => Arc::new(Native),
        ExchangeKind::Auto => Arc::new(PointToPoint),
    }
}

impl<C: Communicator> Comm<C> {
    pub fn new(transport: C) -> CommPtr<C> {
        Self::with_config(transport, CommConfig::default())
    }

    pub fn with_config(transport: C, config: CommConfig) -> CommPtr<C> {
        let exchange = select_exchange(config.exchange, &transport);
        Arc::new(Self {
            transport: Arc::new(transport),
            topology: None,
            config,
            exchange,
        })
    }

    fn derived(&self, transport: Arc<C>, topology: Option<Topology>) -> CommPtr<C> {
        Arc::new(Self {
            transport,
            topology,
            config: self.config.clone(),
            exchange: Arc::clone(&self.exchange),
        })
    }

    pub fn transport(&self) -> &C {
        &self.transport
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    pub fn exchange_name(&self) -> &'static str {
        self.exchange.name()
    }

    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    pub fn dup(&self) -> CommPtr<C> {
        self.derived(Arc::new(self.transport.dup()), self.topology.clone())
    }

    /// Collective: sub-groups by `color`, ranked by `key`. The result has no
    /// neighbor topology.
    pub fn split(&self, color: i32, key: i32) -> CommPtr<C> {
        self.derived(Arc::new(self.transport.split(color, key)), None)
    }

    /// Ranks that declared this rank as a destination, in rank order. A rank
    /// that lists this one `k` times appears `k` times.
    fn incoming_from(&self, destinations: &[usize]) -> Vec<usize> {
        let n = self.size();
        let sends: Vec<Vec<u8>> = (0..n)
            .map(|q| {
                let edges = destinations.iter().filter(|&&d| d == q).count() as u32;
                edges.to_le_bytes().to_vec()
            })
            .collect();
        collectives::dense_alltoall(&*self.transport, CommTag::TOPOLOGY, &sends, &vec![4; n])
            .iter()
            .enumerate()
            .flat_map(|(q, count)| {
                let edges = <[u8; 4]>::try_from(count.as_slice()).map_or(0, u32::from_le_bytes);
                std::iter::repeat_n(q, edges as usize)
            })
            .collect()
    }

    /// Collective: declare outgoing edges; incoming edges are derived.
    /// A destination listed twice receives two messages per exchange.
    pub fn graph(&self, destinations: &[usize]) -> CommPtr<C> {
        let sources = self.incoming_from(destinations);
        let topo = Topology::new(sources, destinations.to_vec(), self.rank());
        self.derived(Arc::clone(&self.transport), Some(topo))
    }

    /// Collective: declare both directions. Declarations must agree across
    /// ranks; debug builds verify it.
    pub fn graph_adjacent(&self, sources: &[usize], destinations: &[usize]) -> CommPtr<C> {
        let topo = Topology::new(sources.to_vec(), destinations.to_vec(), self.rank());
        let out = self.derived(Arc::clone(&self.transport), Some(topo));
        crate::debug_invariants!(out.validate_invariants(), "graph_adjacent");
        out
    }

    /// Same group, sources and destinations swapped.
    pub fn graph_inverse(&self) -> CommPtr<C> {
        let topo = self.topology.as_ref().map(|t| {
            Topology::new(t.destinations.clone(), t.sources.clone(), self.rank())
        });
        self.derived(Arc::clone(&self.transport), topo)
    }

    pub fn sources(&self) -> &[usize] {
        self.topology.as_ref().map_or(&[][..], |t| t.sources.as_slice())
    }

    pub fn destinations(&self) -> &[usize] {
        self.topology.as_ref().map_or(&[][..], |t| t.destinations.as_slice())
    }

    pub fn barrier(&self) {
        self.transport.barrier();
    }

    pub fn allreduce<T: CommScalar>(&self, x: T, op: ReduceOp) -> T {
        collectives::allreduce(&*self.transport, x, op)
    }

    pub fn reduce_or(&self, x: bool) -> bool {
        self.allreduce(i8::from(x), ReduceOp::Max) == 1
    }

    pub fn reduce_and(&self, x: bool) -> bool {
        self.allreduce(i8::from(x), ReduceOp::Min) == 1
    }

    /// Exclusive prefix: rank 0 gets zero.
    pub fn exscan<T: CommScalar>(&self, x: T, op: ReduceOp) -> T {
        collectives::exscan(&*self.transport, x, op)
    }

    /// Broadcast from rank 0.
    pub fn bcast<T: Pod>(&self, x: T) -> T {
        collectives::bcast(&*self.transport, x, 0)
    }

    pub fn bcast_string(&self, s: &str) -> String {
        let bytes = collectives::bcast_var(&*self.transport, s.as_bytes(), 0);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Exact 128-bit sum across the group.
    pub fn add_int128(&self, x: i128) -> i128 {
        self.allreduce(x, ReduceOp::Sum)
    }

    /// Send `x` to every destination; one value per source comes back.
    pub fn allgather<T: Pod>(&self, x: T) -> Array<T> {
        let sends = Array::filled(self.destinations().len(), x);
        self.alltoall(&sends)
    }

    /// `x[i]` goes to destination `i`; one value per source comes back.
    pub fn alltoall<T: Pod>(&self, x: &Array<T>) -> Array<T> {
        let nd = self.destinations().len();
        let ns = self.sources().len();
        let sendcounts = vec![1; nd];
        let recvcounts = vec![1; ns];
        let sdispls: Vec<usize> = (0..=nd).collect();
        let rdispls: Vec<usize> = (0..=ns).collect();
        self.alltoallv(x, &sendcounts, &sdispls, &recvcounts, &rdispls)
    }

    /// Variable-length neighborhood exchange.
    ///
    /// `sendcounts`/`sdispls` index destinations, `recvcounts`/`rdispls`
    /// index sources; displacements are exclusive prefix sums with one extra
    /// trailing entry. The result is laid out per source in `sources()` order.
    /// Device-resident data may have its self message copied locally; the
    /// layout is the same either way.
    pub fn alltoallv<T: Pod>(
        &self,
        sendbuf: &Array<T>,
        sendcounts: &[usize],
        sdispls: &[usize],
        recvcounts: &[usize],
        rdispls: &[usize],
    ) -> Array<T> {
        debug_assert_eq!(sendcounts.len(), self.destinations().len());
        debug_assert_eq!(recvcounts.len(), self.sources().len());
        crate::debug_invariants!(check_displacements("alltoallv sdispls", sendcounts, sdispls), "alltoallv");
        crate::debug_invariants!(check_displacements("alltoallv rdispls", recvcounts, rdispls), "alltoallv");
        debug_assert_eq!(sendbuf.len(), sdispls[sendcounts.len()]);

        let width = std::mem::size_of::<T>();
        let bytes: &[u8] = bytemuck::cast_slice(sendbuf.as_slice());
        let sd: Vec<usize> = sdispls.iter().map(|&d| d * width).collect();
        let rd: Vec<usize> = rdispls.iter().map(|&d| d * width).collect();

        let elide = match self.topology.as_ref() {
            Some(Topology {
                self_src: Some(s),
                self_dst: Some(d),
                ..
            }) => {
                let self_bytes = sd[*d + 1] - sd[*d];
                self_send::should_elide(
                    sendbuf.residency(),
                    self_bytes,
                    bytes.len(),
                    self.config.self_send_threshold,
                )
                .then_some((*s, *d))
            }
            _ => None,
        };

        let received = match elide {
            Some((s, d)) => {
                log::trace!(
                    "rank {}: eliding {} self-sent bytes",
                    self.rank(),
                    sd[d + 1] - sd[d]
                );
                let cut = self_send::split_self(bytes, &sd, &rd, d, s);
                let reduced = self.exchange_bytes(&cut.sendbuf, &cut.sdispls, &cut.rdispls);
                self_send::merge_self(&reduced, &cut.rdispls, &cut.self_data, s)
            }
            None => self.exchange_bytes(bytes, &sd, &rd),
        };
        ArrayBuilder::from_vec(wire::decode::<T>(&received))
            .on(sendbuf.residency())
            .freeze()
    }

    fn exchange_bytes(&self, sendbuf: &[u8], sd: &[usize], rd: &[usize]) -> Vec<u8> {
        let sends: Vec<&[u8]> = sd.windows(2).map(|w| &sendbuf[w[0]..w[1]]).collect();
        let recv_lens: Vec<usize> = rd.windows(2).map(|w| w[1] - w[0]).collect();
        self.exchange
            .exchange(
                &self.transport,
                self.sources(),
                self.destinations(),
                &sends,
                &recv_lens,
            )
            .concat()
    }
}

impl<C: Communicator> DebugInvariants for Comm<C> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Comm");
    }

    /// Collective: every declared source must have declared this rank as a
    /// destination and vice versa, with matching multiplicity.
    fn validate_invariants(&self) -> Result<(), MeshError> {
        let Some(topo) = self.topology.as_ref() else {
            return Ok(());
        };
        let derived = self.incoming_from(&topo.destinations);
        let declared: Vec<usize> = topo.sources.iter().copied().sorted().collect();
        if derived != declared {
            return Err(MeshError::InvalidParameter {
                name: "sources",
                reason: format!(
                    "rank {} declares sources {:?} but {:?} send to it",
                    self.rank(),
                    declared,
                    derived
                ),
            });
        }
        Ok(())
    }
}
