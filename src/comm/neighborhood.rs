//! Neighborhood exchange strategies.
//!
//! A [`NeighborExchange`] moves one byte buffer to each declared destination
//! and collects one from each declared source. [`Native`] defers to the
//! transport; [`PointToPoint`] synthesizes the collective from non-blocking
//! sends and receives and works on any transport.

use super::transport::{CommTag, Communicator, Wait};
use std::fmt;

pub trait NeighborExchange<C: Communicator>: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// `sends[i]` goes to `destinations[i]`; output `i` holds `recv_lens[i]`
    /// bytes from `sources[i]`.
    fn exchange(
        &self,
        comm: &C,
        sources: &[usize],
        destinations: &[usize],
        sends: &[&[u8]],
        recv_lens: &[usize],
    ) -> Vec<Vec<u8>>;
}

/// Portable fallback: post receives, barrier, send, wait sends, wait receives.
#[derive(Copy, Clone, Debug, Default)]
pub struct PointToPoint;

impl<C: Communicator> NeighborExchange<C> for PointToPoint {
    fn name(&self) -> &'static str {
        "point-to-point"
    }

    fn exchange(
        &self,
        comm: &C,
        sources: &[usize],
        destinations: &[usize],
        sends: &[&[u8]],
        recv_lens: &[usize],
    ) -> Vec<Vec<u8>> {
        debug_assert_eq!(sends.len(), destinations.len());
        debug_assert_eq!(recv_lens.len(), sources.len());
        let recvs: Vec<_> = sources
            .iter()
            .zip(recv_lens)
            .map(|(&src, &len)| comm.irecv(src, CommTag::NEIGHBOR, len))
            .collect();
        // No rank may send before every rank has posted its receives.
        comm.barrier();
        let send_handles: Vec<_> = destinations
            .iter()
            .zip(sends)
            .map(|(&dst, buf)| comm.isend(dst, CommTag::NEIGHBOR, buf))
            .collect();
        for s in send_handles {
            s.wait();
        }
        recvs
            .into_iter()
            .map(|r| r.wait().unwrap_or_default())
            .collect()
    }
}

/// The transport's own neighborhood collective.
#[derive(Copy, Clone, Debug, Default)]
pub struct Native;

impl<C: Communicator> NeighborExchange<C> for Native {
    fn name(&self) -> &'static str {
        "native"
    }

    fn exchange(
        &self,
        comm: &C,
        sources: &[usize],
        destinations: &[usize],
        sends: &[&[u8]],
        recv_lens: &[usize],
    ) -> Vec<Vec<u8>> {
        comm.native_neighbor_alltoallv(sources, destinations, sends, recv_lens)
            .unwrap_or_else(|| panic!("transport has no native neighborhood collectives"))
    }
}
