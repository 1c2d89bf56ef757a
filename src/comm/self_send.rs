//! Self-message elision for neighborhood exchanges.
//!
//! When a rank is both a source and a destination of itself, the slice it
//! sends to itself can be copied locally instead of going through the
//! transport. [`split_self`] cuts that slice out of the send buffer and zeroes
//! its count; [`merge_self`] splices it back into the received buffer at the
//! position the transport would have put it. All displacements are in bytes.

use crate::data::Residency;

/// Send buffer with the self-directed slice removed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ElidedSend {
    pub sendbuf: Vec<u8>,
    pub sdispls: Vec<usize>,
    pub rdispls: Vec<usize>,
    pub self_data: Vec<u8>,
}

/// Whether eliding the self message is worth it.
///
/// Only device-resident data is elided. Below `threshold` bytes the
/// bookkeeping costs more than the transport round trip, unless the self
/// message is the whole send buffer.
pub(crate) fn should_elide(
    residency: Residency,
    self_bytes: usize,
    total_bytes: usize,
    threshold: usize,
) -> bool {
    if residency != Residency::Device || self_bytes == 0 {
        return false;
    }
    self_bytes >= threshold || self_bytes == total_bytes
}

fn zero_count(displs: &[usize], which: usize) -> Vec<usize> {
    let removed = displs[which + 1] - displs[which];
    displs
        .iter()
        .enumerate()
        .map(|(i, &d)| if i > which { d - removed } else { d })
        .collect()
}

pub(crate) fn split_self(
    sendbuf: &[u8],
    sdispls: &[usize],
    rdispls: &[usize],
    self_dst: usize,
    self_src: usize,
) -> ElidedSend {
    let (lo, hi) = (sdispls[self_dst], sdispls[self_dst + 1]);
    let mut reduced = Vec::with_capacity(sendbuf.len() - (hi - lo));
    reduced.extend_from_slice(&sendbuf[..lo]);
    reduced.extend_from_slice(&sendbuf[hi..]);
    debug_assert_eq!(
        rdispls[self_src + 1] - rdispls[self_src],
        hi - lo,
        "self receive count must equal self send count"
    );
    ElidedSend {
        sendbuf: reduced,
        sdispls: zero_count(sdispls, self_dst),
        rdispls: zero_count(rdispls, self_src),
        self_data: sendbuf[lo..hi].to_vec(),
    }
}

/// Reinsert the self slice into a buffer received with `reduced_rdispls`.
pub(crate) fn merge_self(
    recvbuf: &[u8],
    reduced_rdispls: &[usize],
    self_data: &[u8],
    self_src: usize,
) -> Vec<u8> {
    let at = reduced_rdispls[self_src];
    let mut out = Vec::with_capacity(recvbuf.len() + self_data.len());
    out.extend_from_slice(&recvbuf[..at]);
    out.extend_from_slice(self_data);
    out.extend_from_slice(&recvbuf[at..]);
    out
}
