//! Dense group collectives built from point-to-point messages.
//!
//! Reductions gather to rank 0, fold in rank order and broadcast the result,
//! so every rank sees a bit-identical answer regardless of arrival order.

use super::transport::{CommTag, Communicator, Wait};
use super::wire::{self, CommScalar, ReduceOp, WireLen};
use bytemuck::Pod;

const ROOT: usize = 0;

/// Gather equal-length payloads on rank 0. Other ranks get `None`.
pub(crate) fn gather_to_root<C: Communicator>(
    comm: &C,
    tag: CommTag,
    payload: &[u8],
) -> Option<Vec<Vec<u8>>> {
    if comm.rank() != ROOT {
        comm.isend(ROOT, tag, payload).wait();
        return None;
    }
    let recvs: Vec<_> = (1..comm.size())
        .map(|q| comm.irecv(q, tag, payload.len()))
        .collect();
    let mut all = Vec::with_capacity(comm.size());
    all.push(payload.to_vec());
    all.extend(recvs.into_iter().map(|r| r.wait().unwrap_or_default()));
    Some(all)
}

/// Broadcast `len` bytes from `root`; non-roots pass `None`.
pub(crate) fn bcast_bytes<C: Communicator>(
    comm: &C,
    tag: CommTag,
    root: usize,
    payload: Option<&[u8]>,
    len: usize,
) -> Vec<u8> {
    if comm.rank() == root {
        let data = payload.unwrap_or_default();
        let sends: Vec<_> = (0..comm.size())
            .filter(|&q| q != root)
            .map(|q| comm.isend(q, tag, data))
            .collect();
        sends.into_iter().for_each(|s| {
            s.wait();
        });
        data.to_vec()
    } else {
        comm.irecv(root, tag, len).wait().unwrap_or_default()
    }
}

pub fn barrier<C: Communicator>(comm: &C) {
    gather_to_root(comm, CommTag::BARRIER, &[]);
    bcast_bytes(comm, CommTag::BARRIER, ROOT, Some(&[]), 0);
}

pub fn allreduce<C: Communicator, T: CommScalar>(comm: &C, x: T, op: ReduceOp) -> T {
    let folded = gather_to_root(comm, CommTag::COLLECTIVE, &wire::encode_one(&x)).map(|all| {
        all.iter()
            .map(|b| wire::decode_one::<T>(b))
            .reduce(|a, b| T::combine(op, a, b))
            .unwrap_or(x)
    });
    bcast(comm, folded.unwrap_or(x), ROOT)
}

/// Exclusive prefix reduction in rank order; rank 0 receives `T::ZERO`.
pub fn exscan<C: Communicator, T: CommScalar>(comm: &C, x: T, op: ReduceOp) -> T {
    let tag = CommTag::COLLECTIVE;
    match gather_to_root(comm, tag, &wire::encode_one(&x)) {
        Some(all) => {
            let mut acc: Option<T> = None;
            let mut mine = T::ZERO;
            for (q, bytes) in all.iter().enumerate() {
                let prefix = acc.unwrap_or(T::ZERO);
                if q == ROOT {
                    mine = prefix;
                } else {
                    comm.isend(q, tag, &wire::encode_one(&prefix)).wait();
                }
                let v = wire::decode_one::<T>(bytes);
                acc = Some(match acc {
                    None => v,
                    Some(a) => T::combine(op, a, v),
                });
            }
            mine
        }
        None => {
            let bytes = comm
                .irecv(ROOT, tag, std::mem::size_of::<T>())
                .wait()
                .unwrap_or_default();
            wire::decode_one(&bytes)
        }
    }
}

pub fn bcast<C: Communicator, T: Pod>(comm: &C, x: T, root: usize) -> T {
    let bytes = bcast_bytes(
        comm,
        CommTag::COLLECTIVE,
        root,
        Some(&wire::encode_one(&x)),
        std::mem::size_of::<T>(),
    );
    wire::decode_one(&bytes)
}

/// Broadcast a variable-length payload: length first, then the bytes.
pub fn bcast_var<C: Communicator>(comm: &C, payload: &[u8], root: usize) -> Vec<u8> {
    let n = bcast(comm, WireLen::new(payload.len()), root).get();
    bcast_bytes(comm, CommTag::COLLECTIVE, root, Some(payload), n)
}

/// Every rank learns every rank's value, in rank order.
pub fn allgather_pod<C: Communicator, T: Pod>(comm: &C, tag: CommTag, x: T) -> Vec<T> {
    let width = std::mem::size_of::<T>();
    let gathered = gather_to_root(comm, tag, &wire::encode_one(&x)).map(|all| all.concat());
    let bytes = bcast_bytes(
        comm,
        tag,
        ROOT,
        gathered.as_deref(),
        width * comm.size(),
    );
    wire::decode(&bytes)
}

/// Dense all-to-all: `sends[q]` goes to rank `q`, `recv_lens[q]` bytes come back.
pub fn dense_alltoall<C: Communicator>(
    comm: &C,
    tag: CommTag,
    sends: &[Vec<u8>],
    recv_lens: &[usize],
) -> Vec<Vec<u8>> {
    let n = comm.size();
    let me = comm.rank();
    debug_assert_eq!(sends.len(), n);
    debug_assert_eq!(recv_lens.len(), n);
    let recvs: Vec<_> = (0..n)
        .map(|q| (q != me).then(|| comm.irecv(q, tag, recv_lens[q])))
        .collect();
    let send_handles: Vec<_> = (0..n)
        .filter(|&q| q != me)
        .map(|q| comm.isend(q, tag, &sends[q]))
        .collect();
    let out = recvs
        .into_iter()
        .enumerate()
        .map(|(q, r)| match r {
            Some(r) => r.wait().unwrap_or_default(),
            None => sends[q].clone(),
        })
        .collect();
    send_handles.into_iter().for_each(|s| {
        s.wait();
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::transport::{LocalUniverse, NoComm};

    #[test]
    fn allreduce_and_exscan_on_four_ranks() {
        let out = LocalUniverse::run(4, |comm| {
            let r = comm.rank() as i64 + 1;
            (
                allreduce(&comm, r, ReduceOp::Sum),
                allreduce(&comm, r, ReduceOp::Max),
                exscan(&comm, r, ReduceOp::Sum),
            )
        });
        assert_eq!(out, vec![(10, 4, 0), (10, 4, 1), (10, 4, 3), (10, 4, 6)]);
    }

    #[test]
    fn bcast_var_carries_lengths() {
        let out = LocalUniverse::run(3, |comm| {
            let mine = if comm.rank() == 0 { b"hello".to_vec() } else { Vec::new() };
            bcast_var(&comm, &mine, 0)
        });
        assert!(out.iter().all(|v| v == b"hello"));
    }

    #[test]
    fn dense_alltoall_pairs() {
        let out = LocalUniverse::run(3, |comm| {
            let sends: Vec<Vec<u8>> = (0..3).map(|q| vec![(10 * comm.rank() + q) as u8]).collect();
            dense_alltoall(&comm, CommTag::TOPOLOGY, &sends, &[1, 1, 1])
        });
        for (me, got) in out.iter().enumerate() {
            let want: Vec<Vec<u8>> = (0..3).map(|q| vec![(10 * q + me) as u8]).collect();
            assert_eq!(got, &want);
        }
    }

    #[test]
    fn serial_collectives_are_identity() {
        let c = NoComm::default();
        assert_eq!(allreduce(&c, 2.5f64, ReduceOp::Min), 2.5);
        assert_eq!(exscan(&c, 7i32, ReduceOp::Sum), 0);
        assert_eq!(allgather_pod(&c, CommTag::SPLIT, 3u64), vec![3]);
    }
}
