//! Point-to-point transports underneath [`Comm`](super::Comm).
//!
//! Messages are contiguous byte slices. Sends and receives return waitable
//! handles; a receive is only trusted after `.wait()`. Transports are
//! blocking-on-wait and never report errors: a broken transport panics.
//!
//! * [`LocalComm`]: ranks are threads of one process sharing a mailbox hub.
//! * [`NoComm`]: a single rank that can only talk to itself.
//! * `MpiComm` (feature `mpi-support`): rsmpi.

use super::collectives;
use super::wire::SplitRecord;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Anything that can be waited on.
pub trait Wait {
    /// Block until complete and return the received bytes, if this was a receive.
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Message tag. Each protocol in the crate uses its own tag so unrelated
/// traffic between the same pair of ranks never matches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const COLLECTIVE: CommTag = CommTag(1);
    pub const BARRIER: CommTag = CommTag(2);
    pub const TOPOLOGY: CommTag = CommTag(3);
    pub const SPLIT: CommTag = CommTag(4);
    pub const NEIGHBOR: CommTag = CommTag(42);

    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// Non-blocking point-to-point interface over a process group.
pub trait Communicator: Send + Sync + Sized + 'static {
    type SendHandle: Wait;
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of exactly `len` bytes from `peer`.
    fn irecv(&self, peer: usize, tag: CommTag, len: usize) -> Self::RecvHandle;

    fn barrier(&self) {
        collectives::barrier(self);
    }

    /// Collective: partition the group by `color`, order each part by `key`.
    fn split(&self, color: i32, key: i32) -> Self;

    /// Collective: same group, independent message space.
    fn dup(&self) -> Self;

    /// Whether [`native_neighbor_alltoallv`](Self::native_neighbor_alltoallv)
    /// is implemented.
    fn has_native_neighbor(&self) -> bool {
        false
    }

    /// Transport-level neighborhood exchange. `sends[i]` goes to
    /// `destinations[i]`; the result holds one buffer per entry of `sources`.
    fn native_neighbor_alltoallv(
        &self,
        _sources: &[usize],
        _destinations: &[usize],
        _sends: &[&[u8]],
        _recv_lens: &[usize],
    ) -> Option<Vec<Vec<u8>>> {
        None
    }
}

fn derive_context(parent: u64, seq: u64, salt: i64) -> u64 {
    let mut h = DefaultHasher::new();
    (parent, seq, salt).hash(&mut h);
    h.finish()
}

// --- LocalComm: ranks as threads of one process ---

type MailKey = (u64, usize, usize, u16); // (context, src, dst, tag)

#[derive(Debug, Default)]
struct Hub {
    mail: DashMap<MailKey, VecDeque<Bytes>>,
    gate: Mutex<()>,
    bell: Condvar,
}

impl Hub {
    fn post(&self, key: MailKey, msg: Bytes) {
        self.mail.entry(key).or_default().push_back(msg);
        let _gate = self.gate.lock();
        self.bell.notify_all();
    }

    fn try_take(&self, key: &MailKey) -> Option<Bytes> {
        let msg = self.mail.get_mut(key).and_then(|mut q| q.pop_front())?;
        // Drained queues go so finished contexts leave nothing behind.
        self.mail.remove_if(key, |_, q| q.is_empty());
        Some(msg)
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.mail.len()
    }

    fn take(&self, key: &MailKey) -> Bytes {
        let mut gate = self.gate.lock();
        loop {
            if let Some(msg) = self.try_take(key) {
                return msg;
            }
            self.bell.wait_for(&mut gate, Duration::from_millis(20));
        }
    }
}

/// One rank of an in-process universe.
pub struct LocalComm {
    hub: Arc<Hub>,
    context: u64,
    rank: usize,
    members: Arc<[usize]>,
    spawned: AtomicU64,
}

impl fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalComm")
            .field("context", &self.context)
            .field("rank", &self.rank)
            .field("members", &self.members)
            .finish()
    }
}

impl LocalComm {
    /// World ranks of this group's members, in group-rank order.
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    fn child(&self, salt: i64, rank: usize, members: Arc<[usize]>) -> Self {
        let seq = self.spawned.fetch_add(1, Ordering::Relaxed);
        LocalComm {
            hub: Arc::clone(&self.hub),
            context: derive_context(self.context, seq, salt),
            rank,
            members,
            spawned: AtomicU64::new(0),
        }
    }
}

/// Receive handle of a [`LocalComm`].
#[derive(Debug)]
pub struct LocalRecv {
    hub: Arc<Hub>,
    key: MailKey,
    len: usize,
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        let msg = self.hub.take(&self.key);
        assert_eq!(
            msg.len(),
            self.len,
            "LocalComm: message from rank {} (tag {}) has {} bytes, receiver expected {}",
            self.key.1,
            self.key.3,
            msg.len(),
            self.len
        );
        Some(msg.to_vec())
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) {
        assert!(peer < self.size(), "LocalComm: send to rank {peer} out of range");
        self.hub.post(
            (self.context, self.rank, peer, tag.as_u16()),
            Bytes::copy_from_slice(buf),
        );
    }

    fn irecv(&self, peer: usize, tag: CommTag, len: usize) -> LocalRecv {
        assert!(peer < self.size(), "LocalComm: receive from rank {peer} out of range");
        LocalRecv {
            hub: Arc::clone(&self.hub),
            key: (self.context, peer, self.rank, tag.as_u16()),
            len,
        }
    }

    fn split(&self, color: i32, key: i32) -> Self {
        let records =
            collectives::allgather_pod(self, CommTag::SPLIT, SplitRecord::new(color, key));
        let mut group: Vec<(i32, usize)> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.color() == color)
            .map(|(q, r)| (r.key(), q))
            .collect();
        group.sort_unstable();
        let rank = group
            .iter()
            .position(|&(_, q)| q == self.rank)
            .expect("split: calling rank is missing from its own color group");
        let members: Arc<[usize]> = group.iter().map(|&(_, q)| self.members[q]).collect();
        self.child(i64::from(color), rank, members)
    }

    fn dup(&self) -> Self {
        self.child(i64::MIN, self.rank, Arc::clone(&self.members))
    }

    fn has_native_neighbor(&self) -> bool {
        true
    }

    fn native_neighbor_alltoallv(
        &self,
        sources: &[usize],
        destinations: &[usize],
        sends: &[&[u8]],
        recv_lens: &[usize],
    ) -> Option<Vec<Vec<u8>>> {
        // Sends are buffered by the hub, so no ordering constraint is needed.
        for (&dst, buf) in destinations.iter().zip(sends) {
            self.isend(dst, CommTag::NEIGHBOR, buf);
        }
        Some(
            sources
                .iter()
                .zip(recv_lens)
                .map(|(&src, &len)| {
                    self.irecv(src, CommTag::NEIGHBOR, len)
                        .wait()
                        .unwrap_or_default()
                })
                .collect(),
        )
    }
}

/// Factory for the ranks of an in-process universe.
#[derive(Debug)]
pub struct LocalUniverse {
    comms: Vec<LocalComm>,
}

impl LocalUniverse {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "LocalUniverse needs at least one rank");
        let hub = Arc::new(Hub::default());
        let members: Arc<[usize]> = (0..size).collect();
        let comms = (0..size)
            .map(|rank| LocalComm {
                hub: Arc::clone(&hub),
                context: 0,
                rank,
                members: Arc::clone(&members),
                spawned: AtomicU64::new(0),
            })
            .collect();
        Self { comms }
    }

    pub fn into_comms(self) -> Vec<LocalComm> {
        self.comms
    }

    /// Run `f` once per rank, each on its own thread; results in rank order.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(LocalComm) -> R + Sync,
    {
        let comms = Self::new(size).into_comms();
        let f = &f;
        std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| s.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
    }
}

// --- NoComm: a single rank ---

/// Single-rank transport for serial runs. Self-messages are looped back.
#[derive(Clone, Debug, Default)]
pub struct NoComm {
    loopback: Arc<Mutex<HashMap<u16, VecDeque<Bytes>>>>,
}

/// Receive handle of a [`NoComm`].
#[derive(Debug)]
pub struct LoopbackRecv {
    loopback: Arc<Mutex<HashMap<u16, VecDeque<Bytes>>>>,
    tag: u16,
    len: usize,
}

impl Wait for LoopbackRecv {
    fn wait(self) -> Option<Vec<u8>> {
        let msg = self
            .loopback
            .lock()
            .get_mut(&self.tag)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| panic!("NoComm: receive on tag {} has no matching send", self.tag));
        assert_eq!(msg.len(), self.len, "NoComm: loopback size mismatch");
        Some(msg.to_vec())
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = LoopbackRecv;

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) {
        assert_eq!(peer, 0, "NoComm has a single rank");
        self.loopback
            .lock()
            .entry(tag.as_u16())
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: CommTag, len: usize) -> LoopbackRecv {
        assert_eq!(peer, 0, "NoComm has a single rank");
        LoopbackRecv {
            loopback: Arc::clone(&self.loopback),
            tag: tag.as_u16(),
            len,
        }
    }

    fn barrier(&self) {}

    fn split(&self, _color: i32, _key: i32) -> Self {
        NoComm::default()
    }

    fn dup(&self) -> Self {
        NoComm::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let out = LocalUniverse::run(2, |comm| {
            let peer = 1 - comm.rank();
            let r = comm.irecv(peer, CommTag(7), 4);
            comm.isend(peer, CommTag(7), &[comm.rank() as u8; 4]).wait();
            r.wait().expect("receive yields data")
        });
        assert_eq!(out[0], vec![1u8; 4]);
        assert_eq!(out[1], vec![0u8; 4]);
    }

    #[test]
    fn local_messages_are_fifo_per_tag() {
        let comms = LocalUniverse::new(2).into_comms();
        comms[0].isend(1, CommTag(3), &[1]);
        comms[0].isend(1, CommTag(3), &[2]);
        comms[0].isend(1, CommTag(4), &[9]);
        assert_eq!(comms[1].irecv(0, CommTag(4), 1).wait(), Some(vec![9]));
        assert_eq!(comms[1].irecv(0, CommTag(3), 1).wait(), Some(vec![1]));
        assert_eq!(comms[1].irecv(0, CommTag(3), 1).wait(), Some(vec![2]));
    }

    #[test]
    fn dup_isolates_traffic() {
        let out = LocalUniverse::run(2, |comm| {
            let twin = comm.dup();
            let peer = 1 - comm.rank();
            twin.isend(peer, CommTag(5), &[10]);
            comm.isend(peer, CommTag(5), &[20]);
            let a = comm.irecv(peer, CommTag(5), 1).wait();
            let b = twin.irecv(peer, CommTag(5), 1).wait();
            (a, b)
        });
        for (a, b) in out {
            assert_eq!(a, Some(vec![20]));
            assert_eq!(b, Some(vec![10]));
        }
    }

    #[test]
    fn drained_mailboxes_are_dropped() {
        let comms = LocalUniverse::new(2).into_comms();
        let hub = Arc::clone(&comms[0].hub);
        std::thread::scope(|s| {
            for comm in &comms {
                s.spawn(move || {
                    let peer = 1 - comm.rank();
                    for round in 0..8u8 {
                        let ctx = comm.dup();
                        ctx.isend(peer, CommTag(6), &[round]);
                        assert_eq!(ctx.irecv(peer, CommTag(6), 1).wait(), Some(vec![round]));
                        ctx.barrier();
                    }
                });
            }
        });
        assert_eq!(hub.pending(), 0);
    }

    #[test]
    fn nocomm_loops_back() {
        let c = NoComm::default();
        let r = c.irecv(0, CommTag(1), 3);
        c.isend(0, CommTag(1), &[1, 2, 3]);
        assert_eq!(r.wait(), Some(vec![1, 2, 3]));
        assert_eq!((c.rank(), c.size()), (0, 1));
    }
}
