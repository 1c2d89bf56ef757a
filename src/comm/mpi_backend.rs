//! MPI transport (feature `mpi-support`).
//!
//! Buffers handed to MPI must outlive the request, so each immediate
//! operation owns a leaked heap copy that is reclaimed in `wait`.

use super::transport::{CommTag, Communicator, Wait};
use mpi::environment::Universe;
use mpi::request::{Request, StaticScope};
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::*;
use std::sync::Arc;

pub struct MpiComm {
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
    // Fields drop in declaration order: `world` must be freed before the
    // last universe handle finalizes MPI.
    universe: Arc<Universe>,
}

// SAFETY: the crate drives each communicator from a single thread of control
// per process; MPI must be initialized with at least MPI_THREAD_SERIALIZED if
// handles cross threads.
unsafe impl Send for MpiComm {}
unsafe impl Sync for MpiComm {}

impl std::fmt::Debug for MpiComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpiComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl MpiComm {
    /// Initialize MPI and wrap `MPI_COMM_WORLD`. `None` if MPI was already
    /// initialized.
    pub fn init() -> Option<Self> {
        let universe = Arc::new(mpi::initialize()?);
        let world = universe.world();
        Some(Self::wrap(universe, world))
    }

    fn wrap(universe: Arc<Universe>, world: SimpleCommunicator) -> Self {
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Self {
            world,
            rank,
            size,
            universe,
        }
    }
}

pub struct MpiSend {
    req: Request<'static, [u8], StaticScope>,
    buf: *mut [u8],
}

impl Wait for MpiSend {
    fn wait(self) -> Option<Vec<u8>> {
        self.req.wait();
        // SAFETY: `buf` came from Box::leak in `isend` and the request that
        // borrowed it has completed.
        drop(unsafe { Box::from_raw(self.buf) });
        None
    }
}

pub struct MpiRecv {
    req: Request<'static, [u8], StaticScope>,
    buf: *mut [u8],
}

impl Wait for MpiRecv {
    fn wait(self) -> Option<Vec<u8>> {
        self.req.wait();
        // SAFETY: as for MpiSend; the receive into `buf` has completed.
        let data = unsafe { Box::from_raw(self.buf) };
        Some(data.into_vec())
    }
}

impl Communicator for MpiComm {
    type SendHandle = MpiSend;
    type RecvHandle = MpiRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) -> MpiSend {
        let data: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
        let ptr: *mut [u8] = data;
        // SAFETY: `ptr` stays valid until the handle is waited on.
        let view: &'static [u8] = unsafe { &*ptr };
        let req = self.world.process_at_rank(peer as i32).immediate_send_with_tag(
            StaticScope,
            view,
            i32::from(tag.as_u16()),
        );
        MpiSend { req, buf: ptr }
    }

    fn irecv(&self, peer: usize, tag: CommTag, len: usize) -> MpiRecv {
        let data: &'static mut [u8] = Box::leak(vec![0u8; len].into_boxed_slice());
        let ptr: *mut [u8] = data;
        // SAFETY: `ptr` stays valid until the handle is waited on.
        let view: &'static mut [u8] = unsafe { &mut *ptr };
        let req = self
            .world
            .process_at_rank(peer as i32)
            .immediate_receive_into_with_tag(StaticScope, view, i32::from(tag.as_u16()));
        MpiRecv { req, buf: ptr }
    }

    fn barrier(&self) {
        self.world.barrier();
    }

    /// `color` must be non-negative.
    fn split(&self, color: i32, key: i32) -> Self {
        let sub = self
            .world
            .split_by_color_with_key(Color::with_value(color), key)
            .expect("MPI split: calling rank received no communicator");
        Self::wrap(Arc::clone(&self.universe), sub)
    }

    fn dup(&self) -> Self {
        Self::wrap(Arc::clone(&self.universe), self.world.duplicate())
    }
}
