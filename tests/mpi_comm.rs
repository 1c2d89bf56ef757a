#![cfg(feature = "mpi-support")]

use mesh_adapt::comm::{Comm, MpiComm, ReduceOp};

// MPI can be initialized once per process, so this binary holds one test.
#[test]
fn split_outlives_the_world_communicator() {
    let Some(world) = MpiComm::init() else {
        return;
    };
    let world = Comm::new(world);
    let size = world.size() as i64;
    let sub = world.split(0, world.rank() as i32);
    let dup = sub.dup();
    // the children now hold the last handles on the MPI environment
    drop(world);
    assert_eq!(sub.allreduce(1i64, ReduceOp::Sum), size);
    drop(sub);
    assert_eq!(dup.allreduce(1i64, ReduceOp::Sum), size);
}
