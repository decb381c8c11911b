//! Thin facade over in-process (thread) or inter-process (MPI) message passing.
//!
//! Messages are contiguous byte slices. Handles are waitable; nothing may
//! trust a received buffer before `.wait()` returns it.
//!
//! Every collective the exchange protocol needs has a default implementation
//! built on `isend`/`irecv`, so a backend only has to provide point-to-point
//! transport. [`MpiComm`] overrides the collectives with the native ones.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::algs::wire::{u64s_to_bytes, WireReader};
use crate::delaunay_error::DelaunayError;

/// Typed message tag. Protocol tags stay below `0x7000`; the default
/// collectives use the `0x71xx` block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    pub const PLACEMENT: CommTag = CommTag(0x1000);
    pub const INCREMENTAL: CommTag = CommTag(0x1100);
    pub const EXCHANGE_HDR: CommTag = CommTag(0x2000);
    pub const EXCHANGE_DATA: CommTag = CommTag(0x2100);
    pub const CONSOLIDATE: CommTag = CommTag(0x3000);

    const BARRIER: CommTag = CommTag(0x7100);
    const BCAST: CommTag = CommTag(0x7110);
    const SCATTER: CommTag = CommTag(0x7120);
    const REDUCE: CommTag = CommTag(0x7130);
    const ALLTOALL: CommTag = CommTag(0x7140);
    const ALLTOALLV: CommTag = CommTag(0x7150);

    pub const fn new(tag: u16) -> Self {
        CommTag(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `k` slots after this one.
    #[inline]
    pub const fn offset(self, k: u16) -> Self {
        CommTag(self.0 + k)
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Non-blocking point-to-point messaging plus the collectives built on it.
///
/// All ranks must call every collective in the same order.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of `buf.len()` bytes; the data comes back from `wait`.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn is_no_comm(&self) -> bool {
        false
    }

    fn barrier(&self) -> Result<(), DelaunayError> {
        let tag = CommTag::BARRIER;
        if self.rank() == 0 {
            let peers: Vec<usize> = (1..self.size()).collect();
            let arrive: Vec<(usize, usize)> = peers.iter().map(|&p| (p, 1)).collect();
            exchange_p2p(self, &[], &arrive, tag)?;
            let release: Vec<(usize, Vec<u8>)> = peers.iter().map(|&p| (p, vec![1])).collect();
            exchange_p2p(self, &release, &[], tag.offset(1)).map(drop)
        } else {
            exchange_p2p(self, &[(0, vec![1])], &[], tag)?;
            exchange_p2p(self, &[], &[(0, 1)], tag.offset(1)).map(drop)
        }
    }

    /// Copy `root`'s `buf` into every other rank's `buf`. Lengths must agree.
    fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<(), DelaunayError> {
        let tag = CommTag::BCAST;
        if self.rank() == root {
            let sends: Vec<(usize, Vec<u8>)> = (0..self.size())
                .filter(|&r| r != root)
                .map(|r| (r, buf.to_vec()))
                .collect();
            exchange_p2p(self, &sends, &[], tag).map(drop)
        } else {
            let mut got = exchange_p2p(self, &[], &[(root, buf.len())], tag)?;
            let (_, data) = got.pop().ok_or_else(|| DelaunayError::comm(root, "broadcast lost"))?;
            buf.copy_from_slice(&data);
            Ok(())
        }
    }

    /// Rank `r` receives `values[r]` from `root`; `values` is only read on
    /// the root.
    fn scatter_u64(&self, root: usize, values: &[u64]) -> Result<u64, DelaunayError> {
        let tag = CommTag::SCATTER;
        if self.rank() == root {
            if values.len() != self.size() {
                return Err(DelaunayError::ProtocolViolation(format!(
                    "scatter of {} values over {} ranks",
                    values.len(),
                    self.size()
                )));
            }
            let sends: Vec<(usize, Vec<u8>)> = (0..self.size())
                .filter(|&r| r != root)
                .map(|r| (r, u64s_to_bytes(&values[r..=r])))
                .collect();
            exchange_p2p(self, &sends, &[], tag)?;
            Ok(values[root])
        } else {
            let got = exchange_p2p(self, &[], &[(root, 8)], tag)?;
            decode_u64s(root, &got[0].1, 1).map(|v| v[0])
        }
    }

    fn allreduce_sum(&self, values: &mut [u64]) -> Result<(), DelaunayError> {
        allreduce_with(self, values, u64::wrapping_add)
    }

    fn allreduce_max(&self, values: &mut [u64]) -> Result<(), DelaunayError> {
        allreduce_with(self, values, u64::max)
    }

    /// Send `counts[r]` to rank `r`; returns the value received from each rank.
    fn all_to_all_counts(&self, counts: &[u64]) -> Result<Vec<u64>, DelaunayError> {
        let (me, size) = (self.rank(), self.size());
        if counts.len() != size {
            return Err(DelaunayError::ProtocolViolation(format!(
                "all-to-all of {} counts over {size} ranks",
                counts.len()
            )));
        }
        let sends: Vec<(usize, Vec<u8>)> = (0..size)
            .filter(|&r| r != me)
            .map(|r| (r, u64s_to_bytes(&counts[r..=r])))
            .collect();
        let recvs: Vec<(usize, usize)> = (0..size).filter(|&r| r != me).map(|r| (r, 8)).collect();
        let got = exchange_p2p(self, &sends, &recvs, CommTag::ALLTOALL)?;
        let mut out = vec![0u64; size];
        out[me] = counts[me];
        for (peer, data) in got {
            out[peer] = decode_u64s(peer, &data, 1)?[0];
        }
        Ok(out)
    }

    /// Personalized all-to-all of byte buffers: `send[r]` goes to rank `r`,
    /// and exactly `recv_sizes[r]` bytes are expected from rank `r`.
    fn all_to_all_v(&self, send: &[Vec<u8>], recv_sizes: &[usize]) -> Result<Vec<Vec<u8>>, DelaunayError> {
        let (me, size) = (self.rank(), self.size());
        if send.len() != size || recv_sizes.len() != size {
            return Err(DelaunayError::ProtocolViolation(format!(
                "all-to-all-v with {} send and {} receive slots over {size} ranks",
                send.len(),
                recv_sizes.len()
            )));
        }
        expect_size(me, send[me].len(), recv_sizes[me])?;
        let sends: Vec<(usize, Vec<u8>)> = (0..size)
            .filter(|&r| r != me && !send[r].is_empty())
            .map(|r| (r, send[r].clone()))
            .collect();
        let recvs: Vec<(usize, usize)> = (0..size)
            .filter(|&r| r != me && recv_sizes[r] > 0)
            .map(|r| (r, recv_sizes[r]))
            .collect();
        let got = exchange_p2p(self, &sends, &recvs, CommTag::ALLTOALLV)?;
        let mut out = vec![Vec::new(); size];
        out[me] = send[me].clone();
        for (peer, data) in got {
            out[peer] = data;
        }
        Ok(out)
    }

    /// Send a variable-length message: its `u64` length on `tag`, then the
    /// bytes on `tag + 1`.
    fn send_sized(&self, peer: usize, tag: CommTag, data: &[u8]) -> Result<(), DelaunayError> {
        let len = u64s_to_bytes(&[data.len() as u64]);
        exchange_p2p(self, &[(peer, len)], &[], tag)?;
        exchange_p2p(self, &[(peer, data.to_vec())], &[], tag.offset(1)).map(drop)
    }

    /// Receive a message sent with [`Communicator::send_sized`].
    fn recv_sized(&self, peer: usize, tag: CommTag) -> Result<Vec<u8>, DelaunayError> {
        let got = exchange_p2p(self, &[], &[(peer, 8)], tag)?;
        let len = decode_u64s(peer, &got[0].1, 1)?[0] as usize;
        let mut got = exchange_p2p(self, &[], &[(peer, len)], tag.offset(1))?;
        Ok(got.pop().map(|(_, d)| d).unwrap_or_default())
    }
}

/// Post every receive, then every send, wait for all receives and drain all
/// sends before returning. The first failure is reported only after every
/// handle has completed.
///
/// Zero-length messages are never put on the wire, on either side. Returns
/// `(peer, bytes)` in the order of `recvs`.
pub fn exchange_p2p<C>(
    comm: &C,
    sends: &[(usize, Vec<u8>)],
    recvs: &[(usize, usize)],
    tag: CommTag,
) -> Result<Vec<(usize, Vec<u8>)>, DelaunayError>
where
    C: Communicator + ?Sized,
{
    // 1) post all receives (buffers stay alive until their handle is waited on)
    let mut bufs: Vec<Vec<u8>> = recvs.iter().map(|&(_, n)| vec![0u8; n]).collect();
    let mut pending_recvs = Vec::with_capacity(recvs.len());
    for (&(peer, n), buf) in recvs.iter().zip(bufs.iter_mut()) {
        if n == 0 {
            pending_recvs.push(None);
        } else {
            pending_recvs.push(Some(comm.irecv(peer, tag.as_u16(), buf)));
        }
    }

    // 2) post all sends
    let mut pending_sends = Vec::with_capacity(sends.len());
    for (peer, data) in sends.iter().filter(|(_, d)| !d.is_empty()) {
        pending_sends.push(comm.isend(*peer, tag.as_u16(), data));
    }

    // 3) wait for all receives, but keep draining after the first error
    let mut out = Vec::with_capacity(recvs.len());
    let mut maybe_err = None;
    for (&(peer, n), h) in recvs.iter().zip(pending_recvs) {
        let Some(h) = h else {
            out.push((peer, Vec::new()));
            continue;
        };
        match h.wait() {
            Some(data) if data.len() == n => out.push((peer, data)),
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(DelaunayError::comm(
                    peer,
                    format!("expected {n} bytes on tag {:#x}, got {}", tag.as_u16(), data.len()),
                ));
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(DelaunayError::comm(
                    peer,
                    format!("receive on tag {:#x} did not complete", tag.as_u16()),
                ));
            }
            _ => {}
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }
    drop(bufs);

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

fn allreduce_with<C>(comm: &C, values: &mut [u64], op: fn(u64, u64) -> u64) -> Result<(), DelaunayError>
where
    C: Communicator + ?Sized,
{
    let tag = CommTag::REDUCE;
    let n = values.len();
    if comm.rank() == 0 {
        let recvs: Vec<(usize, usize)> = (1..comm.size()).map(|r| (r, 8 * n)).collect();
        for (peer, data) in exchange_p2p(comm, &[], &recvs, tag)? {
            for (v, x) in values.iter_mut().zip(decode_u64s(peer, &data, n)?) {
                *v = op(*v, x);
            }
        }
    } else {
        exchange_p2p(comm, &[(0, u64s_to_bytes(values))], &[], tag)?;
    }
    let mut buf = u64s_to_bytes(values);
    comm.broadcast(0, &mut buf)?;
    values.copy_from_slice(&decode_u64s(0, &buf, n)?);
    Ok(())
}

fn decode_u64s(peer: usize, data: &[u8], n: usize) -> Result<Vec<u64>, DelaunayError> {
    let mut r = WireReader::new(data);
    let v = r.u64s(n).map_err(|e| DelaunayError::comm(peer, e.to_string()))?;
    r.finish().map_err(|e| DelaunayError::comm(peer, e.to_string()))?;
    Ok(v)
}

fn expect_size(peer: usize, actual: usize, expected: usize) -> Result<(), DelaunayError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DelaunayError::ProtocolViolation(format!(
            "rank {peer}: expected {expected} bytes, buffer holds {actual}"
        )))
    }
}

/// Single-process communicator: rank 0 of 1. Every collective degenerates
/// to a local copy.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn is_no_comm(&self) -> bool {
        true
    }
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

static MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(DashMap::new()));

/// How long a receive waits for its message before giving up.
const RECV_TIMEOUT: Duration = Duration::from_secs(60);

/// Pending receive on a [`RayonComm`] mailbox.
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    len: usize,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let start = Instant::now();
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    let n = bytes.len().min(self.len);
                    return Some(bytes[..n].to_vec());
                }
            }
            if start.elapsed() > RECV_TIMEOUT {
                log::error!("receive {:?} timed out after {:?}", self.key, RECV_TIMEOUT);
                return None;
            }
            std::thread::yield_now();
        }
    }
}

/// Ranks simulated by threads of one process, exchanging through a shared
/// mailbox. Messages between a pair of ranks on one tag are delivered in
/// send order.
#[derive(Clone)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl std::fmt::Debug for RayonComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayonComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl RayonComm {
    /// Rank `rank` of `size` on the process-wide mailbox.
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            mailbox: Arc::clone(&MAILBOX),
        }
    }

    /// `size` communicators sharing a private mailbox, one per thread.
    pub fn group(size: usize) -> Vec<Self> {
        let mailbox: Arc<Mailbox> = Arc::new(DashMap::new());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::collective::SystemOperation;
    use mpi::datatype::{Partition, PartitionMut};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{
        Communicator as _, CommunicatorCollectives as _, Destination as _, Root as _, Source as _,
    };
    use mpi::Count;

    /// World communicator of an MPI run.
    ///
    /// Point-to-point sends complete eagerly and receives complete inside
    /// `wait`, so they may only be used in root-driven patterns. The
    /// collectives map onto their native MPI counterparts.
    pub struct MpiComm {
        _universe: mpi::environment::Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, DelaunayError> {
            let universe = mpi::initialize().ok_or(DelaunayError::MpiUnavailable)?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    /// Deferred blocking receive on the world communicator.
    pub struct MpiRecv {
        peer: usize,
        tag: u16,
    }

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            let (data, _status) = SimpleCommunicator::world()
                .process_at_rank(self.peer as i32)
                .receive_vec_with_tag::<u8>(i32::from(self.tag));
            Some(data)
        }
    }

    fn counts_and_displs(sizes: impl Iterator<Item = usize>) -> (Vec<Count>, Vec<Count>) {
        let counts: Vec<Count> = sizes.map(|n| n as Count).collect();
        let displs = counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect();
        (counts, displs)
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiRecv;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, i32::from(tag));
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {
            MpiRecv { peer, tag }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) -> Result<(), DelaunayError> {
            self.world.barrier();
            Ok(())
        }

        fn broadcast(&self, root: usize, buf: &mut [u8]) -> Result<(), DelaunayError> {
            self.world.process_at_rank(root as i32).broadcast_into(buf);
            Ok(())
        }

        fn scatter_u64(&self, root: usize, values: &[u64]) -> Result<u64, DelaunayError> {
            let mut out = [0u64; 1];
            let root_proc = self.world.process_at_rank(root as i32);
            if self.rank == root {
                if values.len() != self.size {
                    return Err(DelaunayError::ProtocolViolation(format!(
                        "scatter of {} values over {} ranks",
                        values.len(),
                        self.size
                    )));
                }
                root_proc.scatter_into_root(values, &mut out[..]);
            } else {
                root_proc.scatter_into(&mut out[..]);
            }
            Ok(out[0])
        }

        fn allreduce_sum(&self, values: &mut [u64]) -> Result<(), DelaunayError> {
            let send = values.to_vec();
            self.world.all_reduce_into(&send[..], values, SystemOperation::sum());
            Ok(())
        }

        fn allreduce_max(&self, values: &mut [u64]) -> Result<(), DelaunayError> {
            let send = values.to_vec();
            self.world.all_reduce_into(&send[..], values, SystemOperation::max());
            Ok(())
        }

        fn all_to_all_counts(&self, counts: &[u64]) -> Result<Vec<u64>, DelaunayError> {
            let mut out = vec![0u64; self.size];
            self.world.all_to_all_into(counts, &mut out[..]);
            Ok(out)
        }

        fn all_to_all_v(&self, send: &[Vec<u8>], recv_sizes: &[usize]) -> Result<Vec<Vec<u8>>, DelaunayError> {
            let flat: Vec<u8> = send.concat();
            let (scounts, sdispls) = counts_and_displs(send.iter().map(Vec::len));
            let (rcounts, rdispls) = counts_and_displs(recv_sizes.iter().copied());
            let mut recv = vec![0u8; recv_sizes.iter().sum()];
            {
                let sp = Partition::new(&flat[..], scounts, sdispls);
                let mut rp = PartitionMut::new(&mut recv[..], rcounts, &rdispls[..]);
                self.world.all_to_all_varcount_into(&sp, &mut rp);
            }
            Ok(recv_sizes
                .iter()
                .zip(&rdispls)
                .map(|(&n, &d)| recv[d as usize..d as usize + n].to_vec())
                .collect())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
