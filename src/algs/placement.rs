//! Leaf placement: decomposition on the coordinator, leaves materialized on
//! their owners (`owner = leaf id mod ranks`).
//!
//! Coordinator and workers run the same routines; only the [`Role`] differs.
//! Every verdict that can fail the run (dimension mismatch, too few leaves, a
//! failed decomposition) is reached collectively so that all ranks return
//! the same error instead of leaving the others blocked.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::owner_of;
use crate::algs::wire::{u64s_to_bytes, WireCount, WireReader, WireWriter};
use crate::config::DelaunayConfig;
use crate::decomposition::KdDecomposition;
use crate::delaunay_error::DelaunayError;
use crate::geometry::Domain;
use crate::leaf::{GlobalId, Leaf, LeafSet, LeafSnapshot};

/// The rank decomposing the points.
pub const COORDINATOR: usize = 0;

#[derive(Clone, Copy, Debug)]
pub enum Role<'a> {
    /// Holds the input points (flat, `ndim`-strided).
    Coordinator { points: &'a [f64] },
    Worker,
}

impl<'a> Role<'a> {
    /// Coordinator on rank 0, worker elsewhere; `points` is only read on the
    /// coordinator.
    pub fn for_rank(rank: usize, points: &'a [f64]) -> Self {
        if rank == COORDINATOR {
            Role::Coordinator { points }
        } else {
            Role::Worker
        }
    }
}

/// Leaves placed on this rank.
#[derive(Debug)]
pub struct Placement {
    pub leaves: LeafSet,
    pub nleaves: usize,
    /// The full decomposition; only kept by the coordinator.
    pub decomposition: Option<KdDecomposition>,
}

/// Verify that every rank runs with the same dimensionality.
pub fn check_dimension<C>(comm: &C, ndim: usize) -> Result<(), DelaunayError>
where
    C: Communicator + ?Sized,
{
    let mut v = [ndim as u64, u64::MAX - ndim as u64];
    comm.allreduce_max(&mut v)?;
    let (max, min) = (v[0] as usize, (u64::MAX - v[1]) as usize);
    if min != max {
        return Err(DelaunayError::InconsistentDimension { local: ndim, min, max });
    }
    if !(2..=3).contains(&ndim) {
        return Err(DelaunayError::InvalidDimension(ndim));
    }
    Ok(())
}

fn broadcast_u64s<C>(comm: &C, values: &mut [u64]) -> Result<(), DelaunayError>
where
    C: Communicator + ?Sized,
{
    let mut buf = u64s_to_bytes(values);
    comm.broadcast(COORDINATOR, &mut buf)?;
    let mut r = WireReader::new(&buf);
    values.copy_from_slice(&r.u64s(values.len())?);
    r.finish()
}

/// Decompose (coordinator) and distribute the leaves. Leaves are created in
/// increasing id order on every rank.
pub fn place_leaves<C>(
    comm: &C,
    role: Role<'_>,
    domain: &Domain,
    config: &DelaunayConfig,
) -> Result<Placement, DelaunayError>
where
    C: Communicator + ?Sized,
{
    let size = comm.size();
    let decomp = match role {
        Role::Coordinator { points } => Some(KdDecomposition::with_target(
            points,
            domain,
            config.target_leaves(size),
        )),
        Role::Worker => None,
    };

    // [nleaves, decomposition failed]
    let mut status = match &decomp {
        Some(Ok(d)) => [d.num_leaves() as u64, 0],
        Some(Err(_)) => [0, 1],
        None => [0, 0],
    };
    broadcast_u64s(comm, &mut status)?;
    let decomp = match decomp {
        Some(Err(e)) => return Err(e),
        Some(Ok(d)) => Some(d),
        None if status[1] != 0 => {
            return Err(DelaunayError::ProtocolViolation(
                "coordinator failed to decompose the domain".into(),
            ));
        }
        None => None,
    };
    let nleaves = status[0] as usize;
    if nleaves < size {
        return Err(DelaunayError::TooFewLeaves { leaves: nleaves, ranks: size });
    }

    let counts: Vec<u64> = (0..size)
        .map(|r| (0..nleaves).filter(|&i| owner_of(i as u32, size) == r).count() as u64)
        .collect();
    let mine = comm.scatter_u64(COORDINATOR, &counts)? as usize;

    let mut leaves = LeafSet::new();
    match (role, &decomp) {
        (Role::Coordinator { points }, Some(d)) => {
            for spec in &d.leaves {
                let snap = LeafSnapshot::from_spec(spec, d, points, 0);
                let owner = owner_of(spec.id, size);
                if owner == comm.rank() {
                    leaves.push(Leaf::from_snapshot(snap)?)?;
                } else {
                    comm.send_sized(owner, CommTag::PLACEMENT, &snap.encode())?;
                }
            }
            log::info!("placed {nleaves} leaves on {size} ranks");
        }
        _ => {
            for _ in 0..mine {
                let bytes = comm.recv_sized(COORDINATOR, CommTag::PLACEMENT)?;
                leaves.push(Leaf::from_snapshot(LeafSnapshot::decode(&bytes)?)?)?;
            }
        }
    }
    if leaves.len() != mine {
        return Err(DelaunayError::ProtocolViolation(format!(
            "rank {} owns {} leaves, expected {mine}",
            comm.rank(),
            leaves.len()
        )));
    }
    Ok(Placement {
        leaves,
        nleaves,
        decomposition: decomp,
    })
}

fn encode_batch(ids: &[GlobalId], coords: &[f64]) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(4 + 8 * (ids.len() + coords.len()));
    w.put(&WireCount::new(ids.len())).put_u64s(ids).put_f64s(coords);
    w.finish()
}

fn decode_batch(bytes: &[u8], ndim: usize) -> Result<(Vec<GlobalId>, Vec<f64>), DelaunayError> {
    let mut r = WireReader::new(bytes);
    let n = r.get::<WireCount>()?.get();
    let ids = r.u64s(n)?;
    let coords = r.f64s(n * ndim)?;
    r.finish()?;
    Ok((ids, coords))
}

/// Outcome of placing a later batch of points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchPlacement {
    pub inserted: usize,
    pub unplaced: usize,
}

/// Assign a later batch to the existing leaves without re-partitioning.
///
/// The coordinator locates every point, numbers it `id_offset + index` and
/// ships each leaf's share to its owner, which inserts it as owned points.
/// Points outside every leaf are dropped and counted; the counts are
/// broadcast so all ranks report the same numbers.
pub fn place_batch<C>(
    comm: &C,
    role: Role<'_>,
    decomposition: Option<&KdDecomposition>,
    leaves: &mut LeafSet,
    ndim: usize,
    id_offset: GlobalId,
) -> Result<BatchPlacement, DelaunayError>
where
    C: Communicator + ?Sized,
{
    let size = comm.size();
    let mut counts = [0u64; 2];
    match role {
        Role::Coordinator { points } => {
            let d = decomposition.ok_or_else(|| {
                DelaunayError::InvalidConfig("coordinator has no decomposition to place a batch".into())
            })?;
            let mut dist: Vec<Vec<usize>> = vec![Vec::new(); d.num_leaves()];
            let mut unplaced = 0usize;
            for (j, p) in points.chunks_exact(ndim).enumerate() {
                match d.locate(p) {
                    Some(id) if p.iter().all(|x| x.is_finite()) => dist[id as usize].push(j),
                    _ => unplaced += 1,
                }
            }
            for (i, share) in dist.iter().enumerate() {
                let ids: Vec<GlobalId> = share.iter().map(|&j| id_offset + j as GlobalId).collect();
                let coords: Vec<f64> = share
                    .iter()
                    .flat_map(|&j| points[j * ndim..(j + 1) * ndim].iter().copied())
                    .collect();
                let owner = owner_of(i as u32, size);
                if owner == comm.rank() {
                    let leaf = leaves.get_mut(i as u32).ok_or(DelaunayError::UnknownLeaf(i as u32))?;
                    leaf.insert(&coords, &ids)?;
                } else {
                    comm.send_sized(owner, CommTag::INCREMENTAL, &encode_batch(&ids, &coords))?;
                }
            }
            if unplaced > 0 {
                log::warn!("{unplaced} points were not within the bounds of the original decomposition");
            }
            counts = [(points.len() / ndim - unplaced) as u64, unplaced as u64];
        }
        Role::Worker => {
            for leaf in leaves.iter_mut() {
                let bytes = comm.recv_sized(COORDINATOR, CommTag::INCREMENTAL)?;
                let (ids, coords) = decode_batch(&bytes, ndim)?;
                leaf.insert(&coords, &ids)?;
            }
        }
    }
    broadcast_u64s(comm, &mut counts)?;
    Ok(BatchPlacement {
        inserted: counts[0] as usize,
        unplaced: counts[1] as usize,
    })
}
