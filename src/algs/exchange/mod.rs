//! Boundary exchange: the collective fixed-point iteration.
//!
//! One round is
//! 1. every owned leaf computes its outgoing batches from its pre-round state,
//! 2. headers then payloads are exchanged ([`size_exchange`], [`data_exchange`]),
//! 3. received batches are absorbed by their destination leaves,
//! 4. the absorbed counts are summed over all ranks.
//!
//! The iteration stops once a round absorbs nothing anywhere.

pub mod batch;
pub mod data_exchange;
pub mod size_exchange;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algs::communicator::Communicator;
use crate::config::DelaunayConfig;
use crate::debug_invariants::DebugInvariants;
use crate::delaunay_error::DelaunayError;
use crate::leaf::{Leaf, LeafId, LeafSet, OutgoingBatch};

pub use batch::{owner_of, IncomingBatch};

/// One batch sent by a leaf of this rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub src: LeafId,
    pub dst: LeafId,
    pub npts: usize,
    pub nneigh: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: usize,
    /// Batches with points sent by this rank's leaves.
    pub batches: Vec<BatchSummary>,
    pub local_absorbed: u64,
    pub global_absorbed: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeReport {
    pub rounds: Vec<RoundReport>,
}

impl ExchangeReport {
    /// Rounds run, including the final one that absorbed nothing.
    pub fn num_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Global absorbed count per round.
    pub fn absorbed_per_round(&self) -> Vec<u64> {
        self.rounds.iter().map(|r| r.global_absorbed).collect()
    }

    pub fn total_absorbed(&self) -> u64 {
        self.rounds.iter().map(|r| r.global_absorbed).sum()
    }
}

fn outgoing_all(leaves: &mut LeafSet) -> Result<Vec<OutgoingBatch>, DelaunayError> {
    #[cfg(feature = "rayon")]
    let per_leaf: Vec<Result<Vec<OutgoingBatch>, DelaunayError>> =
        leaves.as_mut_slice().par_iter_mut().map(Leaf::outgoing).collect();
    #[cfg(not(feature = "rayon"))]
    let per_leaf: Vec<Result<Vec<OutgoingBatch>, DelaunayError>> =
        leaves.as_mut_slice().iter_mut().map(Leaf::outgoing).collect();

    let mut out = Vec::new();
    for r in per_leaf {
        out.extend(r?);
    }
    Ok(out)
}

/// Run one collective round over the leaves owned by this rank.
pub fn exchange_round<C>(
    comm: &C,
    leaves: &mut LeafSet,
    ndim: usize,
    round: usize,
) -> Result<RoundReport, DelaunayError>
where
    C: Communicator + ?Sized,
{
    let outgoing = outgoing_all(leaves)?;
    let batches: Vec<BatchSummary> = outgoing
        .iter()
        .filter(|b| b.npts() > 0)
        .map(|b| BatchSummary {
            src: b.src,
            dst: b.dst,
            npts: b.npts(),
            nneigh: b.neighbors.len(),
        })
        .collect();

    let payloads = batch::route(&outgoing, comm.size());
    drop(outgoing);
    let headers = size_exchange::exchange_headers(comm, &payloads)?;
    let incoming = data_exchange::exchange_payloads(comm, payloads, &headers, ndim)?;

    let mut local = 0u64;
    for b in &incoming {
        let slot = leaves.slot(b.dst)?;
        let leaf = &mut leaves.as_mut_slice()[slot];
        local += leaf.absorb(b.src, &b.ids, &b.coords, &b.neighbors)? as u64;
    }

    let mut total = [local];
    comm.allreduce_sum(&mut total)?;
    log::debug!(
        "exchange round {round} on rank {}: sent {} batches, absorbed {local} locally, {} globally",
        comm.rank(),
        batches.len(),
        total[0]
    );
    Ok(RoundReport {
        round,
        batches,
        local_absorbed: local,
        global_absorbed: total[0],
    })
}

/// Iterate rounds until a round absorbs no point on any rank.
///
/// With `config.max_exchange_rounds = Some(n)`, a run still absorbing in
/// round `n` fails with [`DelaunayError::NotConverged`] on every rank.
pub fn run_exchange<C>(
    comm: &C,
    leaves: &mut LeafSet,
    ndim: usize,
    config: &DelaunayConfig,
) -> Result<ExchangeReport, DelaunayError>
where
    C: Communicator + ?Sized,
{
    let mut report = ExchangeReport::default();
    loop {
        let round = report.rounds.len() + 1;
        let r = exchange_round(comm, leaves, ndim, round)?;
        let done = r.global_absorbed == 0;
        report.rounds.push(r);

        for leaf in leaves.iter() {
            leaf.debug_assert_invariants();
        }
        if config.check_invariants {
            leaves.validate_all()?;
        }

        if done {
            log::info!(
                "exchange converged after {round} rounds ({} points absorbed)",
                report.total_absorbed()
            );
            return Ok(report);
        }
        if config.max_exchange_rounds.is_some_and(|max| round >= max) {
            return Err(DelaunayError::NotConverged { rounds: round });
        }
    }
}
