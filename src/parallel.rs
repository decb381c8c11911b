//! `ParallelDelaunay`: the distributed pipeline behind one handle.
//!
//! Every method is collective: all ranks of the communicator must call it, in
//! the same order, with the same configuration. Input points are only read
//! on the coordinator.

use crate::algs::communicator::Communicator;
use crate::algs::consolidate::{ConsolidatedTriangulation, consolidate};
use crate::algs::exchange::{ExchangeReport, run_exchange};
use crate::algs::placement::{COORDINATOR, Role, check_dimension, place_batch, place_leaves};
use crate::config::DelaunayConfig;
use crate::decomposition::KdDecomposition;
use crate::delaunay_error::DelaunayError;
use crate::geometry::Domain;
use crate::leaf::{GlobalId, LeafSet};

/// Outcome of one [`ParallelDelaunay::insert`] call, identical on every rank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: usize,
    /// Points outside every leaf of the original decomposition; dropped.
    pub unplaced: usize,
}

pub struct ParallelDelaunay<'c, C: Communicator + ?Sized> {
    comm: &'c C,
    domain: Domain,
    config: DelaunayConfig,
    leaves: LeafSet,
    nleaves: usize,
    decomposition: Option<KdDecomposition>,
    npts: GlobalId,
    placed: bool,
}

impl<'c, C> ParallelDelaunay<'c, C>
where
    C: Communicator + ?Sized,
{
    /// Check the configuration locally and the dimension across ranks.
    pub fn new(comm: &'c C, domain: Domain, config: DelaunayConfig) -> Result<Self, DelaunayError> {
        config.validate()?;
        check_dimension(comm, domain.ndim())?;
        Ok(Self {
            comm,
            domain,
            config,
            leaves: LeafSet::new(),
            nleaves: 0,
            decomposition: None,
            npts: 0,
            placed: false,
        })
    }

    pub fn ndim(&self) -> usize {
        self.domain.ndim()
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn config(&self) -> &DelaunayConfig {
        &self.config
    }

    /// Leaves owned by this rank.
    pub fn leaves(&self) -> &LeafSet {
        &self.leaves
    }

    /// Leaves of the whole decomposition; zero before the first insert.
    pub fn num_leaves(&self) -> usize {
        self.nleaves
    }

    /// Global ids handed out so far: every point of every batch, including
    /// the unplaced ones.
    pub fn num_points(&self) -> u64 {
        self.npts
    }

    /// Insert a batch of points (flat, `ndim`-strided, read on the
    /// coordinator only).
    ///
    /// The first batch is decomposed, placed and triangulated leaf by leaf.
    /// Later batches are routed into the existing leaves, numbered after all
    /// earlier points, and every leaf relists its known neighbors so that the
    /// next [`exchange`](Self::exchange) reaches them again.
    pub fn insert(&mut self, points: &[f64]) -> Result<InsertReport, DelaunayError> {
        let ndim = self.ndim();
        let rank = self.comm.rank();
        let mut bad = [u64::from(rank == COORDINATOR && points.len() % ndim != 0)];
        self.comm.allreduce_max(&mut bad)?;
        if bad[0] != 0 {
            return Err(DelaunayError::InvalidConfig(format!(
                "coordinate array is not a multiple of dimension {ndim}"
            )));
        }
        let role = Role::for_rank(rank, points);

        let report = if self.placed {
            let placed = place_batch(
                self.comm,
                role,
                self.decomposition.as_ref(),
                &mut self.leaves,
                ndim,
                self.npts,
            )?;
            for leaf in self.leaves.iter_mut() {
                leaf.reopen();
            }
            InsertReport {
                inserted: placed.inserted,
                unplaced: placed.unplaced,
            }
        } else {
            let placement = place_leaves(self.comm, role, &self.domain, &self.config)?;
            self.leaves = placement.leaves;
            self.nleaves = placement.nleaves;
            self.decomposition = placement.decomposition;
            for leaf in self.leaves.iter_mut() {
                leaf.init_triangulation()?;
            }
            self.placed = true;
            let mut owned = [self.leaves.iter().map(|l| l.npts_orig() as u64).sum::<u64>()];
            self.comm.allreduce_sum(&mut owned)?;
            InsertReport {
                inserted: owned[0] as usize,
                unplaced: 0,
            }
        };
        // ids are handed out over the whole batch, so unplaced points use one too
        self.npts += (report.inserted + report.unplaced) as GlobalId;
        log::debug!(
            "rank {rank}: inserted {} points ({} unplaced), {} in total",
            report.inserted,
            report.unplaced,
            self.npts
        );
        Ok(report)
    }

    fn ensure_placed(&self) -> Result<(), DelaunayError> {
        if self.placed {
            Ok(())
        } else {
            Err(DelaunayError::InvalidConfig("no points have been inserted yet".into()))
        }
    }

    /// Run exchange rounds until no rank absorbs a point.
    pub fn exchange(&mut self) -> Result<ExchangeReport, DelaunayError> {
        self.ensure_placed()?;
        let ndim = self.ndim();
        run_exchange(self.comm, &mut self.leaves, ndim, &self.config)
    }

    /// Sum of the local cell counts over every leaf of every rank. Cells
    /// near leaf boundaries are counted once per leaf holding them.
    pub fn num_cells(&self) -> Result<u64, DelaunayError> {
        let mut n = [self
            .leaves
            .iter()
            .filter_map(|l| l.triangulation())
            .map(|t| t.num_cells() as u64)
            .sum::<u64>()];
        self.comm.allreduce_sum(&mut n)?;
        Ok(n[0])
    }

    /// Gather the leaves on the coordinator; `Some` there, `None` elsewhere.
    pub fn consolidate(&self) -> Result<Option<ConsolidatedTriangulation>, DelaunayError> {
        self.ensure_placed()?;
        consolidate(self.comm, &self.leaves, self.nleaves)
    }

    /// Insert, exchange to convergence and consolidate.
    pub fn triangulate(&mut self, points: &[f64]) -> Result<Option<ConsolidatedTriangulation>, DelaunayError> {
        self.insert(points)?;
        self.exchange()?;
        self.consolidate()
    }
}
