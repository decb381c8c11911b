//! Forwarding and announcement properties of the exchange loop.
mod util;

use std::collections::{BTreeSet, HashSet};

use parallel_delaunay::leaf::PointOrigin;
use parallel_delaunay::prelude::*;
use util::{random_points, run_ranks};

fn four_leaves<'c>(comm: &'c NoComm, pts: &[f64]) -> (ParallelDelaunay<'c, NoComm>, ExchangeReport) {
    let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
    let cfg = DelaunayConfig {
        leaves_per_rank: 4,
        check_invariants: true,
        ..Default::default()
    };
    let mut pd = ParallelDelaunay::new(comm, dom, cfg).unwrap();
    pd.insert(pts).unwrap();
    let report = pd.exchange().unwrap();
    (pd, report)
}

#[test]
fn every_pair_talks_in_one_round_at_most() {
    let pts = random_points(160, 2, 41, 0.0, 1.0);
    let (pd, report) = four_leaves(&NoComm, &pts);
    assert_eq!(pd.num_leaves(), 4);
    let mut seen = HashSet::new();
    for round in &report.rounds {
        for b in &round.batches {
            assert!(seen.insert((b.src, b.dst)), "{} -> {} sent twice", b.src, b.dst);
            assert_ne!(b.src, b.dst);
        }
    }
    assert!(report.num_rounds() <= pd.num_leaves() + 1);
}

#[test]
fn only_owned_points_travel() {
    let pts = random_points(160, 2, 43, 0.0, 1.0);
    let (pd, report) = four_leaves(&NoComm, &pts);
    for round in &report.rounds {
        for b in &round.batches {
            let src = pd.leaves().get(b.src).unwrap();
            assert!(b.npts <= src.npts_orig());
        }
    }

    let ghosts: usize = pd.leaves().iter().map(|l| l.npts() - l.npts_orig()).sum();
    assert_eq!(report.total_absorbed(), ghosts as u64);

    for leaf in pd.leaves() {
        let owned: HashSet<u64> = (0..leaf.npts())
            .filter(|&i| leaf.origin(i) == PointOrigin::Owned)
            .map(|i| leaf.ids()[i])
            .collect();
        assert_eq!(owned.len(), leaf.npts_orig());
        let mut ghost_ids = HashSet::new();
        for i in leaf.npts_orig()..leaf.npts() {
            assert_eq!(leaf.origin(i), PointOrigin::Ghost);
            assert!(!owned.contains(&leaf.ids()[i]));
            assert!(ghost_ids.insert(leaf.ids()[i]), "ghost {} absorbed twice", leaf.ids()[i]);
        }
    }
}

#[test]
fn known_neighbors_only_grow() {
    let pts = random_points(160, 2, 47, 0.0, 1.0);
    let (pd, _) = four_leaves(&NoComm, &pts);
    for leaf in pd.leaves() {
        let initial: BTreeSet<LeafId> = (0..2)
            .flat_map(|k| leaf.left_neighbors(k).iter().chain(leaf.right_neighbors(k)))
            .copied()
            .collect();
        assert!(leaf.all_neighbors().is_superset(&initial));
        assert!(!leaf.all_neighbors().contains(&leaf.id()));
        assert!(leaf.active_neighbors().is_empty());
    }
}

#[test]
fn ranks_agree_on_global_counts() {
    let pts = random_points(120, 2, 53, 0.0, 1.0);
    let reports = run_ranks(2, |comm| {
        let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let cfg = DelaunayConfig {
            leaves_per_rank: 2,
            ..Default::default()
        };
        let mut pd = ParallelDelaunay::new(comm, dom, cfg).unwrap();
        pd.insert(&pts).unwrap();
        let report = pd.exchange().unwrap();
        let local: u64 = pd.leaves().iter().map(|l| (l.npts() - l.npts_orig()) as u64).sum();
        (report, local)
    });
    let (r0, l0) = &reports[0];
    let (r1, l1) = &reports[1];
    assert_eq!(r0.absorbed_per_round(), r1.absorbed_per_round());
    assert_eq!(r0.total_absorbed(), l0 + l1);
    for (a, b) in r0.rounds.iter().zip(&r1.rounds) {
        assert_eq!(a.global_absorbed, a.local_absorbed + b.local_absorbed);
    }
}

#[test]
fn round_cap_fails_every_rank() {
    let pts = random_points(60, 2, 59, 0.0, 1.0);
    let results = run_ranks(2, |comm| {
        let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let cfg = DelaunayConfig {
            max_exchange_rounds: Some(1),
            ..Default::default()
        };
        let mut pd = ParallelDelaunay::new(comm, dom, cfg).unwrap();
        pd.insert(&pts).unwrap();
        pd.exchange()
    });
    for r in results {
        assert_eq!(r.unwrap_err(), DelaunayError::NotConverged { rounds: 1 });
    }
}
