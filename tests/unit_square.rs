//! Four corners of the unit square, two leaves, two ranks.
mod util;

use parallel_delaunay::prelude::*;
use util::run_ranks;

const SQUARE: [f64; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

#[test]
fn two_ranks_two_leaves() {
    let out = run_ranks(2, |comm| {
        let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let mut pd = ParallelDelaunay::new(comm, dom, DelaunayConfig::default()).unwrap();
        let ins = pd.insert(&SQUARE).unwrap();
        assert_eq!(ins, InsertReport { inserted: 4, unplaced: 0 });
        assert_eq!(pd.num_leaves(), 2);
        assert_eq!(pd.leaves().len(), 1);
        let leaf = pd.leaves().iter().next().unwrap();
        assert_eq!(leaf.id() as usize, comm.rank());
        assert_eq!(leaf.npts(), 2);

        let report = pd.exchange().unwrap();
        assert_eq!(report.absorbed_per_round(), vec![4, 0]);
        assert_eq!(report.rounds[0].local_absorbed, 2);
        let leaf = pd.leaves().iter().next().unwrap();
        assert_eq!(leaf.npts(), 4);
        assert_eq!(leaf.npts_orig(), 2);
        // both leaves hold the full square: 2 finite + 4 hull cells each
        assert_eq!(pd.num_cells().unwrap(), 12);
        pd.consolidate().unwrap()
    });

    assert!(out[1].is_none());
    let tri = out[0].clone().unwrap();
    assert_eq!(tri.nverts, 4);
    assert_eq!(tri.num_finite_cells(), 2);
    assert_eq!(tri.ncells, 6);
    assert_eq!(tri.num_unresolved(), 0);
    tri.validate().unwrap();

    let serial = triangulate_serial(&SQUARE, 2, None).unwrap();
    assert_eq!(tri.canonical(), serial.canonical());
}

#[test]
fn worker_points_are_ignored() {
    let out = run_ranks(2, |comm| {
        let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let mut pd = ParallelDelaunay::new(comm, dom, DelaunayConfig::default()).unwrap();
        let pts: &[f64] = if comm.rank() == 0 { &SQUARE } else { &[0.5, 0.5] };
        pd.triangulate(pts).unwrap()
    });
    assert_eq!(out[0].as_ref().unwrap().nverts, 4);
}
