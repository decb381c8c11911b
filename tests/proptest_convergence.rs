//! Randomized: the exchange converges and the merge reproduces the serial
//! triangulation for arbitrary clouds and leaf counts.
mod util;

use parallel_delaunay::prelude::*;
use proptest::prelude::*;
use util::{random_points, run_ranks};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn converges_and_matches_serial(seed in any::<u64>(), n in 12usize..160, per_rank in 1usize..=16) {
        let pts = random_points(n, 2, seed, 0.0, 1.0);
        let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let cfg = DelaunayConfig { leaves_per_rank: per_rank, ..Default::default() };
        let mut pd = ParallelDelaunay::new(&NoComm, dom, cfg).unwrap();
        pd.insert(&pts).unwrap();
        let report = pd.exchange().unwrap();
        prop_assert_eq!(report.absorbed_per_round().last().copied(), Some(0));
        prop_assert!(report.num_rounds() <= pd.num_leaves() + 1);

        let tri = pd.consolidate().unwrap().unwrap();
        let serial = triangulate_serial(&pts, 2, None).unwrap();
        prop_assert_eq!(tri.num_unresolved(), 0);
        prop_assert_eq!(tri.finite_cell_sets(), serial.finite_cell_sets());
        prop_assert_eq!(tri.ncells, serial.ncells);
    }

    #[test]
    fn ranks_and_leaves_match_serial(seed in any::<u64>(), n in 60usize..200, ranks in 2usize..=4, per_rank in 1usize..=4) {
        let pts = random_points(n, 2, seed, 0.0, 1.0);
        let out = run_ranks(ranks, |comm| {
            let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
            let cfg = DelaunayConfig { leaves_per_rank: per_rank, ..Default::default() };
            let mut pd = ParallelDelaunay::new(comm, dom, cfg).unwrap();
            pd.triangulate(&pts).unwrap()
        });
        let tri = out.into_iter().next().flatten().unwrap();
        let serial = triangulate_serial(&pts, 2, None).unwrap();
        prop_assert_eq!(tri.num_unresolved(), 0);
        prop_assert_eq!(tri.canonical(), serial.canonical());
    }

    #[test]
    fn torus_matches_serial(seed in any::<u64>(), n in 80usize..200, per_rank in 1usize..=8) {
        let pts = random_points(n, 2, seed, 0.0, 1.0);
        let dom = Domain::new(vec![0.0, 0.0], vec![1.0, 1.0], vec![true, true]).unwrap();
        let cfg = DelaunayConfig { leaves_per_rank: per_rank, ..Default::default() };
        let mut pd = ParallelDelaunay::new(&NoComm, dom.clone(), cfg).unwrap();
        let tri = pd.triangulate(&pts).unwrap().unwrap();
        let serial = triangulate_serial(&pts, 2, Some(&dom)).unwrap();
        prop_assert_eq!(tri.finite_cell_sets(), serial.finite_cell_sets());
        prop_assert_eq!(tri.ncells as usize, 2 * n);
    }

    #[test]
    fn space_converges(seed in any::<u64>(), n in 10usize..60, per_rank in 1usize..=6) {
        let pts = random_points(n, 3, seed, -1.0, 1.0);
        let dom = Domain::open(vec![-1.0; 3], vec![1.0; 3]).unwrap();
        let cfg = DelaunayConfig { leaves_per_rank: per_rank, ..Default::default() };
        let mut pd = ParallelDelaunay::new(&NoComm, dom, cfg).unwrap();
        pd.insert(&pts).unwrap();
        pd.exchange().unwrap();
        let tri = pd.consolidate().unwrap().unwrap();
        let serial = triangulate_serial(&pts, 3, None).unwrap();
        prop_assert_eq!(tri.finite_cell_sets(), serial.finite_cell_sets());
    }
}
