//! Later batches go into the existing leaves and are exchanged again.
mod util;

use std::collections::HashSet;

use parallel_delaunay::leaf::PointOrigin;
use parallel_delaunay::prelude::*;
use util::{random_points, run_ranks};

fn owned_ids(pd: &ParallelDelaunay<'_, RayonComm>) -> Vec<u64> {
    pd.leaves()
        .iter()
        .flat_map(|l| {
            (0..l.npts())
                .filter(move |&i| l.origin(i) == PointOrigin::Owned)
                .map(move |i| l.ids()[i])
        })
        .collect()
}

#[test]
fn second_batch_matches_serial() {
    let first = random_points(80, 2, 23, 0.0, 1.0);
    let second = random_points(40, 2, 29, 0.0, 1.0);

    let out = run_ranks(2, |comm| {
        let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let cfg = DelaunayConfig {
            leaves_per_rank: 2,
            ..Default::default()
        };
        let mut pd = ParallelDelaunay::new(comm, dom, cfg).unwrap();
        assert_eq!(pd.insert(&first).unwrap().inserted, 80);
        pd.exchange().unwrap();

        let ins = pd.insert(&second).unwrap();
        assert_eq!(ins, InsertReport { inserted: 40, unplaced: 0 });
        assert_eq!(pd.num_points(), 120);

        let report = pd.exchange().unwrap();
        assert!(report.total_absorbed() > 0);
        assert_eq!(report.absorbed_per_round().last(), Some(&0));
        pd.consolidate().unwrap()
    });

    let tri = out.into_iter().next().flatten().unwrap();
    let mut all = first.clone();
    all.extend_from_slice(&second);
    let serial = triangulate_serial(&all, 2, None).unwrap();
    assert_eq!(tri.nverts, 120);
    assert_eq!(tri.num_unresolved(), 0);
    assert_eq!(tri.canonical(), serial.canonical());
}

#[test]
fn unplaced_point_mid_batch_consumes_its_id() {
    let first = random_points(40, 2, 31, 0.0, 1.0);
    // the stray point leads its batch, so every later id would collide if it
    // did not consume one
    let mut second = vec![1.5, 0.5];
    second.extend(random_points(10, 2, 37, 0.0, 1.0));
    let third = random_points(10, 2, 41, 0.0, 1.0);

    let out = run_ranks(2, |comm| {
        let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let cfg = DelaunayConfig {
            leaves_per_rank: 2,
            check_invariants: true,
            ..Default::default()
        };
        let mut pd = ParallelDelaunay::new(comm, dom, cfg).unwrap();
        pd.insert(&first).unwrap();
        pd.exchange().unwrap();
        assert_eq!(pd.insert(&second).unwrap(), InsertReport { inserted: 10, unplaced: 1 });
        assert_eq!(pd.num_points(), 51);
        pd.exchange().unwrap();
        assert_eq!(pd.insert(&third).unwrap(), InsertReport { inserted: 10, unplaced: 0 });
        assert_eq!(pd.num_points(), 61);
        pd.exchange().unwrap();
        (owned_ids(&pd), pd.consolidate().unwrap())
    });

    let mut ids: Vec<u64> = out.iter().flat_map(|(ids, _)| ids.iter().copied()).collect();
    assert_eq!(ids.len(), 60);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 60);
    ids.sort_unstable();
    assert!(!ids.contains(&40));
    assert_eq!(ids.last(), Some(&60));

    let tri = out.into_iter().next().and_then(|(_, t)| t).unwrap();
    assert_eq!(tri.nverts, 60);
    assert_eq!(tri.num_unresolved(), 0);
    tri.validate().unwrap();

    // the serial run numbers the 60 placed points contiguously
    let mut all = first.clone();
    all.extend_from_slice(&second[2..]);
    all.extend_from_slice(&third);
    let serial = triangulate_serial(&all, 2, None).unwrap();
    let mut remapped: Vec<Vec<u64>> = tri
        .finite_cell_sets()
        .into_iter()
        .map(|c| c.into_iter().map(|v| if v > 40 { v - 1 } else { v }).collect())
        .collect();
    remapped.sort();
    assert_eq!(remapped, serial.finite_cell_sets());
    assert_eq!(tri.ncells, serial.ncells);
}
