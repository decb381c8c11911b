#![allow(dead_code)]
use parallel_delaunay::algs::communicator::RayonComm;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// `n` uniform points in `[lo, hi)^ndim`, flat and `ndim`-strided.
pub fn random_points(n: usize, ndim: usize, seed: u64, lo: f64, hi: f64) -> Vec<f64> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n * ndim).map(|_| rng.gen_range(lo..hi)).collect()
}

/// Run `f` on `size` threads, each with its own rank of a private
/// [`RayonComm`] group; results come back in rank order.
pub fn run_ranks<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(&RayonComm) -> R + Sync,
{
    let comms = RayonComm::group(size);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = comms.iter().map(|c| s.spawn(move || f(c))).collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}
