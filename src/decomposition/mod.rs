//! Reference spatial partitioner: a k-d tree of axis-aligned leaves.
//!
//! Each node splits at the median of its points along the widest axis of its
//! box until no leaf holds more than `leafsize` points. Leaves tile the
//! domain, carry per-face periodic flags and per-axis neighbor lists.

use std::collections::BTreeSet;

use crate::delaunay_error::DelaunayError;
use crate::geometry::bbox::same;
use crate::geometry::{BoundingBox, Domain};
use crate::leaf::LeafId;

/// One leaf of a decomposition, before it is turned into a [`crate::leaf::Leaf`].
#[derive(Clone, Debug, PartialEq)]
pub struct LeafSpec {
    pub id: LeafId,
    pub bounds: BoundingBox,
    pub periodic_left: Vec<bool>,
    pub periodic_right: Vec<bool>,
    /// Input indices of the points assigned to this leaf.
    pub points: Vec<usize>,
    pub left_neighbors: Vec<BTreeSet<LeafId>>,
    pub right_neighbors: Vec<BTreeSet<LeafId>>,
}

impl LeafSpec {
    /// Union of the per-axis neighbor lists.
    pub fn neighbors(&self) -> BTreeSet<LeafId> {
        self.left_neighbors
            .iter()
            .chain(&self.right_neighbors)
            .flatten()
            .copied()
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct KdDecomposition {
    pub domain: Domain,
    pub leafsize: usize,
    pub leaves: Vec<LeafSpec>,
}

impl KdDecomposition {
    /// Partition `points` (flat, `domain.ndim()`-strided) into leaves of at
    /// most `leafsize` points.
    pub fn build(points: &[f64], domain: &Domain, leafsize: usize) -> Result<Self, DelaunayError> {
        let ndim = domain.ndim();
        if points.len() % ndim != 0 {
            return Err(DelaunayError::PointCountMismatch {
                coords: points.len(),
                ids: points.len() / ndim,
                ndim,
            });
        }
        if leafsize == 0 {
            return Err(DelaunayError::InvalidConfig("leafsize must be at least 1".into()));
        }
        for (i, p) in points.chunks_exact(ndim).enumerate() {
            if p.iter().any(|x| !x.is_finite()) {
                return Err(DelaunayError::NonFinitePoint { info: i as u64 });
            }
            if !domain.bounds.contains(p) {
                return Err(DelaunayError::InvalidDomain(format!("point {i} at {p:?} lies outside the domain")));
            }
        }

        let mut leaves = Vec::new();
        let all: Vec<usize> = (0..points.len() / ndim).collect();
        split(points, ndim, leafsize, all, domain.bounds.clone(), &mut leaves);
        let mut decomp = Self {
            domain: domain.clone(),
            leafsize,
            leaves,
        };
        decomp.link_neighbors();
        log::debug!(
            "kd decomposition: {} points into {} leaves (leafsize {leafsize})",
            points.len() / ndim,
            decomp.leaves.len()
        );
        Ok(decomp)
    }

    /// Partition aiming for `target` leaves: `leafsize = npts / target + 1`.
    pub fn with_target(points: &[f64], domain: &Domain, target: usize) -> Result<Self, DelaunayError> {
        let npts = points.len() / domain.ndim();
        Self::build(points, domain, npts / target.max(1) + 1)
    }

    #[inline]
    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Leaf bounding boxes indexed by leaf id.
    pub fn bounding_boxes(&self) -> Vec<BoundingBox> {
        self.leaves.iter().map(|l| l.bounds.clone()).collect()
    }

    /// Leaf whose box contains `p`; boxes are half-open except on the high
    /// faces of the domain.
    pub fn locate(&self, p: &[f64]) -> Option<LeafId> {
        self.leaves
            .iter()
            .find(|l| l.bounds.contains_in(p, &self.domain.bounds))
            .map(|l| l.id)
    }

    fn link_neighbors(&mut self) {
        let ndim = self.domain.ndim();
        let dom = &self.domain.bounds;
        let boxes = self.bounding_boxes();
        for a in 0..self.leaves.len() {
            let ba = &boxes[a];
            for k in 0..ndim {
                let at_lo = same(ba.lo[k], dom.lo[k]);
                let at_hi = same(ba.hi[k], dom.hi[k]);
                let wrap = self.domain.periodic[k];
                self.leaves[a].periodic_left[k] = wrap && at_lo;
                self.leaves[a].periodic_right[k] = wrap && at_hi;
                for (b, bb) in boxes.iter().enumerate() {
                    if !ba.overlaps_except(bb, k) {
                        continue;
                    }
                    let b_id = b as LeafId;
                    if b != a && same(ba.hi[k], bb.lo[k]) {
                        self.leaves[a].right_neighbors[k].insert(b_id);
                    }
                    if b != a && same(ba.lo[k], bb.hi[k]) {
                        self.leaves[a].left_neighbors[k].insert(b_id);
                    }
                    if wrap && at_lo && same(bb.hi[k], dom.hi[k]) {
                        self.leaves[a].left_neighbors[k].insert(b_id);
                    }
                    if wrap && at_hi && same(bb.lo[k], dom.lo[k]) {
                        self.leaves[a].right_neighbors[k].insert(b_id);
                    }
                }
            }
        }
    }
}

fn split(
    points: &[f64],
    ndim: usize,
    leafsize: usize,
    mut idx: Vec<usize>,
    bounds: BoundingBox,
    out: &mut Vec<LeafSpec>,
) {
    if idx.len() <= leafsize {
        out.push(LeafSpec {
            id: out.len() as LeafId,
            bounds,
            periodic_left: vec![false; ndim],
            periodic_right: vec![false; ndim],
            points: idx,
            left_neighbors: vec![BTreeSet::new(); ndim],
            right_neighbors: vec![BTreeSet::new(); ndim],
        });
        return;
    }
    let axis = bounds.widest_axis();
    idx.sort_by(|&a, &b| points[a * ndim + axis].total_cmp(&points[b * ndim + axis]));
    let mid = idx.len() / 2;
    let at = 0.5 * (points[idx[mid - 1] * ndim + axis] + points[idx[mid] * ndim + axis]);
    let right = idx.split_off(mid);
    let mut lo_box = bounds.clone();
    lo_box.hi[axis] = at;
    let mut hi_box = bounds;
    hi_box.lo[axis] = at;
    split(points, ndim, leafsize, idx, lo_box, out);
    split(points, ndim, leafsize, right, hi_box, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<f64> {
        vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0]
    }

    #[test]
    fn unit_square_two_leaves() {
        let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let d = KdDecomposition::with_target(&square(), &dom, 2).unwrap();
        assert_eq!(d.num_leaves(), 2);
        let mut left = d.leaves[0].points.clone();
        left.sort();
        assert_eq!(left, vec![0, 2]);
        assert_eq!(d.leaves[0].bounds.hi[0], 0.5);
        assert_eq!(d.leaves[0].right_neighbors[0], BTreeSet::from([1]));
        assert_eq!(d.leaves[1].left_neighbors[0], BTreeSet::from([0]));
        assert!(d.leaves[0].left_neighbors[1].is_empty());
        assert_eq!(d.locate(&[0.75, 0.2]), Some(1));
        assert_eq!(d.locate(&[1.0, 1.0]), Some(1));
        assert_eq!(d.locate(&[1.5, 0.2]), None);
    }

    #[test]
    fn periodic_single_leaf_is_its_own_neighbor() {
        let dom = Domain::new(vec![0.0, 0.0], vec![10.0, 10.0], vec![true, false]).unwrap();
        let pts = [0.2, 5.0, 5.0, 2.0];
        let d = KdDecomposition::build(&pts, &dom, 10).unwrap();
        assert_eq!(d.num_leaves(), 1);
        let l = &d.leaves[0];
        assert_eq!(l.periodic_left, vec![true, false]);
        assert_eq!(l.periodic_right, vec![true, false]);
        assert_eq!(l.left_neighbors[0], BTreeSet::from([0]));
        assert_eq!(l.right_neighbors[0], BTreeSet::from([0]));
        assert!(l.left_neighbors[1].is_empty());
    }

    #[test]
    fn leaves_tile_and_partition() {
        let n = 64;
        let pts: Vec<f64> = (0..n)
            .flat_map(|i| {
                let x = (i % 8) as f64 / 8.0 + 0.03;
                let y = (i / 8) as f64 / 8.0 + 0.05;
                [x, y]
            })
            .collect();
        let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let d = KdDecomposition::with_target(&pts, &dom, 4).unwrap();
        assert_eq!(d.num_leaves(), 4);
        let mut seen: Vec<usize> = d.leaves.iter().flat_map(|l| l.points.clone()).collect();
        seen.sort();
        assert_eq!(seen, (0..n).collect::<Vec<_>>());
        for l in &d.leaves {
            for &i in &l.points {
                assert_eq!(d.locate(&pts[2 * i..2 * i + 2]), Some(l.id));
            }
        }
    }

    #[test]
    fn rejects_points_outside() {
        let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        assert!(matches!(
            KdDecomposition::build(&[2.0, 0.5], &dom, 4),
            Err(DelaunayError::InvalidDomain(_))
        ));
    }
}
