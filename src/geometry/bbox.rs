//! Axis-aligned bounding boxes and the global domain description.

use serde::{Deserialize, Serialize};

use crate::delaunay_error::DelaunayError;

/// Relative tolerance used when deciding whether two box faces coincide.
const FACE_TOL: f64 = 1e-12;

/// Closed axis-aligned box `[lo, hi]` in `ndim` dimensions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lo: Vec<f64>,
    pub hi: Vec<f64>,
}

impl BoundingBox {
    pub fn new(lo: Vec<f64>, hi: Vec<f64>) -> Result<Self, DelaunayError> {
        if lo.len() != hi.len() || lo.is_empty() {
            return Err(DelaunayError::InvalidDomain(format!(
                "box corners have lengths {} and {}",
                lo.len(),
                hi.len()
            )));
        }
        if lo.iter().zip(&hi).any(|(l, h)| !(l <= h)) {
            return Err(DelaunayError::InvalidDomain(format!(
                "inverted box {lo:?}..{hi:?}"
            )));
        }
        Ok(Self { lo, hi })
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.lo.len()
    }

    pub fn width(&self, axis: usize) -> f64 {
        self.hi[axis] - self.lo[axis]
    }

    /// Axis with the largest extent; ties resolve to the lowest axis.
    pub fn widest_axis(&self) -> usize {
        let mut best = 0;
        for k in 1..self.ndim() {
            if self.width(k) > self.width(best) {
                best = k;
            }
        }
        best
    }

    /// Half-open containment `lo <= p < hi`, closed on faces that coincide with
    /// `outer`'s high faces so that points on the domain boundary are located.
    pub fn contains_in(&self, p: &[f64], outer: &BoundingBox) -> bool {
        (0..self.ndim()).all(|k| {
            let upper_ok = p[k] < self.hi[k] || (same(self.hi[k], outer.hi[k]) && p[k] <= self.hi[k]);
            p[k] >= self.lo[k] && upper_ok
        })
    }

    /// Closed containment.
    pub fn contains(&self, p: &[f64]) -> bool {
        (0..self.ndim()).all(|k| p[k] >= self.lo[k] && p[k] <= self.hi[k])
    }

    /// Closed overlap on every axis except `skip` (pass `usize::MAX` to check all).
    pub fn overlaps_except(&self, other: &BoundingBox, skip: usize) -> bool {
        (0..self.ndim())
            .filter(|&k| k != skip)
            .all(|k| self.lo[k] <= other.hi[k] + tol(other.hi[k]) && other.lo[k] <= self.hi[k] + tol(self.hi[k]))
    }

    /// Closed overlap on every axis (touching faces, edges and corners count).
    pub fn touches(&self, other: &BoundingBox) -> bool {
        self.overlaps_except(other, usize::MAX)
    }

    /// Copy translated by `shift` (one entry per axis).
    pub fn translated(&self, shift: &[f64]) -> BoundingBox {
        BoundingBox {
            lo: self.lo.iter().zip(shift).map(|(l, s)| l + s).collect(),
            hi: self.hi.iter().zip(shift).map(|(h, s)| h + s).collect(),
        }
    }

    /// Squared distance from `p` to the box (zero inside).
    pub fn dist2(&self, p: &[f64]) -> f64 {
        let mut d2 = 0.0;
        for k in 0..self.ndim() {
            let d = if p[k] < self.lo[k] {
                self.lo[k] - p[k]
            } else if p[k] > self.hi[k] {
                p[k] - self.hi[k]
            } else {
                0.0
            };
            d2 += d * d;
        }
        d2
    }

    /// Whether the closed ball `|x - center|^2 <= r2` meets the box.
    #[inline]
    pub fn meets_ball(&self, center: &[f64], r2: f64) -> bool {
        self.dist2(center) <= r2
    }
}

/// Global domain: bounds plus per-axis periodicity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub bounds: BoundingBox,
    pub periodic: Vec<bool>,
}

impl Domain {
    pub fn new(left_edge: Vec<f64>, right_edge: Vec<f64>, periodic: Vec<bool>) -> Result<Self, DelaunayError> {
        let bounds = BoundingBox::new(left_edge, right_edge)?;
        if periodic.len() != bounds.ndim() {
            return Err(DelaunayError::InvalidDomain(format!(
                "{} periodic flags for {} axes",
                periodic.len(),
                bounds.ndim()
            )));
        }
        if (0..bounds.ndim()).any(|k| bounds.width(k) <= 0.0) {
            return Err(DelaunayError::InvalidDomain("domain has zero extent".into()));
        }
        Ok(Self { bounds, periodic })
    }

    /// Non-periodic domain.
    pub fn open(left_edge: Vec<f64>, right_edge: Vec<f64>) -> Result<Self, DelaunayError> {
        let n = left_edge.len();
        Self::new(left_edge, right_edge, vec![false; n])
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.bounds.ndim()
    }

    pub fn width(&self) -> Vec<f64> {
        (0..self.ndim()).map(|k| self.bounds.width(k)).collect()
    }

    pub fn is_periodic(&self) -> bool {
        self.periodic.iter().any(|&p| p)
    }
}

#[inline]
fn tol(x: f64) -> f64 {
    FACE_TOL * x.abs().max(1.0)
}

/// Whether two face coordinates coincide up to [`FACE_TOL`].
#[inline]
pub(crate) fn same(a: f64, b: f64) -> bool {
    (a - b).abs() <= tol(a.abs().max(b.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> BoundingBox {
        BoundingBox::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap()
    }

    #[test]
    fn rejects_inverted() {
        assert!(BoundingBox::new(vec![1.0], vec![0.0]).is_err());
        assert!(Domain::new(vec![0.0, 0.0], vec![1.0, 1.0], vec![true]).is_err());
    }

    #[test]
    fn distance_and_ball() {
        let b = unit();
        assert_eq!(b.dist2(&[0.5, 0.5]), 0.0);
        assert_eq!(b.dist2(&[2.0, 0.5]), 1.0);
        assert!(b.meets_ball(&[2.0, 0.5], 1.0));
        assert!(!b.meets_ball(&[2.0, 2.0], 1.0));
    }

    #[test]
    fn touching_boxes() {
        let a = unit();
        let right = BoundingBox::new(vec![1.0, 0.0], vec![2.0, 1.0]).unwrap();
        let corner = BoundingBox::new(vec![1.0, 1.0], vec![2.0, 2.0]).unwrap();
        let far = BoundingBox::new(vec![1.5, 0.0], vec![2.0, 1.0]).unwrap();
        assert!(a.touches(&right));
        assert!(a.touches(&corner));
        assert!(!a.touches(&far));
        assert!(a.overlaps_except(&far, 0));
    }

    #[test]
    fn containment_closes_outer_faces() {
        let outer = unit();
        let left = BoundingBox::new(vec![0.0, 0.0], vec![0.5, 1.0]).unwrap();
        let right = BoundingBox::new(vec![0.5, 0.0], vec![1.0, 1.0]).unwrap();
        assert!(left.contains_in(&[0.0, 1.0], &outer));
        assert!(!left.contains_in(&[0.5, 0.5], &outer));
        assert!(right.contains_in(&[0.5, 0.5], &outer));
        assert!(right.contains_in(&[1.0, 1.0], &outer));
    }

    #[test]
    fn translation() {
        let b = unit().translated(&[-1.0, 0.0]);
        assert_eq!(b.lo, vec![-1.0, 0.0]);
        assert_eq!(b.hi, vec![0.0, 1.0]);
    }
}
