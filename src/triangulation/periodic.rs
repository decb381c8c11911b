//! Periodic Delaunay triangulation on a cover of image points.
//!
//! Every point is inserted together with its translates by `-1, 0, +1` domain
//! widths along each periodic axis. A cell of the cover belongs to a
//! translation class; the class is reported once, by the member whose anchor
//! (the vertex with the smallest `(info, offset)`) is the unshifted copy.

use hashbrown::HashMap;

use crate::delaunay_error::DelaunayError;
use crate::geometry::{BoundingBox, Domain};
use crate::triangulation::delaunay::{Delaunay, INFINITE};
use crate::triangulation::{INFINITE_VERTEX, SerializedTess};

type ImageKey<const D: usize> = Vec<(u64, [i8; D])>;

#[derive(Clone, Debug)]
pub struct PeriodicDelaunay<const D: usize> {
    domain: Domain,
    cover: Delaunay<D>,
    /// Image offsets in units of the domain width; index 0 is the identity.
    offsets: Vec<[i8; D]>,
    count: usize,
}

impl<const D: usize> PeriodicDelaunay<D> {
    pub fn new(domain: Domain) -> Result<Self, DelaunayError> {
        if domain.ndim() != D {
            return Err(DelaunayError::InvalidDimension(domain.ndim()));
        }
        let mut offsets: Vec<[i8; D]> = vec![[0; D]];
        for k in (0..D).filter(|&k| domain.periodic[k]) {
            let base = offsets.clone();
            for s in [-1i8, 1] {
                offsets.extend(base.iter().map(|o| {
                    let mut o = *o;
                    o[k] = s;
                    o
                }));
            }
        }
        Ok(Self {
            domain,
            cover: Delaunay::new(),
            offsets,
            count: 0,
        })
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.count
    }

    /// Number of cells of the periodic triangulation (one per class).
    pub fn num_cells(&self) -> usize {
        self.representatives().0.len()
    }

    /// Number of points in the cover, images included.
    pub fn num_cover_vertices(&self) -> usize {
        self.cover.num_vertices()
    }

    pub fn insert(&mut self, mut p: [f64; D], info: u64) -> Result<(), DelaunayError> {
        if p.iter().any(|x| !x.is_finite()) {
            return Err(DelaunayError::NonFinitePoint { info });
        }
        let lo = &self.domain.bounds.lo;
        let hi = &self.domain.bounds.hi;
        for k in (0..D).filter(|&k| self.domain.periodic[k]) {
            let w = hi[k] - lo[k];
            p[k] = lo[k] + (p[k] - lo[k]).rem_euclid(w);
            if p[k] >= hi[k] {
                p[k] = lo[k];
            }
        }
        let nimg = self.offsets.len() as u64;
        let base = info
            .checked_mul(nimg)
            .filter(|b| b.checked_add(nimg).is_some())
            .ok_or_else(|| DelaunayError::InvalidConfig(format!("point info {info} too large for {nimg} images")))?;
        for (code, off) in self.offsets.iter().enumerate() {
            let q: [f64; D] = std::array::from_fn(|k| p[k] + off[k] as f64 * (hi[k] - lo[k]));
            self.cover.insert(q, base + code as u64).map_err(|e| match e {
                DelaunayError::DuplicatePoint { .. } => DelaunayError::DuplicatePoint { info },
                DelaunayError::DegenerateInsertion { .. } => DelaunayError::DegenerateInsertion { info },
                other => other,
            })?;
        }
        self.count += 1;
        Ok(())
    }

    /// Periodic engines keep no locality information per image, so every
    /// vertex is reported for every box.
    pub fn outgoing_points(&self, boxes: &[BoundingBox]) -> Vec<Vec<usize>> {
        vec![(0..self.count).collect(); boxes.len()]
    }

    fn split(&self, h: usize) -> (u64, [i8; D]) {
        let nimg = self.offsets.len() as u64;
        let inner = self.cover.info(h);
        (inner / nimg, self.offsets[(inner % nimg) as usize])
    }

    /// Canonical key of a cover cell: its vertices relative to the anchor.
    fn class_key(&self, v: &[usize]) -> Option<(ImageKey<D>, bool)> {
        if v.contains(&INFINITE) {
            return None;
        }
        let verts: Vec<(u64, [i8; D])> = v.iter().map(|&h| self.split(h)).collect();
        let anchor = *verts.iter().min()?;
        let mut key: ImageKey<D> = verts
            .iter()
            .map(|&(info, off)| (info, std::array::from_fn(|k| off[k] - anchor.1[k])))
            .collect();
        key.sort_unstable();
        Some((key, anchor.1 == [0; D]))
    }

    fn representatives(&self) -> (Vec<usize>, HashMap<ImageKey<D>, usize>) {
        let mut reps = Vec::new();
        let mut index = HashMap::new();
        for (c, v, _) in self.cover.live_cells() {
            if let Some((key, true)) = self.class_key(v) {
                index.insert(key, reps.len());
                reps.push(c);
            }
        }
        (reps, index)
    }

    /// One cell per translation class. Vertex entries are the original point
    /// infos; a neighbor whose class is missing from the cover is reported as
    /// the sentinel.
    pub fn serialize(&self) -> SerializedTess {
        let (reps, index) = self.representatives();
        let mut cells = Vec::with_capacity(reps.len() * (D + 1));
        let mut neighbors = Vec::with_capacity(reps.len() * (D + 1));
        for &c in &reps {
            let Some((v, n)) = self.cover.cell(c) else {
                continue;
            };
            cells.extend(v.iter().map(|&h| self.split(h).0));
            for &o in n {
                let resolved = self
                    .cover
                    .cell(o)
                    .and_then(|(ov, _)| self.class_key(ov))
                    .and_then(|(key, _)| index.get(&key).copied());
                neighbors.push(resolved.map_or(INFINITE_VERTEX, |i| i as u64));
            }
        }
        SerializedTess {
            ndim: D,
            nverts: self.count as u64,
            ncells: reps.len() as u64,
            cells,
            neighbors,
            sentinel: INFINITE_VERTEX,
        }
    }
}
