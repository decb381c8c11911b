//! Leaves: one spatial shard of the decomposition and its local triangulation.
//!
//! A leaf owns an append-only point store. Points it was assigned are
//! [`PointOrigin::Owned`]; points absorbed from neighbors are
//! [`PointOrigin::Ghost`] and are never forwarded again. The active neighbor
//! list is consumed by every round's outgoing computation, while `all_neigh`
//! remembers every neighbor that was ever active so that no relationship is
//! announced twice. Leaves missing from `all_neigh` are still tested against
//! this leaf's circumballs every round and join it on first contact.
//!
//! Periodic images are resolved by the sender: a point bound for a translated
//! copy of the destination box travels with the translation already undone,
//! once per image it reaches.

pub mod set;
pub mod snapshot;

use std::collections::BTreeSet;

use hashbrown::HashSet;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::debug_invariants::{DebugInvariants, ensure};
use crate::delaunay_error::DelaunayError;
use crate::geometry::BoundingBox;
use crate::triangulation::LocalTriangulation;

pub use set::LeafSet;
pub use snapshot::LeafSnapshot;

/// Leaf identity, stable for the whole run.
pub type LeafId = u32;
/// Global point identifier.
pub type GlobalId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointOrigin {
    /// Assigned to this leaf by the decomposition or a later batch.
    Owned,
    /// Absorbed from a neighbor (or from this leaf's own periodic image).
    Ghost,
}

/// One copy of a neighbor's box in this leaf's frame.
#[derive(Clone, Debug, PartialEq)]
pub struct NeighborImage {
    pub bounds: BoundingBox,
    /// Offset of `bounds` from the neighbor's own box.
    pub shift: Vec<f64>,
}

/// An active neighbor and the images of its box around this leaf.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafNeighbor {
    pub id: LeafId,
    pub images: Vec<NeighborImage>,
    /// Newly activated; announced with the next batches that carry points.
    pub fresh: bool,
}

/// Points bound for one destination leaf in one round.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutgoingBatch {
    pub src: LeafId,
    pub dst: LeafId,
    pub ids: Vec<GlobalId>,
    pub coords: Vec<f64>,
    /// Neighbor announcements; non-empty only when points are sent.
    pub neighbors: Vec<LeafId>,
}

impl OutgoingBatch {
    #[inline]
    pub fn npts(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Debug)]
pub struct Leaf {
    id: LeafId,
    ndim: usize,
    bounds: BoundingBox,
    periodic_le: Vec<bool>,
    periodic_re: Vec<bool>,
    periodic: Vec<bool>,
    domain_width: Vec<f64>,
    lneigh: Vec<BTreeSet<LeafId>>,
    rneigh: Vec<BTreeSet<LeafId>>,
    /// Box of every leaf of the decomposition, indexed by id.
    leaf_boxes: Vec<BoundingBox>,
    neighbors: Vec<LeafNeighbor>,
    all_neigh: BTreeSet<LeafId>,
    ids: Vec<GlobalId>,
    coords: Vec<f64>,
    origin: Vec<PointOrigin>,
    /// Ghost copies held, keyed by id and coordinate bits.
    ghosts: HashSet<(GlobalId, Vec<u64>)>,
    npts_orig: usize,
    tri: Option<LocalTriangulation>,
}

impl Leaf {
    /// Build a leaf from its snapshot, recomputing the neighbor images from
    /// the periodic flags and the domain width.
    pub fn from_snapshot(s: LeafSnapshot) -> Result<Self, DelaunayError> {
        s.validate()?;
        let ndim = s.bounds.ndim();
        let npts = s.ids.len();
        let mut leaf = Self {
            id: s.id,
            ndim,
            bounds: s.bounds,
            periodic_le: s.periodic_le,
            periodic_re: s.periodic_re,
            periodic: s.periodic,
            domain_width: s.domain_width,
            lneigh: s.lneigh,
            rneigh: s.rneigh,
            leaf_boxes: s.leaf_boxes,
            neighbors: Vec::new(),
            all_neigh: BTreeSet::new(),
            ids: s.ids,
            coords: s.coords,
            origin: vec![PointOrigin::Owned; npts],
            ghosts: HashSet::new(),
            npts_orig: npts,
            tri: None,
        };
        let initial: BTreeSet<LeafId> = leaf.lneigh.iter().chain(&leaf.rneigh).flatten().copied().collect();
        for nb in initial {
            leaf.all_neigh.insert(nb);
            let images = leaf.images_of(nb);
            if !images.is_empty() {
                leaf.neighbors.push(LeafNeighbor {
                    id: nb,
                    images,
                    fresh: true,
                });
            }
        }
        Ok(leaf)
    }

    /// Everything needed to rebuild this leaf on another process. Only owned
    /// points are included.
    pub fn snapshot(&self) -> LeafSnapshot {
        let owned: Vec<usize> = self.owned_indices().collect();
        LeafSnapshot {
            id: self.id,
            bounds: self.bounds.clone(),
            periodic_le: self.periodic_le.clone(),
            periodic_re: self.periodic_re.clone(),
            periodic: self.periodic.clone(),
            domain_width: self.domain_width.clone(),
            ids: owned.iter().map(|&i| self.ids[i]).collect(),
            coords: owned.iter().flat_map(|&i| self.point(i).iter().copied()).collect(),
            lneigh: self.lneigh.clone(),
            rneigh: self.rneigh.clone(),
            leaf_boxes: self.leaf_boxes.clone(),
        }
    }

    #[inline]
    pub fn id(&self) -> LeafId {
        self.id
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    #[inline]
    pub fn npts(&self) -> usize {
        self.ids.len()
    }

    /// Number of owned points.
    #[inline]
    pub fn npts_orig(&self) -> usize {
        self.npts_orig
    }

    pub fn ids(&self) -> &[GlobalId] {
        &self.ids
    }

    #[inline]
    pub fn point(&self, i: usize) -> &[f64] {
        &self.coords[i * self.ndim..(i + 1) * self.ndim]
    }

    #[inline]
    pub fn origin(&self, i: usize) -> PointOrigin {
        self.origin[i]
    }

    fn owned_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.npts()).filter(|&i| self.origin[i] == PointOrigin::Owned)
    }

    /// Ids of the currently active neighbors, in activation order.
    pub fn active_neighbors(&self) -> Vec<LeafId> {
        self.neighbors.iter().map(|n| n.id).collect()
    }

    pub fn active_neighbor_entries(&self) -> &[LeafNeighbor] {
        &self.neighbors
    }

    /// Every neighbor that was ever active.
    pub fn all_neighbors(&self) -> &BTreeSet<LeafId> {
        &self.all_neigh
    }

    pub fn left_neighbors(&self, axis: usize) -> &BTreeSet<LeafId> {
        &self.lneigh[axis]
    }

    pub fn right_neighbors(&self, axis: usize) -> &BTreeSet<LeafId> {
        &self.rneigh[axis]
    }

    pub fn triangulation(&self) -> Option<&LocalTriangulation> {
        self.tri.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.tri.is_some()
    }

    /// Boxes of leaf `nb` as seen from this leaf: the unshifted box (never for
    /// this leaf itself) and every translate by plus or minus `domain_width`
    /// along the periodic axes of the domain.
    fn images_of(&self, nb: LeafId) -> Vec<NeighborImage> {
        let Some(base) = self.leaf_boxes.get(nb as usize) else {
            return Vec::new();
        };
        let per_axis: Vec<Vec<f64>> = (0..self.ndim)
            .map(|k| {
                if self.periodic[k] {
                    vec![0.0, -self.domain_width[k], self.domain_width[k]]
                } else {
                    vec![0.0]
                }
            })
            .collect();
        let mut images = Vec::new();
        for shift in per_axis.into_iter().multi_cartesian_product() {
            if shift.iter().all(|&s| s == 0.0) && nb == self.id {
                continue;
            }
            images.push(NeighborImage {
                bounds: base.translated(&shift),
                shift,
            });
        }
        images
    }

    /// Insert every assigned point into a fresh local triangulation.
    ///
    /// Calling this twice is an error and leaves the leaf untouched.
    pub fn init_triangulation(&mut self) -> Result<(), DelaunayError> {
        if self.tri.is_some() {
            return Err(DelaunayError::TriangulationAlreadyInitialized(self.id));
        }
        let mut tri = LocalTriangulation::euclidean(self.ndim)?;
        tri.insert(&self.coords, &self.ids)?;
        self.npts_orig = self.owned_indices().count();
        self.tri = Some(tri);
        Ok(())
    }

    fn append(&mut self, coords: &[f64], ids: &[GlobalId], origin: PointOrigin) -> Result<(), DelaunayError> {
        if coords.len() != ids.len() * self.ndim {
            return Err(DelaunayError::PointCountMismatch {
                coords: coords.len(),
                ids: ids.len(),
                ndim: self.ndim,
            });
        }
        if let Some(tri) = self.tri.as_mut() {
            tri.insert(coords, ids)?;
        }
        self.coords.extend_from_slice(coords);
        self.ids.extend_from_slice(ids);
        self.origin.extend(std::iter::repeat(origin).take(ids.len()));
        Ok(())
    }

    /// Append newly assigned points; they continue the local index sequence
    /// and count towards `npts_orig`.
    pub fn insert(&mut self, coords: &[f64], ids: &[GlobalId]) -> Result<(), DelaunayError> {
        self.append(coords, ids, PointOrigin::Owned)?;
        self.npts_orig += ids.len();
        Ok(())
    }

    /// Compute this round's batches against the active neighbors, then clear
    /// the active list. Only owned points are eligible; fresh neighbors are
    /// announced to a destination only when points go there.
    ///
    /// Leaves never seen before are tested as well; any that would receive
    /// points becomes a known neighbor and gets its batch this round.
    pub fn outgoing(&mut self) -> Result<Vec<OutgoingBatch>, DelaunayError> {
        let tri = self
            .tri
            .as_ref()
            .ok_or(DelaunayError::TriangulationNotInitialized(self.id))?;
        let unknown: Vec<LeafNeighbor> = (0..self.leaf_boxes.len() as LeafId)
            .filter(|nb| !self.all_neigh.contains(nb))
            .map(|nb| LeafNeighbor {
                id: nb,
                images: self.images_of(nb),
                fresh: true,
            })
            .filter(|n| !n.images.is_empty())
            .collect();
        let boxes: Vec<BoundingBox> = self
            .neighbors
            .iter()
            .chain(&unknown)
            .flat_map(|n| n.images.iter().map(|img| img.bounds.clone()))
            .collect();
        let candidates = tri.outgoing_points(&boxes);

        let mut entries = std::mem::take(&mut self.neighbors);
        let known = entries.len();
        entries.extend(unknown);
        let mut picks: Vec<Vec<Vec<usize>>> = Vec::with_capacity(entries.len());
        let mut next = 0;
        for n in &entries {
            let per_image: Vec<Vec<usize>> = candidates[next..next + n.images.len()]
                .iter()
                .map(|c| {
                    c.iter()
                        .copied()
                        .filter(|&i| self.origin[i] == PointOrigin::Owned)
                        .sorted_unstable()
                        .dedup()
                        .collect()
                })
                .collect();
            next += n.images.len();
            picks.push(per_image);
        }

        let mut keep = vec![true; entries.len()];
        for (j, n) in entries.iter().enumerate().skip(known) {
            if picks[j].iter().all(Vec::is_empty) {
                keep[j] = false;
            } else {
                log::trace!("leaf {}: first contact with leaf {}", self.id, n.id);
                self.all_neigh.insert(n.id);
            }
        }
        let announced: Vec<LeafId> = entries
            .iter()
            .zip(&keep)
            .filter(|(n, k)| **k && n.fresh)
            .map(|(n, _)| n.id)
            .collect();

        let ndim = self.ndim;
        let mut out = Vec::with_capacity(entries.len());
        for ((n, per_image), k) in entries.iter().zip(&picks).zip(&keep) {
            if !*k {
                continue;
            }
            let mut batch = OutgoingBatch {
                src: self.id,
                dst: n.id,
                ..Default::default()
            };
            for (img, pick) in n.images.iter().zip(per_image) {
                for &i in pick {
                    batch.ids.push(self.ids[i]);
                    let p = &self.coords[i * ndim..(i + 1) * ndim];
                    batch.coords.extend(p.iter().zip(&img.shift).map(|(x, s)| x - s));
                }
            }
            if !batch.ids.is_empty() {
                batch.neighbors = announced.clone();
            }
            out.push(batch);
        }
        Ok(out)
    }

    /// Absorb a batch sent by leaf `src`; returns the number of ghosts added.
    ///
    /// Coordinates arrive in this leaf's frame. A copy already held (same id,
    /// same position) is dropped, so one point may be present once per
    /// periodic image.
    pub fn absorb(
        &mut self,
        src: LeafId,
        ids: &[GlobalId],
        coords: &[f64],
        announced: &[LeafId],
    ) -> Result<usize, DelaunayError> {
        if ids.is_empty() {
            return Ok(0);
        }
        if coords.len() != ids.len() * self.ndim {
            return Err(DelaunayError::PointCountMismatch {
                coords: coords.len(),
                ids: ids.len(),
                ndim: self.ndim,
            });
        }
        let mut new_ids = Vec::new();
        let mut new_pts = Vec::new();
        let mut keys = HashSet::new();
        for (j, p) in coords.chunks_exact(self.ndim).enumerate() {
            let key = ghost_key(ids[j], p);
            if self.ghosts.contains(&key) || !keys.insert(key) {
                continue;
            }
            new_ids.push(ids[j]);
            new_pts.extend_from_slice(p);
        }
        self.append(&new_pts, &new_ids, PointOrigin::Ghost)?;
        self.ghosts.extend(keys);
        log::trace!("leaf {}: {} ghosts from leaf {src}", self.id, new_ids.len());

        for &nb in announced {
            if nb == self.id || self.all_neigh.contains(&nb) {
                continue;
            }
            if nb as usize >= self.leaf_boxes.len() {
                return Err(DelaunayError::UnknownLeaf(nb));
            }
            self.activate(nb);
        }
        Ok(new_ids.len())
    }

    /// Add an announced neighbor to the active list. Periodic translates that
    /// touch this leaf register it on the matching side.
    fn activate(&mut self, nb: LeafId) {
        self.all_neigh.insert(nb);
        let base = self.leaf_boxes[nb as usize].clone();
        for k in 0..self.ndim {
            let mut shift = vec![0.0; self.ndim];
            if self.periodic_le[k] {
                shift[k] = -self.domain_width[k];
                if base.translated(&shift).touches(&self.bounds) {
                    self.lneigh[k].insert(nb);
                }
            }
            if self.periodic_re[k] {
                shift[k] = self.domain_width[k];
                if base.translated(&shift).touches(&self.bounds) {
                    self.rneigh[k].insert(nb);
                }
            }
        }
        let images = self.images_of(nb);
        if !images.is_empty() {
            self.neighbors.push(LeafNeighbor {
                id: nb,
                images,
                fresh: true,
            });
        }
    }

    /// Put every known neighbor back on the active list so that the next
    /// exchange reaches them again, e.g. after a batch of new points.
    /// Relisted neighbors are not announced a second time.
    pub fn reopen(&mut self) {
        let active: BTreeSet<LeafId> = self.neighbors.iter().map(|n| n.id).collect();
        let relist: Vec<LeafId> = self.all_neigh.difference(&active).copied().collect();
        for nb in relist {
            let images = self.images_of(nb);
            if !images.is_empty() {
                self.neighbors.push(LeafNeighbor {
                    id: nb,
                    images,
                    fresh: false,
                });
            }
        }
    }
}

impl DebugInvariants for Leaf {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Leaf");
    }

    fn validate_invariants(&self) -> Result<(), DelaunayError> {
        let n = self.ids.len();
        ensure(self.coords.len() == n * self.ndim, || {
            format!("leaf {}: {} coordinates for {n} points", self.id, self.coords.len())
        })?;
        ensure(self.origin.len() == n, || format!("leaf {}: origin table out of sync", self.id))?;
        let owned = self.owned_indices().count();
        ensure(owned == self.npts_orig, || {
            format!("leaf {}: npts_orig {} but {owned} owned points", self.id, self.npts_orig)
        })?;
        ensure(self.ghosts.len() == n - owned, || {
            format!("leaf {}: {} ghost keys for {} ghost points", self.id, self.ghosts.len(), n - owned)
        })?;
        for nb in &self.neighbors {
            ensure(self.all_neigh.contains(&nb.id), || {
                format!("leaf {}: active neighbor {} missing from all_neigh", self.id, nb.id)
            })?;
            ensure(!nb.images.is_empty(), || format!("leaf {}: neighbor {} has no images", self.id, nb.id))?;
        }
        ensure(self.active_neighbors().iter().all_unique(), || {
            format!("leaf {}: duplicate active neighbor", self.id)
        })?;
        if let Some(tri) = &self.tri {
            ensure(tri.num_vertices() == n, || {
                format!("leaf {}: triangulation has {} vertices, store has {n}", self.id, tri.num_vertices())
            })?;
        }
        Ok(())
    }
}

fn ghost_key(id: GlobalId, p: &[f64]) -> (GlobalId, Vec<u64>) {
    (id, p.iter().map(|x| x.to_bits()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposition::KdDecomposition;
    use crate::geometry::Domain;

    fn square_leaves() -> Vec<Leaf> {
        let pts = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let d = KdDecomposition::with_target(&pts, &dom, 2).unwrap();
        d.leaves
            .iter()
            .map(|spec| Leaf::from_snapshot(LeafSnapshot::from_spec(spec, &d, &pts, 0)).unwrap())
            .collect()
    }

    #[test]
    fn init_twice_fails() {
        let mut leaves = square_leaves();
        leaves[0].init_triangulation().unwrap();
        assert_eq!(
            leaves[0].init_triangulation(),
            Err(DelaunayError::TriangulationAlreadyInitialized(0))
        );
        assert_eq!(leaves[0].npts(), 2);
    }

    #[test]
    fn outgoing_before_init_fails() {
        let mut leaves = square_leaves();
        assert_eq!(leaves[1].outgoing(), Err(DelaunayError::TriangulationNotInitialized(1)));
    }

    #[test]
    fn one_round_by_hand() {
        let mut leaves = square_leaves();
        for l in &mut leaves {
            l.init_triangulation().unwrap();
        }
        let out0 = leaves[0].outgoing().unwrap();
        let out1 = leaves[1].outgoing().unwrap();
        assert_eq!(out0.len(), 1);
        assert_eq!(out0[0].dst, 1);
        assert_eq!(out0[0].npts(), 2);
        assert_eq!(out0[0].neighbors, vec![1]);
        assert!(leaves[0].active_neighbors().is_empty());

        let b = &out1[0];
        assert_eq!(leaves[0].absorb(b.src, &b.ids, &b.coords, &b.neighbors).unwrap(), 2);
        let b = &out0[0];
        assert_eq!(leaves[1].absorb(b.src, &b.ids, &b.coords, &b.neighbors).unwrap(), 2);
        for l in &mut leaves {
            assert_eq!(l.npts(), 4);
            assert_eq!(l.npts_orig(), 2);
            assert!(l.active_neighbors().is_empty());
            l.validate_invariants().unwrap();
            // ghosts are never forwarded and nothing is active anymore
            assert!(l.outgoing().unwrap().is_empty());
        }
        let tri = leaves[0].triangulation().unwrap();
        assert_eq!(tri.num_cells(), 6);
    }

    #[test]
    fn ghosts_are_not_forwarded() {
        let mut leaves = square_leaves();
        leaves[0].init_triangulation().unwrap();
        leaves[0].absorb(1, &[1, 3], &[1.0, 0.0, 1.0, 1.0], &[]).unwrap();
        let out = leaves[0].outgoing().unwrap();
        assert_eq!(out[0].ids, vec![0, 2]);
    }

    #[test]
    fn announcements_are_deduplicated() {
        let mut leaves = square_leaves();
        leaves[0].init_triangulation().unwrap();
        leaves[0].outgoing().unwrap();
        let before = leaves[0].all_neighbors().clone();
        leaves[0].absorb(1, &[1], &[1.0, 0.0], &[0, 1]).unwrap();
        assert!(leaves[0].active_neighbors().is_empty());
        assert_eq!(leaves[0].all_neighbors(), &before);
        assert_eq!(leaves[0].absorb(1, &[3], &[1.0, 1.0], &[5]), Err(DelaunayError::UnknownLeaf(5)));
    }

    #[test]
    fn periodic_self_wrap_shift() {
        let dom = Domain::new(vec![0.0, 0.0], vec![10.0, 10.0], vec![true, false]).unwrap();
        let pts = [0.2, 5.0, 5.0, 2.0, 5.0, 8.0, 9.0, 5.0];
        let d = KdDecomposition::build(&pts, &dom, 10).unwrap();
        let mut leaf = Leaf::from_snapshot(LeafSnapshot::from_spec(&d.leaves[0], &d, &pts, 0)).unwrap();
        assert_eq!(leaf.active_neighbors(), vec![0]);
        let shifts: Vec<&[f64]> = leaf.active_neighbor_entries()[0]
            .images
            .iter()
            .map(|img| img.shift.as_slice())
            .collect();
        assert_eq!(shifts, vec![&[-10.0, 0.0][..], &[10.0, 0.0][..]]);
        leaf.init_triangulation().unwrap();
        let out = leaf.outgoing().unwrap();
        assert_eq!(out.len(), 1);
        let b = &out[0];
        // every hull vertex once per image
        assert_eq!(b.npts(), 8);
        assert_eq!(&b.coords[..2], &[10.2, 5.0]);
        let n = leaf.absorb(b.src, &b.ids, &b.coords, &b.neighbors).unwrap();
        assert_eq!(n, 8);
        assert_eq!(leaf.point(4), &[10.2, 5.0]);
        assert_eq!(leaf.point(11), &[-1.0, 5.0]);
        assert_eq!(leaf.origin(4), PointOrigin::Ghost);
        leaf.validate_invariants().unwrap();
        assert_eq!(leaf.absorb(b.src, &b.ids, &b.coords, &b.neighbors).unwrap(), 0);
    }

    #[test]
    fn one_point_in_two_images() {
        let dom = Domain::new(vec![0.0, 0.0], vec![10.0, 10.0], vec![true, false]).unwrap();
        let pts = [0.2, 5.0, 5.0, 2.0, 5.0, 8.0, 9.0, 5.0];
        let d = KdDecomposition::build(&pts, &dom, 10).unwrap();
        let mut leaf = Leaf::from_snapshot(LeafSnapshot::from_spec(&d.leaves[0], &d, &pts, 0)).unwrap();
        leaf.init_triangulation().unwrap();
        leaf.outgoing().unwrap();
        // the same neighbor point reached across both periodic faces
        assert_eq!(leaf.absorb(0, &[7, 7], &[12.0, 5.0, -3.0, 5.0], &[]).unwrap(), 2);
        assert_eq!(leaf.absorb(0, &[7], &[12.0, 5.0], &[]).unwrap(), 0);
        assert_eq!(leaf.npts(), 6);
        leaf.validate_invariants().unwrap();
    }

    fn strip_leaf() -> Leaf {
        let boxes: Vec<BoundingBox> = (0..3)
            .map(|i| BoundingBox::new(vec![i as f64, 0.0], vec![i as f64 + 1.0, 1.0]).unwrap())
            .collect();
        let snap = LeafSnapshot {
            id: 0,
            bounds: boxes[0].clone(),
            periodic_le: vec![false; 2],
            periodic_re: vec![false; 2],
            periodic: vec![false; 2],
            domain_width: vec![3.0, 1.0],
            ids: vec![0, 1, 2],
            coords: vec![0.2, 0.2, 0.8, 0.3, 0.5, 0.9],
            lneigh: vec![BTreeSet::new(); 2],
            rneigh: vec![BTreeSet::from([1]), BTreeSet::new()],
            leaf_boxes: boxes,
        };
        Leaf::from_snapshot(snap).unwrap()
    }

    #[test]
    fn unknown_leaves_are_contacted() {
        let mut leaf = strip_leaf();
        assert_eq!(leaf.active_neighbors(), vec![1]);
        leaf.init_triangulation().unwrap();
        let out = leaf.outgoing().unwrap();
        let dsts: Vec<LeafId> = out.iter().map(|b| b.dst).collect();
        assert_eq!(dsts, vec![1, 2]);
        assert!(out.iter().all(|b| b.npts() == 3));
        assert_eq!(out[0].neighbors, vec![1, 2]);
        assert_eq!(leaf.all_neighbors(), &BTreeSet::from([1, 2]));
        // a known leaf is not contacted again
        assert!(leaf.outgoing().unwrap().is_empty());
        leaf.validate_invariants().unwrap();
    }

    #[test]
    fn reopen_relists_without_reannouncing() {
        let mut leaves = square_leaves();
        for l in &mut leaves {
            l.init_triangulation().unwrap();
        }
        let out1 = leaves[1].outgoing().unwrap();
        leaves[0].outgoing().unwrap();
        let b = &out1[0];
        assert_eq!(leaves[0].absorb(b.src, &b.ids, &b.coords, &b.neighbors).unwrap(), 2);

        leaves[0].insert(&[0.25, 0.5], &[4]).unwrap();
        leaves[0].reopen();
        assert_eq!(leaves[0].active_neighbors(), vec![1]);
        let out = leaves[0].outgoing().unwrap();
        assert!(out[0].neighbors.is_empty());
        assert!(out[0].ids.contains(&4));

        // a repeated batch adds nothing
        assert_eq!(leaves[0].absorb(b.src, &b.ids, &b.coords, &b.neighbors).unwrap(), 0);
        assert_eq!(leaves[0].npts(), 5);
        leaves[0].validate_invariants().unwrap();
    }
}
