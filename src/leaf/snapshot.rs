//! Full leaf state as transferred during placement.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::algs::wire::{WIRE_VERSION, WireLeafHdr, WireReader, WireWriter};
use crate::decomposition::{KdDecomposition, LeafSpec};
use crate::delaunay_error::DelaunayError;
use crate::geometry::BoundingBox;
use crate::leaf::{GlobalId, LeafId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeafSnapshot {
    pub id: LeafId,
    pub bounds: BoundingBox,
    pub periodic_le: Vec<bool>,
    pub periodic_re: Vec<bool>,
    /// Periodicity of the domain, per axis.
    pub periodic: Vec<bool>,
    pub domain_width: Vec<f64>,
    pub ids: Vec<GlobalId>,
    pub coords: Vec<f64>,
    pub lneigh: Vec<BTreeSet<LeafId>>,
    pub rneigh: Vec<BTreeSet<LeafId>>,
    pub leaf_boxes: Vec<BoundingBox>,
}

impl LeafSnapshot {
    /// Snapshot of a freshly decomposed leaf. Point `i` of the input gets
    /// global id `id_offset + i`.
    pub fn from_spec(spec: &LeafSpec, decomp: &KdDecomposition, points: &[f64], id_offset: u64) -> Self {
        let ndim = decomp.domain.ndim();
        Self {
            id: spec.id,
            bounds: spec.bounds.clone(),
            periodic_le: spec.periodic_left.clone(),
            periodic_re: spec.periodic_right.clone(),
            periodic: decomp.domain.periodic.clone(),
            domain_width: decomp.domain.width(),
            ids: spec.points.iter().map(|&i| id_offset + i as u64).collect(),
            coords: spec
                .points
                .iter()
                .flat_map(|&i| points[i * ndim..(i + 1) * ndim].iter().copied())
                .collect(),
            lneigh: spec.left_neighbors.clone(),
            rneigh: spec.right_neighbors.clone(),
            leaf_boxes: decomp.bounding_boxes(),
        }
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.bounds.ndim()
    }

    fn nneigh(&self) -> usize {
        self.lneigh.iter().chain(&self.rneigh).map(BTreeSet::len).sum()
    }

    pub fn validate(&self) -> Result<(), DelaunayError> {
        let ndim = self.ndim();
        let bad = |what: String| Err(DelaunayError::InvalidDomain(format!("leaf {}: {what}", self.id)));
        if !(2..=3).contains(&ndim) {
            return Err(DelaunayError::InvalidDimension(ndim));
        }
        let per_axis = [
            self.bounds.hi.len(),
            self.periodic_le.len(),
            self.periodic_re.len(),
            self.periodic.len(),
            self.domain_width.len(),
            self.lneigh.len(),
            self.rneigh.len(),
        ];
        if per_axis.iter().any(|&n| n != ndim) {
            return bad(format!("per-axis tables {per_axis:?} do not match ndim {ndim}"));
        }
        if self.coords.len() != self.ids.len() * ndim {
            return Err(DelaunayError::PointCountMismatch {
                coords: self.coords.len(),
                ids: self.ids.len(),
                ndim,
            });
        }
        let nleaves = self.leaf_boxes.len();
        if self.id as usize >= nleaves {
            return bad(format!("id outside a table of {nleaves} leaves"));
        }
        if let Some(nb) = self
            .lneigh
            .iter()
            .chain(&self.rneigh)
            .flatten()
            .find(|&&nb| nb as usize >= nleaves)
        {
            return Err(DelaunayError::UnknownLeaf(*nb));
        }
        if self.leaf_boxes.iter().any(|b| b.ndim() != ndim || b.hi.len() != ndim) {
            return bad("leaf table has boxes of the wrong dimension".into());
        }
        Ok(())
    }

    /// Encode as a [`WireLeafHdr`] followed by the per-axis tables, the
    /// neighbor ids, the leaf table and the points.
    pub fn encode(&self) -> Vec<u8> {
        let ndim = self.ndim();
        let nleaves = self.leaf_boxes.len();
        let mut w = WireWriter::with_capacity(
            24 + 8 * (3 * ndim + 2 * ndim * nleaves + self.ids.len() + self.coords.len()) + 4 * (5 * ndim + self.nneigh()),
        );
        w.put(&WireLeafHdr::new(ndim, self.id, self.ids.len(), nleaves, self.nneigh()));
        w.put_f64s(&self.bounds.lo).put_f64s(&self.bounds.hi).put_f64s(&self.domain_width);
        let flags: Vec<u32> = self
            .periodic_le
            .iter()
            .chain(&self.periodic_re)
            .chain(&self.periodic)
            .map(|&f| u32::from(f))
            .collect();
        w.put_u32s(&flags);
        for k in 0..ndim {
            w.put_u32s(&[self.lneigh[k].len() as u32, self.rneigh[k].len() as u32]);
        }
        for k in 0..ndim {
            w.put_u32s(&self.lneigh[k].iter().copied().collect::<Vec<_>>());
            w.put_u32s(&self.rneigh[k].iter().copied().collect::<Vec<_>>());
        }
        for b in &self.leaf_boxes {
            w.put_f64s(&b.lo).put_f64s(&b.hi);
        }
        w.put_u64s(&self.ids).put_f64s(&self.coords);
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DelaunayError> {
        let mut r = WireReader::new(bytes);
        let hdr: WireLeafHdr = r.get()?;
        if hdr.version() != WIRE_VERSION {
            return Err(DelaunayError::WireDecode(format!(
                "leaf snapshot version {} (expected {WIRE_VERSION})",
                hdr.version()
            )));
        }
        let ndim = hdr.ndim();
        let lo = r.f64s(ndim)?;
        let hi = r.f64s(ndim)?;
        let domain_width = r.f64s(ndim)?;
        let flags = r.u32s(3 * ndim)?;
        let counts = r.u32s(2 * ndim)?;
        if counts.iter().map(|&c| c as usize).sum::<usize>() != hdr.nneigh() {
            return Err(DelaunayError::WireDecode(format!(
                "leaf {}: neighbor counts {counts:?} do not add up to {}",
                hdr.id(),
                hdr.nneigh()
            )));
        }
        let mut lneigh = Vec::with_capacity(ndim);
        let mut rneigh = Vec::with_capacity(ndim);
        for k in 0..ndim {
            lneigh.push(r.u32s(counts[2 * k] as usize)?.into_iter().collect());
            rneigh.push(r.u32s(counts[2 * k + 1] as usize)?.into_iter().collect());
        }
        let mut leaf_boxes = Vec::with_capacity(hdr.nleaves());
        for _ in 0..hdr.nleaves() {
            let blo = r.f64s(ndim)?;
            let bhi = r.f64s(ndim)?;
            leaf_boxes.push(BoundingBox { lo: blo, hi: bhi });
        }
        let ids = r.u64s(hdr.npts())?;
        let coords = r.f64s(hdr.npts().saturating_mul(ndim))?;
        r.finish()?;
        let snap = Self {
            id: hdr.id(),
            bounds: BoundingBox { lo, hi },
            periodic_le: flags[..ndim].iter().map(|&f| f != 0).collect(),
            periodic_re: flags[ndim..2 * ndim].iter().map(|&f| f != 0).collect(),
            periodic: flags[2 * ndim..].iter().map(|&f| f != 0).collect(),
            domain_width,
            ids,
            coords,
            lneigh,
            rneigh,
            leaf_boxes,
        };
        snap.validate()
            .map_err(|e| DelaunayError::WireDecode(format!("decoded snapshot is invalid: {e}")))?;
        Ok(snap)
    }
}
