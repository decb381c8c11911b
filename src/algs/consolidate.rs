//! Serialization of leaf triangulations and their merge into one global,
//! duplicate-free triangulation on the coordinator.
//!
//! A leaf keeps a cell iff the smallest global id among the cell's finite
//! vertices belongs to an owned occurrence in that leaf. Since every point
//! is owned by exactly one leaf, each geometric cell is kept exactly once.
//! Local hull cells are kept only where their finite facet ends up bounding a
//! single finite cell of the merged mesh. Neighbor slots that pointed at a
//! discarded cell are re-resolved across leaves by matching facets.

use hashbrown::HashMap;

use serde::{Deserialize, Serialize};

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::owner_of;
use crate::algs::placement::COORDINATOR;
use crate::algs::wire::{WireReader, WireSerializedHdr, WireWriter};
use crate::delaunay_error::DelaunayError;
use crate::leaf::{Leaf, LeafId, LeafSet, PointOrigin};
use crate::triangulation::delaunay::INFINITE;
use crate::triangulation::{INFINITE_VERTEX, SerializedTess};

/// The cells one leaf is responsible for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedLeaf {
    pub leaf: LeafId,
    /// Owned points of the leaf.
    pub nverts: u64,
    pub tess: SerializedTess,
}

impl SerializedLeaf {
    pub fn from_leaf(leaf: &Leaf) -> Result<Self, DelaunayError> {
        let tri = leaf
            .triangulation()
            .ok_or(DelaunayError::TriangulationNotInitialized(leaf.id()))?;
        let ids = leaf.ids();
        let mut tess = tri.serialize_where(|v| {
            let finite = v.iter().copied().filter(|&h| h != INFINITE);
            let Some(min) = finite.clone().map(|h| ids[h]).min() else {
                return false;
            };
            finite
                .filter(|&h| ids[h] == min)
                .any(|h| leaf.origin(h) == PointOrigin::Owned)
        })?;
        tess.nverts = leaf.npts_orig() as u64;
        Ok(Self {
            leaf: leaf.id(),
            nverts: leaf.npts_orig() as u64,
            tess,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let t = &self.tess;
        let mut w = WireWriter::with_capacity(32 + 16 * t.cells.len());
        w.put(&WireSerializedHdr::new(self.leaf, t.ndim, self.nverts, t.ncells, t.sentinel))
            .put_u64s(&t.cells)
            .put_u64s(&t.neighbors);
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DelaunayError> {
        let mut r = WireReader::new(bytes);
        let hdr: WireSerializedHdr = r.get()?;
        let ndim = hdr.ndim();
        if !(2..=3).contains(&ndim) {
            return Err(DelaunayError::WireDecode(format!(
                "leaf {} tessellation has dimension {ndim}",
                hdr.leaf()
            )));
        }
        let n = (hdr.ncells() as usize).saturating_mul(ndim + 1);
        let cells = r.u64s(n)?;
        let neighbors = r.u64s(n)?;
        r.finish()?;
        let tess = SerializedTess {
            ndim,
            nverts: hdr.nverts(),
            ncells: hdr.ncells(),
            cells,
            neighbors,
            sentinel: hdr.sentinel(),
        };
        tess.validate()
            .map_err(|e| DelaunayError::WireDecode(format!("leaf {}: {e}", hdr.leaf())))?;
        Ok(Self {
            leaf: hdr.leaf(),
            nverts: hdr.nverts(),
            tess,
        })
    }
}

/// The global triangulation: vertex entries are global point ids, neighbor
/// entries are global cell indices, and `sentinel` marks the vertex at
/// infinity as well as a neighbor slot that could not be resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedTriangulation {
    pub ndim: usize,
    pub nverts: u64,
    pub ncells: u64,
    pub cells: Vec<u64>,
    pub neighbors: Vec<u64>,
    pub sentinel: u64,
}

fn facet_key(cell: &[u64], skip: usize) -> Vec<u64> {
    let mut f: Vec<u64> = cell
        .iter()
        .enumerate()
        .filter(|&(k, _)| k != skip)
        .map(|(_, &v)| v)
        .collect();
    f.sort_unstable();
    f
}

impl ConsolidatedTriangulation {
    pub fn from_tess(tess: SerializedTess) -> Result<Self, DelaunayError> {
        tess.validate()?;
        Ok(Self {
            ndim: tess.ndim,
            nverts: tess.nverts,
            ncells: tess.ncells,
            cells: tess.cells,
            neighbors: tess.neighbors,
            sentinel: tess.sentinel,
        })
    }

    #[inline]
    pub fn cell(&self, c: usize) -> &[u64] {
        let k = self.ndim + 1;
        &self.cells[c * k..(c + 1) * k]
    }

    #[inline]
    pub fn cell_neighbors(&self, c: usize) -> &[u64] {
        let k = self.ndim + 1;
        &self.neighbors[c * k..(c + 1) * k]
    }

    pub fn num_finite_cells(&self) -> usize {
        (0..self.ncells as usize)
            .filter(|&c| !self.cell(c).contains(&self.sentinel))
            .count()
    }

    /// Sorted vertex sets of the finite cells, sorted.
    pub fn finite_cell_sets(&self) -> Vec<Vec<u64>> {
        let mut sets: Vec<Vec<u64>> = (0..self.ncells as usize)
            .map(|c| self.cell(c))
            .filter(|v| !v.contains(&self.sentinel))
            .map(|v| {
                let mut v = v.to_vec();
                v.sort_unstable();
                v
            })
            .collect();
        sets.sort();
        sets
    }

    /// Neighbor slots left at the sentinel.
    pub fn num_unresolved(&self) -> usize {
        self.neighbors.iter().filter(|&&n| n == self.sentinel).count()
    }

    /// Merge per-leaf cells in leaf-id order.
    pub fn merge(mut leaves: Vec<SerializedLeaf>) -> Result<Self, DelaunayError> {
        leaves.sort_by_key(|l| l.leaf);
        if let Some(w) = leaves.windows(2).find(|w| w[0].leaf == w[1].leaf) {
            return Err(DelaunayError::ProtocolViolation(format!(
                "leaf {} serialized twice",
                w[0].leaf
            )));
        }
        let ndim = leaves.first().map_or(2, |l| l.tess.ndim);
        if let Some(l) = leaves.iter().find(|l| l.tess.ndim != ndim) {
            return Err(DelaunayError::InvalidSerialization(format!(
                "leaf {} is {}D, expected {ndim}D",
                l.leaf, l.tess.ndim
            )));
        }
        for l in &leaves {
            l.tess.validate()?;
        }
        let k = ndim + 1;

        // how many finite cells bound each finite facet
        let mut finite_facets: HashMap<Vec<u64>, usize> = HashMap::new();
        for l in &leaves {
            let t = &l.tess;
            for c in 0..t.ncells as usize {
                let v = t.cell(c);
                if v.contains(&t.sentinel) {
                    continue;
                }
                for skip in 0..k {
                    *finite_facets.entry(facet_key(v, skip)).or_default() += 1;
                }
            }
        }

        // cells that survive, with their rebased neighbors
        let mut cells = Vec::new();
        let mut neighbors = Vec::new();
        let mut dropped_hull = 0usize;
        for l in &leaves {
            let t = &l.tess;
            let offset = (cells.len() / k) as u64;
            let mut index = vec![INFINITE_VERTEX; t.ncells as usize];
            let mut kept = Vec::new();
            for c in 0..t.ncells as usize {
                let v = t.cell(c);
                let keep = match v.iter().position(|&x| x == t.sentinel) {
                    None => true,
                    Some(inf) => finite_facets.get(&facet_key(v, inf)) == Some(&1),
                };
                if keep {
                    index[c] = offset + kept.len() as u64;
                    kept.push(c);
                } else {
                    dropped_hull += 1;
                }
            }
            for &c in &kept {
                cells.extend(t.cell(c).iter().map(|&x| if x == t.sentinel { INFINITE_VERTEX } else { x }));
                neighbors.extend(t.cell_neighbors(c).iter().map(|&o| {
                    if o == t.sentinel {
                        INFINITE_VERTEX
                    } else {
                        index[o as usize]
                    }
                }));
            }
        }
        if dropped_hull > 0 {
            log::debug!("consolidation dropped {dropped_hull} local hull cells");
        }

        let mut tri = Self {
            ndim,
            nverts: leaves.iter().map(|l| l.nverts).sum(),
            ncells: (cells.len() / k) as u64,
            cells,
            neighbors,
            sentinel: INFINITE_VERTEX,
        };
        tri.resolve_facets();
        let unresolved = tri.num_unresolved();
        if unresolved > 0 {
            log::warn!("consolidation left {unresolved} neighbor faces unresolved");
        }
        log::info!(
            "consolidated {} leaves into {} cells ({} finite) over {} vertices",
            leaves.len(),
            tri.ncells,
            tri.num_finite_cells(),
            tri.nverts
        );
        Ok(tri)
    }

    /// Link every unresolved slot to the other cell sharing its facet.
    fn resolve_facets(&mut self) {
        let k = self.ndim + 1;
        let mut open: HashMap<Vec<u64>, Vec<(usize, usize)>> = HashMap::new();
        for c in 0..self.ncells as usize {
            for slot in 0..k {
                open.entry(facet_key(self.cell(c), slot)).or_default().push((c, slot));
            }
        }
        for c in 0..self.ncells as usize {
            for slot in 0..k {
                if self.neighbors[c * k + slot] != self.sentinel {
                    continue;
                }
                let key = facet_key(self.cell(c), slot);
                let other = open
                    .get(&key)
                    .and_then(|sides| sides.iter().find(|&&(o, _)| o != c).copied());
                if let Some((o, oslot)) = other {
                    self.neighbors[c * k + slot] = o as u64;
                    self.neighbors[o * k + oslot] = c as u64;
                }
            }
        }
    }

    /// Sort vertices inside each cell (neighbor slots follow their vertex)
    /// and sort cells lexicographically, remapping neighbor indices.
    pub fn canonicalize(&mut self) {
        let k = self.ndim + 1;
        let n = self.ncells as usize;
        let mut rows: Vec<(Vec<u64>, Vec<u64>, usize)> = (0..n)
            .map(|c| {
                let mut pairs: Vec<(u64, u64)> = self
                    .cell(c)
                    .iter()
                    .copied()
                    .zip(self.cell_neighbors(c).iter().copied())
                    .collect();
                pairs.sort_unstable();
                let (v, nb): (Vec<u64>, Vec<u64>) = pairs.into_iter().unzip();
                (v, nb, c)
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        let mut new_index = vec![0u64; n];
        for (i, row) in rows.iter().enumerate() {
            new_index[row.2] = i as u64;
        }
        self.cells.clear();
        self.neighbors.clear();
        for (v, nb, _) in rows {
            self.cells.extend(v);
            self.neighbors
                .extend(nb.into_iter().map(|o| if o == self.sentinel { o } else { new_index[o as usize] }));
        }
        debug_assert_eq!(self.cells.len(), n * k);
    }

    pub fn canonical(mut self) -> Self {
        self.canonicalize();
        self
    }

    /// Every resolved neighbor slot must point back.
    pub fn validate(&self) -> Result<(), DelaunayError> {
        let k = self.ndim + 1;
        let n = self.ncells as usize;
        if self.cells.len() != n * k || self.neighbors.len() != n * k {
            return Err(DelaunayError::InvalidSerialization(format!(
                "{n} cells need {} entries",
                n * k
            )));
        }
        for c in 0..n {
            for &o in self.cell_neighbors(c) {
                if o == self.sentinel {
                    continue;
                }
                let back = (o as usize) < n
                    && self.cell_neighbors(o as usize).iter().any(|&x| x == c as u64);
                if !back {
                    return Err(DelaunayError::InvalidSerialization(format!(
                        "cell {c} and its neighbor {o} disagree"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Serialize every owned leaf and gather them on the coordinator, which
/// returns the merged triangulation; other ranks return `None`.
pub fn consolidate<C>(
    comm: &C,
    leaves: &LeafSet,
    nleaves: usize,
) -> Result<Option<ConsolidatedTriangulation>, DelaunayError>
where
    C: Communicator + ?Sized,
{
    let size = comm.size();
    let mine = leaves
        .iter()
        .map(SerializedLeaf::from_leaf)
        .collect::<Result<Vec<_>, _>>()?;
    if comm.rank() != COORDINATOR {
        for s in &mine {
            comm.send_sized(COORDINATOR, CommTag::CONSOLIDATE, &s.encode())?;
        }
        return Ok(None);
    }
    let mut all = mine;
    for peer in (0..size).filter(|&r| r != COORDINATOR) {
        let count = (0..nleaves).filter(|&i| owner_of(i as u32, size) == peer).count();
        for _ in 0..count {
            let bytes = comm.recv_sized(peer, CommTag::CONSOLIDATE)?;
            all.push(SerializedLeaf::decode(&bytes)?);
        }
    }
    if all.len() != nleaves {
        return Err(DelaunayError::ProtocolViolation(format!(
            "gathered {} serialized leaves, expected {nleaves}",
            all.len()
        )));
    }
    ConsolidatedTriangulation::merge(all).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangulation::triangulate_serial;

    fn two_triangles() -> ConsolidatedTriangulation {
        // square split along 0-3 with the four hull cells
        let pts = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        triangulate_serial(&pts, 2, None).unwrap()
    }

    #[test]
    fn canonical_form_ignores_cell_order() {
        let a = two_triangles();
        assert_eq!(a.ncells, 6);
        a.validate().unwrap();
        let mut b = a.clone();
        // reverse the cell order and remap neighbors
        let k = 3;
        let n = b.ncells as usize;
        let mut cells = Vec::new();
        let mut nbrs = Vec::new();
        for c in (0..n).rev() {
            cells.extend_from_slice(a.cell(c));
            nbrs.extend(
                a.cell_neighbors(c)
                    .iter()
                    .map(|&o| if o == INFINITE_VERTEX { o } else { (n - 1) as u64 - o }),
            );
        }
        b.cells = cells;
        b.neighbors = nbrs;
        assert_eq!(b.cells.len(), n * k);
        b.validate().unwrap();
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn merge_rebases_and_resolves() {
        let full = two_triangles();
        let tess = SerializedTess {
            ndim: 2,
            nverts: 4,
            ncells: full.ncells,
            cells: full.cells.clone(),
            neighbors: full.neighbors.clone(),
            sentinel: INFINITE_VERTEX,
        };
        // split the cells over two leaves and cut the links between them
        let half = (tess.ncells / 2) as usize;
        let part = |range: std::ops::Range<usize>, leaf: LeafId| {
            let mut cells = Vec::new();
            let mut neighbors = Vec::new();
            for c in range.clone() {
                cells.extend_from_slice(tess.cell(c));
                neighbors.extend(tess.cell_neighbors(c).iter().map(|&o| {
                    if range.contains(&(o as usize)) {
                        o - range.start as u64
                    } else {
                        INFINITE_VERTEX
                    }
                }));
            }
            SerializedLeaf {
                leaf,
                nverts: 2,
                tess: SerializedTess {
                    ndim: 2,
                    nverts: 2,
                    ncells: range.len() as u64,
                    cells,
                    neighbors,
                    sentinel: INFINITE_VERTEX,
                },
            }
        };
        let right = part(half..full.ncells as usize, 1);
        let left = part(0..half, 0);
        let merged = ConsolidatedTriangulation::merge(vec![right, left]).unwrap();
        assert_eq!(merged.nverts, 4);
        assert_eq!(merged.num_unresolved(), 0);
        merged.validate().unwrap();
        assert_eq!(merged.canonical(), full.canonical());
    }

    #[test]
    fn wire_roundtrip_and_duplicates() {
        let full = two_triangles();
        let s = SerializedLeaf {
            leaf: 3,
            nverts: 4,
            tess: SerializedTess {
                ndim: 2,
                nverts: 4,
                ncells: full.ncells,
                cells: full.cells.clone(),
                neighbors: full.neighbors.clone(),
                sentinel: INFINITE_VERTEX,
            },
        };
        let bytes = s.encode();
        assert_eq!(SerializedLeaf::decode(&bytes).unwrap(), s);
        assert!(matches!(
            SerializedLeaf::decode(&bytes[..bytes.len() - 1]),
            Err(DelaunayError::WireDecode(_))
        ));
        assert!(matches!(
            ConsolidatedTriangulation::merge(vec![s.clone(), s]),
            Err(DelaunayError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn serde_form() {
        let t = two_triangles().canonical();
        let json = serde_json::to_string(&t).unwrap();
        let back: ConsolidatedTriangulation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
