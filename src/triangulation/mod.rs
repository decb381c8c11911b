//! Local triangulation engines and their serialized form.
//!
//! A [`LocalTriangulation`] is selected once, from the dimension and the
//! periodicity of the domain, and then used through one interface. Leaves in
//! the distributed protocol always use the Euclidean variants; periodicity
//! reaches them through ghost coordinate shifting instead.

pub mod delaunay;
pub mod periodic;

use serde::{Deserialize, Serialize};

use crate::algs::consolidate::ConsolidatedTriangulation;
use crate::delaunay_error::DelaunayError;
use crate::geometry::{BoundingBox, Domain};

pub use delaunay::Delaunay;
pub use periodic::PeriodicDelaunay;

/// Global id standing in for the vertex at infinity, also used for neighbor
/// slots that could not be resolved.
pub const INFINITE_VERTEX: u64 = u64::MAX;

/// Cells and neighbors of a triangulation as flat index arrays.
///
/// `cells[c * (ndim + 1) + k]` is the `k`-th vertex id of cell `c`, and
/// `neighbors[c * (ndim + 1) + k]` is the cell across the facet opposite it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedTess {
    pub ndim: usize,
    pub nverts: u64,
    pub ncells: u64,
    pub cells: Vec<u64>,
    pub neighbors: Vec<u64>,
    pub sentinel: u64,
}

impl SerializedTess {
    pub fn empty(ndim: usize) -> Self {
        Self {
            ndim,
            nverts: 0,
            ncells: 0,
            cells: Vec::new(),
            neighbors: Vec::new(),
            sentinel: INFINITE_VERTEX,
        }
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

    /// Sorted vertex id sets of the finite cells, in cell order.
    pub fn finite_cell_sets(&self) -> Vec<Vec<u64>> {
        (0..self.ncells as usize)
            .map(|c| self.cell(c))
            .filter(|v| !v.contains(&self.sentinel))
            .map(|v| {
                let mut v = v.to_vec();
                v.sort_unstable();
                v
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), DelaunayError> {
        let k = self.ndim + 1;
        let expect = self.ncells as usize * k;
        if self.ndim == 0 || self.cells.len() != expect || self.neighbors.len() != expect {
            return Err(DelaunayError::InvalidSerialization(format!(
                "{} cells of dimension {} need {expect} entries, got {} vertices and {} neighbors",
                self.ncells,
                self.ndim,
                self.cells.len(),
                self.neighbors.len()
            )));
        }
        if let Some(bad) = self
            .neighbors
            .iter()
            .find(|&&o| o != self.sentinel && o >= self.ncells)
        {
            return Err(DelaunayError::InvalidSerialization(format!(
                "neighbor index {bad} out of range for {} cells",
                self.ncells
            )));
        }
        Ok(())
    }
}

/// The closed set of engine variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriangulationKind {
    Euclidean2,
    Euclidean3,
    Periodic2,
    Periodic3,
}

impl TriangulationKind {
    pub fn select(ndim: usize, periodic: bool) -> Result<Self, DelaunayError> {
        match (ndim, periodic) {
            (2, false) => Ok(Self::Euclidean2),
            (3, false) => Ok(Self::Euclidean3),
            (2, true) => Ok(Self::Periodic2),
            (3, true) => Ok(Self::Periodic3),
            _ => Err(DelaunayError::InvalidDimension(ndim)),
        }
    }

    pub fn ndim(self) -> usize {
        match self {
            Self::Euclidean2 | Self::Periodic2 => 2,
            Self::Euclidean3 | Self::Periodic3 => 3,
        }
    }

    pub fn is_periodic(self) -> bool {
        matches!(self, Self::Periodic2 | Self::Periodic3)
    }
}

#[derive(Clone, Debug)]
pub enum LocalTriangulation {
    Euclidean2(Delaunay<2>),
    Euclidean3(Delaunay<3>),
    Periodic2(PeriodicDelaunay<2>),
    Periodic3(PeriodicDelaunay<3>),
}

macro_rules! dispatch {
    ($self:expr, $t:ident => $body:expr) => {
        match $self {
            LocalTriangulation::Euclidean2($t) => $body,
            LocalTriangulation::Euclidean3($t) => $body,
            LocalTriangulation::Periodic2($t) => $body,
            LocalTriangulation::Periodic3($t) => $body,
        }
    };
}

#[inline]
fn to_array<const D: usize>(p: &[f64]) -> [f64; D] {
    std::array::from_fn(|k| p[k])
}

impl LocalTriangulation {
    /// Create an empty engine. Periodic kinds need the domain they wrap.
    pub fn new(kind: TriangulationKind, domain: Option<&Domain>) -> Result<Self, DelaunayError> {
        let periodic_domain = || {
            domain
                .filter(|d| d.ndim() == kind.ndim())
                .cloned()
                .ok_or_else(|| DelaunayError::InvalidDomain(format!("{kind:?} needs a {}D domain", kind.ndim())))
        };
        Ok(match kind {
            TriangulationKind::Euclidean2 => Self::Euclidean2(Delaunay::new()),
            TriangulationKind::Euclidean3 => Self::Euclidean3(Delaunay::new()),
            TriangulationKind::Periodic2 => Self::Periodic2(PeriodicDelaunay::new(periodic_domain()?)?),
            TriangulationKind::Periodic3 => Self::Periodic3(PeriodicDelaunay::new(periodic_domain()?)?),
        })
    }

    pub fn euclidean(ndim: usize) -> Result<Self, DelaunayError> {
        Self::new(TriangulationKind::select(ndim, false)?, None)
    }

    /// Engine matching the dimension and periodicity of `domain`.
    pub fn for_domain(domain: &Domain) -> Result<Self, DelaunayError> {
        Self::new(TriangulationKind::select(domain.ndim(), domain.is_periodic())?, Some(domain))
    }

    pub fn kind(&self) -> TriangulationKind {
        match self {
            Self::Euclidean2(_) => TriangulationKind::Euclidean2,
            Self::Euclidean3(_) => TriangulationKind::Euclidean3,
            Self::Periodic2(_) => TriangulationKind::Periodic2,
            Self::Periodic3(_) => TriangulationKind::Periodic3,
        }
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.kind().ndim()
    }

    /// Insert `ids.len()` points given as flat `ndim`-strided coordinates.
    pub fn insert(&mut self, coords: &[f64], ids: &[u64]) -> Result<(), DelaunayError> {
        let ndim = self.ndim();
        if coords.len() != ids.len() * ndim {
            return Err(DelaunayError::PointCountMismatch {
                coords: coords.len(),
                ids: ids.len(),
                ndim,
            });
        }
        for (p, &id) in coords.chunks_exact(ndim).zip(ids) {
            match self {
                Self::Euclidean2(t) => {
                    t.insert(to_array(p), id)?;
                }
                Self::Euclidean3(t) => {
                    t.insert(to_array(p), id)?;
                }
                Self::Periodic2(t) => t.insert(to_array(p), id)?,
                Self::Periodic3(t) => t.insert(to_array(p), id)?,
            }
        }
        Ok(())
    }

    pub fn num_vertices(&self) -> usize {
        dispatch!(self, t => t.num_vertices())
    }

    pub fn num_cells(&self) -> usize {
        dispatch!(self, t => t.num_cells())
    }

    pub fn serialize(&self) -> SerializedTess {
        dispatch!(self, t => t.serialize())
    }

    /// Serialize only the cells whose local vertex handles pass `keep`
    /// (`usize::MAX` is the vertex at infinity). Handles are insertion
    /// indices, so this is only offered by the Euclidean engines.
    pub fn serialize_where(&self, keep: impl Fn(&[usize]) -> bool) -> Result<SerializedTess, DelaunayError> {
        match self {
            Self::Euclidean2(t) => Ok(t.serialize_where(keep)),
            Self::Euclidean3(t) => Ok(t.serialize_where(keep)),
            Self::Periodic2(_) | Self::Periodic3(_) => Err(DelaunayError::InvalidConfig(
                "filtered serialization needs a Euclidean engine".into(),
            )),
        }
    }

    /// Per box, the sorted local handles of points whose cells could affect a
    /// triangulation inside that box.
    pub fn outgoing_points(&self, boxes: &[BoundingBox]) -> Vec<Vec<usize>> {
        dispatch!(self, t => t.outgoing_points(boxes))
    }
}

/// Triangulate a whole point set on one process, in the consolidated form
/// the distributed pipeline produces. Point `i` gets global id `i`.
pub fn triangulate_serial(
    points: &[f64],
    ndim: usize,
    domain: Option<&Domain>,
) -> Result<ConsolidatedTriangulation, DelaunayError> {
    let mut tri = match domain {
        Some(d) if d.ndim() != ndim => return Err(DelaunayError::InvalidDimension(ndim)),
        Some(d) => LocalTriangulation::for_domain(d)?,
        None => LocalTriangulation::euclidean(ndim)?,
    };
    let ids: Vec<u64> = (0..(points.len() / ndim) as u64).collect();
    tri.insert(points, &ids)?;
    log::debug!(
        "serial {:?} triangulation: {} vertices, {} cells",
        tri.kind(),
        tri.num_vertices(),
        tri.num_cells()
    );
    ConsolidatedTriangulation::from_tess(tri.serialize())
}
