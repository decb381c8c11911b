//! Incremental Bowyer-Watson Delaunay triangulation in `D` dimensions.
//!
//! The convex hull is closed with an explicit infinite vertex, so every cell
//! has exactly `D + 1` neighbors. Vertex handles are assigned in insertion
//! order starting at zero; callers that insert every point they store can use
//! their own local index as the handle.

use hashbrown::{HashMap, HashSet};

use crate::debug_invariants::{DebugInvariants, ensure};
use crate::delaunay_error::DelaunayError;
use crate::geometry::BoundingBox;
use crate::geometry::predicates::{
    REL_EPS, affinely_independent, circumball, dist2, in_sphere, orient, orient_tol,
};
use crate::triangulation::{INFINITE_VERTEX, SerializedTess};

/// Handle of the vertex at infinity.
pub const INFINITE: usize = usize::MAX;
const NO_CELL: usize = usize::MAX;

type FacetKey = [usize; 3];

#[derive(Clone, Debug)]
struct Cell {
    v: [usize; 4],
    n: [usize; 4],
    alive: bool,
}

/// A cavity boundary facet: the dying cell's vertices, the slot facing the
/// surviving cell, that cell, and the slot in it pointing back.
struct Boundary {
    v: [usize; 4],
    slot: usize,
    outside: usize,
    back: usize,
}

struct Cavity {
    cells: Vec<usize>,
    boundary: Vec<Boundary>,
}

#[derive(Clone, Debug, Default)]
pub struct Delaunay<const D: usize> {
    points: Vec<[f64; D]>,
    infos: Vec<u64>,
    cells: Vec<Cell>,
    free: Vec<usize>,
    live: usize,
    /// Vertices waiting for `D + 1` affinely independent points.
    pending: Vec<usize>,
    seen: HashMap<[u64; D], usize>,
}

impl<const D: usize> Delaunay<D> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.points.len()
    }

    /// Live cells, finite and infinite.
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.live
    }

    pub fn num_finite_cells(&self) -> usize {
        self.live_cells().filter(|(_, v, _)| !v.contains(&INFINITE)).count()
    }

    #[inline]
    pub fn point(&self, h: usize) -> &[f64; D] {
        &self.points[h]
    }

    #[inline]
    pub fn info(&self, h: usize) -> u64 {
        self.infos[h]
    }

    /// Iterate live cells as `(cell, vertices, neighbors)`.
    pub(crate) fn live_cells(&self) -> impl Iterator<Item = (usize, &[usize], &[usize])> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.alive)
            .map(|(i, c)| (i, &c.v[..=D], &c.n[..=D]))
    }

    /// Vertices and neighbors of cell `c`, `None` for dead or unknown cells.
    pub(crate) fn cell(&self, c: usize) -> Option<(&[usize], &[usize])> {
        self.cells
            .get(c)
            .filter(|cell| cell.alive)
            .map(|cell| (&cell.v[..=D], &cell.n[..=D]))
    }

    /// Insert one point; returns its vertex handle.
    pub fn insert(&mut self, p: [f64; D], info: u64) -> Result<usize, DelaunayError> {
        if p.iter().any(|x| !x.is_finite()) {
            return Err(DelaunayError::NonFinitePoint { info });
        }
        // -0.0 and 0.0 must collide
        let key = p.map(|x| (x + 0.0).to_bits());
        if self.seen.contains_key(&key) {
            return Err(DelaunayError::DuplicatePoint { info });
        }
        if self.live == 0 {
            let h = self.push_vertex(p, info, key);
            self.pending.push(h);
            self.try_bootstrap()?;
            return Ok(h);
        }
        let cavity = self.cavity(&p, info)?;
        let h = self.push_vertex(p, info, key);
        self.fill(cavity, h);
        Ok(h)
    }

    fn push_vertex(&mut self, p: [f64; D], info: u64, key: [u64; D]) -> usize {
        let h = self.points.len();
        self.points.push(p);
        self.infos.push(info);
        self.seen.insert(key, h);
        h
    }

    fn alloc(&mut self, cell: Cell) -> usize {
        self.live += 1;
        match self.free.pop() {
            Some(c) => {
                self.cells[c] = cell;
                c
            }
            None => {
                self.cells.push(cell);
                self.cells.len() - 1
            }
        }
    }

    fn try_bootstrap(&mut self) -> Result<(), DelaunayError> {
        if self.pending.len() < D + 1 {
            return Ok(());
        }
        let mut chosen: Vec<usize> = Vec::with_capacity(D + 1);
        for &h in &self.pending {
            chosen.push(h);
            let pts: Vec<[f64; D]> = chosen.iter().map(|&c| self.points[c]).collect();
            if !affinely_independent(&pts) {
                chosen.pop();
            }
            if chosen.len() == D + 1 {
                break;
            }
        }
        if chosen.len() < D + 1 {
            return Ok(());
        }

        let mut v = [INFINITE; 4];
        v[..=D].copy_from_slice(&chosen);
        let mut created = Vec::with_capacity(D + 2);
        created.push(self.alloc(Cell { v, n: [NO_CELL; 4], alive: true }));
        for i in 0..=D {
            let mut vi = v;
            vi[i] = INFINITE;
            created.push(self.alloc(Cell { v: vi, n: [NO_CELL; 4], alive: true }));
        }
        self.link(&created);

        let rest: Vec<usize> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|h| !chosen.contains(h))
            .collect();
        for h in rest {
            let p = self.points[h];
            let cavity = self.cavity(&p, self.infos[h])?;
            self.fill(cavity, h);
        }
        Ok(())
    }

    fn facet_key(v: &[usize; 4], skip: usize) -> FacetKey {
        let mut key = [0usize; 3];
        let mut k = 0;
        for (i, &x) in v[..=D].iter().enumerate() {
            if i != skip {
                key[k] = x;
                k += 1;
            }
        }
        key[..D].sort_unstable();
        key
    }

    /// Pair up the open facets of freshly created cells.
    fn link(&mut self, created: &[usize]) {
        let mut open: HashMap<FacetKey, (usize, usize)> = HashMap::with_capacity(created.len() * D);
        for &c in created {
            for i in 0..=D {
                if self.cells[c].n[i] != NO_CELL {
                    continue;
                }
                let key = Self::facet_key(&self.cells[c].v, i);
                if let Some((o, j)) = open.remove(&key) {
                    self.cells[c].n[i] = o;
                    self.cells[o].n[j] = c;
                } else {
                    open.insert(key, (c, i));
                }
            }
        }
    }

    fn cell_points(&self, v: &[usize]) -> [[f64; D]; 4] {
        let mut pts = [[0.0; D]; 4];
        for (slot, &h) in v.iter().enumerate() {
            pts[slot] = self.points[h];
        }
        pts
    }

    fn conflicts(&self, c: usize, p: &[f64; D], info: u64) -> bool {
        let cell = &self.cells[c];
        match cell.v[..=D].iter().position(|&h| h == INFINITE) {
            None => {
                let pts = self.cell_points(&cell.v[..=D]);
                let mut ids = [0u64; 4];
                for (slot, &h) in cell.v[..=D].iter().enumerate() {
                    ids[slot] = self.infos[h];
                }
                in_sphere(&pts[..=D], &ids[..=D], p, info)
            }
            Some(k) => self.conflicts_infinite(c, k, p),
        }
    }

    /// An infinite cell conflicts when `p` is strictly beyond its hull facet,
    /// or on the facet's hyperplane and inside the facet's circumball.
    fn conflicts_infinite(&self, c: usize, k: usize, p: &[f64; D]) -> bool {
        let cell = &self.cells[c];
        let mut buf = [[0.0; D]; 4];
        let mut m = 0;
        for (slot, &h) in cell.v[..=D].iter().enumerate() {
            if slot != k {
                buf[m] = self.points[h];
                m += 1;
            }
        }
        let inner_cell = &self.cells[cell.n[k]];
        let Some(back) = inner_cell.n[..=D].iter().position(|&o| o == c) else {
            return false;
        };
        buf[D] = self.points[inner_cell.v[back]];
        let o_in = orient(&buf[..=D]);
        buf[D] = *p;
        let o_p = orient(&buf[..=D]);
        if o_p.abs() > orient_tol(&buf[..=D]) {
            return o_p * o_in < 0.0;
        }
        match circumball(&buf[..D]) {
            Some((center, r2)) => dist2(&center, p) < r2 * (1.0 - REL_EPS),
            None => false,
        }
    }

    /// Collect the conflict region of `p` without modifying the triangulation.
    fn cavity(&self, p: &[f64; D], info: u64) -> Result<Cavity, DelaunayError> {
        let seed = self
            .live_cells()
            .map(|(c, _, _)| c)
            .find(|&c| self.conflicts(c, p, info))
            .ok_or(DelaunayError::DegenerateInsertion { info })?;

        let mut inside: HashSet<usize> = HashSet::new();
        let mut outside: HashSet<usize> = HashSet::new();
        inside.insert(seed);
        let mut stack = vec![seed];
        let mut cavity = Cavity {
            cells: Vec::new(),
            boundary: Vec::new(),
        };
        while let Some(c) = stack.pop() {
            cavity.cells.push(c);
            for i in 0..=D {
                let o = self.cells[c].n[i];
                if inside.contains(&o) {
                    continue;
                }
                if !outside.contains(&o) {
                    if self.conflicts(o, p, info) {
                        inside.insert(o);
                        stack.push(o);
                        continue;
                    }
                    outside.insert(o);
                }
                let back = self.cells[o].n[..=D]
                    .iter()
                    .position(|&x| x == c)
                    .ok_or(DelaunayError::DegenerateInsertion { info })?;
                let v = self.cells[c].v;
                if !v[..=D].contains(&INFINITE) || v[i] == INFINITE {
                    let mut pts = [[0.0; D]; 4];
                    let mut m = 0;
                    for (slot, &h) in v[..=D].iter().enumerate() {
                        if slot != i {
                            pts[m] = self.points[h];
                            m += 1;
                        }
                    }
                    pts[D] = *p;
                    if orient(&pts[..=D]).abs() <= orient_tol(&pts[..=D]) {
                        return Err(DelaunayError::DegenerateInsertion { info });
                    }
                }
                cavity.boundary.push(Boundary {
                    v,
                    slot: i,
                    outside: o,
                    back,
                });
            }
        }
        Ok(cavity)
    }

    /// Replace the cavity by the star of vertex `h`.
    fn fill(&mut self, cavity: Cavity, h: usize) {
        for &c in &cavity.cells {
            self.cells[c].alive = false;
            self.free.push(c);
        }
        self.live -= cavity.cells.len();
        let mut created = Vec::with_capacity(cavity.boundary.len());
        for b in &cavity.boundary {
            let mut v = b.v;
            v[b.slot] = h;
            let mut n = [NO_CELL; 4];
            n[b.slot] = b.outside;
            let nc = self.alloc(Cell { v, n, alive: true });
            self.cells[b.outside].n[b.back] = nc;
            created.push(nc);
        }
        self.link(&created);
    }

    /// For each box, the sorted handles of vertices of cells whose circumball
    /// meets the box. Hull vertices go to every box, and so does every vertex
    /// while no full-dimensional cell exists.
    pub fn outgoing_points(&self, boxes: &[BoundingBox]) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); boxes.len()];
        if self.live == 0 {
            for dst in &mut out {
                dst.extend(0..self.points.len());
            }
            return out;
        }
        for (_, v, _) in self.live_cells() {
            let finite = v.iter().copied().filter(|&h| h != INFINITE);
            if v.contains(&INFINITE) {
                for dst in &mut out {
                    dst.extend(finite.clone());
                }
                continue;
            }
            let pts = self.cell_points(v);
            match circumball(&pts[..=D]) {
                Some((center, r2)) => {
                    for (dst, bx) in out.iter_mut().zip(boxes) {
                        if bx.meets_ball(&center, r2) {
                            dst.extend(finite.clone());
                        }
                    }
                }
                None => {
                    for dst in &mut out {
                        dst.extend(finite.clone());
                    }
                }
            }
        }
        for dst in &mut out {
            dst.sort_unstable();
            dst.dedup();
        }
        out
    }

    /// Cells and neighbors as index arrays over vertex infos, with
    /// [`INFINITE_VERTEX`] standing in for the vertex at infinity.
    pub fn serialize(&self) -> SerializedTess {
        self.serialize_where(|_| true)
    }

    /// Like [`Delaunay::serialize`], keeping only the cells whose vertex
    /// handles (with [`INFINITE`] for the vertex at infinity) pass `keep`.
    /// Neighbor slots facing a dropped cell hold the sentinel.
    pub fn serialize_where(&self, keep: impl Fn(&[usize]) -> bool) -> SerializedTess {
        let mut index = vec![INFINITE_VERTEX; self.cells.len()];
        let mut order = Vec::with_capacity(self.live);
        for (c, v, _) in self.live_cells() {
            if keep(v) {
                index[c] = order.len() as u64;
                order.push(c);
            }
        }
        let mut cells = Vec::with_capacity(order.len() * (D + 1));
        let mut neighbors = Vec::with_capacity(order.len() * (D + 1));
        for &c in &order {
            let cell = &self.cells[c];
            for slot in 0..=D {
                let h = cell.v[slot];
                cells.push(if h == INFINITE { INFINITE_VERTEX } else { self.infos[h] });
                neighbors.push(index[cell.n[slot]]);
            }
        }
        SerializedTess {
            ndim: D,
            nverts: self.points.len() as u64,
            ncells: order.len() as u64,
            cells,
            neighbors,
            sentinel: INFINITE_VERTEX,
        }
    }

    /// Rebuild a triangulation from serialized arrays and the `(info, point)`
    /// list of its vertices.
    pub fn from_serialized(
        tess: &SerializedTess,
        vertices: &[(u64, [f64; D])],
    ) -> Result<Self, DelaunayError> {
        tess.validate()?;
        if tess.ndim != D {
            return Err(DelaunayError::InvalidSerialization(format!(
                "tessellation is {}D, engine is {D}D",
                tess.ndim
            )));
        }
        let mut tri = Self::new();
        let mut handle: HashMap<u64, usize> = HashMap::with_capacity(vertices.len());
        for &(info, p) in vertices {
            if p.iter().any(|x| !x.is_finite()) {
                return Err(DelaunayError::NonFinitePoint { info });
            }
            let key = p.map(|x| (x + 0.0).to_bits());
            if tri.seen.contains_key(&key) || handle.contains_key(&info) {
                return Err(DelaunayError::DuplicatePoint { info });
            }
            handle.insert(info, tri.push_vertex(p, info, key));
        }
        if tess.ncells == 0 {
            tri.pending = (0..tri.points.len()).collect();
            return Ok(tri);
        }
        for c in 0..tess.ncells as usize {
            let mut v = [INFINITE; 4];
            let mut n = [NO_CELL; 4];
            for slot in 0..=D {
                let id = tess.cells[c * (D + 1) + slot];
                v[slot] = if id == tess.sentinel {
                    INFINITE
                } else {
                    *handle.get(&id).ok_or_else(|| {
                        DelaunayError::InvalidSerialization(format!("cell {c} names unknown vertex {id}"))
                    })?
                };
                n[slot] = tess.neighbors[c * (D + 1) + slot] as usize;
            }
            tri.alloc(Cell { v, n, alive: true });
        }
        tri.validate_invariants()
            .map_err(|e| DelaunayError::InvalidSerialization(e.to_string()))?;
        Ok(tri)
    }

    /// Empty-circumsphere check over every finite cell and vertex. Quadratic;
    /// meant for tests.
    pub fn is_delaunay(&self) -> bool {
        for (_, v, _) in self.live_cells() {
            if v.contains(&INFINITE) {
                continue;
            }
            let pts = self.cell_points(v);
            let Some((center, r2)) = circumball(&pts[..=D]) else {
                return false;
            };
            let limit = r2 * (1.0 - 1e-9);
            if (0..self.points.len()).any(|h| !v.contains(&h) && dist2(&center, &self.points[h]) < limit) {
                return false;
            }
        }
        true
    }
}

impl<const D: usize> DebugInvariants for Delaunay<D> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "Delaunay");
    }

    fn validate_invariants(&self) -> Result<(), DelaunayError> {
        let live = self.cells.iter().filter(|c| c.alive).count();
        ensure(live == self.live, || format!("live count {} but {live} live cells", self.live))?;
        for (c, v, n) in self.live_cells() {
            ensure(v.iter().filter(|&&h| h == INFINITE).count() <= 1, || {
                format!("cell {c} has more than one infinite vertex")
            })?;
            ensure(v.iter().all(|&h| h == INFINITE || h < self.points.len()), || {
                format!("cell {c} names a vertex out of range")
            })?;
            for (i, &o) in n.iter().enumerate() {
                ensure(o < self.cells.len() && self.cells[o].alive, || {
                    format!("cell {c} slot {i} points at dead cell {o}")
                })?;
                let back = self.cells[o].n[..=D].iter().position(|&x| x == c);
                let Some(j) = back else {
                    return Err(DelaunayError::ProtocolViolation(format!(
                        "cell {o} does not point back at {c}"
                    )));
                };
                ensure(
                    Self::facet_key(&self.cells[c].v, i) == Self::facet_key(&self.cells[o].v, j),
                    || format!("cells {c} and {o} disagree on their shared facet"),
                )?;
            }
        }
        Ok(())
    }
}
