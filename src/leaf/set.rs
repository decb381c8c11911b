//! The leaves owned by one rank and the `leaf id -> slot` routing table.

use hashbrown::HashMap;

use crate::debug_invariants::DebugInvariants;
use crate::delaunay_error::DelaunayError;
use crate::leaf::{Leaf, LeafId};

#[derive(Debug, Default)]
pub struct LeafSet {
    leaves: Vec<Leaf>,
    slots: HashMap<LeafId, usize>,
}

impl LeafSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a leaf; ids must be unique within the set.
    pub fn push(&mut self, leaf: Leaf) -> Result<(), DelaunayError> {
        let id = leaf.id();
        if self.slots.contains_key(&id) {
            return Err(DelaunayError::ProtocolViolation(format!("leaf {id} placed twice")));
        }
        self.slots.insert(id, self.leaves.len());
        self.leaves.push(leaf);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Local slot of leaf `id`, or [`DelaunayError::UnknownLeaf`].
    pub fn slot(&self, id: LeafId) -> Result<usize, DelaunayError> {
        self.slots.get(&id).copied().ok_or(DelaunayError::UnknownLeaf(id))
    }

    pub fn contains(&self, id: LeafId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn get(&self, id: LeafId) -> Option<&Leaf> {
        self.slots.get(&id).map(|&s| &self.leaves[s])
    }

    pub fn get_mut(&mut self, id: LeafId) -> Option<&mut Leaf> {
        self.slots.get(&id).map(|&s| &mut self.leaves[s])
    }

    pub fn ids(&self) -> Vec<LeafId> {
        self.leaves.iter().map(Leaf::id).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Leaf> {
        self.leaves.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Leaf> {
        self.leaves.iter_mut()
    }

    pub fn as_mut_slice(&mut self) -> &mut [Leaf] {
        &mut self.leaves
    }

    pub fn validate_all(&self) -> Result<(), DelaunayError> {
        self.leaves.iter().try_for_each(Leaf::validate_invariants)
    }
}

impl<'a> IntoIterator for &'a LeafSet {
    type Item = &'a Leaf;
    type IntoIter = std::slice::Iter<'a, Leaf>;

    fn into_iter(self) -> Self::IntoIter {
        self.leaves.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposition::KdDecomposition;
    use crate::geometry::Domain;
    use crate::leaf::LeafSnapshot;

    #[test]
    fn routes_by_id() {
        let pts = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let dom = Domain::open(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let d = KdDecomposition::with_target(&pts, &dom, 2).unwrap();
        let mut set = LeafSet::new();
        let snap = LeafSnapshot::from_spec(&d.leaves[1], &d, &pts, 0);
        set.push(Leaf::from_snapshot(snap.clone()).unwrap()).unwrap();
        assert_eq!(set.slot(1), Ok(0));
        assert_eq!(set.slot(0), Err(DelaunayError::UnknownLeaf(0)));
        assert!(matches!(
            set.push(Leaf::from_snapshot(snap).unwrap()),
            Err(DelaunayError::ProtocolViolation(_))
        ));
        assert_eq!(set.ids(), vec![1]);
    }
}
