//! Edges of the triangulation.
//!
//! An edge exists only while at least one tetrahedron is incident to it;
//! the owning [`Triangulation`](crate::core::triangulation::Triangulation)
//! drops the record from the arena when the last incident tetrahedron
//! unregisters. Edges accumulate the cross-section areas contributed by
//! their incident tetrahedra.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::core::triangulation::{NodeKey, TetKey};
use crate::error::TriangulationError;

/// An edge between two nodes. An endpoint of `None` marks a connection to
/// the virtual point at infinity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    pub(crate) a: Option<NodeKey>,
    pub(crate) b: Option<NodeKey>,
    pub(crate) tetrahedra: SmallVec<[TetKey; 8]>,
    cross_section_area: f64,
}

impl Edge {
    pub(crate) fn new(a: Option<NodeKey>, b: Option<NodeKey>) -> Self {
        Self {
            a,
            b,
            tetrahedra: SmallVec::new(),
            cross_section_area: 0.0,
        }
    }

    /// The endpoint opposite to `node`.
    pub fn opposite(&self, node: NodeKey) -> Result<Option<NodeKey>, TriangulationError> {
        if self.a == Some(node) {
            Ok(self.b)
        } else if self.b == Some(node) {
            Ok(self.a)
        } else {
            Err(TriangulationError::NotIncident("edge"))
        }
    }

    /// Whether this edge connects exactly the two given endpoints.
    #[must_use]
    pub fn connects(&self, a: Option<NodeKey>, b: Option<NodeKey>) -> bool {
        (self.a == a && self.b == b) || (self.a == b && self.b == a)
    }

    /// Total cross-section area contributed by the incident tetrahedra.
    #[must_use]
    pub fn cross_section_area(&self) -> f64 {
        self.cross_section_area
    }

    pub(crate) fn change_cross_section_area(&mut self, delta: f64) {
        self.cross_section_area += delta;
    }

    pub(crate) fn add_tetrahedron(&mut self, tetrahedron: TetKey) {
        self.tetrahedra.push(tetrahedron);
    }

    /// Unregisters a tetrahedron. Returns `true` when no incident
    /// tetrahedron remains and the edge should be dropped.
    pub(crate) fn remove_tetrahedron(&mut self, tetrahedron: TetKey) -> bool {
        if let Some(index) = self.tetrahedra.iter().position(|&t| t == tetrahedron) {
            self.tetrahedra.swap_remove(index);
        }
        self.tetrahedra.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn opposite_returns_the_other_endpoint() {
        let mut nodes = SlotMap::<NodeKey, ()>::with_key();
        let a = nodes.insert(());
        let b = nodes.insert(());
        let edge = Edge::new(Some(a), Some(b));
        assert_eq!(edge.opposite(a).unwrap(), Some(b));
        assert_eq!(edge.opposite(b).unwrap(), Some(a));
        let c = nodes.insert(());
        assert!(edge.opposite(c).is_err());
    }

    #[test]
    fn connects_ignores_endpoint_order() {
        let mut nodes = SlotMap::<NodeKey, ()>::with_key();
        let a = nodes.insert(());
        let b = nodes.insert(());
        let edge = Edge::new(Some(a), Some(b));
        assert!(edge.connects(Some(b), Some(a)));
        assert!(!edge.connects(Some(a), None));
    }

    #[test]
    fn last_tetrahedron_removal_signals_drop() {
        let mut nodes = SlotMap::<NodeKey, ()>::with_key();
        let a = nodes.insert(());
        let b = nodes.insert(());
        let mut tets = SlotMap::<TetKey, ()>::with_key();
        let t1 = tets.insert(());
        let t2 = tets.insert(());
        let mut edge = Edge::new(Some(a), Some(b));
        edge.add_tetrahedron(t1);
        edge.add_tetrahedron(t2);
        assert!(!edge.remove_tetrahedron(t1));
        assert!(edge.remove_tetrahedron(t2));
    }
}
