//! Nodes of the triangulation and the movement-listener seam.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::core::triangulation::{EdgeKey, NodeKey, TetKey, Triangulation};

/// A vertex of the triangulation, carrying a user payload.
///
/// The record stores no references back into the arenas other than its
/// incidence lists, so it can be read while other parts of the structure are
/// being rewritten. A quarter of the volume of every incident tetrahedron is
/// attributed to the node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpaceNode<T> {
    id: u64,
    position: [f64; 3],
    payload: T,
    pub(crate) edges: SmallVec<[EdgeKey; 8]>,
    pub(crate) tetrahedra: SmallVec<[TetKey; 16]>,
    volume: f64,
}

impl<T> SpaceNode<T> {
    pub(crate) fn new(id: u64, position: [f64; 3], payload: T) -> Self {
        Self {
            id,
            position,
            payload,
            edges: SmallVec::new(),
            tetrahedra: SmallVec::new(),
            volume: 0.0,
        }
    }

    /// Identifier unique within the owning triangulation, monotonically
    /// assigned at creation.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current coordinate.
    #[must_use]
    pub fn position(&self) -> [f64; 3] {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: [f64; 3]) {
        self.position = position;
    }

    /// The user payload.
    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Mutable access to the user payload.
    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    /// Volume attributed to this node: a quarter of each incident
    /// tetrahedron.
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub(crate) fn change_volume(&mut self, delta: f64) {
        self.volume += delta;
    }

    pub(crate) fn add_edge(&mut self, edge: EdgeKey) {
        self.edges.push(edge);
    }

    pub(crate) fn remove_edge(&mut self, edge: EdgeKey) {
        if let Some(index) = self.edges.iter().position(|&e| e == edge) {
            self.edges.swap_remove(index);
        }
    }

    pub(crate) fn add_tetrahedron(&mut self, tetrahedron: TetKey) {
        self.tetrahedra.push(tetrahedron);
    }

    pub(crate) fn remove_tetrahedron(&mut self, tetrahedron: TetKey) {
        if let Some(index) = self.tetrahedra.iter().position(|&t| t == tetrahedron) {
            self.tetrahedra.swap_remove(index);
        }
    }
}

/// Observer of node lifecycle and movement events.
///
/// All methods default to doing nothing, so implementors override only the
/// events they care about. Listeners are invoked before and after each
/// structural change; during a "before" callback the triangulation still
/// reflects the old state.
#[allow(unused_variables)]
pub trait MovementListener<T> {
    /// A node is about to be inserted. When the insertion point lies inside
    /// a finite tetrahedron, `host` names its four corners.
    fn node_about_to_be_added(
        &mut self,
        triangulation: &Triangulation<T>,
        node: NodeKey,
        position: [f64; 3],
        host: Option<[NodeKey; 4]>,
    ) {
    }

    /// A node has been inserted and linked.
    fn node_added(&mut self, triangulation: &Triangulation<T>, node: NodeKey) {}

    /// A node is about to move by `delta` while keeping its links.
    fn node_about_to_move(
        &mut self,
        triangulation: &Triangulation<T>,
        node: NodeKey,
        delta: [f64; 3],
    ) {
    }

    /// A node has moved and the Delaunay property has been restored.
    fn node_moved(&mut self, triangulation: &Triangulation<T>, node: NodeKey) {}

    /// A node is about to be unlinked from the triangulation.
    fn node_about_to_be_removed(&mut self, triangulation: &Triangulation<T>, node: NodeKey) {}

    /// A node has been unlinked; its record is still readable.
    fn node_removed(&mut self, triangulation: &Triangulation<T>, node: NodeKey) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_accumulates_deltas() {
        let mut node = SpaceNode::new(0, [0.0; 3], ());
        node.change_volume(2.5);
        node.change_volume(-1.0);
        assert!((node.volume() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn incidence_lists_add_and_remove() {
        let mut node: SpaceNode<()> = SpaceNode::new(1, [1.0, 2.0, 3.0], ());
        let mut tets = slotmap::SlotMap::<TetKey, ()>::with_key();
        let a = tets.insert(());
        let b = tets.insert(());
        node.add_tetrahedron(a);
        node.add_tetrahedron(b);
        node.remove_tetrahedron(a);
        assert_eq!(node.tetrahedra.as_slice(), &[b]);
        node.remove_tetrahedron(a);
        assert_eq!(node.tetrahedra.len(), 1);
    }
}
