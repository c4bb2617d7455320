//! The triangulation context and the node-level operations on it.
//!
//! All elements live in generation-checked arenas owned by
//! [`Triangulation`]; handles returned to callers stay cheap to copy and
//! detect use-after-free instead of aliasing a recycled slot. Everything
//! that mutates the structure goes through `&mut self`, so there is no
//! hidden shared state and two triangulations never interfere.

use std::collections::VecDeque;
use std::mem;

use rand::rngs::StdRng;
use rand::SeedableRng;
use slotmap::{new_key_type, SlotMap};

use crate::core::edge::Edge;
use crate::core::node::{MovementListener, SpaceNode};
use crate::core::organizer::OpenTriangleOrganizer;
use crate::core::tetrahedron::Tetrahedron;
use crate::core::triangle::Triangle;
use crate::error::{SpatialError, TriangulationError};
use crate::geometry::vector::{add, dot, normalized, scale, sub};

new_key_type! {
    /// Handle to a node.
    pub struct NodeKey;
    /// Handle to a tetrahedron.
    pub struct TetKey;
    /// Handle to a triangle.
    pub struct TriKey;
    /// Handle to an edge.
    pub struct EdgeKey;
}

/// Optional callbacks observing the lifecycle of tetrahedra, mainly useful
/// for instrumentation in tests and debugging tools.
#[derive(Default)]
pub struct InstrumentationHooks {
    /// Called after a tetrahedron has been created and linked.
    pub on_tetrahedron_created: Option<Box<dyn FnMut(TetKey)>>,
    /// Called after a tetrahedron has been unlinked and freed.
    pub on_tetrahedron_removed: Option<Box<dyn FnMut(TetKey)>>,
}

/// An incremental three-dimensional Delaunay triangulation.
///
/// Nodes carry a payload of type `T`. The triangulation is built by
/// inserting nodes one at a time, and stays Delaunay under node movement
/// and removal. The convex hull is closed by infinite tetrahedra whose
/// apex is the virtual point at infinity, so every triangle always borders
/// two tetrahedra once the structure is bootstrapped.
pub struct Triangulation<T> {
    pub(crate) nodes: SlotMap<NodeKey, SpaceNode<T>>,
    pub(crate) tets: SlotMap<TetKey, Tetrahedron>,
    pub(crate) triangles: SlotMap<TriKey, Triangle>,
    pub(crate) edges: SlotMap<EdgeKey, Edge>,
    pub(crate) rng: StdRng,
    next_node_id: u64,
    checking_index: i64,
    listeners: Vec<Box<dyn MovementListener<T>>>,
    hooks: Option<InstrumentationHooks>,
}

impl<T> Default for Triangulation<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Triangulation<T> {
    /// Creates an empty triangulation with an operating-system seeded walk.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Creates an empty triangulation whose stochastic walk is seeded, so
    /// runs are reproducible.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            tets: SlotMap::with_key(),
            triangles: SlotMap::with_key(),
            edges: SlotMap::with_key(),
            rng,
            next_node_id: 0,
            checking_index: 0,
            listeners: Vec::new(),
            hooks: None,
        }
    }

    /// Registers a movement listener that observes node lifecycle events.
    pub fn register_listener(&mut self, listener: Box<dyn MovementListener<T>>) {
        self.listeners.push(listener);
    }

    /// Installs instrumentation hooks, replacing any previous ones.
    pub fn set_instrumentation(&mut self, hooks: InstrumentationHooks) {
        self.hooks = Some(hooks);
    }

    pub(crate) fn notify_tetrahedron_created(&mut self, tetrahedron: TetKey) {
        if let Some(hooks) = &mut self.hooks {
            if let Some(callback) = &mut hooks.on_tetrahedron_created {
                callback(tetrahedron);
            }
        }
    }

    pub(crate) fn notify_tetrahedron_removed(&mut self, tetrahedron: TetKey) {
        if let Some(hooks) = &mut self.hooks {
            if let Some(callback) = &mut hooks.on_tetrahedron_removed {
                callback(tetrahedron);
            }
        }
    }

    fn dispatch_listeners(
        &mut self,
        mut event: impl FnMut(&mut dyn MovementListener<T>, &Triangulation<T>),
    ) {
        let mut listeners = mem::take(&mut self.listeners);
        for listener in &mut listeners {
            event(listener.as_mut(), self);
        }
        self.listeners = listeners;
    }

    // ---- arena access -------------------------------------------------

    /// The node record behind a handle, if it is still alive.
    #[must_use]
    pub fn node(&self, node: NodeKey) -> Option<&SpaceNode<T>> {
        self.nodes.get(node)
    }

    /// Mutable access to a node record, if it is still alive.
    pub fn node_mut(&mut self, node: NodeKey) -> Option<&mut SpaceNode<T>> {
        self.nodes.get_mut(node)
    }

    /// The tetrahedron record behind a handle, if it is still alive.
    #[must_use]
    pub fn tetrahedron(&self, tetrahedron: TetKey) -> Option<&Tetrahedron> {
        self.tets.get(tetrahedron)
    }

    /// Handles of all live nodes.
    pub fn node_keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.nodes.keys()
    }

    /// Handles of all live tetrahedra, including the infinite ones.
    pub fn tetrahedron_keys(&self) -> impl Iterator<Item = TetKey> + '_ {
        self.tets.keys()
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live tetrahedra, including the infinite ones.
    #[must_use]
    pub fn tetrahedron_count(&self) -> usize {
        self.tets.len()
    }

    /// Number of finite tetrahedra.
    #[must_use]
    pub fn finite_tetrahedron_count(&self) -> usize {
        self.tets.values().filter(|t| !t.is_infinite()).count()
    }

    pub(crate) fn tet(&self, key: TetKey) -> Result<&Tetrahedron, TriangulationError> {
        self.tets.get(key).ok_or(TriangulationError::StaleHandle)
    }

    pub(crate) fn tet_mut(&mut self, key: TetKey) -> Result<&mut Tetrahedron, TriangulationError> {
        self.tets
            .get_mut(key)
            .ok_or(TriangulationError::StaleHandle)
    }

    pub(crate) fn tri(&self, key: TriKey) -> Result<&Triangle, TriangulationError> {
        self.triangles
            .get(key)
            .ok_or(TriangulationError::StaleHandle)
    }

    pub(crate) fn tri_mut(&mut self, key: TriKey) -> Result<&mut Triangle, TriangulationError> {
        self.triangles
            .get_mut(key)
            .ok_or(TriangulationError::StaleHandle)
    }

    pub(crate) fn node_position(&self, node: NodeKey) -> Result<[f64; 3], TriangulationError> {
        self.nodes
            .get(node)
            .map(SpaceNode::position)
            .ok_or(TriangulationError::StaleHandle)
    }

    /// Corner positions of a finite triangle.
    pub(crate) fn tri_positions(
        &self,
        triangle: TriKey,
    ) -> Result<[[f64; 3]; 3], TriangulationError> {
        let nodes = self.tri(triangle)?.nodes();
        let [Some(a), Some(b), Some(c)] = nodes else {
            return Err(TriangulationError::NotIncident("finite triangle"));
        };
        Ok([
            self.node_position(a)?,
            self.node_position(b)?,
            self.node_position(c)?,
        ])
    }

    /// Corner positions of a finite tetrahedron.
    pub(crate) fn tet_positions(
        &self,
        tetrahedron: TetKey,
    ) -> Result<[[f64; 3]; 4], TriangulationError> {
        let nodes = self.tet(tetrahedron)?.nodes();
        let [Some(a), Some(b), Some(c), Some(d)] = nodes else {
            return Err(TriangulationError::NotIncident("finite tetrahedron"));
        };
        Ok([
            self.node_position(a)?,
            self.node_position(b)?,
            self.node_position(c)?,
            self.node_position(d)?,
        ])
    }

    // ---- triangle wrappers --------------------------------------------

    /// Refreshes the cached plane equation of a triangle. Infinite
    /// triangles carry no plane and are skipped.
    pub(crate) fn update_triangle_plane(
        &mut self,
        triangle: TriKey,
    ) -> Result<(), TriangulationError> {
        if self.tri(triangle)?.is_infinite() {
            return Ok(());
        }
        let positions = self.tri_positions(triangle)?;
        self.tri_mut(triangle)?.update_plane_equation(&positions)
    }

    /// Defines the upper side of a triangle to be the side `point` lies on.
    pub(crate) fn orient_triangle_to_side(
        &mut self,
        triangle: TriKey,
        point: &[f64; 3],
    ) -> Result<(), TriangulationError> {
        let positions = self.tri_positions(triangle)?;
        self.tri_mut(triangle)?.orient_to_side(&positions, point)
    }

    /// Defines the upper side of a triangle to be its open side, by
    /// orienting away from the apex of the one incident tetrahedron. When
    /// that tetrahedron is infinite there is no apex to orient against and
    /// the orientation is left untouched.
    pub(crate) fn orient_triangle_to_open_side(
        &mut self,
        triangle: TriKey,
    ) -> Result<(), TriangulationError> {
        let record = self.tri(triangle)?;
        if record.is_infinite() {
            return Ok(());
        }
        let closed_side = match (record.tetrahedra[0], record.tetrahedra[1]) {
            (None, None) => return Err(TriangulationError::TwoOpenSides),
            (None, Some(t)) | (Some(t), None) => t,
            (Some(_), Some(_)) => return Err(TriangulationError::NoOpenSide),
        };
        if self.tet(closed_side)?.is_infinite() {
            return Ok(());
        }
        let apex = self
            .tet(closed_side)?
            .opposite_node_of(triangle)?
            .ok_or(TriangulationError::MissingNeighbor)?;
        let apex_position = self.node_position(apex)?;
        self.orient_triangle_to_side(triangle, &apex_position)?;
        self.tri_mut(triangle)?.flip_upper_side();
        Ok(())
    }

    /// Drops a triangle from the arena once nothing borders it any more.
    pub(crate) fn drop_triangle_if_orphaned(&mut self, triangle: TriKey) {
        if self
            .triangles
            .get(triangle)
            .is_some_and(Triangle::is_completely_open)
        {
            self.triangles.remove(triangle);
        }
    }

    // ---- edge management ----------------------------------------------

    /// Creates an edge and registers it with both endpoints.
    pub(crate) fn create_edge(
        &mut self,
        a: Option<NodeKey>,
        b: Option<NodeKey>,
    ) -> Result<EdgeKey, TriangulationError> {
        let key = self.edges.insert(Edge::new(a, b));
        for endpoint in [a, b].into_iter().flatten() {
            self.nodes
                .get_mut(endpoint)
                .ok_or(TriangulationError::StaleHandle)?
                .add_edge(key);
        }
        Ok(key)
    }

    /// The edge between two nodes, created on demand.
    pub(crate) fn search_edge(
        &mut self,
        a: NodeKey,
        b: NodeKey,
    ) -> Result<EdgeKey, TriangulationError> {
        let incident = &self
            .nodes
            .get(a)
            .ok_or(TriangulationError::StaleHandle)?
            .edges;
        for &edge in incident {
            if self
                .edges
                .get(edge)
                .is_some_and(|e| e.connects(Some(a), Some(b)))
            {
                return Ok(edge);
            }
        }
        self.create_edge(Some(a), Some(b))
    }

    /// Unlinks an edge from its endpoints and frees it.
    pub(crate) fn drop_edge(&mut self, edge: EdgeKey) -> Result<(), TriangulationError> {
        let record = self
            .edges
            .remove(edge)
            .ok_or(TriangulationError::StaleHandle)?;
        for endpoint in [record.a, record.b].into_iter().flatten() {
            if let Some(node) = self.nodes.get_mut(endpoint) {
                node.remove_edge(edge);
            }
        }
        Ok(())
    }

    // ---- node lifecycle -----------------------------------------------

    /// Adds a node at `position` carrying `payload`.
    ///
    /// The first four nodes are connected by provisional edges only; with
    /// the fourth node those edges are replaced by the initial tetrahedron
    /// and its hull. From the fifth node on this is a regular insertion.
    /// Fails with a [`PositionError`](crate::error::PositionError) when
    /// `position` coincides with an existing node.
    pub fn create_node(&mut self, position: [f64; 3], payload: T) -> Result<NodeKey, SpatialError> {
        let anchor = self.nodes.keys().next();
        match anchor {
            None => {
                let id = self.take_node_id();
                Ok(self.nodes.insert(SpaceNode::new(id, position, payload)))
            }
            Some(anchor) => self.create_node_near(anchor, position, payload),
        }
    }

    /// Adds a node like [`create_node`](Self::create_node), but starts the
    /// locating walk at a tetrahedron incident to `anchor`.
    pub fn create_node_near(
        &mut self,
        anchor: NodeKey,
        position: [f64; 3],
        payload: T,
    ) -> Result<NodeKey, SpatialError> {
        if !self.nodes.contains_key(anchor) {
            return Err(TriangulationError::StaleHandle.into());
        }
        let id = self.take_node_id();
        let node = self.nodes.insert(SpaceNode::new(id, position, payload));
        match self.attach_node(anchor, node) {
            Ok(()) => Ok(node),
            Err(error) => {
                self.nodes.remove(node);
                Err(error)
            }
        }
    }

    fn take_node_id(&mut self) -> u64 {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    fn attach_node(&mut self, anchor: NodeKey, node: NodeKey) -> Result<(), SpatialError> {
        let anchor_record = self
            .nodes
            .get(anchor)
            .ok_or(TriangulationError::StaleHandle)?;
        if let Some(&start) = anchor_record.tetrahedra.first() {
            self.insert_node(node, start)?;
            return Ok(());
        }
        if anchor_record.edges.len() == 2 {
            // Four nodes collected: replace the provisional edges by the
            // initial tetrahedron.
            let first_edge = anchor_record.edges[0];
            let second_edge = anchor_record.edges[1];
            let a = self
                .edges
                .get(first_edge)
                .ok_or(TriangulationError::StaleHandle)?
                .opposite(anchor)?
                .ok_or(TriangulationError::MissingNeighbor)?;
            let b = self
                .edges
                .get(second_edge)
                .ok_or(TriangulationError::StaleHandle)?
                .opposite(anchor)?
                .ok_or(TriangulationError::MissingNeighbor)?;
            for bootstrap_node in [anchor, a, b] {
                let incident = mem::take(
                    &mut self
                        .nodes
                        .get_mut(bootstrap_node)
                        .ok_or(TriangulationError::StaleHandle)?
                        .edges,
                );
                for edge in incident {
                    if let Some(record) = self.edges.remove(edge) {
                        for endpoint in [record.a, record.b].into_iter().flatten() {
                            if endpoint != bootstrap_node {
                                if let Some(other) = self.nodes.get_mut(endpoint) {
                                    other.remove_edge(edge);
                                }
                            }
                        }
                    }
                }
            }
            self.create_initial_tetrahedron(anchor, node, a, b)?;
        } else {
            self.create_edge(Some(anchor), Some(node))?;
            let edges = &self
                .nodes
                .get(anchor)
                .ok_or(TriangulationError::StaleHandle)?
                .edges;
            if edges.len() == 2 {
                let older_edge = edges[0];
                let other = self
                    .edges
                    .get(older_edge)
                    .ok_or(TriangulationError::StaleHandle)?
                    .opposite(anchor)?
                    .ok_or(TriangulationError::MissingNeighbor)?;
                self.create_edge(Some(other), Some(node))?;
            }
        }
        Ok(())
    }

    /// Walks from `start` to a tetrahedron containing `coordinate`. An
    /// infinite result means the coordinate lies outside the convex hull.
    pub(crate) fn locate_tetrahedron(
        &mut self,
        start: TetKey,
        coordinate: &[f64; 3],
    ) -> Result<TetKey, SpatialError> {
        let mut current = start;
        if self.tet(current)?.is_infinite() {
            let triangle0 = self.tet(current)?.opposite_triangle_of(None)?;
            current = self
                .tri(triangle0)?
                .opposite_tetrahedron(Some(current))?
                .ok_or(TriangulationError::MissingNeighbor)?;
        }
        let mut last: Option<TetKey> = None;
        while last != Some(current) && !self.tet(current)?.is_infinite() {
            last = Some(current);
            current = self.walk_to_point(current, coordinate)?;
        }
        Ok(current)
    }

    /// Inserts an already-allocated node into the triangulation, starting
    /// the locating walk at `start`. All tetrahedra whose circumsphere
    /// strictly contains the position are torn out and the cavity is
    /// re-filled star-shaped around the node.
    pub(crate) fn insert_node(
        &mut self,
        node: NodeKey,
        start: TetKey,
    ) -> Result<TetKey, SpatialError> {
        let position = self.node_position(node)?;
        let insertion_start = self.locate_tetrahedron(start, &position)?;
        let host = {
            let record = self.tet(insertion_start)?;
            let nodes = record.nodes();
            match nodes {
                [Some(a), Some(b), Some(c), Some(d)] => Some([a, b, c, d]),
                _ => None,
            }
        };
        self.dispatch_listeners(|listener, triangulation| {
            listener.node_about_to_be_added(triangulation, node, position, host);
        });
        let mut organizer = OpenTriangleOrganizer::new();
        let mut queue: VecDeque<TriKey> = VecDeque::new();
        let mut outer_triangles: Vec<TriKey> = Vec::new();
        self.process_tetrahedron(insertion_start, &mut queue, &mut organizer)?;
        while let Some(current) = queue.pop_front() {
            if !self.triangles.contains_key(current) {
                continue;
            }
            let opposite = self.tri(current)?.opposite_tetrahedron(None)?;
            if let Some(opposite) = opposite {
                if self.is_truly_inside_sphere(opposite, &position)? {
                    self.process_tetrahedron(opposite, &mut queue, &mut organizer)?;
                } else {
                    outer_triangles.push(current);
                }
            }
        }
        let mut created: Option<TetKey> = None;
        for triangle in outer_triangles {
            if self
                .triangles
                .get(triangle)
                .is_some_and(|t| !t.is_completely_open())
            {
                created =
                    Some(self.create_tetrahedron_cone(triangle, Some(node), &mut organizer)?);
            }
        }
        self.dispatch_listeners(|listener, triangulation| {
            listener.node_added(triangulation, node);
        });
        Ok(created.ok_or(TriangulationError::EmptyCavity)?)
    }

    /// Tears one tetrahedron out of the triangulation, queueing its
    /// triangles for the cavity flood.
    fn process_tetrahedron(
        &mut self,
        tetrahedron: TetKey,
        queue: &mut VecDeque<TriKey>,
        organizer: &mut OpenTriangleOrganizer,
    ) -> Result<(), TriangulationError> {
        let triangles = self.tet(tetrahedron)?.triangles();
        self.remove_tetrahedron(tetrahedron)?;
        for triangle in triangles {
            if self.tri(triangle)?.is_completely_open() {
                organizer.remove_triangle(self, triangle)?;
                self.triangles.remove(triangle);
            } else {
                queue.push_back(triangle);
                organizer.put_triangle(self, triangle)?;
            }
        }
        Ok(())
    }

    /// Moves a node by `delta`.
    pub fn move_node_by(&mut self, node: NodeKey, delta: [f64; 3]) -> Result<(), SpatialError> {
        let target = add(&self.node_position(node)?, &delta);
        self.move_node_to(node, target)
    }

    /// Moves a node to `new_position`.
    ///
    /// When no incident tetrahedron is turned inside out by the movement,
    /// the node keeps all its links and a flip sequence restores the
    /// Delaunay property. Otherwise the node is unlinked and re-inserted at
    /// the new position. A rejected position leaves the triangulation with
    /// the node at its old coordinate and reports the suggested
    /// alternative.
    pub fn move_node_to(
        &mut self,
        node: NodeKey,
        new_position: [f64; 3],
    ) -> Result<(), SpatialError> {
        if self.check_if_triangulation_is_still_valid(node, &new_position)? {
            let delta = sub(&new_position, &self.node_position(node)?);
            self.dispatch_listeners(|listener, triangulation| {
                listener.node_about_to_move(triangulation, node, delta);
            });
            self.nodes
                .get_mut(node)
                .ok_or(TriangulationError::StaleHandle)?
                .set_position(new_position);
            self.restore_delaunay(node)?;
            self.dispatch_listeners(|listener, triangulation| {
                listener.node_moved(triangulation, node);
            });
            Ok(())
        } else {
            let start = self
                .nodes
                .get(node)
                .ok_or(TriangulationError::StaleHandle)?
                .tetrahedra
                .first()
                .copied()
                .ok_or(TriangulationError::MissingNeighbor)?;
            let located = self.locate_tetrahedron(start, &new_position)?;
            let fallback = self.detach_node(node)?;
            let insert_position = if self.tets.contains_key(located) {
                located
            } else {
                fallback.ok_or(TriangulationError::EmptyCavity)?
            };
            let old_position = self.node_position(node)?;
            self.nodes
                .get_mut(node)
                .ok_or(TriangulationError::StaleHandle)?
                .set_position(new_position);
            match self.insert_node(node, insert_position) {
                Ok(_) => Ok(()),
                Err(error @ SpatialError::Position(_)) => {
                    self.nodes
                        .get_mut(node)
                        .ok_or(TriangulationError::StaleHandle)?
                        .set_position(old_position);
                    self.insert_node(node, insert_position)?;
                    Err(error)
                }
                Err(other) => Err(other),
            }
        }
    }

    /// Removes a node, re-triangulating the hole it leaves behind.
    pub fn remove_node(&mut self, node: NodeKey) -> Result<(), TriangulationError> {
        let linked = !self
            .nodes
            .get(node)
            .ok_or(TriangulationError::StaleHandle)?
            .tetrahedra
            .is_empty();
        if linked {
            self.detach_node(node)?;
        } else {
            self.dispatch_listeners(|listener, triangulation| {
                listener.node_about_to_be_removed(triangulation, node);
            });
            self.dispatch_listeners(|listener, triangulation| {
                listener.node_removed(triangulation, node);
            });
        }
        let leftover: Vec<EdgeKey> = self
            .nodes
            .get(node)
            .ok_or(TriangulationError::StaleHandle)?
            .edges
            .to_vec();
        for edge in leftover {
            self.drop_edge(edge)?;
        }
        self.nodes.remove(node);
        Ok(())
    }

    /// Unlinks a node from the triangulation and fills the hole, keeping
    /// the node record alive for re-insertion. Returns a tetrahedron
    /// created while filling.
    fn detach_node(&mut self, node: NodeKey) -> Result<Option<TetKey>, TriangulationError> {
        self.dispatch_listeners(|listener, triangulation| {
            listener.node_about_to_be_removed(triangulation, node);
        });
        let position = self.node_position(node)?;
        let mut organizer = OpenTriangleOrganizer::new();
        let mut messed_up: Vec<TetKey> = Vec::new();
        let incident: Vec<TetKey> = self
            .nodes
            .get(node)
            .ok_or(TriangulationError::StaleHandle)?
            .tetrahedra
            .to_vec();
        for tetrahedron in incident {
            if !self.tets.contains_key(tetrahedron) {
                continue;
            }
            let opposite_triangle = self.tet(tetrahedron)?.opposite_triangle_of(Some(node))?;
            organizer.put_triangle(self, opposite_triangle)?;
            let opposite_tetrahedron = self
                .tri(opposite_triangle)?
                .opposite_tetrahedron(Some(tetrahedron))?;
            let triangles = self.tet(tetrahedron)?.triangles();
            self.remove_tetrahedron(tetrahedron)?;
            for triangle in triangles {
                if triangle != opposite_triangle {
                    self.drop_triangle_if_orphaned(triangle);
                }
            }
            if let Some(opposite) = opposite_tetrahedron {
                if !self.tet(opposite)?.is_infinite()
                    && self.is_inside_sphere(opposite, &position)?
                {
                    messed_up.push(opposite);
                }
            }
        }
        for tetrahedron in messed_up {
            if self.tets.contains_key(tetrahedron) {
                organizer.remove_all_tetrahedra_in_sphere(self, tetrahedron)?;
            }
        }
        organizer.triangulate(self)?;
        self.dispatch_listeners(|listener, triangulation| {
            listener.node_removed(triangulation, node);
        });
        Ok(organizer.a_new_tetrahedron())
    }

    /// Whether moving `node` to `new_position` keeps every incident
    /// tetrahedron positively oriented, so the links can be kept.
    fn check_if_triangulation_is_still_valid(
        &mut self,
        node: NodeKey,
        new_position: &[f64; 3],
    ) -> Result<bool, SpatialError> {
        let position = self.node_position(node)?;
        let incident: Vec<TetKey> = self
            .nodes
            .get(node)
            .ok_or(TriangulationError::StaleHandle)?
            .tetrahedra
            .to_vec();
        for tetrahedron in incident {
            let record = self.tet(tetrahedron)?;
            if record.is_flat() {
                return Ok(false);
            }
            if record.is_infinite() {
                // A hull node may only keep its links if the whole
                // triangulation is a single tetrahedron.
                let triangle0 = record.opposite_triangle_of(None)?;
                let inner = self
                    .tri(triangle0)?
                    .opposite_tetrahedron(Some(tetrahedron))?
                    .ok_or(TriangulationError::MissingNeighbor)?;
                for i in 0..4 {
                    let side = self.tet(inner)?.triangles()[i];
                    let beyond = self
                        .tri(side)?
                        .opposite_tetrahedron(Some(inner))?
                        .ok_or(TriangulationError::MissingNeighbor)?;
                    if !self.tet(beyond)?.is_infinite() {
                        return Ok(false);
                    }
                }
                return Ok(true);
            }
            let triangle = record.opposite_triangle_of(Some(node))?;
            self.update_triangle_plane(triangle)?;
            let positions = self.tri_positions(triangle)?;
            if self.tri(triangle)?.orientation(&positions, &position, new_position) != 1 {
                self.test_position(tetrahedron, new_position)?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn new_checking_index(&mut self) -> i64 {
        self.checking_index = (self.checking_index + 1) % 2_000_000_000;
        self.checking_index
    }

    /// Restores the Delaunay property around a node after it moved in
    /// place, by flipping until no incident violation remains. Sections
    /// that the flip algorithm cannot fix are torn out and re-triangulated
    /// by [`clean_up`](Self::clean_up).
    pub(crate) fn restore_delaunay(&mut self, node: NodeKey) -> Result<(), TriangulationError> {
        let mut active: VecDeque<TetKey> = VecDeque::new();
        let incident: Vec<TetKey> = self
            .nodes
            .get(node)
            .ok_or(TriangulationError::StaleHandle)?
            .tetrahedra
            .to_vec();
        for tetrahedron in incident {
            self.update_circum_sphere_after_move(tetrahedron, node)?;
            active.push_back(tetrahedron);
        }
        while !active.is_empty() {
            let checking_index = self.new_checking_index();
            let mut problem_tetrahedra: Vec<TetKey> = Vec::new();
            let mut flat_tetrahedra: Vec<TetKey> = Vec::new();
            while let Some(tetrahedron) = active.pop_front() {
                if !self.tets.contains_key(tetrahedron) {
                    continue;
                }
                let first_face = usize::from(self.tet(tetrahedron)?.is_infinite());
                'faces: for i in first_face..4 {
                    let triangle_i = self.tet(tetrahedron)?.triangles()[i];
                    if self.tri_mut(triangle_i)?.was_checked_already(checking_index) {
                        continue;
                    }
                    let tetrahedron_i = self
                        .tri(triangle_i)?
                        .opposite_tetrahedron(Some(tetrahedron))?
                        .ok_or(TriangulationError::MissingNeighbor)?;
                    let Some(node_i) = self.tet(tetrahedron_i)?.opposite_node_of(triangle_i)?
                    else {
                        continue;
                    };
                    let node_i_position = self.node_position(node_i)?;
                    let violation = self.is_truly_inside_sphere(tetrahedron, &node_i_position)?
                        || (self.tet(tetrahedron)?.is_flat()
                            && self.tet(tetrahedron_i)?.is_flat());
                    if !violation {
                        continue;
                    }
                    let mut new_tetrahedra: Option<Vec<TetKey>> = None;
                    for j in first_face..4 {
                        if i == j {
                            continue;
                        }
                        let triangle_j = self.tet(tetrahedron)?.triangles()[j];
                        let tetrahedron_j = self
                            .tri(triangle_j)?
                            .opposite_tetrahedron(Some(tetrahedron))?
                            .ok_or(TriangulationError::MissingNeighbor)?;
                        if !self.is_neighbor(tetrahedron_j, tetrahedron_i)? {
                            continue;
                        }
                        let opposite_i = self.tet(tetrahedron)?.nodes()[i];
                        let opposite_j = self.tet(tetrahedron)?.nodes()[j];
                        let (Some(opposite_i), Some(opposite_j)) = (opposite_i, opposite_j)
                        else {
                            continue;
                        };
                        // Either all three tetrahedra are flat and pairwise
                        // distinct, or both neighbors have the opposing
                        // corner inside their circumsphere.
                        let all_flat = self.tet(tetrahedron)?.is_flat()
                            && self.tet(tetrahedron_i)?.is_flat()
                            && self.tet(tetrahedron_j)?.is_flat()
                            && tetrahedron_i != tetrahedron_j;
                        let position_j = self.node_position(opposite_j)?;
                        let position_i = self.node_position(opposite_i)?;
                        if all_flat
                            || (self.is_truly_inside_sphere(tetrahedron_j, &position_j)?
                                && self.is_truly_inside_sphere(tetrahedron_i, &position_i)?)
                        {
                            new_tetrahedra = Some(
                                self.flip_3_to_2(tetrahedron, tetrahedron_i, tetrahedron_j)?
                                    .to_vec(),
                            );
                            break;
                        }
                    }
                    if new_tetrahedra.is_none() {
                        let flat = self.tet(tetrahedron)?.is_flat();
                        let flat_i = self.tet(tetrahedron_i)?.is_flat();
                        if flat && flat_i && self.tet(tetrahedron)?.is_adjacent_to_node(node_i) {
                            new_tetrahedra =
                                Some(self.remove_two_flat_tetrahedra(tetrahedron, tetrahedron_i)?);
                        } else if !(flat || flat_i) {
                            new_tetrahedra = self
                                .flip_2_to_3(tetrahedron, tetrahedron_i)?
                                .map(|created| created.to_vec());
                        }
                    }
                    match new_tetrahedra {
                        Some(created) => {
                            for tetrahedron in created {
                                active.push_back(tetrahedron);
                                if self.tet(tetrahedron)?.is_flat() {
                                    flat_tetrahedra.push(tetrahedron);
                                }
                            }
                            break 'faces;
                        }
                        None => {
                            problem_tetrahedra.push(tetrahedron);
                            problem_tetrahedra.push(tetrahedron_i);
                            active.push_back(tetrahedron_i);
                        }
                    }
                }
            }
            // Leftover flat tetrahedra and unresolved violations cannot be
            // flipped away (the octahedral case); tear them out together
            // with their neighborhood and re-triangulate.
            let mut messed_up: Vec<TetKey> = Vec::new();
            for flat_tetrahedron in flat_tetrahedra {
                if !self.tets.contains_key(flat_tetrahedron)
                    || messed_up.contains(&flat_tetrahedron)
                {
                    continue;
                }
                for triangle in self.tet(flat_tetrahedron)?.triangles() {
                    let opposite = self
                        .tri(triangle)?
                        .opposite_tetrahedron(Some(flat_tetrahedron))?;
                    if let Some(opposite) = opposite {
                        if self.tets.contains_key(opposite) && !messed_up.contains(&opposite) {
                            messed_up.push(opposite);
                        }
                    }
                }
                messed_up.push(flat_tetrahedron);
            }
            for tetrahedron in problem_tetrahedra {
                if !self.tets.contains_key(tetrahedron)
                    || self.tet(tetrahedron)?.is_flat()
                    || messed_up.contains(&tetrahedron)
                {
                    continue;
                }
                for triangle in self.tet(tetrahedron)?.triangles() {
                    let opposite = self
                        .tri(triangle)?
                        .opposite_tetrahedron(Some(tetrahedron))?
                        .ok_or(TriangulationError::MissingNeighbor)?;
                    if self.tet(opposite)?.is_infinite() {
                        continue;
                    }
                    let opposite_node = self
                        .tet(opposite)?
                        .opposite_node_of(triangle)?
                        .ok_or(TriangulationError::MissingNeighbor)?;
                    let opposite_position = self.node_position(opposite_node)?;
                    if self.is_truly_inside_sphere(tetrahedron, &opposite_position)? {
                        messed_up.push(tetrahedron);
                        break;
                    }
                }
            }
            if !messed_up.is_empty() {
                for created in self.clean_up(&messed_up)? {
                    active.push_back(created);
                }
            }
        }
        Ok(())
    }

    /// Unlinks one tetrahedron during [`clean_up`](Self::clean_up),
    /// growing the candidate and node lists with its neighborhood.
    fn remove_tetrahedron_during_clean_up(
        &mut self,
        tetrahedron: TetKey,
        candidates: &mut Vec<TetKey>,
        problem_nodes: &mut Vec<NodeKey>,
        organizer: &mut OpenTriangleOrganizer,
    ) -> Result<(), TriangulationError> {
        for node in self.tet(tetrahedron)?.nodes().into_iter().flatten() {
            if !problem_nodes.contains(&node) {
                problem_nodes.push(node);
            }
        }
        let triangles = self.tet(tetrahedron)?.triangles();
        for triangle in triangles {
            let opposite = self.tri(triangle)?.opposite_tetrahedron(Some(tetrahedron))?;
            if let Some(opposite) = opposite {
                if !candidates.contains(&opposite) {
                    candidates.push(opposite);
                }
            }
        }
        self.remove_tetrahedron(tetrahedron)?;
        for triangle in triangles {
            if self.tri(triangle)?.is_completely_open() {
                organizer.remove_triangle(self, triangle)?;
                self.triangles.remove(triangle);
            } else {
                organizer.put_triangle(self, triangle)?;
            }
        }
        Ok(())
    }

    /// Fallback for violations the flip algorithm cannot resolve: removes
    /// the offending tetrahedra plus every bordering tetrahedron whose
    /// circumsphere contains one of the involved nodes, then fills the
    /// hole from scratch.
    fn clean_up(&mut self, messed_up: &[TetKey]) -> Result<Vec<TetKey>, TriangulationError> {
        let mut candidates: Vec<TetKey> = Vec::new();
        let mut problem_nodes: Vec<NodeKey> = Vec::new();
        let mut organizer = OpenTriangleOrganizer::new();
        organizer.record_new_tetrahedra();
        for &tetrahedron in messed_up {
            if self.tets.contains_key(tetrahedron) {
                self.remove_tetrahedron_during_clean_up(
                    tetrahedron,
                    &mut candidates,
                    &mut problem_nodes,
                    &mut organizer,
                )?;
                candidates.retain(|&t| t != tetrahedron);
            }
        }
        loop {
            let mut problem_tetrahedron: Option<TetKey> = None;
            'scan: for &candidate in &candidates {
                if !self.tets.contains_key(candidate) {
                    continue;
                }
                for &node in &problem_nodes {
                    if self.tet(candidate)?.is_adjacent_to_node(node) {
                        continue;
                    }
                    let position = self.node_position(node)?;
                    if self.tet(candidate)?.is_flat()
                        || self.is_inside_sphere(candidate, &position)?
                    {
                        problem_tetrahedron = Some(candidate);
                        break 'scan;
                    }
                }
            }
            match problem_tetrahedron {
                Some(found) => {
                    self.remove_tetrahedron_during_clean_up(
                        found,
                        &mut candidates,
                        &mut problem_nodes,
                        &mut organizer,
                    )?;
                    candidates.retain(|&t| t != found);
                }
                None => break,
            }
        }
        organizer.triangulate(self)?;
        Ok(organizer.take_new_tetrahedra())
    }

    /// Suggests a coordinate close to `node` for a caller whose requested
    /// position collided with it: half the shortest incident edge length,
    /// in the direction of the farthest neighbor (or outward through the
    /// hull if the node borders infinity).
    pub(crate) fn propose_new_position(
        &mut self,
        node: NodeKey,
    ) -> Result<[f64; 3], TriangulationError> {
        let position = self.node_position(node)?;
        let incident: Vec<EdgeKey> = self
            .nodes
            .get(node)
            .ok_or(TriangulationError::StaleHandle)?
            .edges
            .to_vec();
        let mut min_distance = f64::MAX;
        let mut max_distance = f64::MIN_POSITIVE;
        let mut farthest_diff: Option<[f64; 3]> = None;
        for edge in incident {
            let (opposite, first_tetrahedron) = {
                let record = self.edges.get(edge).ok_or(TriangulationError::StaleHandle)?;
                (record.opposite(node)?, record.tetrahedra.first().copied())
            };
            match opposite {
                Some(other) => {
                    let diff = sub(&self.node_position(other)?, &position);
                    let distance = dot(&diff, &diff);
                    if distance < min_distance {
                        min_distance = distance;
                    }
                    if distance > max_distance {
                        max_distance = distance;
                        farthest_diff = Some(diff);
                    }
                }
                None => {
                    if max_distance < f64::MAX {
                        max_distance = f64::MAX;
                        let some_tetrahedron =
                            first_tetrahedron.ok_or(TriangulationError::MissingNeighbor)?;
                        let triangle0 = self.tet(some_tetrahedron)?.triangles()[0];
                        self.update_triangle_plane(triangle0)?;
                        let mut diff = self.tri(triangle0)?.plane.normal();
                        let opposite = self
                            .tri(triangle0)?
                            .opposite_tetrahedron(Some(some_tetrahedron))?;
                        if let Some(opposite) = opposite {
                            if !self.tet(opposite)?.is_infinite() {
                                let outer = add(&position, &diff);
                                let apex = self
                                    .tet(opposite)?
                                    .opposite_node_of(triangle0)?
                                    .ok_or(TriangulationError::MissingNeighbor)?;
                                let apex_position = self.node_position(apex)?;
                                let positions = self.tri_positions(triangle0)?;
                                if self
                                    .tri(triangle0)?
                                    .orientation(&positions, &outer, &apex_position)
                                    >= 0
                                {
                                    diff = scale(-1.0, &diff);
                                }
                            }
                        }
                        farthest_diff = Some(diff);
                    }
                }
            }
        }
        let Some(direction) = farthest_diff else {
            return Ok(position);
        };
        Ok(add(
            &position,
            &scale(min_distance.sqrt() * 0.5, &normalized(&direction)),
        ))
    }

    // ---- queries ------------------------------------------------------

    /// The nodes connected to `node` by an edge. Hull nodes also border
    /// the virtual point at infinity, which is not reported.
    pub fn neighbor_nodes(&self, node: NodeKey) -> Result<Vec<NodeKey>, TriangulationError> {
        let record = self
            .nodes
            .get(node)
            .ok_or(TriangulationError::StaleHandle)?;
        let mut neighbors = Vec::with_capacity(record.edges.len());
        for &edge in &record.edges {
            let edge_record = self.edges.get(edge).ok_or(TriangulationError::StaleHandle)?;
            if let Some(other) = edge_record.opposite(node)? {
                neighbors.push(other);
            }
        }
        Ok(neighbors)
    }

    /// The payloads of the nodes connected to `node` by an edge, borrowed
    /// from the live triangulation.
    pub fn neighbor_payloads(&self, node: NodeKey) -> Result<Vec<&T>, TriangulationError> {
        self.neighbor_nodes(node)?
            .into_iter()
            .map(|neighbor| {
                self.nodes
                    .get(neighbor)
                    .map(SpaceNode::payload)
                    .ok_or(TriangulationError::StaleHandle)
            })
            .collect()
    }

    /// A defensive copy of the neighbor payloads, safe to hold across
    /// later mutations of the triangulation.
    pub fn permanent_neighbor_snapshot(&self, node: NodeKey) -> Result<Vec<T>, TriangulationError>
    where
        T: Clone,
    {
        Ok(self
            .neighbor_payloads(node)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// The four corners of the finite tetrahedron containing `position`,
    /// located by walking from a tetrahedron incident to `from`. `None`
    /// when the position lies outside the convex hull or the triangulation
    /// is not bootstrapped yet.
    pub fn vertices_of_tetrahedron_containing(
        &mut self,
        from: NodeKey,
        position: &[f64; 3],
    ) -> Result<Option<[NodeKey; 4]>, TriangulationError> {
        let start = self
            .nodes
            .get(from)
            .ok_or(TriangulationError::StaleHandle)?
            .tetrahedra
            .first()
            .copied();
        let Some(start) = start else {
            return Ok(None);
        };
        let mut current = start;
        if self.tet(current)?.is_infinite() {
            let triangle0 = self.tet(current)?.opposite_triangle_of(None)?;
            current = self
                .tri(triangle0)?
                .opposite_tetrahedron(Some(current))?
                .ok_or(TriangulationError::MissingNeighbor)?;
        }
        let mut last: Option<TetKey> = None;
        while last != Some(current) && !self.tet(current)?.is_infinite() {
            last = Some(current);
            match self.walk_to_point(current, position) {
                Ok(next) => current = next,
                // The position coincides with a corner; stay where we are.
                Err(SpatialError::Position(_)) => break,
                Err(SpatialError::Topology(error)) => return Err(error),
            }
        }
        if self.tet(current)?.is_infinite() {
            return Ok(None);
        }
        match self.tet(current)?.nodes() {
            [Some(a), Some(b), Some(c), Some(d)] => Ok(Some([a, b, c, d])),
            _ => Ok(None),
        }
    }

    /// The payloads at the corners of the finite tetrahedron containing
    /// `position`, for barycentric interpolation. `None` outside the
    /// convex hull.
    pub fn payloads_of_tetrahedron_containing(
        &mut self,
        from: NodeKey,
        position: &[f64; 3],
    ) -> Result<Option<[&T; 4]>, TriangulationError> {
        let Some(corners) = self.vertices_of_tetrahedron_containing(from, position)? else {
            return Ok(None);
        };
        for corner in corners {
            if !self.nodes.contains_key(corner) {
                return Err(TriangulationError::StaleHandle);
            }
        }
        Ok(Some(
            corners.map(|corner| self.nodes[corner].payload()),
        ))
    }

    /// Whether every finite, non-flat tetrahedron has an empty
    /// circumsphere. Quadratic; intended for tests and debugging.
    pub fn is_delaunay(&mut self) -> Result<bool, TriangulationError> {
        let tetrahedra: Vec<TetKey> = self
            .tets
            .iter()
            .filter(|(_, record)| !record.is_infinite() && !record.is_flat())
            .map(|(key, _)| key)
            .collect();
        let nodes: Vec<NodeKey> = self.nodes.keys().collect();
        for tetrahedron in tetrahedra {
            for &node in &nodes {
                if self.tet(tetrahedron)?.is_adjacent_to_node(node) {
                    continue;
                }
                let position = self.node_position(node)?;
                if self.is_truly_inside_sphere(tetrahedron, &position)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Verifies the structural cross-references between the arenas.
    /// Intended for tests and debugging.
    pub fn check_invariants(&self) -> Result<(), TriangulationError> {
        for (key, record) in &self.tets {
            for triangle in record.triangles() {
                if !self.tri(triangle)?.is_adjacent_to_tetrahedron(key) {
                    return Err(TriangulationError::NotIncident("triangle"));
                }
            }
            for node in record.nodes().into_iter().flatten() {
                let node_record = self
                    .nodes
                    .get(node)
                    .ok_or(TriangulationError::StaleHandle)?;
                if !node_record.tetrahedra.contains(&key) {
                    return Err(TriangulationError::NotIncident("node"));
                }
            }
        }
        for (key, record) in &self.triangles {
            for tetrahedron in record.tetrahedra.into_iter().flatten() {
                if !self.tet(tetrahedron)?.triangles().contains(&key) {
                    return Err(TriangulationError::NotIncident("tetrahedron"));
                }
            }
        }
        for (key, record) in &self.edges {
            for endpoint in [record.a, record.b].into_iter().flatten() {
                let node_record = self
                    .nodes
                    .get(endpoint)
                    .ok_or(TriangulationError::StaleHandle)?;
                if !node_record.edges.contains(&key) {
                    return Err(TriangulationError::NotIncident("edge"));
                }
            }
            for &tetrahedron in &record.tetrahedra {
                self.tet(tetrahedron)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_connects_the_first_three_nodes_by_edges() {
        let mut triangulation: Triangulation<i32> = Triangulation::with_seed(7);
        let a = triangulation.create_node([0.0, 0.0, 0.0], 1).unwrap();
        let b = triangulation.create_node([1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(triangulation.neighbor_nodes(a).unwrap(), vec![b]);
        let c = triangulation.create_node([0.0, 1.0, 0.0], 3).unwrap();
        assert_eq!(triangulation.tetrahedron_count(), 0);
        // The third node connects to the anchor and to the previous node.
        let mut neighbors = triangulation.neighbor_nodes(c).unwrap();
        neighbors.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(neighbors, expected);
    }

    #[test]
    fn fourth_node_builds_the_initial_tetrahedron_and_hull() {
        let mut triangulation: Triangulation<()> = Triangulation::with_seed(7);
        for position in [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ] {
            triangulation.create_node(position, ()).unwrap();
        }
        assert_eq!(triangulation.finite_tetrahedron_count(), 1);
        assert_eq!(triangulation.tetrahedron_count(), 5);
        triangulation.check_invariants().unwrap();
        assert!(triangulation.is_delaunay().unwrap());
    }

    #[test]
    fn interior_insertion_splits_the_tetrahedron() {
        let mut triangulation: Triangulation<()> = Triangulation::with_seed(11);
        for position in [
            [0.0, 0.0, 0.0],
            [3.0, 0.0, 0.0],
            [0.0, 3.0, 0.0],
            [0.0, 0.0, 3.0],
        ] {
            triangulation.create_node(position, ()).unwrap();
        }
        triangulation.create_node([0.5, 0.5, 0.5], ()).unwrap();
        assert_eq!(triangulation.finite_tetrahedron_count(), 4);
        triangulation.check_invariants().unwrap();
        assert!(triangulation.is_delaunay().unwrap());
    }

    #[test]
    fn duplicate_position_is_rejected_with_an_alternative() {
        let mut triangulation: Triangulation<()> = Triangulation::with_seed(3);
        for position in [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ] {
            triangulation.create_node(position, ()).unwrap();
        }
        let error = triangulation
            .create_node([1.0, 0.0, 0.0], ())
            .expect_err("coinciding position must be rejected");
        let proposed = error.proposed_position().expect("recoverable rejection");
        assert_ne!(proposed, [1.0, 0.0, 0.0]);
        // The rejected node must not linger in the arena.
        assert_eq!(triangulation.node_count(), 4);
    }
}
