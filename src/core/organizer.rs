//! Bookkeeping and filling of cavities in the triangulation.
//!
//! Whenever tetrahedra are torn out of the triangulation, the boundary of
//! the resulting hole consists of triangles incident to only one
//! tetrahedron, the open triangles. The [`OpenTriangleOrganizer`] tracks
//! them and [`triangulate`](OpenTriangleOrganizer::triangulate) fills the
//! hole by repeatedly coning an open triangle to the node with the smallest
//! signed Delaunay distance. Ties within the floating point tolerance are
//! resolved in exact arithmetic, and genuinely cospherical candidates are
//! handed to a dedicated surface triangulation.

use std::mem;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::core::triangle::Triangle;
use crate::core::triangulation::{NodeKey, TetKey, TriKey, Triangulation};
use crate::error::TriangulationError;
use crate::geometry::vector::{cross, dot, normalized, squared_norm, sub};

/// Hard bound on the number of open triangles processed in one cavity fill.
const CAVITY_FILL_LIMIT: usize = 2000;

/// Relative tolerance applied to signed Delaunay distances before falling
/// back to exact arithmetic.
const DISTANCE_TOLERANCE: f64 = 1e-7;

fn ordered_pair(a: NodeKey, b: NodeKey) -> (NodeKey, NodeKey) {
    if a <= b { (a, b) } else { (b, a) }
}

/// An open edge on the front of a surface triangulation. `last_normal`
/// points towards the already-triangulated side.
#[derive(Clone, Debug)]
struct OpenEdge {
    a: NodeKey,
    b: NodeKey,
    position_a: [f64; 3],
    ab: [f64; 3],
    last_normal: [f64; 3],
}

impl OpenEdge {
    /// Cosine of the dihedral angle between the already-triangulated side
    /// and the triangle this edge would form with `fourth`. Values within
    /// rounding distance of the poles are clamped.
    fn cosine(&self, fourth: &[f64; 3]) -> f64 {
        let normal = normalized(&cross(&self.ab, &sub(fourth, &self.position_a)));
        let cosine = dot(&normal, &self.last_normal);
        if cosine > 0.999_999_999 {
            1.0
        } else if cosine < -0.999_999_99 {
            -1.0
        } else {
            cosine
        }
    }
}

/// Pool of the nodes bordering the current cavity, filled from the open
/// triangles as they are registered.
#[derive(Debug, Default)]
struct NodePool {
    nodes: Vec<NodeKey>,
    seen: FxHashSet<NodeKey>,
}

impl NodePool {
    fn add_triangle_nodes(&mut self, nodes: [Option<NodeKey>; 3]) {
        for node in nodes.into_iter().flatten() {
            if self.seen.insert(node) {
                self.nodes.push(node);
            }
        }
    }

    /// Candidate nodes ordered by distance to a reference node, nearest
    /// first, so promising candidates are tested early.
    fn nodes_by_distance<T>(
        &self,
        triangulation: &Triangulation<T>,
        reference: NodeKey,
    ) -> Result<Vec<NodeKey>, TriangulationError> {
        let reference_position = triangulation.node_position(reference)?;
        let mut with_distance = Vec::with_capacity(self.nodes.len());
        for &node in &self.nodes {
            let position = triangulation.node_position(node)?;
            with_distance.push((squared_norm(&sub(&position, &reference_position)), node));
        }
        with_distance.sort_by(|x, y| x.0.total_cmp(&y.0));
        Ok(with_distance.into_iter().map(|(_, node)| node).collect())
    }
}

/// Tracks the open triangles delimiting a non-triangulated volume and
/// fills that volume with new tetrahedra on demand.
#[derive(Debug, Default)]
pub(crate) struct OpenTriangleOrganizer {
    map: FxHashMap<[Option<NodeKey>; 3], TriKey>,
    open_triangles: Vec<TriKey>,
    node_pool: NodePool,
    a_new_tetrahedron: Option<TetKey>,
    new_tetrahedra: Option<Vec<TetKey>>,
}

impl OpenTriangleOrganizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Starts recording every tetrahedron created by this organizer.
    pub(crate) fn record_new_tetrahedra(&mut self) {
        if self.new_tetrahedra.is_none() {
            self.new_tetrahedra = Some(Vec::new());
        }
    }

    /// The recorded tetrahedra, if recording was enabled.
    pub(crate) fn take_new_tetrahedra(&mut self) -> Vec<TetKey> {
        self.new_tetrahedra.take().unwrap_or_default()
    }

    /// An arbitrary tetrahedron created during the last cavity fill.
    pub(crate) fn a_new_tetrahedron(&self) -> Option<TetKey> {
        self.a_new_tetrahedron
    }

    fn note_created(&mut self, tetrahedron: TetKey) {
        self.a_new_tetrahedron = Some(tetrahedron);
        if let Some(recorded) = &mut self.new_tetrahedra {
            recorded.push(tetrahedron);
        }
    }

    fn key_for(nodes: [Option<NodeKey>; 3]) -> [Option<NodeKey>; 3] {
        let mut key = nodes;
        key.sort_unstable();
        key
    }

    /// Registers a triangle that just became open.
    pub(crate) fn put_triangle<T>(
        &mut self,
        triangulation: &Triangulation<T>,
        triangle: TriKey,
    ) -> Result<(), TriangulationError> {
        let nodes = triangulation.tri(triangle)?.nodes();
        self.map.insert(Self::key_for(nodes), triangle);
        self.node_pool.add_triangle_nodes(nodes);
        self.open_triangles.push(triangle);
        Ok(())
    }

    /// Unregisters a triangle that is no longer open.
    pub(crate) fn remove_triangle<T>(
        &mut self,
        triangulation: &Triangulation<T>,
        triangle: TriKey,
    ) -> Result<(), TriangulationError> {
        let nodes = triangulation.tri(triangle)?.nodes();
        self.map.remove(&Self::key_for(nodes));
        Ok(())
    }

    fn contains(&self, a: NodeKey, b: NodeKey, c: NodeKey) -> bool {
        self.map
            .contains_key(&Self::key_for([Some(a), Some(b), Some(c)]))
    }

    /// The triangle spanning the three given corners. A known open triangle
    /// is taken out of the bookkeeping, since it is about to be closed; an
    /// unknown one is created and registered as open.
    pub(crate) fn get_triangle<T>(
        &mut self,
        triangulation: &mut Triangulation<T>,
        a: Option<NodeKey>,
        b: Option<NodeKey>,
        c: Option<NodeKey>,
    ) -> TriKey {
        let key = Self::key_for([a, b, c]);
        if let Some(&existing) = self.map.get(&key) {
            if triangulation
                .triangles
                .get(existing)
                .is_some_and(Triangle::is_completely_open)
            {
                self.open_triangles.push(existing);
            } else {
                self.map.remove(&key);
            }
            existing
        } else {
            let created = triangulation.triangles.insert(Triangle::new(a, b, c));
            self.map.insert(key, created);
            self.open_triangles.push(created);
            created
        }
    }

    /// Like [`get_triangle`](Self::get_triangle), but a known triangle
    /// stays registered as open.
    pub(crate) fn get_triangle_without_removing<T>(
        &mut self,
        triangulation: &mut Triangulation<T>,
        a: Option<NodeKey>,
        b: Option<NodeKey>,
        c: Option<NodeKey>,
    ) -> TriKey {
        let key = Self::key_for([a, b, c]);
        if let Some(&existing) = self.map.get(&key) {
            existing
        } else {
            let created = triangulation.triangles.insert(Triangle::new(a, b, c));
            self.open_triangles.push(created);
            self.map.insert(key, created);
            created
        }
    }

    /// Pops open triangles off the stack until a finite one with exactly
    /// one incident tetrahedron turns up.
    fn get_an_open_triangle<T>(&mut self, triangulation: &Triangulation<T>) -> Option<TriKey> {
        while let Some(candidate) = self.open_triangles.pop() {
            let Some(record) = triangulation.triangles.get(candidate) else {
                continue;
            };
            if record.is_infinite() || record.is_closed() || record.is_completely_open() {
                continue;
            }
            return Some(candidate);
        }
        None
    }

    /// Fills the volume delimited by the registered open triangles.
    ///
    /// Each open triangle is combined with the candidate node that has the
    /// smallest signed Delaunay distance on its open side. When several
    /// candidates tie exactly, all of them lie on a common sphere with the
    /// triangle and the degenerate surface triangulation takes over.
    pub(crate) fn triangulate<T>(
        &mut self,
        triangulation: &mut Triangulation<T>,
    ) -> Result<(), TriangulationError> {
        let mut similar_distance_nodes: Vec<NodeKey> = Vec::new();
        let mut on_circle_nodes: Vec<NodeKey> = Vec::new();
        let mut security_counter = 0_usize;
        while let Some(open_triangle) = self.get_an_open_triangle(triangulation) {
            security_counter += 1;
            if security_counter > CAVITY_FILL_LIMIT {
                return Err(TriangulationError::IterationLimitExceeded {
                    limit: CAVITY_FILL_LIMIT,
                });
            }
            let positions = triangulation.tri_positions(open_triangle)?;
            triangulation.tri_mut(open_triangle)?.update(&positions)?;
            triangulation.orient_triangle_to_open_side(open_triangle)?;
            let tolerance = triangulation
                .tri(open_triangle)?
                .typical_sd_distance(&positions)
                * DISTANCE_TOLERANCE;
            let mut upper_bound = f64::MAX;
            let mut lower_bound = f64::MAX;
            let mut shortest_distance = f64::MAX;
            let mut picked_node: Option<NodeKey> = None;
            let reference = triangulation.tri(open_triangle)?.nodes()[0]
                .ok_or(TriangulationError::NoCandidateNode)?;
            for node in self.node_pool.nodes_by_distance(triangulation, reference)? {
                if triangulation.tri(open_triangle)?.is_adjacent_to_node(node) {
                    continue;
                }
                let position = triangulation.node_position(node)?;
                let current_distance = triangulation
                    .tri(open_triangle)?
                    .sd_distance(&positions, &position);
                if current_distance < upper_bound {
                    let mut smaller = false;
                    if current_distance > lower_bound {
                        let picked =
                            picked_node.ok_or(TriangulationError::NoCandidateNode)?;
                        let picked_position = triangulation.node_position(picked)?;
                        let last_distance = triangulation
                            .tri(open_triangle)?
                            .sd_distance_exact(&positions, &picked_position);
                        let new_distance = triangulation
                            .tri(open_triangle)?
                            .sd_distance_exact(&positions, &position);
                        match last_distance.cmp(&new_distance) {
                            std::cmp::Ordering::Equal => similar_distance_nodes.push(node),
                            std::cmp::Ordering::Greater => smaller = true,
                            std::cmp::Ordering::Less => {}
                        }
                    } else {
                        smaller = true;
                    }
                    if smaller {
                        similar_distance_nodes.clear();
                        shortest_distance = current_distance;
                        upper_bound = shortest_distance + tolerance;
                        lower_bound = shortest_distance - tolerance;
                        picked_node = Some(node);
                    }
                } else if triangulation
                    .tri(open_triangle)?
                    .orientation_to_upper_side(&positions, &position)
                    == 0
                    && triangulation
                        .tri_mut(open_triangle)?
                        .circle_orientation(&positions, &position)
                        == 0
                {
                    on_circle_nodes.push(node);
                }
            }
            if picked_node.is_none()
                || (similar_distance_nodes.is_empty() && on_circle_nodes.is_empty())
            {
                let created =
                    triangulation.create_tetrahedron_cone(open_triangle, picked_node, self)?;
                self.note_created(created);
            } else {
                let picked = picked_node.ok_or(TriangulationError::NoCandidateNode)?;
                similar_distance_nodes.push(picked);
                let cospherical = mem::take(&mut similar_distance_nodes);
                let on_circle = mem::take(&mut on_circle_nodes);
                self.triangulate_points_on_sphere(
                    triangulation,
                    cospherical,
                    &on_circle,
                    open_triangle,
                )?;
            }
            similar_distance_nodes.clear();
            on_circle_nodes.clear();
        }
        if !self.map.is_empty() {
            return Err(TriangulationError::OpenTrianglesRemaining {
                count: self.map.len(),
            });
        }
        Ok(())
    }

    /// Tetrahedralizes five or more nodes lying on a common sphere by first
    /// triangulating its surface and then coning every surface triangle to
    /// the node with the lowest id.
    fn triangulate_points_on_sphere<T>(
        &mut self,
        triangulation: &mut Triangulation<T>,
        mut nodes: Vec<NodeKey>,
        on_circle_nodes: &[NodeKey],
        starting_triangle: TriKey,
    ) -> Result<(), TriangulationError> {
        let mut surface_triangles: Vec<TriKey> = Vec::new();
        let triangle_nodes = triangulation.tri(starting_triangle)?.nodes();
        let [Some(t0), Some(t1), Some(t2)] = triangle_nodes else {
            return Err(TriangulationError::NoCandidateNode);
        };
        nodes.extend([t0, t1, t2]);
        nodes.extend_from_slice(on_circle_nodes);
        let mut edge_map: FxHashMap<(NodeKey, NodeKey), OpenEdge> = FxHashMap::default();
        let mut an_open_edge: Option<OpenEdge> = None;
        if on_circle_nodes.is_empty() {
            surface_triangles.push(starting_triangle);
            let corners = [t0, t1, t2];
            for i in 0..3 {
                an_open_edge = put_edge(
                    triangulation,
                    corners[i],
                    corners[(i + 1) % 3],
                    corners[(i + 2) % 3],
                    an_open_edge,
                    &mut edge_map,
                )?;
            }
        } else {
            // The starting triangle itself lies on a common circle with
            // further nodes; triangulate that circle as a whole.
            let mut circle_nodes = on_circle_nodes.to_vec();
            circle_nodes.extend([t0, t1, t2]);
            an_open_edge = self.triangulate_points_on_circle(
                triangulation,
                circle_nodes,
                None,
                &mut edge_map,
                &mut surface_triangles,
            )?;
        }
        let mut similar_distance_nodes: Vec<NodeKey> = Vec::new();
        while !edge_map.is_empty() {
            let edge = match an_open_edge.take() {
                Some(edge) => edge,
                None => edge_map
                    .values()
                    .next()
                    .cloned()
                    .ok_or(TriangulationError::NoCandidateNode)?,
            };
            let tolerance = 1e-9;
            let mut upper_bound = f64::MAX;
            let mut lower_bound = f64::MAX;
            let mut smallest_cosine = f64::MAX;
            let mut picked_node: Option<NodeKey> = None;
            for &node in &nodes {
                if node == edge.a || node == edge.b {
                    continue;
                }
                let cosine = edge.cosine(&triangulation.node_position(node)?);
                if cosine < upper_bound {
                    if cosine > lower_bound {
                        similar_distance_nodes.push(node);
                    } else {
                        picked_node = Some(node);
                        smallest_cosine = cosine;
                        upper_bound = smallest_cosine + tolerance;
                        lower_bound = smallest_cosine - tolerance;
                        similar_distance_nodes.clear();
                    }
                }
            }
            let picked = picked_node.ok_or(TriangulationError::NoCandidateNode)?;
            if similar_distance_nodes.is_empty() {
                let new_triangle = self.get_triangle_without_removing(
                    triangulation,
                    Some(edge.a),
                    Some(edge.b),
                    Some(picked),
                );
                surface_triangles.push(new_triangle);
                edge_map.remove(&ordered_pair(edge.a, edge.b));
                an_open_edge =
                    put_edge(triangulation, edge.a, picked, edge.b, None, &mut edge_map)?;
                an_open_edge = put_edge(
                    triangulation,
                    edge.b,
                    picked,
                    edge.a,
                    an_open_edge,
                    &mut edge_map,
                )?;
            } else {
                similar_distance_nodes.push(picked);
                let circle_nodes = mem::take(&mut similar_distance_nodes);
                an_open_edge = self.triangulate_points_on_circle(
                    triangulation,
                    circle_nodes,
                    Some(edge),
                    &mut edge_map,
                    &mut surface_triangles,
                )?;
            }
            similar_distance_nodes.clear();
        }
        let center = find_center_node(triangulation, &nodes)?;
        for triangle in surface_triangles {
            if !triangulation.triangles.contains_key(triangle) {
                continue;
            }
            if !triangulation.tri(triangle)?.is_adjacent_to_node(center) {
                let created =
                    triangulation.create_tetrahedron_cone(triangle, Some(center), self)?;
                self.note_created(created);
            }
        }
        Ok(())
    }

    /// Triangulates four or more nodes lying on a common circle, starting
    /// from `starting_edge` if one exists. Returns an open edge on the
    /// convex hull of the circle.
    fn triangulate_points_on_circle<T>(
        &mut self,
        triangulation: &mut Triangulation<T>,
        nodes: Vec<NodeKey>,
        starting_edge: Option<OpenEdge>,
        edge_map: &mut FxHashMap<(NodeKey, NodeKey), OpenEdge>,
        triangle_list: &mut Vec<TriKey>,
    ) -> Result<Option<OpenEdge>, TriangulationError> {
        let center_node = if let Some(edge) = &starting_edge {
            let mut all = vec![edge.b, edge.a];
            all.extend_from_slice(&nodes);
            find_center_node(triangulation, &all)?
        } else {
            find_center_node(triangulation, &nodes)?
        };
        let sorted_nodes =
            sort_circle_nodes(triangulation, nodes, starting_edge.as_ref(), center_node)?;
        self.remove_forbidden_triangles(triangulation, &sorted_nodes)?;
        self.triangulate_sorted_circle_points(
            triangulation,
            &sorted_nodes,
            center_node,
            edge_map,
            triangle_list,
        )
    }

    /// Builds the standardized triangulation of a sorted circle: every
    /// triangle connects two circle neighbors with the center node.
    fn triangulate_sorted_circle_points<T>(
        &mut self,
        triangulation: &mut Triangulation<T>,
        sorted_nodes: &[NodeKey],
        center_node: NodeKey,
        edge_map: &mut FxHashMap<(NodeKey, NodeKey), OpenEdge>,
        triangle_list: &mut Vec<TriKey>,
    ) -> Result<Option<OpenEdge>, TriangulationError> {
        let mut ret = None;
        for window in sorted_nodes.windows(2).skip(1) {
            let (last, current) = (window[0], window[1]);
            triangle_list.push(self.get_triangle_without_removing(
                triangulation,
                Some(last),
                Some(current),
                Some(center_node),
            ));
            put_edge(triangulation, center_node, last, current, None, edge_map)?;
            ret = put_edge(triangulation, last, current, center_node, ret, edge_map)?;
            put_edge(triangulation, current, center_node, last, None, edge_map)?;
        }
        Ok(ret)
    }

    /// Removes triangles that contradict the standardized triangulation of
    /// a circle, together with their incident tetrahedra. Without this, two
    /// cavities bordering the same circle could triangulate it differently
    /// and fail to stitch together.
    fn remove_forbidden_triangles<T>(
        &mut self,
        triangulation: &mut Triangulation<T>,
        sorted_nodes: &[NodeKey],
    ) -> Result<(), TriangulationError> {
        if sorted_nodes.len() == 4 {
            let (center, a, b, c) = (
                sorted_nodes[0],
                sorted_nodes[1],
                sorted_nodes[2],
                sorted_nodes[3],
            );
            if self.contains(center, a, b) {
                if !self.contains(center, b, c) {
                    self.remove_sphere_at(triangulation, center, a, b)?;
                }
            } else if self.contains(center, b, c) {
                self.remove_sphere_at(triangulation, center, b, c)?;
            } else {
                if self.contains(a, b, c) {
                    self.remove_sphere_at(triangulation, a, b, c)?;
                }
                if self.contains(center, a, c) {
                    self.remove_sphere_at(triangulation, center, a, c)?;
                }
            }
            return Ok(());
        }
        let mut remove_all_circle_triangles = false;
        for i in 1..sorted_nodes.len() - 1 {
            if !self.contains(sorted_nodes[0], sorted_nodes[i], sorted_nodes[i + 1]) {
                remove_all_circle_triangles = true;
                break;
            }
        }
        if remove_all_circle_triangles {
            for i in 0..sorted_nodes.len() - 2 {
                for j in i + 1..sorted_nodes.len() - 1 {
                    for k in j + 1..sorted_nodes.len() {
                        if self.contains(sorted_nodes[i], sorted_nodes[j], sorted_nodes[k]) {
                            self.remove_sphere_at(
                                triangulation,
                                sorted_nodes[i],
                                sorted_nodes[j],
                                sorted_nodes[k],
                            )?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn remove_sphere_at<T>(
        &mut self,
        triangulation: &mut Triangulation<T>,
        a: NodeKey,
        b: NodeKey,
        c: NodeKey,
    ) -> Result<(), TriangulationError> {
        let triangle =
            self.get_triangle_without_removing(triangulation, Some(a), Some(b), Some(c));
        if let Some(tetrahedron) = triangulation.tri(triangle)?.opposite_tetrahedron(None)? {
            self.remove_all_tetrahedra_in_sphere(triangulation, tetrahedron)?;
        }
        Ok(())
    }

    /// Removes a tetrahedron together with every neighbor sharing its
    /// circumsphere, registering the uncovered triangles as open.
    pub(crate) fn remove_all_tetrahedra_in_sphere<T>(
        &mut self,
        triangulation: &mut Triangulation<T>,
        starting_tetrahedron: TetKey,
    ) -> Result<(), TriangulationError> {
        let mut pending = vec![starting_tetrahedron];
        while let Some(current) = pending.pop() {
            if !triangulation.tets.contains_key(current) {
                continue;
            }
            let triangles = triangulation.tet(current)?.triangles();
            let current_infinite = triangulation.tet(current)?.is_infinite();
            let mut to_remove: [Option<TetKey>; 4] = [None; 4];
            for i in 0..4 {
                let triangle = triangles[i];
                let opposite = triangulation
                    .tri(triangle)?
                    .opposite_tetrahedron(Some(current))?;
                if let Some(opposite) = opposite {
                    let same_finiteness =
                        current_infinite == triangulation.tet(opposite)?.is_infinite();
                    if same_finiteness {
                        if let Some(opposite_node) =
                            triangulation.tet(opposite)?.opposite_node_of(triangle)?
                        {
                            let position = triangulation.node_position(opposite_node)?;
                            if triangulation.is_inside_sphere(current, &position)? {
                                to_remove[i] = Some(opposite);
                            }
                        }
                    }
                }
                if triangulation.tri(triangle)?.is_closed() {
                    self.put_triangle(triangulation, triangle)?;
                } else {
                    self.remove_triangle(triangulation, triangle)?;
                }
            }
            triangulation.remove_tetrahedron(current)?;
            for triangle in triangles {
                let orphaned = triangulation
                    .triangles
                    .get(triangle)
                    .is_some_and(Triangle::is_completely_open);
                if orphaned {
                    let nodes = triangulation.tri(triangle)?.nodes();
                    if !self.map.contains_key(&Self::key_for(nodes)) {
                        triangulation.triangles.remove(triangle);
                    }
                }
            }
            for next in to_remove.into_iter().flatten() {
                pending.push(next);
            }
        }
        Ok(())
    }
}

/// Registers the edge `a`-`b` on the front map, or cancels it when it is
/// already on the front. Returns the edge to continue with.
fn put_edge<T>(
    triangulation: &Triangulation<T>,
    a: NodeKey,
    b: NodeKey,
    opposite_node: NodeKey,
    old_open_edge: Option<OpenEdge>,
    edge_map: &mut FxHashMap<(NodeKey, NodeKey), OpenEdge>,
) -> Result<Option<OpenEdge>, TriangulationError> {
    let key = ordered_pair(a, b);
    if edge_map.remove(&key).is_some() {
        return Ok(old_open_edge);
    }
    let position_a = triangulation.node_position(a)?;
    let position_b = triangulation.node_position(b)?;
    let position_opposite = triangulation.node_position(opposite_node)?;
    let ab = sub(&position_b, &position_a);
    let edge = OpenEdge {
        a,
        b,
        position_a,
        ab,
        last_normal: normalized(&cross(&ab, &sub(&position_opposite, &position_a))),
    };
    edge_map.insert(key, edge.clone());
    Ok(Some(edge))
}

/// The node with the lowest id, used as the deterministic center of
/// degenerate circle and sphere triangulations.
fn find_center_node<T>(
    triangulation: &Triangulation<T>,
    nodes: &[NodeKey],
) -> Result<NodeKey, TriangulationError> {
    let mut center = None;
    let mut min_id = u64::MAX;
    for &node in nodes {
        let id = triangulation
            .nodes
            .get(node)
            .ok_or(TriangulationError::StaleHandle)?
            .id();
        if id < min_id {
            min_id = id;
            center = Some(node);
        }
    }
    center.ok_or(TriangulationError::NoCandidateNode)
}

/// Sorts nodes lying on a common circle by angular adjacency, rotated so
/// the center node comes first.
fn sort_circle_nodes<T>(
    triangulation: &Triangulation<T>,
    mut nodes: Vec<NodeKey>,
    starting_edge: Option<&OpenEdge>,
    center_node: NodeKey,
) -> Result<Vec<NodeKey>, TriangulationError> {
    let first;
    let second;
    let mut last_search_node;
    let mut search_node;
    if let Some(edge) = starting_edge {
        search_node = edge.b;
        last_search_node = edge.a;
        first = edge.a;
        second = edge.b;
    } else {
        if nodes.is_empty() {
            return Err(TriangulationError::NoCandidateNode);
        }
        last_search_node = nodes.remove(0);
        let reference = triangulation.node_position(last_search_node)?;
        let mut nearest = None;
        let mut min_distance = f64::MAX;
        for &node in &nodes {
            let distance = squared_norm(&sub(&reference, &triangulation.node_position(node)?));
            if distance < min_distance {
                min_distance = distance;
                nearest = Some(node);
            }
        }
        search_node = nearest.ok_or(TriangulationError::NoCandidateNode)?;
        nodes.retain(|&n| n != search_node);
        first = last_search_node;
        second = search_node;
    }
    let mut sorted = Vec::with_capacity(nodes.len() + 2);
    while !nodes.is_empty() {
        let last_vector = normalized(&sub(
            &triangulation.node_position(search_node)?,
            &triangulation.node_position(last_search_node)?,
        ));
        let mut biggest_cosine = -2.0;
        let mut picked = None;
        for &node in &nodes {
            let direction = normalized(&sub(
                &triangulation.node_position(node)?,
                &triangulation.node_position(search_node)?,
            ));
            let cosine = dot(&direction, &last_vector);
            if cosine > biggest_cosine {
                biggest_cosine = cosine;
                picked = Some(node);
            }
        }
        let picked = picked.ok_or(TriangulationError::NoCandidateNode)?;
        sorted.push(picked);
        last_search_node = search_node;
        search_node = picked;
        nodes.retain(|&n| n != picked);
    }
    sorted.insert(0, second);
    sorted.insert(0, first);
    let center_position = sorted
        .iter()
        .position(|&n| n == center_node)
        .ok_or(TriangulationError::NoCandidateNode)?;
    sorted.rotate_left(center_position);
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn two_keys() -> (NodeKey, NodeKey) {
        let mut nodes = SlotMap::<NodeKey, ()>::with_key();
        (nodes.insert(()), nodes.insert(()))
    }

    #[test]
    fn ordered_pair_is_direction_independent() {
        let (a, b) = two_keys();
        assert_eq!(ordered_pair(a, b), ordered_pair(b, a));
    }

    #[test]
    fn cosine_is_clamped_at_the_poles() {
        let (a, b) = two_keys();
        let edge = OpenEdge {
            a,
            b,
            position_a: [0.0; 3],
            ab: [1.0, 0.0, 0.0],
            last_normal: [0.0, 0.0, 1.0],
        };
        // A fourth point whose triangle is coplanar with the closed side.
        assert_eq!(edge.cosine(&[0.5, 1.0, 1e-14]), 1.0);
        // A fourth point folded all the way around.
        assert_eq!(edge.cosine(&[0.5, -1.0, 1e-14]), -1.0);
        let oblique = edge.cosine(&[0.5, -1.0, 1.0]);
        assert!(oblique > -1.0 && oblique < 1.0);
    }

    #[test]
    fn cosine_orders_candidates_by_fold_angle() {
        let (a, b) = two_keys();
        let edge = OpenEdge {
            a,
            b,
            position_a: [0.0; 3],
            ab: [1.0, 0.0, 0.0],
            last_normal: [0.0, 0.0, 1.0],
        };
        // Folding further away from the triangulated side gives a smaller
        // cosine, so the candidate list prefers the widest fold.
        let near = edge.cosine(&[0.5, 1.0, -0.2]);
        let far = edge.cosine(&[0.5, 1.0, -2.0]);
        assert!(far < near);
    }
}
