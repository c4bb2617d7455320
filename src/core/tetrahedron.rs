//! Tetrahedra and the structural operations built on them.
//!
//! The [`Tetrahedron`] record is index bookkeeping only; everything that
//! needs coordinates or neighbors lives on
//! [`Triangulation`](crate::core::triangulation::Triangulation) because it
//! touches several arenas at once. The convention throughout: triangle `i`
//! lies opposite node `i`, and edge indices follow [`Tetrahedron::edge_index`].

use num_rational::BigRational;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::core::triangle::Triangle;
use crate::core::triangulation::{EdgeKey, NodeKey, TetKey, TriKey, Triangulation};
use crate::error::{PositionError, SpatialError, TriangulationError};
use crate::geometry::exact::{rational_signum, ExactVector};
use crate::geometry::vector::{
    add, cross, det3, dot, max_abs, norm, scale, squared_norm, sub,
    three_plane_intersection_with_det,
};

/// Relative squared error assumed per floating point operation when
/// propagating uncertainty through the circumsphere computation.
const CIRCUMSPHERE_MY2: f64 = 1e-15;

/// A tetrahedron between four nodes.
///
/// `nodes[0]` is `None` for the infinite tetrahedra that pad the convex
/// hull. A `flat` tetrahedron has four coplanar corners, no volume and no
/// circumsphere; it only exists transiently until the flip loop removes it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tetrahedron {
    pub(crate) nodes: [Option<NodeKey>; 4],
    pub(crate) triangles: [TriKey; 4],
    pub(crate) edges: [Option<EdgeKey>; 6],
    pub(crate) circum_center: [f64; 3],
    pub(crate) squared_radius: f64,
    pub(crate) tolerance: f64,
    pub(crate) volume: f64,
    pub(crate) cross_section_areas: [f64; 6],
    flat: bool,
}

impl Tetrahedron {
    pub(crate) fn new_record(
        nodes: [Option<NodeKey>; 4],
        triangles: [TriKey; 4],
        flat: bool,
    ) -> Self {
        Self {
            nodes,
            triangles,
            edges: [None; 6],
            circum_center: [0.0; 3],
            squared_radius: 0.0,
            tolerance: 1e-7,
            volume: 0.0,
            cross_section_areas: [0.0; 6],
            flat,
        }
    }

    /// The four corner nodes, infinite slot first.
    #[must_use]
    pub fn nodes(&self) -> [Option<NodeKey>; 4] {
        self.nodes
    }

    /// The four bordering triangles, `triangles[i]` opposite `nodes[i]`.
    #[must_use]
    pub fn triangles(&self) -> [TriKey; 4] {
        self.triangles
    }

    /// Whether one corner is the virtual point at infinity.
    #[must_use]
    pub fn is_infinite(&self) -> bool {
        self.nodes[0].is_none()
    }

    /// Whether the four corners are coplanar.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.flat
    }

    /// Signed-free volume; zero for flat and infinite tetrahedra.
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Whether `node` is one of the corners.
    #[must_use]
    pub fn is_adjacent_to_node(&self, node: NodeKey) -> bool {
        self.nodes.contains(&Some(node))
    }

    /// Index of a corner, where `None` addresses the infinite slot.
    pub fn index_of_node(&self, node: Option<NodeKey>) -> Result<usize, TriangulationError> {
        self.nodes
            .iter()
            .position(|&n| n == node)
            .ok_or(TriangulationError::NotIncident("node"))
    }

    /// Index of a bordering triangle.
    pub fn index_of_triangle(&self, triangle: TriKey) -> Result<usize, TriangulationError> {
        self.triangles
            .iter()
            .position(|&t| t == triangle)
            .ok_or(TriangulationError::NotIncident("triangle"))
    }

    /// The bordering triangle opposite a corner.
    pub fn opposite_triangle_of(
        &self,
        node: Option<NodeKey>,
    ) -> Result<TriKey, TriangulationError> {
        Ok(self.triangles[self.index_of_node(node)?])
    }

    /// The corner opposite a bordering triangle.
    pub fn opposite_node_of(
        &self,
        triangle: TriKey,
    ) -> Result<Option<NodeKey>, TriangulationError> {
        Ok(self.nodes[self.index_of_triangle(triangle)?])
    }

    /// First corner that is neither `a` nor `b`, scanning forward.
    #[must_use]
    pub(crate) fn first_other_node(
        &self,
        a: Option<NodeKey>,
        b: Option<NodeKey>,
    ) -> Option<NodeKey> {
        for &n in &self.nodes {
            if n != a && n != b {
                return n;
            }
        }
        None
    }

    /// First corner that is neither `a` nor `b`, scanning backward.
    #[must_use]
    pub(crate) fn second_other_node(
        &self,
        a: Option<NodeKey>,
        b: Option<NodeKey>,
    ) -> Option<NodeKey> {
        for &n in self.nodes.iter().rev() {
            if n != a && n != b {
                return n;
            }
        }
        None
    }

    /// Index of the edge connecting corners `n1` and `n2` in the edge list.
    #[must_use]
    pub(crate) fn edge_index(n1: usize, n2: usize) -> usize {
        n1 + n2 - usize::from(n1 == 0 || n2 == 0)
    }

    pub(crate) fn edge_between(&self, n1: usize, n2: usize) -> Option<EdgeKey> {
        self.edges[Self::edge_index(n1, n2)]
    }
}

impl<T> Triangulation<T> {
    /// Builds a tetrahedron from four existing triangles and four corners,
    /// registering all incidences, edges and the circumsphere.
    pub(crate) fn create_tetrahedron(
        &mut self,
        triangles: [TriKey; 4],
        nodes: [Option<NodeKey>; 4],
        flat: bool,
    ) -> Result<TetKey, TriangulationError> {
        let key = self
            .tets
            .insert(Tetrahedron::new_record(nodes, triangles, flat));
        for i in 0..4 {
            self.tri_mut(triangles[i])?.add_tetrahedron(key);
            if let Some(node) = nodes[i] {
                self.nodes
                    .get_mut(node)
                    .ok_or(TriangulationError::StaleHandle)?
                    .add_tetrahedron(key);
            }
        }
        self.register_edges(key)?;
        self.calculate_circum_sphere(key)?;
        self.notify_tetrahedron_created(key);
        Ok(key)
    }

    /// Builds the very first tetrahedron of a triangulation, together with
    /// the four infinite tetrahedra closing the hull around it.
    pub(crate) fn create_initial_tetrahedron(
        &mut self,
        a: NodeKey,
        b: NodeKey,
        c: NodeKey,
        d: NodeKey,
    ) -> Result<TetKey, TriangulationError> {
        let triangle_a = self.triangles.insert(Triangle::new(Some(b), Some(c), Some(d)));
        let triangle_b = self.triangles.insert(Triangle::new(Some(a), Some(c), Some(d)));
        let triangle_c = self.triangles.insert(Triangle::new(Some(a), Some(b), Some(d)));
        let triangle_d = self.triangles.insert(Triangle::new(Some(a), Some(b), Some(c)));
        let ret = self.create_tetrahedron(
            [triangle_a, triangle_b, triangle_c, triangle_d],
            [Some(a), Some(b), Some(c), Some(d)],
            false,
        )?;
        let mut organizer = crate::core::organizer::OpenTriangleOrganizer::new();
        for triangle in [triangle_a, triangle_b, triangle_c, triangle_d] {
            self.create_tetrahedron_cone(triangle, None, &mut organizer)?;
        }
        Ok(ret)
    }

    /// Builds a tetrahedron over an existing triangle and a fourth corner,
    /// pulling the three side triangles from the open-triangle organizer.
    ///
    /// Coning an infinite triangle is redirected: the finite triangle over
    /// the same two finite corners and the apex is looked up and the new
    /// tetrahedron becomes infinite instead.
    pub(crate) fn create_tetrahedron_cone(
        &mut self,
        triangle: TriKey,
        apex: Option<NodeKey>,
        organizer: &mut crate::core::organizer::OpenTriangleOrganizer,
    ) -> Result<TetKey, TriangulationError> {
        let mut base = triangle;
        let mut fourth = apex;
        if self.tri(base)?.is_infinite() {
            let tn = self.tri(base)?.nodes();
            let a = if tn[0].is_none() { tn[1] } else { tn[0] };
            let b = if tn[2].is_none() { tn[1] } else { tn[2] };
            base = organizer.get_triangle_without_removing(self, a, b, fourth);
            fourth = None;
        }
        let tn = self.tri(base)?.nodes();
        if !self.tri(base)?.is_completely_open() {
            organizer.remove_triangle(self, base)?;
        }
        let side1 = organizer.get_triangle(self, fourth, tn[1], tn[2]);
        let side2 = organizer.get_triangle(self, fourth, tn[0], tn[2]);
        let side3 = organizer.get_triangle(self, fourth, tn[0], tn[1]);
        self.create_tetrahedron([base, side1, side2, side3], [fourth, tn[0], tn[1], tn[2]], false)
    }

    /// Collects the edges of a freshly created finite tetrahedron, reusing
    /// the edge objects of finite neighbors wherever possible and creating
    /// the rest at the corner nodes.
    fn register_edges(&mut self, tet: TetKey) -> Result<(), TriangulationError> {
        let record = self.tet(tet)?.clone();
        let [Some(n0), Some(n1), Some(n2), Some(n3)] = record.nodes else {
            return Ok(());
        };
        let mut edges: [Option<EdgeKey>; 6] = [None; 6];
        for i in 0..4 {
            let Some(neighbor) = self.tri(record.triangles[i])?.opposite_tetrahedron(Some(tet))?
            else {
                continue;
            };
            let other = self.tet(neighbor)?;
            if other.is_infinite() {
                continue;
            }
            let m1 = other.index_of_node(record.nodes[(i + 1) % 4])?;
            let m2 = other.index_of_node(record.nodes[(i + 2) % 4])?;
            let m3 = other.index_of_node(record.nodes[(i + 3) % 4])?;
            match i {
                0 => {
                    edges[3] = other.edge_between(m1, m2);
                    edges[4] = other.edge_between(m1, m3);
                    edges[5] = other.edge_between(m2, m3);
                }
                1 => {
                    edges[1] = other.edge_between(m1, m3);
                    edges[2] = other.edge_between(m2, m3);
                    if edges[5].is_none() {
                        edges[5] = other.edge_between(m1, m2);
                    }
                }
                2 => {
                    edges[0] = other.edge_between(m2, m3);
                    if edges[2].is_none() {
                        edges[2] = other.edge_between(m1, m2);
                    }
                    if edges[4].is_none() {
                        edges[4] = other.edge_between(m1, m3);
                    }
                }
                _ => {
                    if edges[0].is_none() {
                        edges[0] = other.edge_between(m1, m2);
                    }
                    if edges[1].is_none() {
                        edges[1] = other.edge_between(m1, m3);
                    }
                    if edges[3].is_none() {
                        edges[3] = other.edge_between(m2, m3);
                    }
                }
            }
        }
        let pairs = [(n0, n1), (n0, n2), (n0, n3), (n1, n2), (n1, n3), (n2, n3)];
        for (slot, &(a, b)) in pairs.iter().enumerate() {
            if edges[slot].is_none() {
                edges[slot] = Some(self.search_edge(a, b)?);
            }
        }
        for edge in edges.into_iter().flatten() {
            self.edges
                .get_mut(edge)
                .ok_or(TriangulationError::StaleHandle)?
                .add_tetrahedron(tet);
        }
        self.tet_mut(tet)?.edges = edges;
        Ok(())
    }

    fn change_tetrahedron_volume(
        &mut self,
        tet: TetKey,
        new_volume: f64,
    ) -> Result<(), TriangulationError> {
        let record = self.tet(tet)?;
        let change_per_node = (new_volume - record.volume) / 4.0;
        let nodes = record.nodes;
        if change_per_node != 0.0 {
            for node in nodes.into_iter().flatten() {
                self.nodes
                    .get_mut(node)
                    .ok_or(TriangulationError::StaleHandle)?
                    .change_volume(change_per_node);
            }
        }
        self.tet_mut(tet)?.volume = new_volume;
        Ok(())
    }

    fn change_cross_section(
        &mut self,
        tet: TetKey,
        number: usize,
        new_value: f64,
    ) -> Result<(), TriangulationError> {
        let record = self.tet(tet)?;
        let change = new_value - record.cross_section_areas[number];
        let edge = record.edges[number];
        if change != 0.0 {
            if let Some(edge) = edge {
                self.edges
                    .get_mut(edge)
                    .ok_or(TriangulationError::StaleHandle)?
                    .change_cross_section_area(change);
            }
        }
        self.tet_mut(tet)?.cross_section_areas[number] = new_value;
        Ok(())
    }

    /// Recomputes the six dual cross-section areas, the portions of the
    /// dual facets the tetrahedron contributes to its edges.
    fn update_cross_section_areas(&mut self, tet: TetKey) -> Result<(), TriangulationError> {
        if self.tet(tet)?.is_infinite() {
            for i in 0..6 {
                self.change_cross_section(tet, i, 0.0)?;
            }
            return Ok(());
        }
        let positions = self.tet_positions(tet)?;
        let mut line_middles = [[0.0; 3]; 6];
        let mut line_vectors = [[0.0; 3]; 6];
        let mut area_middles = [[0.0; 3]; 4];
        let mut tetra_middle = [0.0; 3];
        for i in 0..3 {
            let mut line_counter = 0;
            for j in 0..4 {
                tetra_middle[i] += positions[j][i];
                for k in j + 1..4 {
                    line_middles[line_counter][i] = (positions[j][i] + positions[k][i]) * 0.5;
                    line_vectors[line_counter][i] = positions[j][i] - positions[k][i];
                    line_counter += 1;
                }
                area_middles[j][i] = 0.0;
                for k in 0..4 {
                    if k != j {
                        area_middles[j][i] += positions[k][i];
                    }
                }
                area_middles[j][i] /= 3.0;
            }
            tetra_middle[i] *= 0.25;
        }
        let mut counter = 5_usize;
        for j in 0..4 {
            for k in j + 1..4 {
                let area = (dot(
                    &cross(
                        &sub(&line_middles[counter], &tetra_middle),
                        &sub(&area_middles[j], &area_middles[k]),
                    ),
                    &line_vectors[counter],
                ) / norm(&line_vectors[counter]))
                .abs();
                self.change_cross_section(tet, counter, area)?;
                counter = counter.wrapping_sub(1);
            }
        }
        Ok(())
    }

    /// Circumcenter, squared radius and an upper bound for the rounding
    /// error of the in-sphere test, propagated through every operation of
    /// the computation. The volume falls out of the same determinant.
    fn compute_circum_center_and_volume(
        &mut self,
        tet: TetKey,
    ) -> Result<(), TriangulationError> {
        let positions = self.tet_positions(tet)?;
        let mut normals = [
            sub(&positions[1], &positions[0]),
            sub(&positions[2], &positions[0]),
            sub(&positions[3], &positions[0]),
        ];
        self.change_tetrahedron_volume(tet, det3(&normals).abs() / 6.0)?;

        let nm = max_abs(&normals);
        let mut max_length2 = 0.0_f64;
        for normal in &mut normals {
            let length2 = squared_norm(normal);
            if length2 > max_length2 {
                max_length2 = length2;
            }
            *normal = scale(1.0 / length2.sqrt(), normal);
        }
        let dns2 = (nm * nm * (1.0 / max_length2 + 1.0 / (max_length2 * max_length2))).max(1.0);
        let ddet2 = 36.0 * dns2;
        let pm = max_abs(&positions);
        let pm2 = pm * pm;
        let doff2 = 6.0 * pm2 * (dns2 + 1.0);
        let dscalar2 = 4.0 * doff2 + 36.0 * pm2 * dns2;
        let det = det3(&normals);
        let offsets = [
            0.5 * dot(&normals[0], &add(&positions[0], &positions[1])),
            0.5 * dot(&normals[1], &add(&positions[0], &positions[2])),
            0.5 * dot(&normals[2], &add(&positions[0], &positions[3])),
        ];
        let center = three_plane_intersection_with_det(&normals, &offsets, det)
            .unwrap_or([f64::MAX; 3]);
        let record = self.tet_mut(tet)?;
        record.circum_center = center;
        if det != 0.0 {
            let ddiv2 = 3.0 * dscalar2 / (det * det)
                + 324.0 * pm2 * ddet2 / (det * det * det * det);
            record.squared_radius = squared_norm(&sub(&center, &positions[0]));
            record.tolerance = (12.0 * ddiv2 * record.squared_radius).sqrt() * CIRCUMSPHERE_MY2;
        }
        self.update_cross_section_areas(tet)
    }

    fn compute_radius(&mut self, tet: TetKey) -> Result<(), TriangulationError> {
        let positions = self.tet_positions(tet)?;
        let record = self.tet_mut(tet)?;
        record.squared_radius = squared_norm(&sub(&record.circum_center, &positions[0]));
        Ok(())
    }

    /// Recomputes the circumsphere of a finite, non-flat tetrahedron.
    pub(crate) fn calculate_circum_sphere(&mut self, tet: TetKey) -> Result<(), TriangulationError> {
        let record = self.tet(tet)?;
        if record.is_infinite() || record.is_flat() {
            return Ok(());
        }
        self.compute_circum_center_and_volume(tet)?;
        self.compute_radius(tet)
    }

    /// Refreshes the circumsphere after `moved` changed position and
    /// invalidates the caches of every bordering triangle incident to it.
    pub(crate) fn update_circum_sphere_after_move(
        &mut self,
        tet: TetKey,
        moved: NodeKey,
    ) -> Result<(), TriangulationError> {
        let record = self.tet(tet)?;
        let node_number = record.index_of_node(Some(moved))?;
        if !record.is_infinite() && !record.is_flat() {
            self.compute_circum_center_and_volume(tet)?;
            self.compute_radius(tet)?;
        }
        let triangles = self.tet(tet)?.triangles;
        for (i, triangle) in triangles.into_iter().enumerate() {
            if i != node_number {
                self.tri_mut(triangle)?.inform_about_node_movement();
            }
        }
        Ok(())
    }

    /// Position of `point` relative to the circumsphere: `1` inside, `0` on
    /// the surface, `-1` outside.
    ///
    /// Infinite tetrahedra count everything beyond (or on the far circle
    /// of) their hull triangle as inside. Flat tetrahedra answer from the
    /// circumcircles of their triangles.
    pub(crate) fn tet_orientation(
        &mut self,
        tet: TetKey,
        point: &[f64; 3],
    ) -> Result<i32, TriangulationError> {
        let record = self.tet(tet)?;
        if record.is_flat() {
            return self.flat_orientation(tet, point);
        }
        if record.is_infinite() {
            return self.infinite_orientation(tet, point);
        }
        let distance = squared_norm(&sub(&record.circum_center, point));
        if distance > record.squared_radius + record.tolerance {
            Ok(-1)
        } else if distance < record.squared_radius - record.tolerance {
            Ok(1)
        } else {
            self.tet_orientation_exact(tet, point)
        }
    }

    fn flat_orientation(
        &mut self,
        tet: TetKey,
        point: &[f64; 3],
    ) -> Result<i32, TriangulationError> {
        let triangle0 = self.tet(tet)?.triangles[0];
        self.update_triangle_plane(triangle0)?;
        let positions = self.tri_positions(triangle0)?;
        let orientation = self.tri(triangle0)?.orientation(&positions, point, point);
        if orientation != 0 {
            return Ok(orientation);
        }
        let mut memory = -1;
        let triangles = self.tet(tet)?.triangles;
        for triangle in triangles {
            let positions = self.tri_positions(triangle)?;
            match self.tri_mut(triangle)?.circle_orientation(&positions, point) {
                1 => return Ok(1),
                0 => memory = 0,
                _ => {}
            }
        }
        Ok(memory)
    }

    fn infinite_orientation(
        &mut self,
        tet: TetKey,
        point: &[f64; 3],
    ) -> Result<i32, TriangulationError> {
        let triangle0 = self.tet(tet)?.triangles[0];
        let inner = self.tri(triangle0)?.opposite_tetrahedron(Some(tet))?;
        self.update_triangle_plane(triangle0)?;
        let positions = self.tri_positions(triangle0)?;
        let orientation = match inner {
            Some(inner) => {
                if self.tet(inner)?.is_infinite() {
                    return Ok(1);
                }
                let opposite = self
                    .tet(inner)?
                    .opposite_node_of(triangle0)?
                    .ok_or(TriangulationError::MissingNeighbor)?;
                let opposite_position = self.node_position(opposite)?;
                self.tri(triangle0)?
                    .orientation(&positions, point, &opposite_position)
            }
            None => self
                .tri(triangle0)?
                .orientation_to_upper_side(&positions, point),
        };
        if orientation == 0 {
            Ok(self
                .tri_mut(triangle0)?
                .circle_orientation(&positions, point))
        } else {
            Ok(-orientation)
        }
    }

    /// In-sphere test recomputed entirely in rational arithmetic.
    fn tet_orientation_exact(
        &self,
        tet: TetKey,
        point: &[f64; 3],
    ) -> Result<i32, TriangulationError> {
        if self.tet(tet)?.is_infinite() {
            return Ok(1);
        }
        let positions = self.tet_positions(tet)?;
        let points: [ExactVector; 4] = [
            ExactVector::from_f64(&positions[0]),
            ExactVector::from_f64(&positions[1]),
            ExactVector::from_f64(&positions[2]),
            ExactVector::from_f64(&positions[3]),
        ];
        let normals = [
            &points[1] - &points[0],
            &points[2] - &points[0],
            &points[3] - &points[0],
        ];
        let half = BigRational::new(1.into(), 2.into());
        let offsets = [
            (&points[0] + &points[1]).dot(&normals[0]) * &half,
            (&points[0] + &points[2]).dot(&normals[1]) * &half,
            (&points[0] + &points[3]).dot(&normals[2]) * &half,
        ];
        match crate::geometry::exact::exact_three_plane_intersection(&normals, &offsets) {
            Some(center) => {
                let radius2 = (&center - &points[0]).squared_length();
                let distance2 = (&center - &ExactVector::from_f64(point)).squared_length();
                Ok(rational_signum(&(radius2 - distance2)))
            }
            None => Ok(0),
        }
    }

    /// Whether `point` lies strictly inside the circumsphere.
    pub(crate) fn is_truly_inside_sphere(
        &mut self,
        tet: TetKey,
        point: &[f64; 3],
    ) -> Result<bool, TriangulationError> {
        Ok(self.tet_orientation(tet, point)? > 0)
    }

    /// Whether `point` lies inside or on the circumsphere.
    pub(crate) fn is_inside_sphere(
        &mut self,
        tet: TetKey,
        point: &[f64; 3],
    ) -> Result<bool, TriangulationError> {
        Ok(self.tet_orientation(tet, point)? >= 0)
    }

    /// One step of the stochastic visibility walk towards `coordinate`.
    ///
    /// Returns a neighboring tetrahedron that is closer to the target, or
    /// `tet` itself when the coordinate lies inside it. The face order is
    /// shuffled so adversarial inputs cannot force cycles. Rejects
    /// coordinates that coincide with an existing corner.
    pub(crate) fn walk_to_point(
        &mut self,
        tet: TetKey,
        coordinate: &[f64; 3],
    ) -> Result<TetKey, SpatialError> {
        if !self.tet(tet)?.is_infinite() {
            let mut order = [0_usize, 1, 2, 3];
            order.shuffle(&mut self.rng);
            for &i in &order {
                let triangle = self.tet(tet)?.triangles[i];
                self.update_triangle_plane(triangle)?;
                let positions = self.tri_positions(triangle)?;
                let corner = self.tet(tet)?.nodes[i].ok_or(TriangulationError::StaleHandle)?;
                let corner_position = self.node_position(corner)?;
                let orientation =
                    self.tri(triangle)?
                        .orientation(&positions, &corner_position, coordinate);
                if orientation < 0 {
                    return Ok(self
                        .tri(triangle)?
                        .opposite_tetrahedron(Some(tet))?
                        .ok_or(TriangulationError::MissingNeighbor)?);
                } else if orientation == 0 {
                    let opposite = self
                        .tri(triangle)?
                        .opposite_tetrahedron(Some(tet))?
                        .ok_or(TriangulationError::MissingNeighbor)?;
                    if self.tet(opposite)?.is_infinite()
                        && self.is_truly_inside_sphere(tet, coordinate)?
                    {
                        self.test_position(tet, coordinate)?;
                        return Ok(opposite);
                    }
                }
            }
        } else if !self.is_inside_sphere(tet, coordinate)? {
            let triangle0 = self.tet(tet)?.triangles[0];
            return Ok(self
                .tri(triangle0)?
                .opposite_tetrahedron(Some(tet))?
                .ok_or(TriangulationError::MissingNeighbor)?);
        }
        self.test_position(tet, coordinate)?;
        Ok(tet)
    }

    /// Rejects a coordinate that coincides with a corner of `tet`, offering
    /// a nearby alternative position instead.
    pub(crate) fn test_position(
        &mut self,
        tet: TetKey,
        position: &[f64; 3],
    ) -> Result<(), SpatialError> {
        let nodes = self.tet(tet)?.nodes;
        for node in nodes.into_iter().flatten() {
            let node_position = self.node_position(node)?;
            let diff = sub(position, &node_position);
            if diff[0].abs() == 0.0 && diff[1].abs() == 0.0 && diff[2].abs() == 0.0 {
                return Err(PositionError::PositionNotAllowed {
                    proposed: self.propose_new_position(node)?,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Unlinks a tetrahedron from nodes, triangles and edges and frees its
    /// arena slot. Hull triangles losing their last finite tetrahedron are
    /// re-oriented towards the vanishing corner first, so the open side
    /// stays well defined.
    pub(crate) fn remove_tetrahedron(&mut self, tet: TetKey) -> Result<(), TriangulationError> {
        let record = self
            .tets
            .remove(tet)
            .ok_or(TriangulationError::StaleHandle)?;
        for i in 0..4 {
            if let Some(node) = record.nodes[i] {
                let node_record = self
                    .nodes
                    .get_mut(node)
                    .ok_or(TriangulationError::StaleHandle)?;
                node_record.change_volume(-record.volume / 4.0);
                node_record.remove_tetrahedron(tet);
            }
            let triangle = record.triangles[i];
            let opposite = self.tri(triangle)?.opposite_tetrahedron(Some(tet))?;
            if let (Some(opposite), Some(node)) = (opposite, record.nodes[i]) {
                if !record.is_infinite() && self.tet(opposite)?.is_infinite() {
                    let position = self.node_position(node)?;
                    self.orient_triangle_to_side(triangle, &position)?;
                }
            }
            self.tri_mut(triangle)?.remove_tetrahedron(tet);
        }
        for i in 0..6 {
            if let Some(edge) = record.edges[i] {
                if let Some(edge_record) = self.edges.get_mut(edge) {
                    edge_record.change_cross_section_area(-record.cross_section_areas[i]);
                    if edge_record.remove_tetrahedron(tet) {
                        self.drop_edge(edge)?;
                    }
                }
            }
        }
        self.notify_tetrahedron_removed(tet);
        Ok(())
    }

    /// Swaps one bordering triangle of `tet` for another one spanning the
    /// same corners, rewiring the three affected edges to those of the
    /// tetrahedron on the far side of the new triangle.
    pub(crate) fn replace_triangle(
        &mut self,
        tet: TetKey,
        old_triangle: TriKey,
        new_triangle: TriKey,
    ) -> Result<(), TriangulationError> {
        self.tri_mut(new_triangle)?.add_tetrahedron(tet);
        let other = self
            .tri(new_triangle)?
            .opposite_tetrahedron(Some(tet))?
            .ok_or(TriangulationError::MissingNeighbor)?;
        let triangle_number = self.tet(tet)?.index_of_triangle(old_triangle)?;
        let mut position = (triangle_number + 2) % 4;
        let mut last_position = (triangle_number + 1) % 4;
        for _ in 0..3 {
            let edge_number = Tetrahedron::edge_index(last_position, position);
            let node_a = self.tet(tet)?.nodes[last_position];
            let node_b = self.tet(tet)?.nodes[position];
            let other_record = self.tet(other)?;
            let other_edge = other_record
                .edge_between(other_record.index_of_node(node_a)?, other_record.index_of_node(node_b)?);
            let own_edge = self.tet(tet)?.edges[edge_number];
            if other_edge != own_edge {
                if let Some(own) = own_edge {
                    if let Some(edge_record) = self.edges.get_mut(own) {
                        if edge_record.remove_tetrahedron(tet) {
                            self.drop_edge(own)?;
                        }
                    }
                }
                if let Some(other_edge) = other_edge {
                    self.edges
                        .get_mut(other_edge)
                        .ok_or(TriangulationError::StaleHandle)?
                        .add_tetrahedron(tet);
                }
                self.tet_mut(tet)?.edges[edge_number] = other_edge;
            }
            last_position = position;
            position = (position + 1) % 4;
            if position == triangle_number {
                position = (position + 1) % 4;
            }
        }
        self.tet_mut(tet)?.triangles[triangle_number] = new_triangle;
        self.tri_mut(new_triangle)?.reset_visit_marker();
        Ok(())
    }

    /// Index of the bordering triangle shared with `other`.
    pub(crate) fn connecting_triangle_number(
        &self,
        tet: TetKey,
        other: TetKey,
    ) -> Result<usize, TriangulationError> {
        let triangles = self.tet(tet)?.triangles;
        for (i, triangle) in triangles.into_iter().enumerate() {
            if self.tri(triangle)?.is_adjacent_to_tetrahedron(other) {
                return Ok(i);
            }
        }
        Err(TriangulationError::NotIncident("tetrahedron"))
    }

    /// Whether the two tetrahedra share a triangle.
    pub(crate) fn is_neighbor(&self, tet: TetKey, other: TetKey) -> Result<bool, TriangulationError> {
        let triangles = self.tet(tet)?.triangles;
        for triangle in triangles {
            if self.tri(triangle)?.is_adjacent_to_tetrahedron(other) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The three bordering triangles of `tet` that share an edge with
    /// `base`, in the order of the corners of `base`.
    fn touching_triangles(
        &self,
        tet: TetKey,
        base: TriKey,
    ) -> Result<[TriKey; 3], TriangulationError> {
        let base_nodes = self.tri(base)?.nodes();
        let record = self.tet(tet)?;
        Ok([
            record.opposite_triangle_of(base_nodes[0])?,
            record.opposite_triangle_of(base_nodes[1])?,
            record.opposite_triangle_of(base_nodes[2])?,
        ])
    }

    /// Classifies `point` against the cone spanned by `tet` over its
    /// triangle `connecting_triangle_number`: `1` strictly convex, `0` on
    /// the boundary, `-1` non-convex. Flat and infinite tetrahedra never
    /// report a strictly convex position.
    pub(crate) fn is_in_convex_position(
        &mut self,
        tet: TetKey,
        point: &[f64; 3],
        connecting_triangle_number: usize,
    ) -> Result<i32, TriangulationError> {
        let record = self.tet(tet)?;
        if record.is_flat() {
            let triangle0 = record.triangles[0];
            self.update_triangle_plane(triangle0)?;
            let positions = self.tri_positions(triangle0)?;
            let in_plane = self.tri(triangle0)?.orientation(&positions, point, point) == 0;
            return Ok(if in_plane { 0 } else { -1 });
        }
        if record.is_infinite() {
            return Ok(-1);
        }
        let mut result = 1;
        for i in 0..4 {
            if i == connecting_triangle_number {
                continue;
            }
            let triangle = self.tet(tet)?.triangles[i];
            self.update_triangle_plane(triangle)?;
            let positions = self.tri_positions(triangle)?;
            let corner = self.tet(tet)?.nodes[i].ok_or(TriangulationError::StaleHandle)?;
            let corner_position = self.node_position(corner)?;
            let current = self
                .tri(triangle)?
                .orientation(&positions, &corner_position, point);
            if current < 0 {
                return Ok(-1);
            }
            result *= current;
        }
        Ok(result)
    }

    /// Replaces two tetrahedra sharing a triangle by three sharing the edge
    /// between the two apex corners.
    ///
    /// Returns `None` when the apexes are not in convex position around the
    /// shared triangle and the flip is not applicable. A borderline convex
    /// position produces flat tetrahedra where a side triangle is coplanar
    /// with the apex.
    pub(crate) fn flip_2_to_3(
        &mut self,
        tet_a: TetKey,
        tet_b: TetKey,
    ) -> Result<Option<[TetKey; 3]>, TriangulationError> {
        let connecting_number = self.connecting_triangle_number(tet_a, tet_b)?;
        let connecting = self.tet(tet_a)?.triangles[connecting_number];
        let Some(lower) = self.tet(tet_b)?.opposite_node_of(connecting)? else {
            return Ok(None);
        };
        let lower_position = self.node_position(lower)?;
        let convex_position =
            self.is_in_convex_position(tet_a, &lower_position, connecting_number)?;
        if convex_position < 0 {
            return Ok(None);
        }
        let check_for_flat = convex_position == 0;
        let upper_triangles = self.touching_triangles(tet_a, connecting)?;
        let lower_triangles = self.touching_triangles(tet_b, connecting)?;
        let upper = self.tet(tet_a)?.nodes[connecting_number];
        let connecting_nodes = self.tri(connecting)?.nodes();
        let new_triangles = [
            self.triangles
                .insert(Triangle::new(upper, Some(lower), connecting_nodes[0])),
            self.triangles
                .insert(Triangle::new(upper, Some(lower), connecting_nodes[1])),
            self.triangles
                .insert(Triangle::new(upper, Some(lower), connecting_nodes[2])),
        ];
        self.remove_tetrahedron(tet_a)?;
        self.remove_tetrahedron(tet_b)?;
        self.drop_triangle_if_orphaned(connecting);
        let mut created = [TetKey::default(); 3];
        for i in 0..3 {
            // A corner in slot 0 of the connecting triangle must stay in a
            // slot adjacent to 0, so that a `None` ends up in slot 0 again.
            let mut a = (i + 1) % 3;
            let mut b = (i + 2) % 3;
            if b == 0 {
                b = 2;
                a = 0;
            }
            let flat = check_for_flat && {
                let positions = self.tri_positions(upper_triangles[i])?;
                self.tri(upper_triangles[i])?
                    .orientation(&positions, &lower_position, &lower_position)
                    == 0
            };
            created[i] = self.create_tetrahedron(
                [
                    new_triangles[b],
                    upper_triangles[i],
                    lower_triangles[i],
                    new_triangles[a],
                ],
                [connecting_nodes[a], Some(lower), upper, connecting_nodes[b]],
                flat,
            )?;
        }
        Ok(Some(created))
    }

    /// Replaces three tetrahedra arranged around a common edge by two
    /// sharing the triangle of the three off-edge corners.
    pub(crate) fn flip_3_to_2(
        &mut self,
        tet_a: TetKey,
        tet_b: TetKey,
        tet_c: TetKey,
    ) -> Result<[TetKey; 2], TriangulationError> {
        let node0 = self.tet(tet_a)?.nodes[self.connecting_triangle_number(tet_a, tet_b)?];
        let node1 = self.tet(tet_b)?.nodes[self.connecting_triangle_number(tet_b, tet_c)?];
        let node2 = self.tet(tet_c)?.nodes[self.connecting_triangle_number(tet_c, tet_a)?];
        let upper = self.tet(tet_a)?.first_other_node(node0, node1);
        let lower = self.tet(tet_a)?.second_other_node(node0, node1);
        let new_triangle = self.triangles.insert(Triangle::new(node0, node1, node2));
        let a_opposite_lower = self.tet(tet_a)?.opposite_triangle_of(lower)?;
        let b_opposite_lower = self.tet(tet_b)?.opposite_triangle_of(lower)?;
        let c_opposite_lower = self.tet(tet_c)?.opposite_triangle_of(lower)?;
        let a_opposite_upper = self.tet(tet_a)?.opposite_triangle_of(upper)?;
        let b_opposite_upper = self.tet(tet_b)?.opposite_triangle_of(upper)?;
        let c_opposite_upper = self.tet(tet_c)?.opposite_triangle_of(upper)?;
        let connecting_ab = self.tet(tet_a)?.triangles[self.connecting_triangle_number(tet_a, tet_b)?];
        let connecting_bc = self.tet(tet_b)?.triangles[self.connecting_triangle_number(tet_b, tet_c)?];
        let connecting_ca = self.tet(tet_c)?.triangles[self.connecting_triangle_number(tet_c, tet_a)?];
        let flat = self.tet(tet_a)?.is_flat()
            && self.tet(tet_b)?.is_flat()
            && self.tet(tet_c)?.is_flat();
        self.remove_tetrahedron(tet_a)?;
        self.remove_tetrahedron(tet_b)?;
        self.remove_tetrahedron(tet_c)?;
        for triangle in [connecting_ab, connecting_bc, connecting_ca] {
            self.drop_triangle_if_orphaned(triangle);
        }
        let first = self.create_tetrahedron(
            [new_triangle, a_opposite_lower, b_opposite_lower, c_opposite_lower],
            [upper, node2, node0, node1],
            flat,
        )?;
        let second = self.create_tetrahedron(
            [new_triangle, a_opposite_upper, b_opposite_upper, c_opposite_upper],
            [lower, node2, node0, node1],
            flat,
        )?;
        Ok([first, second])
    }

    /// Removes a pair of flat tetrahedra that share two triangles, stitching
    /// their outer neighbors directly together. Returns the neighbors that
    /// were adjacent to the pair.
    pub(crate) fn remove_two_flat_tetrahedra(
        &mut self,
        tet_a: TetKey,
        tet_b: TetKey,
    ) -> Result<Vec<TetKey>, TriangulationError> {
        let triangles_a = self.tet(tet_a)?.triangles;
        let triangles_b = self.tet(tet_b)?.triangles;
        let mut outer_a = [0_usize; 3];
        let mut outer_b = [0_usize; 3];
        let mut outer_count = 0;
        for i in 0..4 {
            if triangles_b.contains(&triangles_a[i]) {
                continue;
            }
            outer_a[outer_count] = i;
            for j in 0..4 {
                let similar = {
                    let a = self.tri(triangles_a[i])?;
                    let b = self.tri(triangles_b[j])?;
                    a.is_similar_to(b)
                };
                if similar {
                    outer_b[outer_count] = j;
                }
            }
            outer_count += 1;
        }
        self.remove_tetrahedron(tet_a)?;
        self.remove_tetrahedron(tet_b)?;
        for triangle in triangles_a {
            if triangles_b.contains(&triangle) {
                self.drop_triangle_if_orphaned(triangle);
            }
        }
        let mut adjacent = Vec::new();
        for i in 0..outer_count {
            let old_triangle = triangles_a[outer_a[i]];
            let new_triangle = triangles_b[outer_b[i]];
            let neighbor_a = self
                .tri(old_triangle)?
                .opposite_tetrahedron(None)?
                .ok_or(TriangulationError::MissingNeighbor)?;
            if !adjacent.contains(&neighbor_a) {
                adjacent.push(neighbor_a);
            }
            let neighbor_b = self
                .tri(new_triangle)?
                .opposite_tetrahedron(None)?
                .ok_or(TriangulationError::MissingNeighbor)?;
            if !adjacent.contains(&neighbor_b) {
                adjacent.push(neighbor_b);
            }
            self.replace_triangle(neighbor_a, old_triangle, new_triangle)?;
            self.drop_triangle_if_orphaned(old_triangle);
        }
        Ok(adjacent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn edge_index_is_a_bijection_over_node_pairs() {
        let mut seen = [false; 6];
        for n1 in 0..4 {
            for n2 in n1 + 1..4 {
                let index = Tetrahedron::edge_index(n1, n2);
                assert!(!seen[index]);
                seen[index] = true;
                assert_eq!(index, Tetrahedron::edge_index(n2, n1));
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn other_node_lookups_scan_from_opposite_ends() {
        let mut nodes = SlotMap::<NodeKey, ()>::with_key();
        let keys: Vec<_> = (0..4).map(|_| nodes.insert(())).collect();
        let mut triangles = SlotMap::<TriKey, ()>::with_key();
        let t = triangles.insert(());
        let record = Tetrahedron::new_record(
            [Some(keys[0]), Some(keys[1]), Some(keys[2]), Some(keys[3])],
            [t; 4],
            false,
        );
        let first = record.first_other_node(Some(keys[0]), Some(keys[2]));
        let second = record.second_other_node(Some(keys[0]), Some(keys[2]));
        assert_eq!(first, Some(keys[1]));
        assert_eq!(second, Some(keys[3]));
        assert_ne!(first, second);
    }

    #[test]
    fn index_of_node_addresses_the_infinite_slot_with_none() {
        let mut nodes = SlotMap::<NodeKey, ()>::with_key();
        let keys: Vec<_> = (0..3).map(|_| nodes.insert(())).collect();
        let mut triangles = SlotMap::<TriKey, ()>::with_key();
        let t = triangles.insert(());
        let record = Tetrahedron::new_record(
            [None, Some(keys[0]), Some(keys[1]), Some(keys[2])],
            [t; 4],
            false,
        );
        assert!(record.is_infinite());
        assert_eq!(record.index_of_node(None).unwrap(), 0);
        assert_eq!(record.index_of_node(Some(keys[1])).unwrap(), 2);
    }
}
