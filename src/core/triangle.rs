//! Triangles of the triangulation.
//!
//! A triangle caches its plane equation and circumcenter and keeps one
//! dirty bit per cached value. Node movement clears the bits; every
//! predicate refreshes what it needs before answering. Positions are not
//! stored on the record; callers pass the three corner coordinates in slot
//! order.

use num_rational::BigRational;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::core::triangulation::{NodeKey, TetKey};
use crate::error::TriangulationError;
use crate::geometry::exact::{
    exact_three_plane_intersection, rational_signum, sentinel_distance, ExactVector,
};
use crate::geometry::plane::{Plane, PLANE_TOLERANCE};
use crate::geometry::vector::{
    add, cross, dot, norm, normalized, squared_norm, sub, three_plane_intersection,
};

/// A triangle between three nodes, bordering up to two tetrahedra.
///
/// Slot 0 of `nodes` holds `None` for the triangles that close the convex
/// hull towards the virtual point at infinity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Triangle {
    pub(crate) nodes: [Option<NodeKey>; 3],
    pub(crate) tetrahedra: [Option<TetKey>; 2],
    pub(crate) plane: Plane,
    circum_center: [f64; 3],
    plane_updated: bool,
    circum_center_updated: bool,
    normal_updated: bool,
    upper_side_positive: bool,
    connection_checked: i64,
}

impl Triangle {
    /// Creates an unattached triangle. A `None` corner is normalized into
    /// slot 0.
    pub(crate) fn new(a: Option<NodeKey>, b: Option<NodeKey>, c: Option<NodeKey>) -> Self {
        let mut nodes = [a, b, c];
        if let Some(position) = nodes.iter().position(Option::is_none) {
            nodes.swap(0, position);
        }
        Self {
            nodes,
            tetrahedra: [None, None],
            plane: Plane {
                normal: [0.0; 3],
                offset: 0.0,
                tolerance: 0.0,
            },
            circum_center: [0.0; 3],
            plane_updated: false,
            circum_center_updated: false,
            normal_updated: false,
            upper_side_positive: true,
            connection_checked: -1,
        }
    }

    /// The three corner nodes, infinite slot first.
    #[must_use]
    pub fn nodes(&self) -> [Option<NodeKey>; 3] {
        self.nodes
    }

    /// The corner nodes in canonical order, usable as a lookup key.
    #[must_use]
    pub(crate) fn sorted_nodes(&self) -> [Option<NodeKey>; 3] {
        let mut key = self.nodes;
        key.sort_unstable();
        key
    }

    /// Whether one corner is the virtual point at infinity.
    #[must_use]
    pub fn is_infinite(&self) -> bool {
        self.nodes[0].is_none()
    }

    /// Whether `node` is one of the corners.
    #[must_use]
    pub fn is_adjacent_to_node(&self, node: NodeKey) -> bool {
        self.nodes.contains(&Some(node))
    }

    /// Whether `tetrahedron` borders this triangle.
    #[must_use]
    pub fn is_adjacent_to_tetrahedron(&self, tetrahedron: TetKey) -> bool {
        self.tetrahedra.contains(&Some(tetrahedron))
    }

    /// Whether no tetrahedron borders this triangle.
    #[must_use]
    pub fn is_completely_open(&self) -> bool {
        self.tetrahedra[0].is_none() && self.tetrahedra[1].is_none()
    }

    /// Whether tetrahedra border this triangle on both sides.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tetrahedra[0].is_some() && self.tetrahedra[1].is_some()
    }

    /// Whether both triangles connect the same set of nodes.
    #[must_use]
    pub fn is_similar_to(&self, other: &Triangle) -> bool {
        self.nodes.iter().all(|n| other.nodes.contains(n))
    }

    /// The cached circumcenter. Only meaningful after an update.
    #[must_use]
    pub fn circum_center(&self) -> [f64; 3] {
        self.circum_center
    }

    pub(crate) fn add_tetrahedron(&mut self, tetrahedron: TetKey) {
        if self.tetrahedra[0].is_none() {
            self.tetrahedra[0] = Some(tetrahedron);
        } else {
            self.tetrahedra[1] = Some(tetrahedron);
        }
    }

    pub(crate) fn remove_tetrahedron(&mut self, tetrahedron: TetKey) {
        if self.tetrahedra[0] == Some(tetrahedron) {
            self.tetrahedra[0] = None;
        } else {
            self.tetrahedra[1] = None;
        }
    }

    /// The tetrahedron on the far side of this triangle, seen from `of`.
    /// Pass `None` to ask for the single bordering tetrahedron of an open
    /// triangle.
    pub fn opposite_tetrahedron(
        &self,
        of: Option<TetKey>,
    ) -> Result<Option<TetKey>, TriangulationError> {
        if self.tetrahedra[0] == of {
            Ok(self.tetrahedra[1])
        } else if self.tetrahedra[1] == of {
            Ok(self.tetrahedra[0])
        } else {
            Err(TriangulationError::NotIncident("triangle"))
        }
    }

    /// Marks this triangle as visited for generation `index`. Returns
    /// whether it had already been visited in that generation.
    pub(crate) fn was_checked_already(&mut self, index: i64) -> bool {
        if self.connection_checked == index {
            true
        } else {
            self.connection_checked = index;
            false
        }
    }

    pub(crate) fn reset_visit_marker(&mut self) {
        self.connection_checked = -1;
    }

    /// Invalidates every cached value after a corner moved.
    pub(crate) fn inform_about_node_movement(&mut self) {
        self.plane_updated = false;
        self.circum_center_updated = false;
        self.normal_updated = false;
    }

    fn init_plane(
        &mut self,
        direction1: &[f64; 3],
        direction2: &[f64; 3],
        on_plane: &[f64; 3],
    ) -> Result<(), TriangulationError> {
        if !self.normal_updated {
            self.normal_updated = true;
            self.plane.normal = cross(direction1, direction2);
            self.plane.tolerance =
                dot(&self.plane.normal, &self.plane.normal) * PLANE_TOLERANCE;
            if self.plane.tolerance == 0.0 {
                return Err(TriangulationError::DegeneratePlane);
            }
        }
        self.plane.offset = dot(&self.plane.normal, on_plane);
        Ok(())
    }

    /// Refreshes the plane equation if a corner moved since the last update.
    pub(crate) fn update_plane_equation(
        &mut self,
        positions: &[[f64; 3]; 3],
    ) -> Result<(), TriangulationError> {
        if !self.plane_updated {
            self.plane_updated = true;
            let direction1 = sub(&positions[1], &positions[0]);
            let direction2 = sub(&positions[2], &positions[0]);
            self.init_plane(&direction1, &direction2, &positions[0])?;
        }
        Ok(())
    }

    /// Refreshes the circumcenter if a corner moved since the last update.
    ///
    /// Also refreshes the plane normal as a side effect; the center is the
    /// intersection of the two perpendicular bisector planes with the
    /// triangle plane. When the corners are collinear the center degenerates
    /// to a sentinel far outside any sphere of interest.
    pub(crate) fn update_circum_center(&mut self, positions: &[[f64; 3]; 3]) {
        if self.circum_center_updated {
            return;
        }
        self.circum_center_updated = true;
        let line01 = sub(&positions[1], &positions[0]);
        let line02 = sub(&positions[2], &positions[0]);
        let n2 = cross(&normalized(&line01), &normalized(&line02));
        self.plane.normal = n2;
        self.plane.offset = dot(&n2, &positions[0]);
        self.normal_updated = true;
        self.plane.tolerance = dot(&n2, &n2) * PLANE_TOLERANCE;
        let normals = [line01, line02, n2];
        let offsets = [
            0.5 * dot(&line01, &add(&positions[0], &positions[1])),
            0.5 * dot(&line02, &add(&positions[0], &positions[2])),
            self.plane.offset,
        ];
        self.circum_center =
            three_plane_intersection(&normals, &offsets).unwrap_or([f64::MAX; 3]);
    }

    /// Refreshes both cached values.
    pub(crate) fn update(
        &mut self,
        positions: &[[f64; 3]; 3],
    ) -> Result<(), TriangulationError> {
        self.update_circum_center(positions);
        self.update_plane_equation(positions)
    }

    /// Position of `point` relative to the circumcircle: `1` inside, `0` on
    /// the circle, `-1` outside. Falls back to exact arithmetic inside the
    /// tolerance window.
    pub(crate) fn circle_orientation(
        &mut self,
        positions: &[[f64; 3]; 3],
        point: &[f64; 3],
    ) -> i32 {
        self.update_circum_center(positions);
        let squared_distance = squared_norm(&sub(point, &self.circum_center));
        let squared_radius = squared_norm(&sub(&positions[0], &self.circum_center));
        let tolerance = squared_radius * PLANE_TOLERANCE;
        if squared_distance > squared_radius + tolerance {
            -1
        } else if squared_distance < squared_radius - tolerance {
            1
        } else {
            let points = exact_points(positions);
            let normal = exact_normal(&points);
            match exact_circum_center(&points, &normal) {
                Some(center) => {
                    let radius2 = (&points[0] - &center).squared_length();
                    let distance2 =
                        (&ExactVector::from_f64(point) - &center).squared_length();
                    rational_signum(&(radius2 - distance2))
                }
                None => 0,
            }
        }
    }

    /// Side classification of two points relative to the triangle plane,
    /// with the exact fallback built from the corner coordinates instead of
    /// the cached float normal. Requires an updated plane.
    #[must_use]
    pub(crate) fn orientation(
        &self,
        positions: &[[f64; 3]; 3],
        point1: &[f64; 3],
        point2: &[f64; 3],
    ) -> i32 {
        self.plane.orientation_with(point1, point2, || {
            exact_side_product(positions, point1, point2)
        })
    }

    /// Classifies `point` against the oriented plane: `1` on the upper
    /// side, `-1` on the lower side, `0` in the plane. Requires an updated
    /// plane.
    #[must_use]
    pub(crate) fn orientation_to_upper_side(
        &self,
        positions: &[[f64; 3]; 3],
        point: &[f64; 3],
    ) -> i32 {
        let d = dot(point, &self.plane.normal);
        if d > self.plane.offset + self.plane.tolerance {
            if self.upper_side_positive { 1 } else { -1 }
        } else if d < self.plane.offset - self.plane.tolerance {
            if self.upper_side_positive { -1 } else { 1 }
        } else {
            let points = exact_points(positions);
            let normal = exact_normal(&points);
            let offset = normal.dot(&points[0]);
            let side = normal.dot(&ExactVector::from_f64(point));
            if side == offset {
                0
            } else if (offset > side) ^ self.upper_side_positive {
                1
            } else {
                -1
            }
        }
    }

    /// Whether `point` lies on the upper side or in the plane.
    #[must_use]
    pub(crate) fn on_upper_side(&self, positions: &[[f64; 3]; 3], point: &[f64; 3]) -> bool {
        self.orientation_to_upper_side(positions, point) >= 0
    }

    /// Whether `point` lies strictly on the upper side.
    #[must_use]
    pub(crate) fn truly_on_upper_side(
        &self,
        positions: &[[f64; 3]; 3],
        point: &[f64; 3],
    ) -> bool {
        self.orientation_to_upper_side(positions, point) > 0
    }

    /// Defines the side on which `point` lies as the upper side.
    ///
    /// Fails when the point lies exactly in the triangle plane, which no
    /// caller can meaningfully orient towards.
    pub(crate) fn orient_to_side(
        &mut self,
        positions: &[[f64; 3]; 3],
        point: &[f64; 3],
    ) -> Result<(), TriangulationError> {
        self.update_plane_equation(positions)?;
        let d = dot(point, &self.plane.normal);
        if d > self.plane.offset + self.plane.tolerance {
            self.upper_side_positive = true;
        } else if d < self.plane.offset - self.plane.tolerance {
            self.upper_side_positive = false;
        } else {
            let points = exact_points(positions);
            let normal = exact_normal(&points);
            let offset = normal.dot(&points[0]);
            let side = normal.dot(&ExactVector::from_f64(point));
            match side.cmp(&offset) {
                std::cmp::Ordering::Greater => self.upper_side_positive = true,
                std::cmp::Ordering::Less => self.upper_side_positive = false,
                std::cmp::Ordering::Equal => return Err(TriangulationError::PointInPlane),
            }
        }
        Ok(())
    }

    pub(crate) fn flip_upper_side(&mut self) {
        self.upper_side_positive = !self.upper_side_positive;
    }

    /// Signed Delaunay distance of `fourth` over the open side.
    ///
    /// The distance grows monotonically with the circumsphere of the
    /// tetrahedron the triangle would form with `fourth`; smaller is better
    /// when filling a cavity. Points not on the upper side get the `MAX`
    /// sentinel. Requires an updated triangle.
    #[must_use]
    pub(crate) fn sd_distance(&self, positions: &[[f64; 3]; 3], fourth: &[f64; 3]) -> f64 {
        if self.is_infinite() || !self.on_upper_side(positions, fourth) {
            return f64::MAX;
        }
        let distance = self.raw_sd_distance(positions, fourth);
        if distance == f64::MAX {
            f64::MAX
        } else if self.upper_side_positive {
            distance
        } else {
            -distance
        }
    }

    fn raw_sd_distance(&self, positions: &[[f64; 3]; 3], fourth: &[f64; 3]) -> f64 {
        let ad = sub(&positions[0], fourth);
        let mut denominator = dot(&ad, &self.plane.normal);
        if denominator != 0.0 && denominator.abs() < self.plane.tolerance {
            // The float denominator is inside the uncertainty window.
            // Recompute it exactly and map its sign back onto the cached
            // normal's direction.
            let points = exact_points(positions);
            let normal = exact_normal(&points);
            let exact_denominator =
                normal.dot(&(&points[0] - &ExactVector::from_f64(fourth)));
            if exact_denominator.is_zero() {
                denominator = 0.0;
            } else {
                denominator =
                    crate::geometry::exact::rational_to_f64(&exact_denominator);
                let alignment = normal.dot(&ExactVector::from_f64(&self.plane.normal));
                if alignment < BigRational::zero() {
                    denominator = -denominator;
                }
            }
        }
        if denominator == 0.0 {
            f64::MAX
        } else {
            let half_sum = crate::geometry::vector::scale(0.5, &add(&positions[0], fourth));
            dot(&ad, &sub(&half_sum, &self.circum_center)) / denominator
        }
    }

    /// Exact signed Delaunay distance, used to break ties the float version
    /// cannot resolve.
    #[must_use]
    pub(crate) fn sd_distance_exact(
        &self,
        positions: &[[f64; 3]; 3],
        fourth: &[f64; 3],
    ) -> BigRational {
        if self.is_infinite() || !self.on_upper_side(positions, fourth) {
            return sentinel_distance();
        }
        let points = exact_points(positions);
        let mut normal = exact_normal(&points);
        if normal.dot(&ExactVector::from_f64(&self.plane.normal)) < BigRational::zero() {
            normal = -normal;
        }
        let fourth_point = ExactVector::from_f64(fourth);
        let ad = &points[0] - &fourth_point;
        let denominator = ad.dot(&normal);
        if denominator.is_zero() {
            return sentinel_distance();
        }
        let Some(center) = exact_circum_center(&points, &normal) else {
            return sentinel_distance();
        };
        let half = BigRational::new(1.into(), 2.into());
        let mid = (&points[0] + &fourth_point).scale(&half);
        let distance = (&mid - &center).dot(&ad) / denominator;
        if self.upper_side_positive {
            distance
        } else {
            -distance
        }
    }

    /// Order of magnitude of the signed Delaunay distances this triangle
    /// produces, used to scale comparison tolerances. Requires an updated
    /// triangle.
    #[must_use]
    pub(crate) fn typical_sd_distance(&self, positions: &[[f64; 3]; 3]) -> f64 {
        if self.is_infinite() {
            f64::MAX
        } else {
            norm(&sub(&positions[0], &self.circum_center)) / norm(&self.plane.normal)
        }
    }
}

fn exact_points(positions: &[[f64; 3]; 3]) -> [ExactVector; 3] {
    [
        ExactVector::from_f64(&positions[0]),
        ExactVector::from_f64(&positions[1]),
        ExactVector::from_f64(&positions[2]),
    ]
}

/// Exact normal of the triangle spanned by three points, oriented like the
/// cached float normal of an up-to-date [`Triangle`].
pub(crate) fn exact_normal(points: &[ExactVector; 3]) -> ExactVector {
    (&points[1] - &points[0]).cross(&(&points[2] - &points[0]))
}

/// Exact circumcenter, or `None` for collinear points.
pub(crate) fn exact_circum_center(
    points: &[ExactVector; 3],
    normal: &ExactVector,
) -> Option<ExactVector> {
    let half = BigRational::new(1.into(), 2.into());
    let n0 = &points[1] - &points[0];
    let n1 = &points[2] - &points[0];
    let offsets = [
        n0.dot(&(&points[0] + &points[1])) * &half,
        n1.dot(&(&points[0] + &points[2])) * &half,
        normal.dot(&points[0]),
    ];
    exact_three_plane_intersection(&[n0, n1, normal.clone()], &offsets)
}

/// Exact side-product of two points against the plane through three points:
/// `1` strictly same side, `-1` strictly different sides, `0` when either
/// point lies in the plane.
pub(crate) fn exact_side_product(
    positions: &[[f64; 3]; 3],
    point1: &[f64; 3],
    point2: &[f64; 3],
) -> i32 {
    let points = exact_points(positions);
    let normal = exact_normal(&points);
    let offset = normal.dot(&points[0]);
    let side1 = normal.dot(&ExactVector::from_f64(point1)) - &offset;
    let side2 = normal.dot(&ExactVector::from_f64(point2)) - offset;
    rational_signum(&side1) * rational_signum(&side2)
}
