//! Oriented planes with a tolerance window around their surface.
//!
//! A [`Plane`] stores `normal . x = offset` together with a tolerance that
//! scales with the squared normal length. Side queries answer from the float
//! data when both points are clearly outside the window and defer to an exact
//! fallback otherwise.

use serde::{Deserialize, Serialize};

use crate::error::TriangulationError;
use crate::geometry::exact::{rational_from, rational_signum, ExactVector};
use crate::geometry::vector::{cross, dot, norm, scale};

/// Relative width of the uncertainty window around a plane.
pub const PLANE_TOLERANCE: f64 = 1e-9;

/// A plane in Hessian-like form with an orientation and a tolerance window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub(crate) normal: [f64; 3],
    pub(crate) offset: f64,
    pub(crate) tolerance: f64,
}

impl Plane {
    /// Builds a plane from a normal vector and an offset. The tolerance is
    /// derived from the squared normal length.
    #[must_use]
    pub fn new(normal: [f64; 3], offset: f64) -> Self {
        let tolerance = dot(&normal, &normal) * PLANE_TOLERANCE;
        Self {
            normal,
            offset,
            tolerance,
        }
    }

    /// Builds a plane spanned by two direction vectors through a point.
    ///
    /// With `normalize` the normal is scaled to unit length and the tolerance
    /// window becomes the fixed [`PLANE_TOLERANCE`]. Fails when the
    /// directions are parallel and the normal degenerates to zero.
    pub fn from_directions(
        direction1: &[f64; 3],
        direction2: &[f64; 3],
        on_plane: &[f64; 3],
        normalize: bool,
    ) -> Result<Self, TriangulationError> {
        let mut normal = cross(direction1, direction2);
        let mut tolerance = dot(&normal, &normal) * PLANE_TOLERANCE;
        if tolerance == 0.0 {
            return Err(TriangulationError::DegeneratePlane);
        }
        if normalize {
            normal = scale(1.0 / norm(&normal), &normal);
            tolerance = PLANE_TOLERANCE;
        }
        let offset = dot(&normal, on_plane);
        Ok(Self {
            normal,
            offset,
            tolerance,
        })
    }

    /// The stored normal vector.
    #[must_use]
    pub fn normal(&self) -> [f64; 3] {
        self.normal
    }

    /// The stored offset.
    #[must_use]
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// The current tolerance window.
    #[must_use]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Flips the plane so that `point` lies on its upper side. Points inside
    /// the tolerance window leave the orientation unchanged.
    pub fn define_upper_side(&mut self, point: &[f64; 3]) {
        if dot(point, &self.normal) + self.tolerance < self.offset {
            self.flip_orientation();
        }
    }

    pub(crate) fn flip_orientation(&mut self) {
        self.normal = scale(-1.0, &self.normal);
        self.offset = -self.offset;
    }

    /// Side classification of two points relative to this plane.
    ///
    /// Returns `1` when both points lie strictly on the same side, `-1` when
    /// they lie strictly on different sides and `0` when either point lies on
    /// the plane. Answers inside the tolerance window are recomputed exactly
    /// from the stored normal and offset.
    #[must_use]
    pub fn orientation(&self, point1: &[f64; 3], point2: &[f64; 3]) -> i32 {
        self.orientation_with(point1, point2, || self.orientation_exact(point1, point2))
    }

    /// Side classification with a caller-supplied exact fallback.
    ///
    /// The fallback runs whenever either dot product lands inside the
    /// tolerance window. Callers that know the defining points of the plane
    /// pass a fallback built from those, which is more accurate than the
    /// stored float normal.
    pub fn orientation_with(
        &self,
        point1: &[f64; 3],
        point2: &[f64; 3],
        exact: impl FnOnce() -> i32,
    ) -> i32 {
        let dot1 = dot(point1, &self.normal);
        let dot2 = dot(point2, &self.normal);
        if dot1 > self.offset + self.tolerance {
            if dot2 < self.offset - self.tolerance {
                -1
            } else if dot2 > self.offset + self.tolerance {
                1
            } else {
                exact()
            }
        } else if dot1 < self.offset - self.tolerance {
            if dot2 > self.offset + self.tolerance {
                -1
            } else if dot2 < self.offset - self.tolerance {
                1
            } else {
                exact()
            }
        } else {
            exact()
        }
    }

    /// Exact side classification from the stored normal and offset.
    #[must_use]
    pub fn orientation_exact(&self, point1: &[f64; 3], point2: &[f64; 3]) -> i32 {
        let normal = ExactVector::from_f64(&self.normal);
        let offset = rational_from(self.offset);
        let side1 = normal.dot(&ExactVector::from_f64(point1)) - &offset;
        let side2 = normal.dot(&ExactVector::from_f64(point2)) - offset;
        rational_signum(&side1) * rational_signum(&side2)
    }

    /// Whether both points lie strictly on the same side.
    #[must_use]
    pub fn truly_on_same_side(&self, point1: &[f64; 3], point2: &[f64; 3]) -> bool {
        self.orientation(point1, point2) > 0
    }

    /// Whether the points lie strictly on different sides.
    #[must_use]
    pub fn truly_on_different_sides(&self, point1: &[f64; 3], point2: &[f64; 3]) -> bool {
        self.orientation(point1, point2) < 0
    }

    /// Whether both points lie on the same side, counting points on the
    /// plane as belonging to either side.
    #[must_use]
    pub fn on_same_side(&self, point1: &[f64; 3], point2: &[f64; 3]) -> bool {
        self.orientation(point1, point2) >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xy_plane() -> Plane {
        Plane::from_directions(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0], &[0.0, 0.0, 0.0], false)
            .unwrap()
    }

    #[test]
    fn clear_side_queries_stay_inexact() {
        let plane = xy_plane();
        assert_eq!(plane.orientation(&[0.0, 0.0, 1.0], &[1.0, 1.0, 2.0]), 1);
        assert_eq!(plane.orientation(&[0.0, 0.0, 1.0], &[0.0, 0.0, -1.0]), -1);
    }

    #[test]
    fn point_on_plane_classifies_as_zero() {
        let plane = xy_plane();
        assert_eq!(plane.orientation(&[5.0, -3.0, 0.0], &[0.0, 0.0, 1.0]), 0);
    }

    #[test]
    fn identical_points_classify_by_their_own_side() {
        let plane = xy_plane();
        // The query grades the pair against the plane, so a point compared
        // with itself reads "same side" unless it lies on the plane.
        assert_eq!(plane.orientation(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1);
        assert_eq!(plane.orientation(&[1.0, 2.0, 0.0], &[1.0, 2.0, 0.0]), 0);
    }

    #[test]
    fn define_upper_side_flips_when_needed() {
        let mut plane = xy_plane();
        let offset_before = plane.offset();
        plane.define_upper_side(&[0.0, 0.0, -1.0]);
        assert_eq!(plane.offset(), -offset_before);
        assert!(plane.truly_on_same_side(&[0.0, 0.0, -1.0], &[1.0, 1.0, -2.0]));
    }

    #[test]
    fn parallel_directions_are_rejected() {
        let result =
            Plane::from_directions(&[1.0, 0.0, 0.0], &[2.0, 0.0, 0.0], &[0.0, 0.0, 0.0], false);
        assert!(matches!(result, Err(TriangulationError::DegeneratePlane)));
    }

    #[test]
    fn normalized_plane_uses_fixed_tolerance() {
        let plane =
            Plane::from_directions(&[2.0, 0.0, 0.0], &[0.0, 2.0, 0.0], &[0.0, 0.0, 0.0], true)
                .unwrap();
        assert!((plane.tolerance() - PLANE_TOLERANCE).abs() < f64::EPSILON);
        assert!((crate::geometry::vector::norm(&plane.normal()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn near_window_answers_come_from_the_exact_fallback() {
        let plane = xy_plane();
        // Inside the window for the float test, strictly above for the exact one.
        let barely_above = [0.0, 0.0, plane.tolerance() * 0.5];
        assert_eq!(plane.orientation(&barely_above, &[0.0, 0.0, 1.0]), 1);
    }
}
