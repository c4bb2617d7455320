//! Plain `f64` 3-vector arithmetic.
//!
//! Everything in this module operates on bare `[f64; 3]` arrays. The
//! tolerance-window predicates built on top of these helpers live in
//! [`crate::geometry::plane`] and in the core records; this module is purely
//! the inexact layer.

/// Componentwise sum of two vectors.
#[inline]
#[must_use]
pub fn add(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// Componentwise difference `a - b`.
#[inline]
#[must_use]
pub fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Scales a vector by a factor.
#[inline]
#[must_use]
pub fn scale(factor: f64, a: &[f64; 3]) -> [f64; 3] {
    [factor * a[0], factor * a[1], factor * a[2]]
}

/// Dot product.
#[inline]
#[must_use]
pub fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Cross product `a x b`.
#[inline]
#[must_use]
pub fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Squared Euclidean length.
#[inline]
#[must_use]
pub fn squared_norm(a: &[f64; 3]) -> f64 {
    dot(a, a)
}

/// Euclidean length.
#[inline]
#[must_use]
pub fn norm(a: &[f64; 3]) -> f64 {
    squared_norm(a).sqrt()
}

/// Returns `a` scaled to unit length. A zero vector is returned unchanged.
#[must_use]
pub fn normalized(a: &[f64; 3]) -> [f64; 3] {
    let len = norm(a);
    if len == 0.0 { *a } else { scale(1.0 / len, a) }
}

/// Determinant of a 3x3 matrix given as three row vectors.
#[must_use]
pub fn det3(rows: &[[f64; 3]; 3]) -> f64 {
    rows[0][0] * (rows[1][1] * rows[2][2] - rows[1][2] * rows[2][1])
        - rows[0][1] * (rows[1][0] * rows[2][2] - rows[1][2] * rows[2][0])
        + rows[0][2] * (rows[1][0] * rows[2][1] - rows[1][1] * rows[2][0])
}

/// Largest absolute component over a set of vectors.
#[must_use]
pub fn max_abs(vectors: &[[f64; 3]]) -> f64 {
    let mut max = 0.0_f64;
    for v in vectors {
        for &c in v {
            max = max.max(c.abs());
        }
    }
    max
}

/// Intersects three planes given in Hessian-like form `normal . x = offset`.
///
/// Returns `None` when the three normals are linearly dependent and the
/// planes have no unique common point.
#[must_use]
pub fn three_plane_intersection(
    normals: &[[f64; 3]; 3],
    offsets: &[f64; 3],
) -> Option<[f64; 3]> {
    three_plane_intersection_with_det(normals, offsets, det3(normals))
}

/// Like [`three_plane_intersection`] but with the determinant of the normal
/// matrix already computed by the caller.
#[must_use]
pub fn three_plane_intersection_with_det(
    normals: &[[f64; 3]; 3],
    offsets: &[f64; 3],
    det: f64,
) -> Option<[f64; 3]> {
    if det == 0.0 {
        return None;
    }
    // Cramer's rule, written with cross products so the three column
    // determinants share their subexpressions.
    let c12 = cross(&normals[1], &normals[2]);
    let c20 = cross(&normals[2], &normals[0]);
    let c01 = cross(&normals[0], &normals[1]);
    let mut result = [0.0; 3];
    for i in 0..3 {
        result[i] =
            (offsets[0] * c12[i] + offsets[1] * c20[i] + offsets[2] * c01[i]) / det;
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cross_is_orthogonal_to_both_factors() {
        let a = [1.0, 2.0, 3.0];
        let b = [-2.0, 0.5, 4.0];
        let c = cross(&a, &b);
        assert_relative_eq!(dot(&a, &c), 0.0, epsilon = 1e-12);
        assert_relative_eq!(dot(&b, &c), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn det3_of_identity_is_one() {
        let id = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert_relative_eq!(det3(&id), 1.0);
    }

    #[test]
    fn three_planes_intersect_in_a_point() {
        let normals = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let point = three_plane_intersection(&normals, &[2.0, -1.0, 0.5]).unwrap();
        assert_relative_eq!(point[0], 2.0);
        assert_relative_eq!(point[1], -1.0);
        assert_relative_eq!(point[2], 0.5);
    }

    #[test]
    fn parallel_planes_have_no_intersection_point() {
        let normals = [[1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        assert!(three_plane_intersection(&normals, &[0.0, 1.0, 0.0]).is_none());
    }

    #[test]
    fn normalized_leaves_zero_vector_alone() {
        assert_eq!(normalized(&[0.0, 0.0, 0.0]), [0.0, 0.0, 0.0]);
        let n = normalized(&[3.0, 0.0, 4.0]);
        assert_relative_eq!(norm(&n), 1.0);
    }
}
