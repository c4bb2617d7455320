//! Arbitrary-precision fallback arithmetic.
//!
//! The floating-point predicates in this crate answer with a tolerance
//! window. Whenever a value lands inside its window the caller re-runs the
//! computation here, on [`BigRational`] coordinates obtained losslessly from
//! the `f64` inputs, and trusts that answer unconditionally.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};

/// Lossless conversion from `f64` to a rational number.
///
/// Non-finite inputs map to zero; the predicates never produce them from
/// finite coordinates, so this is only a guard against degenerate input.
#[must_use]
pub fn rational_from(value: f64) -> BigRational {
    BigRational::from_float(value).unwrap_or_else(BigRational::zero)
}

/// Rounds a rational back to the nearest representable `f64`.
#[must_use]
pub fn rational_to_f64(value: &BigRational) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Sign of a rational as `-1`, `0` or `1`.
#[must_use]
pub fn rational_signum(value: &BigRational) -> i32 {
    if value.is_zero() {
        0
    } else if value.is_positive() {
        1
    } else {
        -1
    }
}

/// A 3-vector with exact rational components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExactVector {
    elements: [BigRational; 3],
}

impl ExactVector {
    /// Wraps three rational components.
    #[must_use]
    pub fn new(elements: [BigRational; 3]) -> Self {
        Self { elements }
    }

    /// Lifts an `f64` vector into exact arithmetic, losslessly.
    #[must_use]
    pub fn from_f64(vector: &[f64; 3]) -> Self {
        Self {
            elements: [
                rational_from(vector[0]),
                rational_from(vector[1]),
                rational_from(vector[2]),
            ],
        }
    }

    /// Component access.
    #[must_use]
    pub fn element(&self, index: usize) -> &BigRational {
        &self.elements[index]
    }

    /// Scales every component by `factor`.
    #[must_use]
    pub fn scale(&self, factor: &BigRational) -> Self {
        Self {
            elements: [
                &self.elements[0] * factor,
                &self.elements[1] * factor,
                &self.elements[2] * factor,
            ],
        }
    }

    /// Divides every component by `divisor`, which must be non-zero.
    #[must_use]
    pub fn divide(&self, divisor: &BigRational) -> Self {
        Self {
            elements: [
                &self.elements[0] / divisor,
                &self.elements[1] / divisor,
                &self.elements[2] / divisor,
            ],
        }
    }

    /// Dot product.
    #[must_use]
    pub fn dot(&self, other: &Self) -> BigRational {
        &self.elements[0] * &other.elements[0]
            + &self.elements[1] * &other.elements[1]
            + &self.elements[2] * &other.elements[2]
    }

    /// Cross product `self x other`.
    #[must_use]
    pub fn cross(&self, other: &Self) -> Self {
        let a = &self.elements;
        let b = &other.elements;
        Self {
            elements: [
                &a[1] * &b[2] - &a[2] * &b[1],
                &a[2] * &b[0] - &a[0] * &b[2],
                &a[0] * &b[1] - &a[1] * &b[0],
            ],
        }
    }

    /// Squared Euclidean length.
    #[must_use]
    pub fn squared_length(&self) -> BigRational {
        self.dot(self)
    }
}

impl std::ops::Add<&ExactVector> for &ExactVector {
    type Output = ExactVector;

    fn add(self, other: &ExactVector) -> ExactVector {
        ExactVector {
            elements: [
                &self.elements[0] + &other.elements[0],
                &self.elements[1] + &other.elements[1],
                &self.elements[2] + &other.elements[2],
            ],
        }
    }
}

impl std::ops::Sub<&ExactVector> for &ExactVector {
    type Output = ExactVector;

    fn sub(self, other: &ExactVector) -> ExactVector {
        ExactVector {
            elements: [
                &self.elements[0] - &other.elements[0],
                &self.elements[1] - &other.elements[1],
                &self.elements[2] - &other.elements[2],
            ],
        }
    }
}

impl std::ops::Neg for ExactVector {
    type Output = ExactVector;

    fn neg(self) -> ExactVector {
        let [x, y, z] = self.elements;
        ExactVector {
            elements: [-x, -y, -z],
        }
    }
}

/// Determinant of a 3x3 matrix given as three exact row vectors.
#[must_use]
pub fn exact_det3(rows: &[ExactVector; 3]) -> BigRational {
    rows[0].dot(&rows[1].cross(&rows[2]))
}

/// Exact counterpart of
/// [`three_plane_intersection`](crate::geometry::vector::three_plane_intersection).
#[must_use]
pub fn exact_three_plane_intersection(
    normals: &[ExactVector; 3],
    offsets: &[BigRational; 3],
) -> Option<ExactVector> {
    let det = exact_det3(normals);
    if det.is_zero() {
        return None;
    }
    let c12 = normals[1].cross(&normals[2]);
    let c20 = normals[2].cross(&normals[0]);
    let c01 = normals[0].cross(&normals[1]);
    let sum = &(&c12.scale(&offsets[0]) + &c20.scale(&offsets[1])) + &c01.scale(&offsets[2]);
    Some(sum.divide(&det))
}

/// Large positive sentinel used where a signed Delaunay distance is not
/// defined. Compares above every real distance the algorithms produce.
#[must_use]
pub fn sentinel_distance() -> BigRational {
    BigRational::from(BigInt::from(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::One;

    #[test]
    fn from_float_round_trips_dyadic_values() {
        for v in [0.0, 1.0, -2.5, 0.1, 1e-15, 12345.6789] {
            assert_eq!(rational_to_f64(&rational_from(v)), v);
        }
    }

    #[test]
    fn non_finite_input_maps_to_zero() {
        assert!(rational_from(f64::NAN).is_zero());
        assert!(rational_from(f64::INFINITY).is_zero());
    }

    #[test]
    fn cross_product_matches_inexact_version() {
        let a = ExactVector::from_f64(&[1.0, 2.0, 3.0]);
        let b = ExactVector::from_f64(&[-2.0, 0.5, 4.0]);
        let c = a.cross(&b);
        let float = crate::geometry::vector::cross(&[1.0, 2.0, 3.0], &[-2.0, 0.5, 4.0]);
        for i in 0..3 {
            assert_eq!(rational_to_f64(c.element(i)), float[i]);
        }
    }

    #[test]
    fn exact_intersection_recovers_cramer_solution() {
        let normals = [
            ExactVector::from_f64(&[1.0, 0.0, 0.0]),
            ExactVector::from_f64(&[0.0, 1.0, 0.0]),
            ExactVector::from_f64(&[0.0, 0.0, 1.0]),
        ];
        let offsets = [rational_from(2.0), rational_from(-1.0), rational_from(0.5)];
        let point = exact_three_plane_intersection(&normals, &offsets).unwrap();
        assert_eq!(point.element(0), &rational_from(2.0));
        assert_eq!(point.element(1), &rational_from(-1.0));
        assert_eq!(point.element(2), &rational_from(0.5));
    }

    #[test]
    fn dependent_normals_yield_none() {
        let normals = [
            ExactVector::from_f64(&[1.0, 1.0, 0.0]),
            ExactVector::from_f64(&[2.0, 2.0, 0.0]),
            ExactVector::from_f64(&[0.0, 0.0, 1.0]),
        ];
        let offsets = [BigRational::one(), BigRational::one(), BigRational::one()];
        assert!(exact_three_plane_intersection(&normals, &offsets).is_none());
    }

    #[test]
    fn signum_distinguishes_the_three_cases() {
        assert_eq!(rational_signum(&rational_from(3.5)), 1);
        assert_eq!(rational_signum(&rational_from(-0.25)), -1);
        assert_eq!(rational_signum(&BigRational::zero()), 0);
    }
}
